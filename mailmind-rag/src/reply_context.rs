//! Context assembly for the reply-generation step.
//!
//! Retrieval failures never stop a support email from being answered: the
//! reply is drafted without knowledge-base context and the reason is kept so
//! the caller can log it next to the processed message.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::actors::rag::{RagHandle, Retriever};
use crate::error::RagResult;

/// Anything that can answer `retrieve_relevant_context`
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve_relevant_context(&self, query: &str, top_k: usize) -> RagResult<Vec<String>>;
}

#[async_trait]
impl ContextRetriever for Retriever {
    async fn retrieve_relevant_context(&self, query: &str, top_k: usize) -> RagResult<Vec<String>> {
        Retriever::retrieve_relevant_context(self, query, top_k).await
    }
}

#[async_trait]
impl ContextRetriever for RagHandle {
    async fn retrieve_relevant_context(&self, query: &str, top_k: usize) -> RagResult<Vec<String>> {
        RagHandle::retrieve_relevant_context(self, query, top_k).await
    }
}

/// Knowledge-base context for one reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyContext {
    pub chunks: Vec<String>,
    /// Set when retrieval failed and the reply is drafted without context
    pub degraded_reason: Option<String>,
}

impl ReplyContext {
    pub fn is_degraded(&self) -> bool {
        self.degraded_reason.is_some()
    }

    /// Chunks joined one per line, as placed in the prompt
    pub fn joined(&self) -> String {
        self.chunks.join("\n")
    }
}

/// Query the knowledge base with the extracted fields of an email.
///
/// The query is the pretty-printed JSON of `extracted_info`.
pub async fn gather_reply_context(
    retriever: &dyn ContextRetriever,
    extracted_info: &Value,
    top_k: usize,
) -> ReplyContext {
    let query = serde_json::to_string_pretty(extracted_info).unwrap_or_else(|_| extracted_info.to_string());

    match retriever.retrieve_relevant_context(&query, top_k).await {
        Ok(chunks) => ReplyContext {
            chunks,
            degraded_reason: None,
        },
        Err(e) => {
            warn!(error = %e, "Retrieval failed, drafting reply without context");
            ReplyContext {
                chunks: Vec::new(),
                degraded_reason: Some(e.to_string()),
            }
        }
    }
}

/// Build the prompt handed to the reply-generation model.
pub fn build_reply_prompt(
    company: &str,
    category: &str,
    extracted_info: &Value,
    context: &ReplyContext,
) -> String {
    let info = serde_json::to_string_pretty(extracted_info).unwrap_or_else(|_| extracted_info.to_string());
    format!(
        "You are a customer support assistant for {company}.\n\n\
         You are responding to a customer email that falls under the category: **{category}**.\n\n\
         Below is the structured information extracted from the customer's email:\n{info}\n\n\
         Here is the relevant company information retrieved from internal documents:\n{context}\n\n\
         Using the information above:\n\
         - Write a professional and helpful email to the customer.\n\
         - Be concise and respectful.\n\
         - Include relevant details like order status, product name, or resolution steps if available.\n\
         - Maintain a polite and reassuring tone.\n\n\
         Do not write an email subject. Sign the email as \"{company} Team\" only at the end.\n\n\
         Respond with only the email content, written as a real customer support representative of {company}.\n",
        company = company,
        category = category,
        info = info,
        context = context.joined(),
    )
}
