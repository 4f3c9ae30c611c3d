//! Embedding service client.
//!
//! The `Embedder` trait is the seam between the retrieval core and whatever
//! turns text into vectors. `HttpEmbedder` talks to an OpenAI-compatible
//! `/embeddings` endpoint with a client timeout and bounded retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{RagError, RagResult};
use crate::settings::EmbeddingSettings;

/// Upper bound for a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Sent in place of empty or whitespace-only inputs, which the service rejects
const BLANK_INPUT: &str = " ";

/// Row-major vectors of equal length
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBatch {
    pub dimensions: usize,
    pub values: Vec<f32>,
}

impl VectorBatch {
    /// Pack vectors into a batch, checking that they share one dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> RagResult<Self> {
        let dimensions = rows.first().map(Vec::len).unwrap_or(0);
        let mut values = Vec::with_capacity(dimensions * rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dimensions {
                return Err(RagError::EmbeddingService(format!(
                    "vector {} has {} dimensions, expected {}",
                    i,
                    row.len(),
                    dimensions
                )));
            }
            values.extend(row);
        }
        Ok(Self { dimensions, values })
    }

    pub fn num_rows(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.values.len() / self.dimensions
        }
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dimensions)?;
        self.values.get(start..start + self.dimensions)
    }
}

/// Converts text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;

    /// Embed a query as a single-row batch.
    async fn embed_query(&self, query: &str) -> RagResult<VectorBatch> {
        let rows = self.embed_batch(&[query.to_string()]).await?;
        if rows.len() != 1 {
            return Err(RagError::EmbeddingService(format!(
                "expected 1 query vector, got {}",
                rows.len()
            )));
        }
        VectorBatch::from_rows(rows)
    }

    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Outcome of one failed HTTP attempt
enum AttemptError {
    /// Transport failure, timeout, 429 or 5xx
    Retryable(String),
    Fatal(String),
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<usize>,
    max_attempts: u32,
    initial_backoff: Duration,
    request_batch_size: usize,
}

impl HttpEmbedder {
    /// Build a client from injected settings. The credential is resolved here, once.
    pub fn new(settings: &EmbeddingSettings) -> RagResult<Self> {
        settings.validate()?;
        let api_key = settings.resolve_api_key()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", settings.api_endpoint.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            max_attempts: settings.max_attempts,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            request_batch_size: settings.request_batch_size,
        })
    }

    async fn request_with_retry(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut delay = self.initial_backoff;
        let mut attempt = 1;

        loop {
            debug!(attempt, inputs = texts.len(), url = %self.url, "Embedding request");
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(AttemptError::Fatal(message)) => {
                    return Err(RagError::EmbeddingService(message));
                }
                Err(AttemptError::Retryable(message)) => {
                    if attempt >= self.max_attempts {
                        return Err(RagError::EmbeddingService(format!(
                            "{} (gave up after {} attempts)",
                            message, attempt
                        )));
                    }
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Embedding request failed, retrying"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
            }
        }
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("embedding API error {}: {}", status, body.trim());
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(AttemptError::Retryable(message))
            } else {
                Err(AttemptError::Fatal(message))
            };
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Retryable(format!("failed to read response: {}", e)))?;
        let parsed: EmbeddingResponse = serde_json::from_slice(&body)
            .map_err(|e| AttemptError::Fatal(format!("malformed embedding response: {}", e)))?;

        order_by_index(parsed.data, texts.len()).map_err(AttemptError::Fatal)
    }

    fn validate_dimensions(&self, vectors: &[Vec<f32>]) -> RagResult<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let expected = self.dimensions.unwrap_or(first.len());
        if expected == 0 {
            return Err(RagError::EmbeddingService(
                "embedding service returned empty vectors".to_string(),
            ));
        }
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected) {
            return Err(RagError::EmbeddingService(format!(
                "vector {} has {} dimensions, expected {}",
                i,
                v.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Put response items back into input order and check there is exactly one per input.
fn order_by_index(data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>, String> {
    if data.len() != expected {
        return Err(format!(
            "embedding service returned {} vectors for {} inputs",
            data.len(),
            expected
        ));
    }

    if data.iter().all(|d| d.index.is_none()) {
        return Ok(data.into_iter().map(|d| d.embedding).collect());
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in data {
        let index = item
            .index
            .ok_or_else(|| "embedding response mixes indexed and unindexed items".to_string())?;
        let Some(slot) = slots.get_mut(index) else {
            return Err(format!("embedding index {} out of range", index));
        };
        if slot.is_some() {
            return Err(format!("duplicate embedding index {}", index));
        }
        *slot = Some(item.embedding);
    }

    // Every slot is filled: counts match and indices are unique and in range.
    Ok(slots.into_iter().flatten().collect())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = texts
            .iter()
            .map(|t| {
                if t.trim().is_empty() {
                    BLANK_INPUT.to_string()
                } else {
                    t.clone()
                }
            })
            .collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.request_batch_size) {
            vectors.extend(self.request_with_retry(batch).await?);
        }

        self.validate_dimensions(&vectors)?;
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
