//! Query-time retrieval and the actor that serializes it with rebuilds.
//!
//! `Retriever` loads the current index generation, embeds the query and
//! returns the closest chunks. `RagRetrievalActor` owns a document source,
//! an `IndexBuilder` and a `Retriever` and handles one `RagMsg` at a time, so
//! a rebuild never runs while a query issued through the actor is reading.

use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::embedder::Embedder;
use super::file_processor::DocumentSource;
use super::index_builder::IndexBuilder;
use super::index_store::PersistedIndex;
use crate::error::{RagError, RagResult};
use crate::paths::IndexPaths;
use crate::protocol::{RagIndexResult, RagMsg, ScoredChunk};

/// Default number of chunks returned per query
pub const DEFAULT_TOP_K: usize = 5;

/// Capacity of the actor's message queue
const MAILBOX_CAPACITY: usize = 32;

// ============================================================================
// RETRIEVER
// ============================================================================

/// Answers similarity queries against the persisted index.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index_dir: PathBuf,
    /// (model, query) -> query vector. `None` when caching is disabled.
    query_cache: Option<Mutex<LruCache<(String, String), Vec<f32>>>>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index_dir: PathBuf, cache_capacity: usize) -> Self {
        Self {
            embedder,
            index_dir,
            query_cache: NonZeroUsize::new(cache_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Chunk texts closest to `query`, closest first. At most `top_k` entries,
    /// fewer when the index holds fewer chunks.
    pub async fn retrieve_relevant_context(&self, query: &str, top_k: usize) -> RagResult<Vec<String>> {
        Ok(self
            .retrieve_scored(query, top_k)
            .await?
            .into_iter()
            .map(|hit| hit.content)
            .collect())
    }

    /// Like `retrieve_relevant_context`, keeping sources and distances.
    pub async fn retrieve_scored(&self, query: &str, top_k: usize) -> RagResult<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let index = PersistedIndex::load(&IndexPaths::new(&self.index_dir)).await?;

        if index.model != self.embedder.model_name() {
            warn!(
                index_model = %index.model,
                query_model = self.embedder.model_name(),
                "Index was built with a different embedding model"
            );
        }

        let query_vector = self.query_vector(query).await?;
        let hits = index.search(&query_vector, top_k)?;

        info!(
            results = hits.len(),
            top_k,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query served"
        );
        Ok(hits)
    }

    async fn query_vector(&self, query: &str) -> RagResult<Vec<f32>> {
        let key = (self.embedder.model_name().to_string(), query.to_string());

        if let Some(cache) = &self.query_cache {
            if let Ok(mut cache) = cache.lock() {
                if let Some(vector) = cache.get(&key) {
                    debug!("Query embedding cache hit");
                    return Ok(vector.clone());
                }
            }
        }

        let batch = self.embedder.embed_query(query).await?;
        let vector = batch
            .row(0)
            .map(<[f32]>::to_vec)
            .ok_or_else(|| RagError::EmbeddingService("empty query embedding".to_string()))?;

        if let Some(cache) = &self.query_cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(key, vector.clone());
            }
        }
        Ok(vector)
    }
}

// ============================================================================
// RAG RETRIEVAL ACTOR
// ============================================================================

/// The RAG Actor handles index rebuilds and queries, one message at a time
pub struct RagRetrievalActor {
    rx: mpsc::Receiver<RagMsg>,
    source: Arc<dyn DocumentSource>,
    builder: IndexBuilder,
    retriever: Retriever,
}

impl RagRetrievalActor {
    pub fn new(
        rx: mpsc::Receiver<RagMsg>,
        source: Arc<dyn DocumentSource>,
        builder: IndexBuilder,
        retriever: Retriever,
    ) -> Self {
        Self {
            rx,
            source,
            builder,
            retriever,
        }
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                RagMsg::BuildIndex { prefix, respond_to } => {
                    if respond_to.is_closed() {
                        debug!("Build request abandoned before start");
                        continue;
                    }
                    let result = self.build_index(prefix.as_deref()).await;
                    let _ = respond_to.send(result);
                }
                RagMsg::RetrieveContext {
                    query,
                    top_k,
                    respond_to,
                } => {
                    let work = self.retriever.retrieve_relevant_context(&query, top_k);
                    serve_cancellable(respond_to, work).await;
                }
                RagMsg::RetrieveScored {
                    query,
                    top_k,
                    respond_to,
                } => {
                    let work = self.retriever.retrieve_scored(&query, top_k);
                    serve_cancellable(respond_to, work).await;
                }
            }
        }
        debug!("RagActor: mailbox closed, shutting down");
    }

    async fn build_index(&self, prefix: Option<&str>) -> RagResult<RagIndexResult> {
        let batch = self.source.list_documents(prefix).await?;
        let mut result = self.builder.build(&batch.documents).await?;
        result.file_errors = batch.file_errors;
        Ok(result)
    }
}

/// Run `work` unless the caller goes away first. Dropping the query
/// mid-flight is safe: generations are immutable and read wholesale.
async fn serve_cancellable<T>(
    mut respond_to: oneshot::Sender<RagResult<T>>,
    work: impl Future<Output = RagResult<T>>,
) {
    if respond_to.is_closed() {
        debug!("Query abandoned before start");
        return;
    }

    let outcome = tokio::select! {
        _ = respond_to.closed() => None,
        result = work => Some(result),
    };

    match outcome {
        Some(result) => {
            let _ = respond_to.send(result);
        }
        None => debug!("Query cancelled by caller"),
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Cloneable front door to a running `RagRetrievalActor`
#[derive(Clone)]
pub struct RagHandle {
    tx: mpsc::Sender<RagMsg>,
}

impl RagHandle {
    /// Spawn the actor on the current runtime.
    pub fn spawn(source: Arc<dyn DocumentSource>, builder: IndexBuilder, retriever: Retriever) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = RagRetrievalActor::new(rx, source, builder, retriever);
        tokio::spawn(actor.run());
        Self { tx }
    }

    pub async fn build_index(&self, prefix: Option<String>) -> RagResult<RagIndexResult> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RagMsg::BuildIndex { prefix, respond_to }).await?;
        rx.await.map_err(|_| RagError::ActorUnavailable)?
    }

    pub async fn retrieve_relevant_context(&self, query: &str, top_k: usize) -> RagResult<Vec<String>> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RagMsg::RetrieveContext {
            query: query.to_string(),
            top_k,
            respond_to,
        })
        .await?;
        rx.await.map_err(|_| RagError::ActorUnavailable)?
    }

    pub async fn retrieve_scored(&self, query: &str, top_k: usize) -> RagResult<Vec<ScoredChunk>> {
        let (respond_to, rx) = oneshot::channel();
        self.send(RagMsg::RetrieveScored {
            query: query.to_string(),
            top_k,
            respond_to,
        })
        .await?;
        rx.await.map_err(|_| RagError::ActorUnavailable)?
    }

    async fn send(&self, msg: RagMsg) -> RagResult<()> {
        self.tx.send(msg).await.map_err(|_| RagError::ActorUnavailable)
    }
}
