use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::RagResult;

// ============ RAG Types ============

/// A retrieved chunk with its source information and distance to the query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    /// Position of the chunk in the index generation
    pub position: usize,
    pub chunk_id: String,
    pub source_file: String,
    pub content: String,
    /// Squared L2 distance; smaller is closer
    pub distance: f32,
}

/// A document that could not be read during ingestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileError {
    pub file: String,
    pub error: String,
}

/// Result of building an index generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagIndexResult {
    pub total_chunks: usize,
    pub files_processed: usize,
    /// Documents skipped because they failed to read
    pub file_errors: Vec<FileError>,
    pub dimensions: usize,
    pub model: String,
}

// ============ Actor Messages ============

/// Messages handled by the retrieval actor, one at a time
pub enum RagMsg {
    /// Load documents from the configured source and rebuild the index
    BuildIndex {
        prefix: Option<String>,
        respond_to: oneshot::Sender<RagResult<RagIndexResult>>,
    },
    /// Return the chunk texts closest to the query, closest first
    RetrieveContext {
        query: String,
        top_k: usize,
        respond_to: oneshot::Sender<RagResult<Vec<String>>>,
    },
    /// Same as `RetrieveContext`, keeping positions, sources and distances
    RetrieveScored {
        query: String,
        top_k: usize,
        respond_to: oneshot::Sender<RagResult<Vec<ScoredChunk>>>,
    },
}
