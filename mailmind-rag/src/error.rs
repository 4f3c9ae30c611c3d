use thiserror::Error;

/// Errors raised by the retrieval core.
#[derive(Error, Debug)]
pub enum RagError {
    /// The embedding endpoint was unreachable, rejected the request, or
    /// returned something that is not one vector per input.
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    /// A single source document could not be decoded. Ingestion skips it.
    #[error("Failed to read document '{document}': {reason}")]
    DocumentRead { document: String, reason: String },

    /// Persisted artifacts are missing, unreadable or truncated.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// The positional artifacts disagree in count.
    #[error("Index corrupted: {vectors} vectors, {chunks} chunk texts, {meta} metadata entries")]
    IndexCorruption {
        vectors: usize,
        chunks: usize,
        meta: usize,
    },

    /// The artifacts agree in count but not in content (checksum or dimension).
    #[error("Index corrupted: {0}")]
    IndexChecksum(String),

    /// Ingestion produced no chunks, so there is nothing to index.
    #[error("No chunks were produced from the supplied documents")]
    EmptyCorpus,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The retrieval actor has shut down or dropped the request.
    #[error("Retrieval actor is not running")]
    ActorUnavailable,
}

impl RagError {
    /// Whether the index itself is unusable (as opposed to a failed call).
    pub fn is_index_error(&self) -> bool {
        matches!(
            self,
            RagError::IndexUnavailable(_)
                | RagError::IndexCorruption { .. }
                | RagError::IndexChecksum(_)
        )
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        RagError::EmbeddingService(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for RagError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        RagError::IndexUnavailable(e.to_string())
    }
}

pub type RagResult<T> = Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_error_classification() {
        assert!(RagError::IndexUnavailable("gone".to_string()).is_index_error());
        assert!(RagError::IndexCorruption {
            vectors: 3,
            chunks: 2,
            meta: 2
        }
        .is_index_error());
        assert!(!RagError::EmbeddingService("timeout".to_string()).is_index_error());
        assert!(!RagError::EmptyCorpus.is_index_error());
    }

    #[test]
    fn test_corruption_message_reports_all_counts() {
        let err = RagError::IndexCorruption {
            vectors: 4,
            chunks: 3,
            meta: 5,
        };
        let message = err.to_string();
        assert!(message.contains("4 vectors"));
        assert!(message.contains("3 chunk texts"));
        assert!(message.contains("5 metadata entries"));
    }
}
