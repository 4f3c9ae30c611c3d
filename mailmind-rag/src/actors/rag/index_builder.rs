//! Offline index construction.
//!
//! Chunks every document, embeds all chunk texts in one call and persists a
//! new generation. Nothing is written unless every step succeeds.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::document_chunker::chunk_text;
use super::embedder::Embedder;
use super::file_processor::{Document, DocumentBody};
use super::index_store::{persist_generation, FlatL2Index, IndexedChunk};
use super::row_flattener::flatten_rows;
use crate::error::{RagError, RagResult};
use crate::paths::{ensure_writable_index_dir, IndexPaths};
use crate::protocol::RagIndexResult;

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    index_dir: PathBuf,
    max_chunk_length: usize,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, index_dir: PathBuf, max_chunk_length: usize) -> Self {
        Self {
            embedder,
            index_dir,
            max_chunk_length,
        }
    }

    /// Chunks of one document: table rows are flattened, prose is chunked.
    pub fn chunk_document(&self, document: &Document) -> Vec<String> {
        match &document.body {
            DocumentBody::Prose(text) => chunk_text(text, self.max_chunk_length),
            DocumentBody::Table(table) => flatten_rows(table),
        }
    }

    /// Build and persist a new generation from `documents`.
    ///
    /// Fails with `EmptyCorpus` when no document yields a chunk and with the
    /// embedder's error when embedding fails; in both cases the previous
    /// generation is left in place.
    pub async fn build(&self, documents: &BTreeMap<String, Document>) -> RagResult<RagIndexResult> {
        let start = Instant::now();

        let mut chunks = Vec::new();
        let mut files_processed = 0usize;
        for (id, document) in documents {
            let texts = self.chunk_document(document);
            debug!(document = %id, chunks = texts.len(), "Document chunked");
            if !texts.is_empty() {
                files_processed += 1;
            }
            chunks.extend(texts.into_iter().map(|content| IndexedChunk {
                chunk_id: Uuid::new_v4().to_string(),
                source_file: id.clone(),
                content,
            }));
        }

        if chunks.is_empty() {
            return Err(RagError::EmptyCorpus);
        }

        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            model = self.embedder.model_name(),
            "Embedding chunks"
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::EmbeddingService(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if dimensions == 0 {
            return Err(RagError::EmbeddingService(
                "embedder returned empty vectors".to_string(),
            ));
        }
        let mut index = FlatL2Index::new(dimensions);
        for vector in &vectors {
            index.add(vector)?;
        }

        ensure_writable_index_dir(&self.index_dir).await?;
        persist_generation(
            &IndexPaths::new(&self.index_dir),
            &index,
            &chunks,
            self.embedder.model_name(),
        )
        .await?;

        info!(
            chunks = chunks.len(),
            files = files_processed,
            dimensions,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Index build complete"
        );

        Ok(RagIndexResult {
            total_chunks: chunks.len(),
            files_processed,
            file_errors: Vec::new(),
            dimensions,
            model: self.embedder.model_name().to_string(),
        })
    }
}
