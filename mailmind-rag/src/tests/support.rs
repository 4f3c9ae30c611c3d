//! Shared fixtures for the retrieval tests.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::actors::rag::Embedder;
use crate::error::{RagError, RagResult};

/// Get the path to the test-data directory
pub fn test_data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("test-data")
}

/// Deterministic embedder: normalized counts of hashed character trigrams.
///
/// Identical texts get identical vectors, and texts sharing words land close
/// together, which is all the end-to-end tests rely on.
pub struct HashEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        let mut vector = vec![0.0f32; self.dimensions];
        for window in chars.windows(3) {
            // FNV-1a over the trigram
            let mut hash: u64 = 0xcbf29ce484222325;
            for c in window {
                hash ^= *c as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hash-trigram-test"
    }
}

/// Embedder whose service is always down
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingService(
            "connection refused (gave up after 3 attempts)".to_string(),
        ))
    }

    fn model_name(&self) -> &str {
        "hash-trigram-test"
    }
}

/// Embedder that stalls on queries starting with `stall_prefix` and
/// otherwise behaves like `HashEmbedder`.
pub struct StallingEmbedder {
    inner: HashEmbedder,
    stall_prefix: String,
    completed_stalls: AtomicUsize,
}

impl StallingEmbedder {
    pub fn new(dimensions: usize, stall_prefix: &str) -> Self {
        Self {
            inner: HashEmbedder::new(dimensions),
            stall_prefix: stall_prefix.to_string(),
            completed_stalls: AtomicUsize::new(0),
        }
    }

    /// Stalled calls that ran to completion instead of being dropped
    pub fn completed_stalls(&self) -> usize {
        self.completed_stalls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StallingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.starts_with(&self.stall_prefix)) {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            self.completed_stalls.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.embed_batch(texts).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Write a minimal DOCX with one `w:p` per paragraph.
pub fn write_docx(path: &Path, paragraphs: &[&str]) {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{}</w:body></w:document>",
        body
    );

    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("word/document.xml", zip::write::FileOptions::default())
        .unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap();
}
