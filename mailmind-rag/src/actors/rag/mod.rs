//! RAG (Retrieval-Augmented Generation) actor and document processing.
//!
//! This module provides:
//! - `RagRetrievalActor`: serializes index rebuilds and similarity queries
//! - Paragraph-packing chunking and table row flattening
//! - Document loading for DOCX and tabular files
//! - An HTTP embedding client with retries
//! - Flat L2 index generations persisted as Arrow IPC plus a JSON sidecar

mod document_chunker;
mod embedder;
mod file_processor;
mod index_builder;
mod index_store;
mod retrieval_actor;
mod row_flattener;

pub use retrieval_actor::{RagHandle, RagRetrievalActor, Retriever, DEFAULT_TOP_K};

pub use document_chunker::{chunk_text, is_single_line_overflow, DEFAULT_MAX_CHUNK_LENGTH};
pub use embedder::{Embedder, HttpEmbedder, VectorBatch};
pub use file_processor::{
    extract_docx_text_content, extract_plaintext_from_docx_xml, DirectoryDocumentSource, Document,
    DocumentBatch, DocumentBody, DocumentKind, DocumentSource,
};
pub use index_builder::IndexBuilder;
pub use index_store::{
    compute_content_hash, decode_vectors, encode_vectors, persist_generation, ChunkMeta,
    FlatL2Index, IndexedChunk, PersistedIndex, SidecarFile,
};
pub use row_flattener::{flatten_row, flatten_rows};
