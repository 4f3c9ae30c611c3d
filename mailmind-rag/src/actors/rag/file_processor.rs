//! Document loading for knowledge-base ingestion.
//!
//! A `DocumentSource` yields the documents of one ingestion run keyed by
//! identifier. Only word-processor documents and tables are supported; any
//! other file is skipped with a notice, and a file that fails to decode is
//! recorded in the batch's `file_errors` without stopping the run.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::row_flattener::flatten_rows;
use crate::error::{RagError, RagResult};
use crate::protocol::FileError;
use crate::tabular_parser::{is_tabular_extension, parse_tabular_file, TabularData};

/// Supported content types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    WordProcessor,
    Table,
}

impl DocumentKind {
    /// Detect the content type from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "docx" => Some(DocumentKind::WordProcessor),
            e if is_tabular_extension(e) => Some(DocumentKind::Table),
            _ => None,
        }
    }
}

/// Decoded content of a document
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentBody {
    /// Running text, one line per paragraph
    Prose(String),
    Table(TabularData),
}

/// One source document of an ingestion run. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: DocumentBody,
}

impl Document {
    pub fn prose(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: DocumentBody::Prose(text.into()),
        }
    }

    pub fn table(id: impl Into<String>, table: TabularData) -> Self {
        Self {
            id: id.into(),
            body: DocumentBody::Table(table),
        }
    }

    /// The document as plain text. Tables render one flattened row per line.
    pub fn raw_text(&self) -> String {
        match &self.body {
            DocumentBody::Prose(text) => text.clone(),
            DocumentBody::Table(table) => flatten_rows(table).join("\n"),
        }
    }
}

/// Documents of one ingestion run, ordered by identifier
#[derive(Debug, Clone, Default)]
pub struct DocumentBatch {
    pub documents: BTreeMap<String, Document>,
    pub file_errors: Vec<FileError>,
}

/// Supplies the raw documents an index is built from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// List every supported document whose identifier starts with `prefix`.
    async fn list_documents(&self, prefix: Option<&str>) -> RagResult<DocumentBatch>;
}

/// Serves documents from a local directory tree.
///
/// Identifiers are paths relative to the root with `/` separators, so they
/// behave like object-store keys under a prefix filter.
#[derive(Debug, Clone)]
pub struct DirectoryDocumentSource {
    root: PathBuf,
}

impl DirectoryDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// All non-hidden files under the root, walked depth-first.
    async fn collect_files_recursive(&self, dir: &Path) -> RagResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        let mut is_root = true;

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                // The root itself must be readable; subdirectories are best-effort
                Err(e) if is_root => return Err(e.into()),
                Err(e) => {
                    warn!(dir = %current.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            is_root = false;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

                // Skip hidden files and directories
                if file_name.starts_with('.') {
                    continue;
                }

                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    fn identifier_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl DocumentSource for DirectoryDocumentSource {
    async fn list_documents(&self, prefix: Option<&str>) -> RagResult<DocumentBatch> {
        let files = self.collect_files_recursive(&self.root).await.map_err(|e| {
            RagError::Config(format!(
                "cannot read documents directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut batch = DocumentBatch::default();
        let mut skipped = 0usize;

        for path in files {
            let id = self.identifier_for(&path);
            if let Some(prefix) = prefix {
                if !id.starts_with(prefix) {
                    continue;
                }
            }

            let Some(kind) = DocumentKind::from_path(&path) else {
                info!(document = %id, "Skipping unsupported file type");
                skipped += 1;
                continue;
            };

            match load_document(&path, &id, kind).await {
                Ok(document) => {
                    debug!(document = %id, ?kind, "Document loaded");
                    batch.documents.insert(id, document);
                }
                Err(e) => {
                    warn!(error = %e, "Document could not be read, skipping");
                    batch.file_errors.push(FileError {
                        file: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            root = %self.root.display(),
            documents = batch.documents.len(),
            failed = batch.file_errors.len(),
            skipped,
            "Documents discovered"
        );

        Ok(batch)
    }
}

/// Decode one file off the async runtime.
async fn load_document(path: &Path, id: &str, kind: DocumentKind) -> RagResult<Document> {
    let owned_path = path.to_path_buf();
    let decoded = tokio::task::spawn_blocking(move || match kind {
        DocumentKind::WordProcessor => {
            extract_docx_text_content(&owned_path).map(DocumentBody::Prose)
        }
        DocumentKind::Table => parse_tabular_file(&owned_path).map(DocumentBody::Table),
    })
    .await
    .map_err(|e| format!("decoder task failed: {}", e))
    .and_then(|result| result);

    match decoded {
        Ok(body) => Ok(Document {
            id: id.to_string(),
            body,
        }),
        Err(reason) => Err(RagError::DocumentRead {
            document: id.to_string(),
            reason,
        }),
    }
}

/// Extract paragraph text from a DOCX file.
pub fn extract_docx_text_content(file_path: &Path) -> Result<String, String> {
    let file =
        std::fs::File::open(file_path).map_err(|e| format!("Failed to open DOCX: {}", e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| format!("Invalid DOCX archive: {}", e))?;

    let mut doc_xml = archive
        .by_name("word/document.xml")
        .map_err(|_| "No document.xml found in DOCX".to_string())?;

    let mut xml_content = String::new();
    doc_xml
        .read_to_string(&mut xml_content)
        .map_err(|e| format!("Failed to read document.xml: {}", e))?;

    Ok(extract_plaintext_from_docx_xml(&xml_content))
}

/// Extract text content from DOCX XML (word/document.xml), one line per paragraph.
pub fn extract_plaintext_from_docx_xml(xml: &str) -> String {
    let mut result = String::new();
    let mut in_text = false;
    // Tab-stop definitions in paragraph properties are also `w:tab`
    let mut in_run = false;
    let mut chars = xml.chars();

    while let Some(c) = chars.next() {
        if c == '<' {
            let mut tag = String::new();
            for tc in chars.by_ref() {
                if tc == '>' {
                    break;
                }
                tag.push(tc);
            }

            let self_closing = tag.ends_with('/');
            let name = tag
                .trim_end_matches('/')
                .split_whitespace()
                .next()
                .unwrap_or("");

            match name {
                "w:r" if !self_closing => in_run = true,
                "/w:r" => in_run = false,
                "w:t" if !self_closing => in_text = true,
                "/w:t" => in_text = false,
                "w:p" => {
                    if !result.is_empty() && !result.ends_with('\n') {
                        result.push('\n');
                    }
                }
                "w:tab" if in_run => result.push('\t'),
                "w:br" | "w:cr" => result.push('\n'),
                _ => {}
            }
        } else if in_text {
            result.push(c);
        }
    }

    decode_xml_entities(&result)
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
