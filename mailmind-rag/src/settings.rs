use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{RagError, RagResult};

/// Default OpenAI-compatible endpoint for embeddings
pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Environment variable holding the embedding API key by default
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

// ============ Embedding Service ============

/// Connection settings for the remote embedding service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Model identifier sent with every request
    pub model: String,
    /// Base URL; requests go to `{api_endpoint}/embeddings`
    pub api_endpoint: String,
    /// Read the API key from `api_key_env` (true) or use the inline `api_key` (false).
    /// Alias preserved for config files written by the mail pipeline.
    #[serde(alias = "credentials_from_environment")]
    pub credentials_from_env: bool,
    pub api_key_env: String,
    /// Inline credential, only consulted when `credentials_from_env` is false
    pub api_key: Option<String>,
    /// Expected vector length. Model-dependent, so never hardcoded.
    pub dimensions: Option<usize>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    /// Maximum number of inputs per HTTP request
    pub request_batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            credentials_from_env: true,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
            dimensions: None,
            timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 500,
            request_batch_size: 256,
        }
    }
}

impl EmbeddingSettings {
    /// Resolve the credential according to the credential source flag.
    ///
    /// Returns `Ok(None)` for keyless endpoints (inline mode with no key).
    /// An env-sourced credential that is not set is a configuration error.
    pub fn resolve_api_key(&self) -> RagResult<Option<String>> {
        if self.credentials_from_env {
            match std::env::var(&self.api_key_env) {
                Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
                _ => Err(RagError::Config(format!(
                    "credentials_from_env is set but {} is not defined",
                    self.api_key_env
                ))),
            }
        } else {
            Ok(self.api_key.clone().filter(|k| !k.trim().is_empty()))
        }
    }

    /// Check values that would otherwise fail late, at request time.
    pub fn validate(&self) -> RagResult<()> {
        if self.model.trim().is_empty() {
            return Err(RagError::Config("embedding model must not be empty".to_string()));
        }
        if !(self.api_endpoint.starts_with("http://") || self.api_endpoint.starts_with("https://")) {
            return Err(RagError::Config(format!(
                "embedding endpoint must be an http(s) URL, got '{}'",
                self.api_endpoint
            )));
        }
        if self.max_attempts == 0 {
            return Err(RagError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.request_batch_size == 0 {
            return Err(RagError::Config("request_batch_size must be at least 1".to_string()));
        }
        if self.dimensions == Some(0) {
            return Err(RagError::Config("dimensions must be positive".to_string()));
        }
        Ok(())
    }
}

// ============ Retrieval Core ============

/// Settings for ingestion and retrieval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagSettings {
    pub embedding: EmbeddingSettings,
    /// Knowledge-base root scanned by `build`
    pub documents_dir: Option<PathBuf>,
    /// Directory holding the vector artifact and its sidecar
    pub index_dir: PathBuf,
    pub max_chunk_length: usize,
    pub top_k: usize,
    /// Number of query embeddings kept in memory (0 disables the cache)
    pub query_cache_capacity: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            embedding: EmbeddingSettings::default(),
            documents_dir: None,
            index_dir: crate::paths::get_default_index_dir(),
            max_chunk_length: crate::actors::rag::DEFAULT_MAX_CHUNK_LENGTH,
            top_k: crate::actors::rag::DEFAULT_TOP_K,
            query_cache_capacity: 256,
        }
    }
}

impl RagSettings {
    pub fn validate(&self) -> RagResult<()> {
        self.embedding.validate()?;
        if self.max_chunk_length == 0 {
            return Err(RagError::Config("max_chunk_length must be positive".to_string()));
        }
        Ok(())
    }
}

/// Load settings from a config file.
///
/// A missing file yields defaults; a file that exists but does not parse is an
/// error so a typo never silently points the core at the wrong endpoint.
/// JSON5 is accepted (comments, trailing commas).
pub async fn load_settings(path: &Path) -> RagResult<RagSettings> {
    let settings = match fs::read_to_string(path).await {
        Ok(contents) => {
            let settings: RagSettings = json5::from_str(&contents).map_err(|e| {
                RagError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            info!(path = %path.display(), "Settings loaded");
            settings
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "No config file found, using defaults");
            RagSettings::default()
        }
        Err(e) => return Err(RagError::Io(e)),
    };

    settings.validate()?;
    Ok(settings)
}

/// Save settings to a config file
pub async fn save_settings(path: &Path, settings: &RagSettings) -> RagResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    fs::write(path, contents).await?;

    info!(path = %path.display(), "Settings saved");
    Ok(())
}
