//! Centralized path resolution for settings and index artifacts.
//!
//! The index lives in a single directory holding two co-located files: the
//! vector artifact and its JSON sidecar. Builds write a complete new
//! generation into a sibling staging directory and swap it into place by
//! rename, so readers never observe one new file next to one old file.
//!
//! ## Platform Directory Standards
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Config | `~/.config/mailmind/` | `~/Library/Application Support/mailmind/` |
//! | Data | `~/.local/share/mailmind/` | `~/Library/Application Support/mailmind/` |

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RagError, RagResult};

/// Application name used in directory paths
const APP_NAME: &str = "mailmind";

/// File name of the persisted similarity-search structure
pub const VECTORS_FILE_NAME: &str = "rag_index.arrow";

/// File name of the chunk text + metadata sidecar
pub const SIDECAR_FILE_NAME: &str = "rag_chunks.json";

/// Get the configuration directory.
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| fallback_base_dir().join("config"))
}

/// Get the data directory (index artifacts).
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| fallback_base_dir().join("data"))
}

/// Default location of the settings file
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("rag.json")
}

/// Default location of the index directory
pub fn get_default_index_dir() -> PathBuf {
    get_data_dir().join("rag-index")
}

/// Fallback base directory when platform dirs are unavailable.
///
/// Tries in order:
/// 1. `~/.mailmind/` (home directory)
/// 2. `./.mailmind/` (current working directory)
fn fallback_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".mailmind"))
        .unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".mailmind")
        })
}

/// Locations of one index generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    dir: PathBuf,
}

impl IndexPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_file(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE_NAME)
    }

    pub fn sidecar_file(&self) -> PathBuf {
        self.dir.join(SIDECAR_FILE_NAME)
    }

    /// Whether both artifacts are present on disk.
    pub async fn exists(&self) -> bool {
        fs::metadata(self.vectors_file()).await.is_ok()
            && fs::metadata(self.sidecar_file()).await.is_ok()
    }

    /// A hidden, unique sibling of the index directory.
    fn sibling(&self, tag: &str) -> PathBuf {
        let name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "rag-index".to_string());
        let parent = self.dir.parent().unwrap_or(Path::new("."));
        parent.join(format!(".{}.{}-{}", name, tag, Uuid::new_v4().simple()))
    }

    /// Create an empty staging directory for a new generation.
    pub async fn create_staging(&self) -> RagResult<IndexPaths> {
        let staging = self.sibling("staging");
        fs::create_dir_all(&staging).await?;
        debug!(staging = %staging.display(), "Created staging directory");
        Ok(IndexPaths::new(staging))
    }

    /// Replace the current generation with a fully written staging generation.
    ///
    /// The previous generation is moved aside first and restored if the final
    /// rename fails, so the index directory always holds a complete pair.
    pub async fn swap_in(&self, staging: &IndexPaths) -> RagResult<()> {
        let retired = self.sibling("retired");
        let had_previous = fs::metadata(&self.dir).await.is_ok();

        if had_previous {
            fs::rename(&self.dir, &retired).await?;
        }

        if let Err(e) = fs::rename(staging.dir(), &self.dir).await {
            if had_previous {
                if let Err(restore_err) = fs::rename(&retired, &self.dir).await {
                    warn!(
                        retired = %retired.display(),
                        error = %restore_err,
                        "Failed to restore previous index generation"
                    );
                }
            }
            return Err(RagError::Io(e));
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&retired).await {
                warn!(retired = %retired.display(), error = %e, "Failed to remove retired index generation");
            }
        }

        info!(dir = %self.dir.display(), "Index generation swapped into place");
        Ok(())
    }

    /// Remove a staging directory left behind by a failed build.
    pub async fn discard(&self) {
        if let Err(e) = fs::remove_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to remove staging directory");
        }
    }
}

/// Test if a directory is writable by creating and removing a test file.
async fn test_write_access(dir: &Path) -> bool {
    if fs::create_dir_all(dir).await.is_err() {
        return false;
    }

    let test_file = dir.join(format!(".write-test-{}", Uuid::new_v4()));
    match fs::write(&test_file, b"test").await {
        Ok(_) => {
            let _ = fs::remove_file(&test_file).await;
            true
        }
        Err(_) => false,
    }
}

/// Check that a build can write a generation for `index_dir`.
///
/// Staging directories are created next to the index directory, so write
/// access is checked on the parent. There is no fallback location: queries
/// read `index_dir` and nothing else, so a build must land exactly there.
pub async fn ensure_writable_index_dir(index_dir: &Path) -> RagResult<()> {
    let parent = index_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    if test_write_access(parent).await {
        return Ok(());
    }

    debug!(path = %index_dir.display(), "Index location not writable");
    Err(RagError::Io(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("index directory {} is not writable", index_dir.display()),
    )))
}
