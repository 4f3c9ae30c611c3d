//! Command-line argument parsing and launch configuration.
//!
//! This module handles CLI argument parsing using clap, and applies
//! launch-time overrides to the loaded settings.

use crate::settings::RagSettings;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

/// CLI arguments for mailmind-rag
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mailmind-rag",
    about = "Build and query the MailMind knowledge-base index"
)]
pub struct CliArgs {
    /// Settings file (JSON or JSON5). Defaults to the platform config dir.
    #[arg(long, value_name = "PATH", env = "MAILMIND_RAG_CONFIG")]
    pub config: Option<PathBuf>,
    /// Override the index directory
    #[arg(long, value_name = "DIR", env = "MAILMIND_INDEX_DIR")]
    pub index_dir: Option<PathBuf>,
    /// Override the embedding API base URL
    #[arg(long, value_name = "URL", env = "MAILMIND_EMBEDDING_ENDPOINT")]
    pub endpoint: Option<String>,
    /// Override the embedding model
    #[arg(long, value_name = "MODEL", env = "MAILMIND_EMBEDDING_MODEL")]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Rebuild the index from the knowledge-base documents
    Build {
        /// Knowledge-base root (overrides `documents_dir` from settings)
        #[arg(long, value_name = "DIR", env = "MAILMIND_DOCUMENTS_DIR")]
        documents_dir: Option<PathBuf>,
        /// Only index documents whose identifier starts with this prefix
        #[arg(long, value_name = "PREFIX")]
        prefix: Option<String>,
    },
    /// Print the chunks closest to a query
    Query {
        /// Query text (string or @path/to/file)
        #[arg(value_name = "TEXT_OR_@FILE")]
        query: String,
        /// Number of chunks to return
        #[arg(long, value_name = "INT")]
        top_k: Option<usize>,
        /// Include source file and distance for each chunk
        #[arg(long)]
        scores: bool,
    },
}

/// Read a value from either an inline string or a @path reference
pub fn read_value_or_file(raw: &str) -> Result<String, String> {
    if let Some(path) = raw.strip_prefix('@') {
        let contents = fs::read_to_string(Path::new(path))
            .map_err(|e| format!("Failed to read {}: {}", path, e))?;
        Ok(contents)
    } else {
        Ok(raw.to_string())
    }
}

/// Apply global overrides to settings loaded from disk
pub fn apply_cli_overrides(args: &CliArgs, settings: &mut RagSettings) {
    if let Some(dir) = &args.index_dir {
        settings.index_dir = dir.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        settings.embedding.api_endpoint = endpoint.clone();
    }
    if let Some(model) = &args.model {
        settings.embedding.model = model.clone();
    }
    if let Command::Build {
        documents_dir: Some(dir),
        ..
    } = &args.command
    {
        settings.documents_dir = Some(dir.clone());
    }
    if let Command::Query {
        top_k: Some(top_k), ..
    } = &args.command
    {
        settings.top_k = *top_k;
    }
}
