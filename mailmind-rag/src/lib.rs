pub mod actors;
pub mod cli;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod reply_context;
pub mod settings;
pub mod tabular_parser;

#[cfg(test)]
mod tests;

use actors::rag::{DirectoryDocumentSource, HttpEmbedder, IndexBuilder, RagHandle, Retriever};
use cli::{apply_cli_overrides, read_value_or_file, CliArgs, Command};
use error::{RagError, RagResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Run one CLI command against the configured index.
pub async fn run(args: CliArgs) -> RagResult<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(paths::get_default_config_path);
    let mut settings = settings::load_settings(&config_path).await?;
    apply_cli_overrides(&args, &mut settings);
    settings.validate()?;

    let embedder = Arc::new(HttpEmbedder::new(&settings.embedding)?);
    let builder = IndexBuilder::new(
        embedder.clone(),
        settings.index_dir.clone(),
        settings.max_chunk_length,
    );
    let retriever = Retriever::new(
        embedder,
        settings.index_dir.clone(),
        settings.query_cache_capacity,
    );

    match args.command {
        Command::Build { prefix, .. } => {
            let documents_dir = settings.documents_dir.clone().ok_or_else(|| {
                RagError::Config(
                    "no documents directory; pass --documents-dir or set documents_dir".to_string(),
                )
            })?;
            let source = Arc::new(DirectoryDocumentSource::new(documents_dir));
            let handle = RagHandle::spawn(source, builder, retriever);

            let result = handle.build_index(prefix).await?;
            for failure in &result.file_errors {
                warn!(file = %failure.file, error = %failure.error, "Document skipped");
            }
            info!(
                chunks = result.total_chunks,
                files = result.files_processed,
                failed = result.file_errors.len(),
                "Index rebuilt"
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Query { query, scores, .. } => {
            let query = read_value_or_file(&query).map_err(RagError::Config)?;

            // A one-shot query has no rebuild to serialize against
            if scores {
                let hits = retriever.retrieve_scored(&query, settings.top_k).await?;
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                let chunks = retriever
                    .retrieve_relevant_context(&query, settings.top_k)
                    .await?;
                println!("{}", chunks.join("\n\n"));
            }
        }
    }

    Ok(())
}
