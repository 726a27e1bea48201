//! Command implementations behind the `srag` binary.
//!
//! Each `run_*` function builds the embedding provider, opens the store in
//! the mode the command needs (read-only for `query`, `context`, `info`),
//! performs one operation and prints the result to stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use script_rag_core::embedding::EmbeddingProvider;
use script_rag_core::error::RagError;
use script_rag_core::models::{Document, RetrievedChunk};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::extract::extract_text_from_path;
use crate::service::{RetrievalService, ServiceOptions};

/// Output style for `srag query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum QueryFormat {
    Simple,
    Detailed,
    Json,
}

/// Build the configured provider off the async workers; a local model is
/// downloaded and loaded here.
async fn load_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedding = config.embedding.clone();
    tokio::task::spawn_blocking(move || create_provider(&embedding))
        .await
        .context("embedding provider setup task failed")?
}

async fn open_writable(config: &Config) -> Result<RetrievalService> {
    let provider = load_provider(config).await?;
    Ok(RetrievalService::open(
        &config.storage.path,
        provider,
        ServiceOptions::from_config(config),
    )
    .await?)
}

async fn open_read_only(config: &Config) -> Result<RetrievalService> {
    let provider = load_provider(config).await?;
    Ok(RetrievalService::open_read_only(
        &config.storage.path,
        provider,
        ServiceOptions::from_config(config),
    )
    .await?)
}

/// Extract `path`, chunk, embed and store it under `name` (default: file stem).
///
/// Ctrl-C during embedding aborts the add without writing anything.
pub async fn run_add(config: &Config, path: &Path, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive a document name from {}", path.display()))?,
    };

    let owned: PathBuf = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || extract_text_from_path(&owned))
        .await
        .context("text extraction task failed")??;

    let service = open_writable(config).await?;

    let token = CancellationToken::new();
    let watcher = token.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling add");
            watcher.cancel();
        }
    });

    let document = Document::new(&name, &text).with_source_path(path.display().to_string());
    let result = service.add(document, &token).await;
    ctrl_c.abort();
    let report = result?;

    println!(
        "Added {} as '{}': {} chunks",
        path.display(),
        report.document_name,
        report.chunks
    );
    Ok(())
}

pub async fn run_remove(config: &Config, name: &str) -> Result<()> {
    let service = open_writable(config).await?;
    let removed = service.remove_document(name).await?;
    if removed == 0 {
        println!("No document named '{}'; nothing removed.", name);
    } else {
        println!("Removed '{}': {} chunks", name, removed);
    }
    Ok(())
}

pub async fn run_query(
    config: &Config,
    text: &str,
    top_k: Option<usize>,
    format: QueryFormat,
) -> Result<()> {
    let service = open_read_only(config).await?;
    let k = top_k.unwrap_or(config.retrieval.top_k);
    let results = service.query(text, k).await?;

    if format == QueryFormat::Json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No relevant results found.");
        return Ok(());
    }

    println!("Query: '{}'", text);
    println!("Found {} relevant results:\n", results.len());
    for result in &results {
        match format {
            QueryFormat::Detailed => print_detailed(result),
            _ => println!(
                "{}. [{:.3}] {}",
                result.rank,
                result.score,
                preview(&result.chunk_text, 100)
            ),
        }
    }
    Ok(())
}

fn print_detailed(result: &RetrievedChunk) {
    println!("--- Result {} ---", result.rank);
    println!("Similarity Score: {:.3}", result.score);
    println!("Source: {}", result.document_name);
    println!("Chunk ID: {}", result.chunk_id);
    println!("Offsets: {}..{}", result.start_offset, result.end_offset);
    println!("Content: {}", preview(&result.chunk_text, 200));
    println!();
}

/// First `max_chars` characters on one line, with `...` when cut.
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

pub async fn run_context(
    config: &Config,
    text: &str,
    top_k: Option<usize>,
    max_chars: Option<usize>,
) -> Result<()> {
    let service = open_read_only(config).await?;
    let k = top_k.unwrap_or(config.retrieval.top_k);
    let max_chars = max_chars.unwrap_or(config.retrieval.max_context_chars);
    let context = service.format_context(text, k, max_chars).await?;

    if context.is_empty() {
        println!("No relevant context found in the script database.");
    } else {
        print!("{}", context);
    }
    Ok(())
}

pub async fn run_info(config: &Config) -> Result<()> {
    let service = open_read_only(config).await?;
    let info = service.info().await;

    println!("storage: {}", info.storage_path.display());
    println!("documents: {}", info.documents);
    println!("chunks: {}", info.chunks);
    println!("embedding_model: {}", info.config.embedding_model);
    println!("dimension: {}", info.config.dimension);
    println!("metric: {}", info.config.metric);
    println!("chunk_size: {}", info.config.chunk_size);
    println!("chunk_overlap: {}", info.config.chunk_overlap);
    println!("next_chunk_id: {}", info.next_chunk_id);
    match info.last_saved {
        Some(ts) => println!("last_saved: {}", ts.to_rfc3339()),
        None => println!("last_saved: never"),
    }
    println!("sources: {}", info.sources.join(", "));
    Ok(())
}

pub async fn run_clear(config: &Config, confirm: bool) -> Result<()> {
    if !confirm {
        println!("This will clear the entire vector database!");
        println!("Use --confirm to proceed.");
        return Ok(());
    }
    let service = open_writable(config).await?;
    service.clear().await?;
    println!("Vector database cleared.");
    Ok(())
}

pub async fn run_rebuild(config: &Config) -> Result<()> {
    let provider = load_provider(config).await?;
    let service = RetrievalService::open_for_rebuild(
        &config.storage.path,
        provider,
        ServiceOptions::from_config(config),
    )
    .await?;
    let chunks = service.rebuild().await?;
    println!("Rebuilt index: {} chunks re-embedded.", chunks);
    Ok(())
}

/// Error kind shown in `error[<Kind>]: ...`.
///
/// The first [`RagError`] in the cause chain names the kind; anything else
/// (configuration, provider setup) reports as `Config`.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RagError>())
        .map(RagError::kind)
        .unwrap_or("Config")
}
