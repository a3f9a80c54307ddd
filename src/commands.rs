use anyhow::{Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::embeddings::chunking::chunk_text;
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::pipeline::RagPipeline;
use crate::prompt::AnswerLength;
use crate::store::{VectorStore, WriteMode};

fn load_pipeline(write_mode: Option<WriteMode>) -> Result<RagPipeline> {
    let mut config = Config::load_default().context("Failed to load configuration")?;
    if let Some(mode) = write_mode {
        config.store.write_mode = mode;
    }
    RagPipeline::from_config(&config).context("Failed to set up pipeline")
}

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Chunk, embed and store documents for a tenant
#[inline]
pub async fn ingest_documents(
    tenant_id: &str,
    files: &[PathBuf],
    write_mode: Option<WriteMode>,
) -> Result<()> {
    let pipeline = load_pipeline(write_mode)?;

    let bar = spinner(&format!("Ingesting {} files for {}", files.len(), tenant_id));
    let result = pipeline
        .ingest_files(tenant_id, files, &PlainTextExtractor)
        .await;
    bar.finish_and_clear();

    let report = result.context("Ingestion failed")?;

    println!("Ingested documents for tenant '{}'", report.tenant_id);
    println!("  Documents: {}", report.documents);
    if report.skipped_documents > 0 {
        println!("  Skipped (no text): {}", report.skipped_documents);
    }
    println!("  Chunks: {}", report.chunks);
    println!("  Embedding dimension: {}", report.dimension);
    println!("  Store: {}", report.path.display());

    Ok(())
}

/// Print the chunks most similar to a query
#[inline]
pub async fn search_documents(
    tenant_id: &str,
    query: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let pipeline = load_pipeline(None)?;
    let top_k = top_k.unwrap_or_else(|| pipeline.default_top_k());

    let bar = spinner("Searching");
    let results = pipeline.search(tenant_id, query, top_k).await;
    bar.finish_and_clear();
    let results = results.context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("Top {} results for tenant '{}':", results.len(), tenant_id);
    for (rank, result) in results.iter().enumerate() {
        println!();
        println!("{}. similarity {:.4}", rank + 1, result.similarity);
        println!("   {}", result.chunk.replace('\n', "\n   "));
    }

    Ok(())
}

/// Answer a question from a tenant's documents
#[inline]
pub async fn ask_question(
    tenant_id: &str,
    query: &str,
    top_k: Option<usize>,
    length: Option<AnswerLength>,
    stream: bool,
    json: bool,
) -> Result<()> {
    let pipeline = load_pipeline(None)?;
    let top_k = top_k.unwrap_or_else(|| pipeline.default_top_k());

    if stream && !json {
        let bar = spinner("Retrieving context");
        let response = pipeline.query_stream(tenant_id, query, top_k, length).await;
        bar.finish_and_clear();
        let mut response = response.context("Query failed")?;

        info!("Answering from {} chunks", response.results.len());
        let mut stdout = std::io::stdout();
        while let Some(fragment) = response.answer.next().await {
            let fragment = fragment.context("Answer generation failed")?;
            write!(stdout, "{}", fragment)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
        return Ok(());
    }

    let bar = spinner("Generating answer");
    let response = pipeline.query(tenant_id, query, top_k, length).await;
    bar.finish_and_clear();
    let response = response.context("Query failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.answer.trim());
    println!();
    println!("Sources:");
    for result in &response.results {
        let preview: String = result.chunk.chars().take(80).collect();
        println!("  [{:.3}] {}", result.similarity, preview.replace('\n', " "));
    }

    Ok(())
}

/// Show how a file would be chunked
#[inline]
pub async fn show_chunks(file: &Path, max_length: usize, overlap: usize) -> Result<()> {
    let text = PlainTextExtractor
        .extract_file(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let chunks = chunk_text(&text, max_length, overlap);
    println!(
        "{} chunks (max length {}, overlap {})",
        chunks.len(),
        max_length,
        overlap
    );
    for (index, chunk) in chunks.iter().enumerate() {
        println!();
        println!("--- chunk {} ({} chars)", index, chunk.chars().count());
        println!("{}", chunk);
    }

    Ok(())
}

/// Summarize a file with the generation model
#[inline]
pub async fn summarize_file(file: &Path, length: AnswerLength) -> Result<()> {
    let pipeline = load_pipeline(None)?;
    let text = PlainTextExtractor
        .extract_file(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let bar = spinner("Summarizing");
    let summary = pipeline.summarize(&text, length).await;
    bar.finish_and_clear();

    println!("{}", summary.context("Summarization failed")?);
    Ok(())
}

/// Show configuration paths and every tenant store
#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;
    let store = VectorStore::new(config.store_path());

    println!("Policy RAG Status");
    println!("=================");
    println!("Config file: {}", config.config_file_path().display());
    println!("Vector store: {}", store.root().display());
    println!(
        "Embedding model: {} ({} dims)",
        config.ollama.model, config.ollama.embedding_dimension
    );
    println!("Generation model: {}", config.generation.model);
    println!("Write mode: {}", config.store.write_mode);
    println!();

    let tenants = store.list_tenants().await?;
    if tenants.is_empty() {
        println!("No tenants have ingested documents yet.");
        println!("Use 'policy-rag ingest <files>' to add some.");
        return Ok(());
    }

    println!("Tenants ({} total):", tenants.len());
    for tenant in &tenants {
        match store.manifest(tenant).await? {
            Some(manifest) => {
                println!("  {}", tenant);
                println!("     Records: {}", manifest.record_count);
                println!(
                    "     Model: {} ({} dims)",
                    manifest.embedding_model, manifest.dimension
                );
                println!(
                    "     Updated: {}",
                    manifest.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
                if manifest.embedding_model != config.ollama.model {
                    println!(
                        "     ⚠️  Embedded with a different model than configured; re-ingest before querying"
                    );
                }
            }
            None => {
                let records = store.load(tenant).await?;
                println!("  {}", tenant);
                println!("     Records: {} (no manifest)", records.len());
            }
        }
    }

    Ok(())
}

/// Remove a tenant's store
#[inline]
pub async fn delete_tenant(tenant_id: &str) -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;
    let store = VectorStore::new(config.store_path());

    if store.delete(tenant_id).await? {
        println!("Deleted store for tenant '{}'", tenant_id);
    } else {
        println!("Tenant '{}' has no store", tenant_id);
    }

    Ok(())
}
