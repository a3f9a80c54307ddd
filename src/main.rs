use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use policy_rag::commands::{
    ask_question, delete_tenant, ingest_documents, search_documents, show_chunks, show_status,
    summarize_file,
};
use policy_rag::config::{run_interactive_config, show_config};
use policy_rag::embeddings::ChunkingConfig;
use policy_rag::pipeline::DEFAULT_TENANT;
use policy_rag::prompt::AnswerLength;
use policy_rag::store::WriteMode;

#[derive(Parser)]
#[command(name = "policy-rag")]
#[command(about = "Answer questions from your organization's policy documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Chunk, embed and store documents
    Ingest {
        /// Text files to ingest as one batch
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Tenant whose store receives the documents
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
        /// Override the configured write mode
        #[arg(long, value_parser = parse_write_mode)]
        mode: Option<WriteMode>,
    },
    /// Show the stored chunks most similar to a query
    Search {
        query: String,
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
        /// Number of results, defaults to the configured top_k
        #[arg(long)]
        top_k: Option<usize>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from stored documents
    Ask {
        query: String,
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
        /// Number of context chunks, defaults to the configured top_k
        #[arg(long)]
        top_k: Option<usize>,
        /// Desired answer length
        #[arg(long, value_enum)]
        length: Option<AnswerLength>,
        /// Print the answer as it is generated
        #[arg(long, conflicts_with = "json")]
        stream: bool,
        /// Print results, prompt and answer as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show how a file is split into chunks
    Chunk {
        file: PathBuf,
        #[arg(long, default_value_t = ChunkingConfig::default().max_length)]
        max_length: usize,
        #[arg(long, default_value_t = ChunkingConfig::default().overlap)]
        overlap: usize,
    },
    /// Summarize a document
    Summarize {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = AnswerLength::Medium)]
        length: AnswerLength,
    },
    /// Show configuration and stored tenants
    Status,
    /// Delete a tenant's stored documents
    Delete {
        #[arg(long)]
        tenant: String,
    },
}

fn parse_write_mode(value: &str) -> Result<WriteMode, String> {
    match value {
        "overwrite" => Ok(WriteMode::Overwrite),
        "append" => Ok(WriteMode::Append),
        other => Err(format!(
            "unknown write mode '{}' (expected 'overwrite' or 'append')",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Ingest {
            files,
            tenant,
            mode,
        } => {
            ingest_documents(&tenant, &files, mode).await?;
        }
        Commands::Search {
            query,
            tenant,
            top_k,
            json,
        } => {
            search_documents(&tenant, &query, top_k, json).await?;
        }
        Commands::Ask {
            query,
            tenant,
            top_k,
            length,
            stream,
            json,
        } => {
            ask_question(&tenant, &query, top_k, length, stream, json).await?;
        }
        Commands::Chunk {
            file,
            max_length,
            overlap,
        } => {
            show_chunks(&file, max_length, overlap).await?;
        }
        Commands::Summarize { file, length } => {
            summarize_file(&file, length).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Delete { tenant } => {
            delete_tenant(&tenant).await?;
        }
    }

    Ok(())
}
