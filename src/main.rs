//! # policywatch CLI (`pwatch`)
//!
//! The `pwatch` binary drives the monitoring pipeline from the command line
//! and hosts the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! pwatch --config ./config/pwatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pwatch fetch` | Fetch configured documents and ingest changes |
//! | `pwatch diff` | Generate AI diffs for changed documents |
//! | `pwatch docs` | Show per-document version summaries |
//! | `pwatch check` | Verify storage and AI connectivity |
//! | `pwatch serve` | Start the HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest everything in config/documents.json
//! pwatch fetch
//!
//! # Re-ingest one document even without changes
//! pwatch fetch --id acme-tos --force
//!
//! # Generate summaries for whatever changed
//! pwatch diff
//!
//! # Serve the HTTP API
//! pwatch serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use policywatch::config::load_config;
use policywatch::pipeline::Pipeline;
use policywatch::server::run_server;

/// policywatch — a Terms of Service monitoring service that tracks changes
/// in legal documents.
#[derive(Parser)]
#[command(
    name = "pwatch",
    about = "policywatch — monitor legal documents for meaningful changes",
    version,
    long_about = "policywatch fetches configured legal documents (Terms of Service, privacy \
    policies), detects meaningful changes with layered content hashing, keeps a pointer-based \
    version history per document, and generates AI summaries of what changed."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch configured documents and ingest any changes.
    ///
    /// Downloads each document, normalizes the content, and rolls the
    /// version pointers when a structural change is detected. Unchanged
    /// documents only refresh their `current` snapshot.
    Fetch {
        /// Restrict to specific document ids (repeatable).
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Snapshot even when no structural change is detected.
        #[arg(long)]
        force: bool,
    },

    /// Generate AI diff summaries for documents with new snapshot pairs.
    ///
    /// Skips documents whose newest pair is already covered by a stored
    /// diff, and documents whose change was formatting or re-dating only.
    Diff {
        /// Restrict to specific document ids (repeatable).
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Regenerate even when a diff already covers the newest pair.
        #[arg(long)]
        force: bool,
    },

    /// Show per-document version summaries.
    Docs,

    /// Verify storage and AI connectivity.
    Check,

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Fetch { ids, force } => {
            let pipeline = Pipeline::from_config(&config)?;
            let ids = if ids.is_empty() { None } else { Some(ids) };
            let documents = pipeline.resolve_documents(None, ids.as_deref()).await?;
            let response = pipeline.run_fetch_batch(&documents, force).await;

            for result in &response.documents {
                let status = if !result.success {
                    "ERROR"
                } else if result.changes_detected {
                    "CHANGED"
                } else {
                    "unchanged"
                };
                match &result.error_message {
                    Some(message) => {
                        println!("{:<24} {:<10} {}", result.document_id, status, message)
                    }
                    None => println!(
                        "{:<24} {:<10} {}",
                        result.document_id,
                        status,
                        result.timestamp.as_deref().unwrap_or("-")
                    ),
                }
            }
            println!(
                "processed {} documents: {} ok, {} errors ({:.2}s)",
                response.processed_count,
                response.success_count,
                response.error_count,
                response.processing_time
            );
        }

        Commands::Diff { ids, force } => {
            let pipeline = Pipeline::from_config(&config)?;
            let ids = if ids.is_empty() { None } else { Some(ids) };
            let documents = pipeline.resolve_documents(None, ids.as_deref()).await?;
            let response = pipeline.run_diff_batch(&documents, force).await;

            for result in &response.documents {
                let status = if !result.success {
                    "ERROR"
                } else if result.diff_generated {
                    "GENERATED"
                } else {
                    "skipped"
                };
                println!(
                    "{:<24} {:<10} {}",
                    result.document_id,
                    status,
                    result.error_message.as_deref().unwrap_or("")
                );
            }
            println!(
                "processed {} documents: {} diffs generated, {} errors ({:.2}s)",
                response.processed_count,
                response.diffs_generated,
                response.error_count,
                response.processing_time
            );
        }

        Commands::Docs => {
            let pipeline = Pipeline::from_config(&config)?;
            let documents = pipeline.resolve_documents(None, None).await?;

            println!(
                "{:<24} {:<12} {:<12} {:<12} {:<8} {}",
                "DOCUMENT", "CURRENT", "LAST", "PREV", "CHANGED", "SNAPSHOTS"
            );
            for doc in &documents {
                let summary = pipeline.versions.summary(doc).await?;
                println!(
                    "{:<24} {:<12} {:<12} {:<12} {:<8} {}",
                    summary.id,
                    summary.current.as_deref().unwrap_or("-"),
                    summary.last.as_deref().unwrap_or("-"),
                    summary.prev.as_deref().unwrap_or("-"),
                    summary.changed,
                    summary.total
                );
            }
        }

        Commands::Check => {
            let pipeline = Pipeline::from_config(&config)?;

            match pipeline.store.list("config/").await {
                Ok(_) => println!("storage  OK ({})", config.storage.backend),
                Err(e) => println!("storage  FAILED: {}", e),
            }

            let info = pipeline.comparer.model_info();
            if pipeline.comparer.test_connection().await {
                println!("ai       OK ({} via {})", info.model, info.provider);
            } else {
                println!("ai       FAILED ({} via {})", info.model, info.provider);
            }
        }

        Commands::Serve => {
            let pipeline = Arc::new(Pipeline::from_config(&config)?);
            run_server(&config, pipeline).await?;
        }
    }

    Ok(())
}
