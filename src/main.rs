//! # Secure RAG CLI (`srag`)
//!
//! The `srag` binary builds and queries local hybrid (vector + BM25)
//! retrieval collections and serves them over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! srag --config ./config/srag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag create <name>` | Create an empty collection |
//! | `srag ingest` | Add new documents from the documents directory |
//! | `srag add <file>` | Add a single file |
//! | `srag search "<query>"` | Hybrid search |
//! | `srag collections` | List collections |
//! | `srag stats` | Show collection statistics |
//! | `srag serve` | Start the HTTP search server |
//!
//! ## Examples
//!
//! ```bash
//! # Index ~/secure_rag/documents into the default collection
//! srag ingest --config ./config/srag.toml
//!
//! # Add one book to a named collection
//! srag add ./lore/horses.md --collection lore
//!
//! # Top 5 results restricted to one document, as JSON
//! srag search "raspberry hooves" -k 5 --source horses.md --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use secure_rag::config::{self, Config};
use secure_rag::embedding::create_provider;
use secure_rag::ingest::{self, index_settings};
use secure_rag::store::InstanceStore;
use secure_rag::{logging, search, server, stats};

/// Secure RAG CLI — local hybrid retrieval for grounding local language models.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/srag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "srag",
    about = "Secure RAG — local hybrid (vector + BM25) retrieval for local language models",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/srag.toml")]
    config: PathBuf,

    /// Log level for this application (overridden by `RUST_LOG`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create an empty collection.
    ///
    /// Fails if a collection with this name already exists.
    Create {
        /// Collection name (a single directory name under `storage.base_dir`).
        collection: String,
    },

    /// Add every new document under `documents.path` to a collection.
    ///
    /// Documents already recorded in the collection's ledger are skipped,
    /// so re-running is a no-op when nothing is new.
    Ingest {
        /// Collection name. Defaults to `storage.default_collection`.
        #[arg(long)]
        collection: Option<String>,

        /// Replace the collection with a fresh index of every document,
        /// picking up changed and removed files.
        #[arg(long)]
        rebuild: bool,
    },

    /// Add a single file to a collection. Its identity is the file name.
    Add {
        file: PathBuf,

        #[arg(long)]
        collection: Option<String>,
    },

    /// Run a hybrid search.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return. Defaults to `retrieval.default_k`.
        #[arg(short, long, allow_negative_numbers = true)]
        k: Option<i64>,

        /// Only return chunks of this document.
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        collection: Option<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List collections.
    Collections,

    /// Show statistics for a collection.
    Stats {
        #[arg(long)]
        collection: Option<String>,
    },

    /// Start the HTTP search server on `server.bind`.
    Serve,
}

fn collection_or_default(cfg: &Config, collection: Option<String>) -> String {
    collection.unwrap_or_else(|| cfg.storage.default_collection.clone())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Create { collection } => {
            let provider = create_provider(&cfg.embedding)?;
            let store = InstanceStore::new(&cfg.storage.base_dir);
            store.create_instance(&collection, &index_settings(&cfg, provider.as_ref())?)?;
            println!("Created collection '{}'.", collection);
        }
        Commands::Ingest {
            collection,
            rebuild,
        } => {
            let collection = collection_or_default(&cfg, collection);
            let provider = create_provider(&cfg.embedding)?;
            let report =
                ingest::ensure_index_current(&cfg, provider.as_ref(), &collection, rebuild)
                    .await?;
            ingest::print_report(&collection, &report);
        }
        Commands::Add { file, collection } => {
            let collection = collection_or_default(&cfg, collection);
            let provider = create_provider(&cfg.embedding)?;
            let report =
                ingest::add_document(&cfg, provider.as_ref(), &collection, &file).await?;
            if report.skipped > 0 {
                eprintln!(
                    "warning: {} is already in collection '{}'; skipped",
                    file.display(),
                    collection
                );
            }
            ingest::print_report(&collection, &report);
        }
        Commands::Search {
            query,
            k,
            source,
            collection,
            json,
        } => {
            let collection = collection_or_default(&cfg, collection);
            search::run_search(&cfg, &query, k, source, &collection, json).await?;
        }
        Commands::Collections => {
            stats::run_list_collections(&cfg)?;
        }
        Commands::Stats { collection } => {
            let collection = collection_or_default(&cfg, collection);
            stats::run_stats(&cfg, &collection)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
