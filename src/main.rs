//! # Corpus Index CLI (`cidx`)
//!
//! The `cidx` binary indexes a directory of documents into a local vector
//! index and answers similarity queries against it.
//!
//! ## Usage
//!
//! ```bash
//! cidx --config ./config/cidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cidx index <dir>` | Index new and changed files under a directory |
//! | `cidx search "<query>"` | Similarity search over indexed chunks |
//! | `cidx files` | List indexed files |
//! | `cidx info <path>` | Show the stored record for one file |
//! | `cidx stats` | Summarize the index |
//! | `cidx reset` | Delete the index and all stored records |
//!
//! ## Examples
//!
//! ```bash
//! # Index a docs directory, then again after edits (only changes are embedded)
//! cidx index ./docs
//!
//! # Rebuild from scratch
//! cidx index ./docs --force
//!
//! # Search markdown files only, machine-readable
//! cidx --json search "deployment checklist" --file-type md --limit 10
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use corpus_index::config::{self, Config};
use corpus_index::files::{self, FileFilter, SortKey};
use corpus_index::ingest::Indexer;
use corpus_index::logging;
use corpus_index::models::IndexStatus;
use corpus_index::progress::ProgressMode;
use corpus_index::search;

/// Corpus Index CLI: incremental document indexing and semantic search over
/// a local directory tree.
#[derive(Parser)]
#[command(
    name = "cidx",
    about = "Incremental document ingestion and semantic retrieval over a local directory tree",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cidx.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/cidx.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index supported files under a directory.
    ///
    /// Unchanged files (same content hash) are skipped. Ctrl-C stops after
    /// the batch in flight; fully indexed files are still recorded.
    Index {
        /// Directory to index.
        dir: PathBuf,

        /// Delete the existing index and re-embed every file.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search indexed documents by semantic similarity.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (clamped to `retrieval.max_results`).
        #[arg(long)]
        limit: Option<usize>,

        /// Only return chunks from files with this extension (e.g. `md`).
        #[arg(long)]
        file_type: Option<String>,
    },

    /// List indexed files.
    Files {
        /// Only files with this extension.
        #[arg(long)]
        file_type: Option<String>,

        /// Only files whose directory contains this substring.
        #[arg(long)]
        directory: Option<String>,

        /// Sort key: `name`, `size`, `modified`, `created`, or `indexed`.
        #[arg(long = "sort", default_value = "modified")]
        sort_by: String,

        /// Maximum number of files to show (1-1000).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the stored record for one indexed file.
    Info {
        /// Absolute path, path relative to the indexed root, or file name.
        path: String,
    },

    /// Show index statistics.
    Stats,

    /// Delete the vector index and metadata store.
    Reset,
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        let cfg = Config::default();
        config::validate(&cfg)?;
        Ok(cfg)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            dir,
            force,
            progress,
        } => {
            let mode = match progress.as_deref() {
                Some(s) => match ProgressMode::parse(s) {
                    Some(mode) => mode,
                    None => bail!("Unknown progress mode: '{}'. Use off, human, or json.", s),
                },
                None => ProgressMode::default_for_tty(),
            };
            let reporter = mode.reporter();

            let cancel = CancellationToken::new();
            let token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current batch");
                    token.cancel();
                }
            });

            let indexer = Indexer::from_config(&cfg)?;
            let result = indexer
                .index_directory(&dir, force, reporter.as_ref(), &cancel)
                .await;

            if cli.json {
                print_json(&result)?;
            } else {
                println!("index {}", dir.display());
                println!("  status: {}", result.status);
                println!("  files processed: {}", result.files_processed);
                println!("  documents indexed: {}", result.documents_indexed);
                println!(
                    "  chunks indexed: {} / {}",
                    result.chunks_indexed, result.total_chunks
                );
                if result.chunks_abandoned > 0 {
                    println!("  chunks skipped: {}", result.chunks_abandoned);
                }
                println!("  {}", result.message);
            }

            if result.status == IndexStatus::Error {
                bail!("{}", result.message);
            }
        }
        Commands::Search {
            query,
            limit,
            file_type,
        } => {
            let indexer = Indexer::from_config(&cfg)?;
            let outcome = indexer.search(&query, limit, file_type.as_deref()).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                search::print_outcome(&outcome);
            }
        }
        Commands::Files {
            file_type,
            directory,
            sort_by,
            limit,
        } => {
            let Some(sort_by) = SortKey::parse(&sort_by) else {
                bail!(
                    "Unknown sort key: '{}'. Use name, size, modified, created, or indexed.",
                    sort_by
                );
            };
            let indexer = Indexer::offline(&cfg);
            let records = indexer.store().load();
            let filter = FileFilter {
                file_type,
                directory,
                sort_by,
                limit,
            };
            let listing = files::list_indexed_files(&records, &filter);
            if cli.json {
                print_json(&listing)?;
            } else {
                files::print_listing(&listing);
            }
        }
        Commands::Info { path } => {
            let indexer = Indexer::offline(&cfg);
            let records = indexer.store().load();
            let Some(record) = files::file_info(&records, &path) else {
                bail!("No indexed file matches '{}'", path);
            };
            if cli.json {
                print_json(record)?;
            } else {
                files::print_record(record);
            }
        }
        Commands::Stats => {
            let indexer = Indexer::offline(&cfg);
            let stats =
                files::collect_stats(indexer.store(), indexer.index(), &cfg.storage.path).await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                stats.print();
            }
        }
        Commands::Reset => {
            Indexer::offline(&cfg).reset().await?;
            if cli.json {
                print_json(&serde_json::json!({ "status": "reset" }))?;
            } else {
                println!("Index reset: {}", cfg.storage.path.display());
            }
        }
    }

    Ok(())
}
