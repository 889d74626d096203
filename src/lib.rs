//! # Corpus Index
//!
//! Incremental document ingestion and semantic retrieval over a local
//! directory tree.
//!
//! Corpus Index walks a directory, extracts text from supported formats,
//! splits it into overlapping chunks, embeds the chunks in token-bounded
//! batches and stores them in a local vector index. A content hash per file
//! makes re-runs incremental: unchanged files cost nothing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Scanner  │──▶│  Loader  │──▶│ Chunker  │──▶│  Batcher  │──▶│ Executor │
//! │ + hashes │   │ extract  │   │          │   │ plan/split│   │  retry   │
//! └──────────┘   └──────────┘   └──────────┘   └───────────┘   └────┬─────┘
//!       ▲                                                           │
//!       │                                                           ▼
//! ┌─────┴──────────┐                                         ┌────────────┐
//! │ Metadata store │◀── records of fully committed files ────│  Vector    │
//! │ metadata.json  │                                         │  index     │
//! └────────────────┘                                         └─────┬──────┘
//!                                                                  │
//!                                                             ┌────▼─────┐
//!                                                             │  Search  │
//!                                                             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cidx index ./docs             # embed new and changed files
//! cidx search "release process" # ranked chunks with relevance bands
//! cidx files --sort size        # what is indexed
//! cidx stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed failures of embedding, indexing and extraction |
//! | [`scanner`] | Directory walk and content hashing |
//! | [`metadata_store`] | Persisted per-file records |
//! | [`extract`] | Per-extension text extraction |
//! | [`loader`] | Concurrent extraction with per-file metadata |
//! | [`chunk`] | Recursive character chunking |
//! | [`sanitize`] | Flattening of non-primitive metadata |
//! | [`batcher`] | Token estimates, batch sizing and splitting |
//! | [`executor`] | Batch submission with retry, split and abandon |
//! | [`ingest`] | Index-run orchestration |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Vector index trait with SQLite and in-memory backends |
//! | [`db`] | SQLite connection and schema |
//! | [`search`] | Similarity search with relevance bands |
//! | [`files`] | Indexed-file listings and stats |
//! | [`progress`] | Index-run progress reporting |
//! | [`logging`] | Tracing subscriber setup |

pub mod batcher;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod extract;
pub mod files;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod metadata_store;
pub mod models;
pub mod progress;
pub mod sanitize;
pub mod scanner;
pub mod search;
pub mod vector_index;
