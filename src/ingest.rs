//! Index-run orchestration.
//!
//! Coordinates one pass over a directory: scan → hash → filter unchanged →
//! load → chunk → plan batches → submit → persist records. Only files whose
//! every chunk was committed are written to the metadata store, so anything
//! interrupted is picked up again by the next run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batcher::{adaptive_batch_size, plan_batches};
use crate::chunk::{chunk_file, FileChunks, TextSplitter};
use crate::config::Config;
use crate::embedding::{create_provider, DisabledProvider, EmbeddingProvider};
use crate::executor::{BatchExecutor, RetryPolicy};
use crate::extract::ExtractorRegistry;
use crate::loader::Loader;
use crate::metadata_store::{needs_reindex, MetadataStore};
use crate::models::{IndexResult, IndexStatus};
use crate::progress::{IndexProgressEvent, ProgressReporter};
use crate::scanner::{hash_file, Scanner};
use crate::search::{search, SearchOutcome};
use crate::vector_index::{SqliteVectorIndex, VectorIndex};

/// Owns the components of one index: extractors, embedder, vector index and
/// metadata store. Constructed explicitly and passed to each operation.
pub struct Indexer {
    config: Config,
    registry: Arc<ExtractorRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    store: MetadataStore,
}

impl Indexer {
    pub fn new(
        config: Config,
        registry: Arc<ExtractorRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let store = MetadataStore::new(&config.storage.path);
        Self {
            config,
            registry,
            embedder,
            index,
            store,
        }
    }

    /// Build the production stack: builtin extractors, the configured
    /// embedding provider and a SQLite index under `storage.path`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding, config.batching.token_ceiling)?;
        let index = Arc::new(SqliteVectorIndex::new(&config.storage.path));
        Ok(Self::new(
            config.clone(),
            Arc::new(ExtractorRegistry::builtin()),
            embedder,
            index,
        ))
    }

    /// Stack without an embedding provider, for commands that only read or
    /// clear local state.
    pub fn offline(config: &Config) -> Self {
        Self::new(
            config.clone(),
            Arc::new(ExtractorRegistry::builtin()),
            Arc::new(DisabledProvider),
            Arc::new(SqliteVectorIndex::new(&config.storage.path)),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Index `dir`. Never returns `Err`: unrecoverable problems come back as
    /// an [`IndexStatus::Error`] result.
    pub async fn index_directory(
        &self,
        dir: &Path,
        force: bool,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> IndexResult {
        match self.run_index(dir, force, reporter, cancel).await {
            Ok(result) => result,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "indexing failed");
                IndexResult::error(format!("Indexing failed: {:#}", e))
            }
        }
    }

    async fn run_index(
        &self,
        dir: &Path,
        force: bool,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<IndexResult> {
        if !dir.exists() {
            bail!("Directory does not exist: {}", dir.display());
        }
        if !dir.is_dir() {
            bail!("Path is not a directory: {}", dir.display());
        }
        let root = dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", dir.display()))?;

        if force {
            info!("force reindex: clearing existing index");
            self.reset().await?;
        }

        reporter.report(IndexProgressEvent::Scanning {
            root: root.display().to_string(),
        });
        let scanner = Scanner::from_registry(&self.registry, &self.config.scan.exclude_globs)?;
        let files = scanner.scan(&root)?;
        if files.is_empty() {
            return Ok(IndexResult::completed("No supported files found in directory"));
        }

        let mut records = self.store.load();
        let mut pending = Vec::new();
        let mut unchanged = 0usize;
        for path in files {
            let hash = hash_file(&path);
            if hash.is_empty() {
                warn!(path = %path.display(), "could not hash file, skipping");
                continue;
            }
            let key = path.display().to_string();
            if needs_reindex(&records, &key, &hash) {
                pending.push((path, hash));
            } else {
                unchanged += 1;
            }
        }
        info!(pending = pending.len(), unchanged, "scan complete");

        if pending.is_empty() {
            return Ok(IndexResult {
                documents_indexed: unchanged,
                ..IndexResult::completed("All files are already indexed and up to date")
            });
        }

        let loader = Loader::new(self.registry.clone(), self.config.loading.workers);
        let loaded = loader.load_all(pending, &root, reporter).await;
        let files_processed = loaded.len();

        let splitter = TextSplitter::new(
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        );
        let chunked: Vec<FileChunks> = loaded
            .into_iter()
            .map(|file| chunk_file(file, &splitter))
            .collect();

        let mut all_chunks = Vec::new();
        let mut file_records = Vec::with_capacity(chunked.len());
        for FileChunks { record, chunks, .. } in chunked {
            all_chunks.extend(chunks);
            file_records.push(record);
        }
        let total_chunks = all_chunks.len();
        if total_chunks == 0 {
            return Ok(IndexResult::error("No documents could be loaded"));
        }

        let batching = &self.config.batching;
        let sizing = adaptive_batch_size(
            &all_chunks,
            batching.token_ceiling,
            batching.safety_fraction,
        );
        let batches = plan_batches(all_chunks, sizing.batch_size, batching.token_ceiling);
        info!(
            files = files_processed,
            chunks = total_chunks,
            batches = batches.len(),
            batch_size = sizing.batch_size,
            "submitting batches"
        );

        let policy = RetryPolicy {
            max_attempts: batching.max_attempts,
            base_delay: Duration::from_millis(batching.backoff_base_ms),
            max_delay: Duration::from_secs(batching.backoff_cap_secs),
        };
        let index_exists = self.index.exists().await?;
        let report = BatchExecutor::new(
            self.embedder.as_ref(),
            self.index.as_ref(),
            policy,
            batching.token_ceiling,
        )
        .with_summary_every(batching.summary_every)
        .with_existing_index(index_exists)
        .run(batches, total_chunks, reporter, cancel)
        .await;

        let mut fully_indexed = 0usize;
        for record in file_records {
            if report.committed_for(&record.file_path) == record.chunk_count {
                fully_indexed += 1;
                records.insert(record.file_path.clone(), record);
            }
        }
        if fully_indexed > 0 {
            self.store.save(&records)?;
        }

        let status = if report.failure.is_none()
            && !report.cancelled
            && report.chunks_abandoned == 0
        {
            IndexStatus::Completed
        } else if report.chunks_committed > 0 {
            IndexStatus::Partial
        } else {
            IndexStatus::Error
        };

        let message = match (&report.failure, report.cancelled) {
            (Some(failure), _) => format!(
                "Indexed {} of {} chunks before stopping: {}",
                report.chunks_committed, total_chunks, failure
            ),
            (None, true) => format!(
                "Cancelled after indexing {} of {} chunks",
                report.chunks_committed, total_chunks
            ),
            (None, false) if report.chunks_abandoned > 0 => format!(
                "Indexed {} chunks from {} files; {} oversized chunks skipped",
                report.chunks_committed, fully_indexed, report.chunks_abandoned
            ),
            (None, false) => format!(
                "Successfully indexed {} chunks from {} files",
                report.chunks_committed, fully_indexed
            ),
        };
        info!(%status, "{}", message);

        Ok(IndexResult {
            status,
            files_processed,
            chunks_indexed: report.chunks_committed,
            documents_indexed: fully_indexed,
            total_chunks,
            batches_completed: report.batches_completed,
            chunks_abandoned: report.chunks_abandoned,
            message,
        })
    }

    /// Search the index. `limit` is clamped to the configured bounds.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        file_type: Option<&str>,
    ) -> Result<SearchOutcome> {
        let k = self.config.retrieval.clamp_limit(limit);
        search(
            self.embedder.as_ref(),
            self.index.as_ref(),
            query,
            k,
            file_type,
        )
        .await
    }

    /// Drop the vector index, the metadata store and the storage directory.
    pub async fn reset(&self) -> Result<()> {
        self.index
            .reset()
            .await
            .context("Failed to reset vector index")?;
        self.store.clear()?;
        let storage = &self.config.storage.path;
        if storage.exists() {
            std::fs::remove_dir_all(storage)
                .with_context(|| format!("Failed to remove {}", storage.display()))?;
        }
        Ok(())
    }
}
