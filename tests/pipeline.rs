use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use corpus_index::batcher::estimate_batch_tokens;
use corpus_index::config::Config;
use corpus_index::embedding::{EmbeddingProvider, HashProvider};
use corpus_index::error::EmbedError;
use corpus_index::extract::ExtractorRegistry;
use corpus_index::ingest::Indexer;
use corpus_index::models::IndexStatus;
use corpus_index::progress::{IndexProgressEvent, NoProgress, ProgressReporter};
use corpus_index::search::{RelevanceBand, SearchOutcome};
use corpus_index::vector_index::{InMemoryVectorIndex, VectorIndex};

/// Hash embeddings behind a scripted provider that counts calls, can reject
/// any batch containing a marker, and enforces its own token ceiling.
struct MockEmbedder {
    calls: AtomicUsize,
    fail_containing: Option<&'static str>,
    ceiling: usize,
    inner: HashProvider,
}

impl MockEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_containing: None,
            ceiling: usize::MAX,
            inner: HashProvider::new(256, usize::MAX),
        }
    }

    fn failing_on(marker: &'static str) -> Self {
        Self {
            fail_containing: Some(marker),
            ..Self::new()
        }
    }

    fn with_ceiling(ceiling: usize) -> Self {
        Self {
            ceiling,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.fail_containing {
            if texts.iter().any(|t| t.contains(marker)) {
                return Err(EmbedError::Transient("503 service unavailable".into()));
            }
        }
        let estimated = estimate_batch_tokens(texts.iter().map(String::as_str));
        if estimated > self.ceiling {
            return Err(EmbedError::CapacityExceeded {
                estimated,
                ceiling: self.ceiling,
            });
        }
        self.inner.embed(texts).await
    }
}

/// A paragraph of exactly `len` characters starting with `tag`.
fn para(tag: &str, len: usize) -> String {
    format!("{} {}", tag, "z".repeat(len - tag.len() - 1))
}

/// Two files: `a.txt` with 2 chunks and `b.txt` with 3 chunks at chunk size 40.
fn write_corpus(dir: &Path) {
    fs::write(
        dir.join("a.txt"),
        format!("{}\n\n{}", para("alpha rust", 30), para("alpha cargo", 30)),
    )
    .unwrap();
    fs::write(
        dir.join("b.txt"),
        format!(
            "{}\n\n{}\n\n{}",
            para("beta bread", 30),
            para("beta flour", 30),
            para("beta oven", 30)
        ),
    )
    .unwrap();
}

struct Harness {
    _tmp: TempDir,
    docs: std::path::PathBuf,
    storage: std::path::PathBuf,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        let storage = tmp.path().join("vector_db");
        fs::create_dir_all(&docs).unwrap();
        Self {
            docs: docs.canonicalize().unwrap(),
            storage,
            _tmp: tmp,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.path = self.storage.clone();
        config.chunking.chunk_size = 40;
        config.chunking.chunk_overlap = 0;
        config.embedding.provider = "hash".into();
        config.batching.max_attempts = 2;
        config.batching.backoff_base_ms = 0;
        config.batching.backoff_cap_secs = 0;
        config
    }

    fn indexer(
        &self,
        config: Config,
        embedder: Arc<MockEmbedder>,
        index: Arc<InMemoryVectorIndex>,
    ) -> Indexer {
        Indexer::new(
            config,
            Arc::new(ExtractorRegistry::builtin()),
            embedder,
            index,
        )
    }

    fn key(&self, name: &str) -> String {
        self.docs.join(name).display().to_string()
    }
}

#[tokio::test]
async fn indexes_corpus_then_skips_unchanged_files() {
    let h = Harness::new();
    write_corpus(&h.docs);
    let embedder = Arc::new(MockEmbedder::new());
    let index = Arc::new(InMemoryVectorIndex::new());
    let indexer = h.indexer(h.config(), embedder.clone(), index.clone());
    let cancel = CancellationToken::new();

    let first = indexer
        .index_directory(&h.docs, false, &NoProgress, &cancel)
        .await;
    assert_eq!(first.status, IndexStatus::Completed, "{}", first.message);
    assert_eq!(first.files_processed, 2);
    assert_eq!(first.chunks_indexed, 5);
    assert_eq!(first.documents_indexed, 2);
    assert_eq!(index.count().await.unwrap(), 5);

    let records = indexer.store().load();
    assert_eq!(records.len(), 2);
    assert_eq!(records[&h.key("a.txt")].chunk_count, 2);
    assert_eq!(records[&h.key("b.txt")].chunk_count, 3);

    let calls = embedder.calls();
    let second = indexer
        .index_directory(&h.docs, false, &NoProgress, &cancel)
        .await;
    assert_eq!(second.status, IndexStatus::Completed);
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.documents_indexed, 2);
    assert_eq!(second.message, "All files are already indexed and up to date");
    assert_eq!(embedder.calls(), calls);
    assert_eq!(indexer.store().load(), records);
}

#[tokio::test]
async fn search_ranks_hits_with_relevance_bands() {
    let h = Harness::new();
    write_corpus(&h.docs);
    let indexer = h.indexer(
        h.config(),
        Arc::new(MockEmbedder::new()),
        Arc::new(InMemoryVectorIndex::new()),
    );

    let before = indexer.search("alpha rust", Some(3), None).await.unwrap();
    assert!(matches!(before, SearchOutcome::NoIndex { .. }));

    indexer
        .index_directory(&h.docs, false, &NoProgress, &CancellationToken::new())
        .await;

    let SearchOutcome::Results(result) = indexer.search("alpha rust", Some(3), None).await.unwrap()
    else {
        panic!("expected results");
    };
    assert_eq!(result.results_count, 3);
    assert!(result
        .results
        .windows(2)
        .all(|w| w[0].distance <= w[1].distance));
    for hit in &result.results {
        assert_eq!(hit.relevance_level, RelevanceBand::from_distance(hit.distance));
    }
    let top = &result.results[0];
    assert_eq!(top.file.name, "a.txt");
    assert_eq!(top.content.chunk_info, "Chunk 1 of 2");
    assert_eq!(top.file.path, "a.txt");
}

#[tokio::test]
async fn changed_file_is_the_only_one_reindexed() {
    let h = Harness::new();
    write_corpus(&h.docs);
    let embedder = Arc::new(MockEmbedder::new());
    let indexer = h.indexer(
        h.config(),
        embedder.clone(),
        Arc::new(InMemoryVectorIndex::new()),
    );
    let cancel = CancellationToken::new();

    indexer
        .index_directory(&h.docs, false, &NoProgress, &cancel)
        .await;
    let before = indexer.store().load();

    fs::write(
        h.docs.join("b.txt"),
        format!("{}\n\n{}", para("beta bread", 30), para("beta rye", 30)),
    )
    .unwrap();

    let result = indexer
        .index_directory(&h.docs, false, &NoProgress, &cancel)
        .await;
    assert_eq!(result.status, IndexStatus::Completed);
    assert_eq!(result.files_processed, 1);
    assert_eq!(result.chunks_indexed, 2);

    let after = indexer.store().load();
    assert_eq!(after[&h.key("a.txt")], before[&h.key("a.txt")]);
    let (old_b, new_b) = (&before[&h.key("b.txt")], &after[&h.key("b.txt")]);
    assert_ne!(old_b.file_hash, new_b.file_hash);
    assert_eq!(new_b.chunk_count, 2);
}

#[tokio::test]
async fn identical_files_are_indexed_separately() {
    let h = Harness::new();
    let text = format!("{}\n\n{}", para("shared readme", 30), para("shared setup", 30));
    for dir in ["x", "y"] {
        fs::create_dir_all(h.docs.join(dir)).unwrap();
        fs::write(h.docs.join(dir).join("README.md"), &text).unwrap();
    }
    let index = Arc::new(InMemoryVectorIndex::new());
    let indexer = h.indexer(h.config(), Arc::new(MockEmbedder::new()), index.clone());

    let result = indexer
        .index_directory(&h.docs, false, &NoProgress, &CancellationToken::new())
        .await;
    assert_eq!(result.status, IndexStatus::Completed, "{}", result.message);
    assert_eq!(result.chunks_indexed, 4);
    assert_eq!(indexer.store().load().len(), 2);
    assert_eq!(index.count().await.unwrap(), 4);

    let SearchOutcome::Results(found) = indexer.search("shared readme", Some(4), None).await.unwrap()
    else {
        panic!("expected results");
    };
    let mut paths: Vec<_> = found.results.iter().map(|r| r.file.path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths, vec!["x/README.md".to_string(), "y/README.md".to_string()]);
}

#[tokio::test]
async fn failed_batch_keeps_earlier_commits_and_skips_partial_files() {
    let h = Harness::new();
    write_corpus(&h.docs);
    fs::write(
        h.docs.join("b.txt"),
        format!(
            "{}\n\n{}\n\n{}",
            para("beta bread", 30),
            para("beta POISON", 30),
            para("beta oven", 30)
        ),
    )
    .unwrap();

    // every ~85-token chunk becomes its own batch
    let mut config = h.config();
    config.batching.token_ceiling = 100;

    let embedder = Arc::new(MockEmbedder::failing_on("POISON"));
    let index = Arc::new(InMemoryVectorIndex::new());
    let indexer = h.indexer(config, embedder.clone(), index.clone());

    let result = indexer
        .index_directory(&h.docs, false, &NoProgress, &CancellationToken::new())
        .await;
    assert_eq!(result.status, IndexStatus::Partial, "{}", result.message);
    assert_eq!(result.chunks_indexed, 3);
    assert_eq!(result.batches_completed, 3);
    assert_eq!(result.total_chunks, 5);
    assert!(result.message.contains("batch_4"), "{}", result.message);
    assert_eq!(index.count().await.unwrap(), 3);

    let records = indexer.store().load();
    assert!(records.contains_key(&h.key("a.txt")));
    assert!(!records.contains_key(&h.key("b.txt")));

    // 3 commits + 2 attempts at the poisoned batch; batch 5 never submitted
    assert_eq!(embedder.calls(), 5);
}

#[tokio::test]
async fn oversized_single_chunk_is_abandoned_and_file_not_recorded() {
    let h = Harness::new();
    fs::write(
        h.docs.join("a.txt"),
        format!("{}\n\n{}", para("alpha rust", 30), para("alpha cargo", 30)),
    )
    .unwrap();
    fs::write(h.docs.join("c.txt"), para("gamma wide", 40)).unwrap();

    let mut config = h.config();
    config.batching.token_ceiling = 1000;

    // 30-char chunks estimate to 85 tokens and fit; the 40-char chunk is 88
    let embedder = Arc::new(MockEmbedder::with_ceiling(86));
    let index = Arc::new(InMemoryVectorIndex::new());
    let indexer = h.indexer(config, embedder, index.clone());

    let result = indexer
        .index_directory(&h.docs, false, &NoProgress, &CancellationToken::new())
        .await;
    assert_eq!(result.status, IndexStatus::Partial, "{}", result.message);
    assert_eq!(result.chunks_indexed, 2);
    assert_eq!(result.chunks_abandoned, 1);
    assert_eq!(index.count().await.unwrap(), 2);

    let records = indexer.store().load();
    assert!(records.contains_key(&h.key("a.txt")));
    assert!(!records.contains_key(&h.key("c.txt")));
}

struct CancelAfterFirstBatch(CancellationToken);

impl ProgressReporter for CancelAfterFirstBatch {
    fn report(&self, event: IndexProgressEvent) {
        if let IndexProgressEvent::Embedding { .. } = event {
            self.0.cancel();
        }
    }
}

#[tokio::test]
async fn cancellation_stops_at_batch_boundary() {
    let h = Harness::new();
    write_corpus(&h.docs);
    let mut config = h.config();
    config.batching.token_ceiling = 100;

    let embedder = Arc::new(MockEmbedder::new());
    let indexer = h.indexer(config, embedder.clone(), Arc::new(InMemoryVectorIndex::new()));

    let cancel = CancellationToken::new();
    let reporter = CancelAfterFirstBatch(cancel.clone());
    let result = indexer
        .index_directory(&h.docs, false, &reporter, &cancel)
        .await;

    assert_eq!(result.status, IndexStatus::Partial);
    assert_eq!(result.chunks_indexed, 1);
    assert_eq!(result.documents_indexed, 0);
    assert_eq!(embedder.calls(), 1);
    assert!(indexer.store().load().is_empty());

    // a fresh run picks everything up again
    let resumed = indexer
        .index_directory(&h.docs, false, &NoProgress, &CancellationToken::new())
        .await;
    assert_eq!(resumed.status, IndexStatus::Completed);
    assert_eq!(resumed.files_processed, 2);
}

#[tokio::test]
async fn force_reindex_wipes_and_rebuilds() {
    let h = Harness::new();
    write_corpus(&h.docs);
    let embedder = Arc::new(MockEmbedder::new());
    let index = Arc::new(InMemoryVectorIndex::new());
    let indexer = h.indexer(h.config(), embedder.clone(), index.clone());
    let cancel = CancellationToken::new();

    indexer
        .index_directory(&h.docs, false, &NoProgress, &cancel)
        .await;
    let calls = embedder.calls();

    let result = indexer
        .index_directory(&h.docs, true, &NoProgress, &cancel)
        .await;
    assert_eq!(result.status, IndexStatus::Completed);
    assert_eq!(result.files_processed, 2);
    assert!(embedder.calls() > calls);
    assert_eq!(index.count().await.unwrap(), 5);
    assert_eq!(indexer.store().load().len(), 2);
}

#[tokio::test]
async fn directories_without_work_are_not_errors() {
    let h = Harness::new();
    fs::write(h.docs.join("image.png"), [0u8, 1, 2]).unwrap();
    let indexer = h.indexer(
        h.config(),
        Arc::new(MockEmbedder::new()),
        Arc::new(InMemoryVectorIndex::new()),
    );
    let cancel = CancellationToken::new();

    let result = indexer
        .index_directory(&h.docs, false, &NoProgress, &cancel)
        .await;
    assert_eq!(result.status, IndexStatus::Completed);
    assert_eq!(result.message, "No supported files found in directory");

    let missing = indexer
        .index_directory(&h.docs.join("nope"), false, &NoProgress, &cancel)
        .await;
    assert_eq!(missing.status, IndexStatus::Error);
    assert!(missing.message.contains("does not exist"));
}
