//! Batch submission with recovery.
//!
//! Each planned batch is embedded and written to the vector index. Failures
//! are classified by [`BatchError::kind`] and handled locally:
//!
//! | Failure | Recovery |
//! |---------|----------|
//! | metadata rejected | sanitize the batch's metadata and retry; free if anything changed |
//! | token ceiling exceeded | split into smaller batches; a lone chunk is abandoned |
//! | transient | wait `min(base × 2^attempt, cap)` and retry, up to `max_attempts` |
//!
//! Splitting uses an explicit work stack, so sub-batches are processed
//! depth-first in their original order and nesting depth is bounded by the
//! batch size. Exhausting the transient budget stops the whole run; the
//! caller persists whatever was fully committed.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batcher::split_overflowing;
use crate::embedding::EmbeddingProvider;
use crate::error::{BatchError, EmbedError, FailureKind};
use crate::models::Batch;
use crate::progress::{IndexProgressEvent, ProgressReporter};
use crate::sanitize::sanitize_in_place;
use crate::vector_index::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Outcome of submitting one batch.
#[derive(Debug)]
pub enum Step {
    Committed(Batch),
    /// Rejected for size; these replace it in the queue.
    Split(Vec<Batch>),
    /// A single chunk over the ceiling. Dropped from this run.
    Abandoned(Batch, BatchError),
    /// Retry budget exhausted.
    Failed(Batch, BatchError),
}

/// What happened across all batches of a run.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub batches_completed: usize,
    pub chunks_committed: usize,
    pub chunks_abandoned: usize,
    /// Committed chunk count per file path.
    pub committed_per_file: HashMap<String, usize>,
    pub abandoned_files: BTreeSet<String>,
    /// Set when the run stopped on an unrecoverable batch.
    pub failure: Option<String>,
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn committed_for(&self, file_path: &str) -> usize {
        self.committed_per_file.get(file_path).copied().unwrap_or(0)
    }
}

pub struct BatchExecutor<'a> {
    embedder: &'a dyn EmbeddingProvider,
    index: &'a dyn VectorIndex,
    policy: RetryPolicy,
    token_ceiling: usize,
    summary_every: usize,
    index_created: bool,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        embedder: &'a dyn EmbeddingProvider,
        index: &'a dyn VectorIndex,
        policy: RetryPolicy,
        token_ceiling: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            policy,
            token_ceiling,
            summary_every: 10,
            index_created: false,
        }
    }

    pub fn with_summary_every(mut self, n: usize) -> Self {
        self.summary_every = n;
        self
    }

    /// Whether the first successful write should create the index.
    pub fn with_existing_index(mut self, exists: bool) -> Self {
        self.index_created = exists;
        self
    }

    /// Submit planned batches in order. Cancellation is checked before each
    /// planned batch; the batch in flight (with any splits) always finishes.
    pub async fn run(
        &mut self,
        batches: Vec<Batch>,
        total_chunks: usize,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let planned = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(remaining = planned - i, "indexing cancelled");
                report.cancelled = true;
                break;
            }

            let mut stack = vec![batch];
            while let Some(batch) = stack.pop() {
                match self.submit(batch).await {
                    Step::Committed(batch) => {
                        report.batches_completed += 1;
                        report.chunks_committed += batch.len();
                        for chunk in &batch.chunks {
                            *report
                                .committed_per_file
                                .entry(chunk.file_path.clone())
                                .or_default() += 1;
                        }
                        debug!(batch = %batch.label, chunks = batch.len(), "batch committed");
                        reporter.report(IndexProgressEvent::Embedding {
                            batches_completed: report.batches_completed as u64,
                            chunks_completed: report.chunks_committed as u64,
                            total_chunks: total_chunks as u64,
                        });
                        if self.summary_every > 0
                            && report.batches_completed % self.summary_every == 0
                        {
                            let pct = report.chunks_committed as f64 * 100.0
                                / total_chunks.max(1) as f64;
                            info!(
                                batches = report.batches_completed,
                                chunks = report.chunks_committed,
                                total = total_chunks,
                                pct = %format!("{:.1}", pct),
                                "indexing progress"
                            );
                        }
                    }
                    Step::Split(parts) => {
                        info!(parts = parts.len(), "split oversized batch");
                        stack.extend(parts.into_iter().rev());
                    }
                    Step::Abandoned(batch, err) => {
                        error!(batch = %batch.label, error = %err, "chunk exceeds token ceiling on its own, abandoning");
                        report.chunks_abandoned += batch.len();
                        report
                            .abandoned_files
                            .extend(batch.chunks.iter().map(|c| c.file_path.clone()));
                    }
                    Step::Failed(batch, err) => {
                        let msg = format!(
                            "Failed to process {} after {} attempts: {}",
                            batch.label, self.policy.max_attempts, err
                        );
                        error!("{}", msg);
                        report.failure = Some(msg);
                        return report;
                    }
                }
            }
        }

        report
    }

    /// Drive one batch to a terminal [`Step`].
    pub async fn submit(&mut self, mut batch: Batch) -> Step {
        let mut attempt = 1u32;
        loop {
            let err = match self.try_once(&batch).await {
                Ok(()) => return Step::Committed(batch),
                Err(err) => err,
            };

            match err.kind() {
                FailureKind::Capacity => {
                    if batch.len() <= 1 {
                        return Step::Abandoned(batch, err);
                    }
                    warn!(batch = %batch.label, chunks = batch.len(), error = %err, "token ceiling exceeded, splitting");
                    return Step::Split(split_overflowing(batch, self.token_ceiling));
                }
                FailureKind::Metadata => {
                    let keys: BTreeSet<String> = batch
                        .chunks
                        .iter_mut()
                        .flat_map(|c| sanitize_in_place(&mut c.metadata))
                        .collect();
                    if !keys.is_empty() {
                        warn!(batch = %batch.label, converted = keys.len(), keys = ?keys, error = %err, "sanitized metadata, retrying");
                        continue;
                    }
                }
                FailureKind::Transient => {}
            }

            if attempt >= self.policy.max_attempts {
                return Step::Failed(batch, err);
            }
            let delay = self.policy.delay_for(attempt);
            warn!(
                batch = %batch.label,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "batch failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn try_once(&mut self, batch: &Batch) -> Result<(), BatchError> {
        let texts = batch.texts();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbedError::Fatal(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            ))
            .into());
        }

        if self.index_created {
            self.index.append(&batch.chunks, &vectors).await?;
        } else {
            self.index
                .create_with_documents(&batch.chunks, &vectors)
                .await?;
            self.index_created = true;
        }
        Ok(())
    }
}
