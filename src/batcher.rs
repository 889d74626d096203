//! Token estimation, adaptive batch sizing, and overflow splitting.
//!
//! Chunk cost is estimated as `chars / 3 + 75`: roughly three characters per
//! token plus a fixed allowance for metadata overhead. Batch size is derived
//! from a sample of chunk costs so that a typical batch lands at a safety
//! fraction of the provider's per-request ceiling.
//!
//! | Condition | Batch size cap |
//! |-----------|----------------|
//! | sample max > 2 × sample mean | 200 |
//! | otherwise | 500 |
//! | always | clamped to [5, 800] |

use tracing::debug;

use crate::models::{Batch, DocumentChunk};

/// Fixed per-chunk token allowance for metadata.
pub const METADATA_OVERHEAD_TOKENS: usize = 75;
/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 3;
/// Chunks sampled when sizing batches.
pub const SAMPLE_SIZE: usize = 50;
/// Batch size used when there is nothing to sample.
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const MIN_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 800;
const HIGH_VARIANCE_CAP: usize = 200;
const LOW_VARIANCE_CAP: usize = 500;
/// Fraction of the ceiling targeted by greedy re-packing of an overflowed batch.
pub const SPLIT_FRACTION: f64 = 0.5;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN + METADATA_OVERHEAD_TOKENS
}

pub fn estimate_batch_tokens<'a>(texts: impl IntoIterator<Item = &'a str>) -> usize {
    texts.into_iter().map(estimate_tokens).sum()
}

/// Sample statistics behind a batch-size decision.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSizing {
    pub batch_size: usize,
    pub mean: f64,
    pub p80: usize,
    pub max: usize,
}

/// Choose how many chunks go into one batch.
///
/// The conservative per-chunk cost is `max(mean, p80)` over the first
/// [`SAMPLE_SIZE`] chunks; the batch size is how many such chunks fit in
/// `token_ceiling × safety_fraction`, capped lower for high-variance samples.
pub fn adaptive_batch_size(
    chunks: &[DocumentChunk],
    token_ceiling: usize,
    safety_fraction: f64,
) -> BatchSizing {
    if chunks.is_empty() {
        return BatchSizing {
            batch_size: DEFAULT_BATCH_SIZE,
            mean: 0.0,
            p80: 0,
            max: 0,
        };
    }

    let mut sample: Vec<usize> = chunks
        .iter()
        .take(SAMPLE_SIZE)
        .map(|c| estimate_tokens(&c.text))
        .collect();
    sample.sort_unstable();

    let n = sample.len();
    let mean = sample.iter().sum::<usize>() as f64 / n as f64;
    let p80 = sample[((n as f64 * 0.8) as usize).min(n - 1)];
    let max = sample[n - 1];
    let conservative = mean.max(p80 as f64).max(1.0);

    let safe_budget = token_ceiling as f64 * safety_fraction;
    let mut batch_size = ((safe_budget / conservative) as usize).max(1);

    let cap = if max as f64 > 2.0 * mean {
        HIGH_VARIANCE_CAP
    } else {
        LOW_VARIANCE_CAP
    };
    batch_size = batch_size.min(cap).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);

    debug!(batch_size, mean, p80, max, "adaptive batch size");
    BatchSizing {
        batch_size,
        mean,
        p80,
        max,
    }
}

/// Partition chunks into contiguous batches of at most `batch_size` chunks
/// whose summed estimate stays within `token_ceiling`. A single chunk over
/// the ceiling still gets its own batch; the executor deals with it.
pub fn plan_batches(
    chunks: Vec<DocumentChunk>,
    batch_size: usize,
    token_ceiling: usize,
) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<DocumentChunk> = Vec::new();
    let mut tokens = 0usize;

    for chunk in chunks {
        let cost = estimate_tokens(&chunk.text);
        if !current.is_empty() && (current.len() >= batch_size || tokens + cost > token_ceiling) {
            let label = format!("batch_{}", batches.len() + 1);
            batches.push(Batch::new(label, std::mem::take(&mut current)));
            tokens = 0;
        }
        tokens += cost;
        current.push(chunk);
    }
    if !current.is_empty() {
        let label = format!("batch_{}", batches.len() + 1);
        batches.push(Batch::new(label, current));
    }
    batches
}

/// Split a batch the provider rejected for size.
///
/// Greedily re-packs into sub-batches of at most `token_ceiling × 0.5`
/// estimated tokens. If that still produces one sub-batch (the estimate
/// undercounts), bisects instead. Every sub-batch is strictly smaller than
/// the input, so repeated splitting terminates at single chunks.
pub fn split_overflowing(batch: Batch, token_ceiling: usize) -> Vec<Batch> {
    if batch.len() <= 1 {
        return vec![batch];
    }

    let limit = (token_ceiling as f64 * SPLIT_FRACTION) as usize;
    let Batch { label, chunks } = batch;

    let mut groups: Vec<Vec<DocumentChunk>> = Vec::new();
    let mut current: Vec<DocumentChunk> = Vec::new();
    let mut tokens = 0usize;
    for chunk in chunks {
        let cost = estimate_tokens(&chunk.text);
        if !current.is_empty() && tokens + cost > limit {
            groups.push(std::mem::take(&mut current));
            tokens = 0;
        }
        tokens += cost;
        current.push(chunk);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    if groups.len() == 1 {
        let mut whole = groups.pop().unwrap_or_default();
        let tail = whole.split_off(whole.len() / 2);
        groups = vec![whole, tail];
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(i, chunks)| Batch::new(format!("{}_split_{}", label, i + 1), chunks))
        .collect()
}
