//! Typed errors whose variant drives pipeline control flow.
//!
//! Plumbing and run-level failures use `anyhow`; the enums here exist where a
//! caller needs to tell one failure kind from another (capacity overflow vs.
//! metadata rejection vs. a transient outage).

use thiserror::Error;

/// Failures reported by an [`EmbeddingProvider`](crate::embedding::EmbeddingProvider).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    /// The request's combined token estimate exceeds the per-request ceiling.
    #[error("max_tokens_per_request exceeded: ~{estimated} tokens, max {ceiling}")]
    CapacityExceeded { estimated: usize, ceiling: usize },

    /// Network failure, rate limiting, or a server-side error. Safe to retry.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// The provider rejected the request outright.
    #[error("embedding request rejected: {0}")]
    Fatal(String),

    #[error("embedding provider is disabled")]
    Disabled,
}

/// Failures reported by a [`VectorIndex`](crate::vector_index::VectorIndex).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// A chunk carried a metadata value the index cannot store.
    #[error("Expected metadata value to be a str, int, float, bool, or None for key '{key}', got {kind}")]
    InvalidMetadata { key: String, kind: String },

    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("vector index storage error: {0}")]
    Storage(String),
}

/// Failures from a format extraction strategy. Always skippable per file.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedExtension(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported encoding: {0}")]
    Encoding(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("document is password-protected or encrypted")]
    Encrypted,

    #[error("no extraction backend available for {0}")]
    MissingBackend(String),
}

/// Any failure while submitting one batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// How the executor reacts to a [`BatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Sanitize metadata and retry.
    Metadata,
    /// Split the batch, or abandon a single chunk.
    Capacity,
    /// Back off and retry within the attempt budget.
    Transient,
}

impl BatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BatchError::Index(IndexError::InvalidMetadata { .. }) => FailureKind::Metadata,
            BatchError::Embed(EmbedError::CapacityExceeded { .. }) => FailureKind::Capacity,
            _ => FailureKind::Transient,
        }
    }
}
