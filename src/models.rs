//! Core data models used throughout the indexing pipeline.
//!
//! These types represent the files, raw documents, chunks, and batches that
//! flow from the scanner through the loader and chunker into the vector index,
//! plus the result shape returned to callers of an index run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key/value metadata attached to raw documents and chunks.
///
/// Values are arbitrary JSON until they pass through
/// [`sanitize`](crate::sanitize::sanitize), after which every value is a
/// string, number, boolean, or null.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Persisted description of one indexed source file.
///
/// Owned exclusively by the [`MetadataStore`](crate::metadata_store::MetadataStore).
/// `file_hash` decides whether the file must be re-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileRecord {
    pub file_path: String,
    pub file_name: String,
    pub file_directory: String,
    pub relative_path: String,
    pub file_size: u64,
    pub file_type: String,
    pub mime_type: String,
    pub file_extension: String,
    pub created_at: String,
    pub modified_at: String,
    pub accessed_at: String,
    pub indexed_at: String,
    pub chunk_count: usize,
    pub total_characters: usize,
    pub file_hash: String,
    pub file_permissions: String,
    pub is_hidden: bool,
    pub is_symlink: bool,
}

impl SourceFileRecord {
    /// File-level metadata merged into every chunk of this file.
    pub fn to_metadata(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("file_path".into(), self.file_path.clone().into());
        m.insert("file_name".into(), self.file_name.clone().into());
        m.insert("file_directory".into(), self.file_directory.clone().into());
        m.insert("relative_path".into(), self.relative_path.clone().into());
        m.insert("file_size".into(), self.file_size.into());
        m.insert("file_type".into(), self.file_type.clone().into());
        m.insert("mime_type".into(), self.mime_type.clone().into());
        m.insert("file_extension".into(), self.file_extension.clone().into());
        m.insert("created_at".into(), self.created_at.clone().into());
        m.insert("modified_at".into(), self.modified_at.clone().into());
        m.insert("accessed_at".into(), self.accessed_at.clone().into());
        m.insert("indexed_at".into(), self.indexed_at.clone().into());
        m.insert("chunk_count".into(), self.chunk_count.into());
        m.insert("total_characters".into(), self.total_characters.into());
        m.insert("file_hash".into(), self.file_hash.clone().into());
        m.insert("file_permissions".into(), self.file_permissions.clone().into());
        m.insert("is_hidden".into(), self.is_hidden.into());
        m.insert("is_symlink".into(), self.is_symlink.into());
        m
    }
}

/// One text segment produced by an extraction strategy.
#[derive(Debug, Clone, Default)]
pub struct RawDocument {
    pub text: String,
    pub metadata: Metadata,
}

impl RawDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A bounded slice of a file's text: the unit of embedding and storage.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub file_path: String,
    pub chunk_index: usize,
    pub text: String,
    pub content_length: usize,
    /// `"{file_hash}_{chunk_index}"`; stable while the file is unchanged.
    pub chunk_id: String,
    pub content_preview: String,
    pub metadata: Metadata,
}

/// An ordered, contiguous run of chunks submitted in one embedding request.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub label: String,
    pub chunks: Vec<DocumentChunk>,
}

impl Batch {
    pub fn new(label: impl Into<String>, chunks: Vec<DocumentChunk>) -> Self {
        Self {
            label: label.into(),
            chunks,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }
}

/// Outcome class of an index run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Completed,
    Partial,
    Error,
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexStatus::Completed => write!(f, "completed"),
            IndexStatus::Partial => write!(f, "partial"),
            IndexStatus::Error => write!(f, "error"),
        }
    }
}

/// Result returned by [`Indexer::index_directory`](crate::ingest::Indexer::index_directory).
#[derive(Debug, Clone, Serialize)]
pub struct IndexResult {
    pub status: IndexStatus,
    /// Files loaded and chunked during this run.
    pub files_processed: usize,
    /// Chunks committed to the vector index during this run.
    pub chunks_indexed: usize,
    /// Files fully indexed by this run, or, when nothing changed, the
    /// number of previously indexed files that are still current.
    pub documents_indexed: usize,
    pub total_chunks: usize,
    pub batches_completed: usize,
    pub chunks_abandoned: usize,
    pub message: String,
}

impl IndexResult {
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            status: IndexStatus::Completed,
            files_processed: 0,
            chunks_indexed: 0,
            documents_indexed: 0,
            total_chunks: 0,
            batches_completed: 0,
            chunks_abandoned: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: IndexStatus::Error,
            ..Self::completed(message)
        }
    }
}
