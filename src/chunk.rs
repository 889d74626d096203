//! Recursive character text chunker.
//!
//! Splits document text into chunks of at most `chunk_size` characters with
//! `chunk_overlap` characters carried between neighbours. Splitting prefers
//! paragraph boundaries (`\n\n`), then lines, then words, and only falls back
//! to single characters for unbroken runs.
//!
//! [`chunk_file`] turns a loaded file into [`DocumentChunk`]s whose indices
//! are contiguous across all of the file's segments and whose ids are derived
//! from the file hash, so an unchanged file always yields the same ids.

use std::collections::{BTreeSet, VecDeque};

use chrono::Utc;
use tracing::debug;

use crate::loader::LoadedFile;
use crate::models::{DocumentChunk, SourceFileRecord};
use crate::sanitize::sanitize;

/// Separators tried in order; the empty separator splits per character.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Characters kept in `content_preview` before the ellipsis.
pub const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for split in splits {
            if char_len(split) < self.chunk_size {
                fitting.push(split);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge_splits(&fitting, separator));
                fitting.clear();
            }
            if remaining.is_empty() {
                if let Some(piece) = trimmed(split) {
                    chunks.push(piece);
                }
            } else {
                chunks.extend(self.split_recursive(split, remaining));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge_splits(&fitting, separator));
        }
        chunks
    }

    /// Greedily join small splits up to `chunk_size`, seeding each new chunk
    /// with trailing splits of the previous one up to `chunk_overlap`.
    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut out = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &split in splits {
            let len = char_len(split);
            let joined_len = |current: &VecDeque<&str>, total: usize| {
                total + len + if current.is_empty() { 0 } else { sep_len }
            };

            if joined_len(&current, total) > self.chunk_size && !current.is_empty() {
                if let Some(chunk) = join(&current, separator) {
                    out.push(chunk);
                }
                while total > self.chunk_overlap
                    || (joined_len(&current, total) > self.chunk_size && total > 0)
                {
                    let Some(first) = current.pop_front() else {
                        break;
                    };
                    let dropped = char_len(first) + if current.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(dropped);
                }
            }

            total += len + if current.is_empty() { 0 } else { sep_len };
            current.push_back(split);
        }

        if let Some(chunk) = join(&current, separator) {
            out.push(chunk);
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn join(parts: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = parts.iter().copied().collect::<Vec<_>>().join(separator);
    trimmed(&joined)
}

/// First [`PREVIEW_CHARS`] characters, with `...` appended when truncated.
pub fn content_preview(text: &str) -> String {
    if char_len(text) > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// A file's finished record together with its chunks.
#[derive(Debug, Clone)]
pub struct FileChunks {
    pub record: SourceFileRecord,
    pub chunks: Vec<DocumentChunk>,
    /// Metadata keys whose list or map values were flattened to JSON text.
    pub flattened_keys: Vec<String>,
}

/// Split every segment of `file` and attach merged, sanitized metadata.
///
/// Metadata precedence, lowest to highest: segment metadata from the
/// extractor, file-level record fields, chunk fields.
pub fn chunk_file(file: LoadedFile, splitter: &TextSplitter) -> FileChunks {
    let LoadedFile {
        mut record,
        documents,
        ..
    } = file;

    let total_characters = documents.iter().map(|d| char_len(&d.text)).sum();
    let pieces: Vec<(usize, String)> = documents
        .iter()
        .enumerate()
        .flat_map(|(doc_idx, doc)| {
            splitter
                .split_text(&doc.text)
                .into_iter()
                .map(move |text| (doc_idx, text))
        })
        .collect();

    record.chunk_count = pieces.len();
    record.total_characters = total_characters;
    record.indexed_at = Utc::now().to_rfc3339();
    let file_meta = record.to_metadata();

    let mut flattened = BTreeSet::new();
    let chunks = pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (doc_idx, text))| {
            let chunk_id = format!("{}_{}", record.file_hash, chunk_index);
            let content_length = char_len(&text);
            let content_preview = content_preview(&text);

            let mut metadata = documents[doc_idx].metadata.clone();
            metadata.extend(file_meta.clone());
            metadata.insert("chunk_index".into(), chunk_index.into());
            metadata.insert("chunk_id".into(), chunk_id.clone().into());
            metadata.insert("content_length".into(), content_length.into());
            metadata.insert("content_preview".into(), content_preview.clone().into());
            metadata.insert("source_file".into(), record.file_path.clone().into());

            let sanitized = sanitize(&metadata);
            flattened.extend(sanitized.converted);

            DocumentChunk {
                file_path: record.file_path.clone(),
                chunk_index,
                text,
                content_length,
                chunk_id,
                content_preview,
                metadata: sanitized.metadata,
            }
        })
        .collect();

    let flattened_keys: Vec<String> = flattened.into_iter().collect();
    if !flattened_keys.is_empty() {
        debug!(
            file = %record.file_path,
            count = flattened_keys.len(),
            keys = ?flattened_keys,
            "converted complex metadata values to strings"
        );
    }

    FileChunks {
        record,
        chunks,
        flattened_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawDocument;
    use serde_json::json;
    use std::path::PathBuf;

    fn record(hash: &str) -> SourceFileRecord {
        SourceFileRecord {
            file_path: "/docs/a.md".into(),
            file_name: "a.md".into(),
            file_directory: "/docs".into(),
            relative_path: "a.md".into(),
            file_size: 10,
            file_type: ".md".into(),
            mime_type: "text/markdown".into(),
            file_extension: ".md".into(),
            created_at: String::new(),
            modified_at: String::new(),
            accessed_at: String::new(),
            indexed_at: String::new(),
            chunk_count: 0,
            total_characters: 0,
            file_hash: hash.into(),
            file_permissions: "644".into(),
            is_hidden: false,
            is_symlink: false,
        }
    }

    fn loaded(documents: Vec<RawDocument>) -> LoadedFile {
        LoadedFile {
            path: PathBuf::from("/docs/a.md"),
            record: record("abc123"),
            documents,
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let splitter = TextSplitter::new(1000, 200);
        assert_eq!(splitter.split_text("Hello, world!"), vec!["Hello, world!"]);
    }

    #[test]
    fn empty_and_whitespace_text_yield_nothing() {
        let splitter = TextSplitter::new(100, 10);
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text(" \n\n \n").is_empty());
    }

    #[test]
    fn paragraphs_beyond_limit_split_on_boundaries() {
        let splitter = TextSplitter::new(40, 0);
        let text = "alpha paragraph about rust crates\n\nbeta paragraph about sqlite files";
        let chunks = splitter.split_text(text);
        assert_eq!(
            chunks,
            vec![
                "alpha paragraph about rust crates",
                "beta paragraph about sqlite files"
            ]
        );
    }

    #[test]
    fn chunks_respect_size_limit() {
        let splitter = TextSplitter::new(50, 10);
        let text = (0..40)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 50, "chunk too long: {}", c);
        }
    }

    #[test]
    fn overlap_carries_trailing_words() {
        let splitter = TextSplitter::new(20, 8);
        let chunks = splitter.split_text("one two three four five six seven");
        assert!(chunks.len() >= 2);
        let last_word_of_first = chunks[0].split(' ').last().unwrap();
        assert!(chunks[1].starts_with(last_word_of_first));
    }

    #[test]
    fn unbroken_run_falls_back_to_characters() {
        let splitter = TextSplitter::new(10, 0);
        let chunks = splitter.split_text(&"x".repeat(35));
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[3].len(), 5);
    }

    #[test]
    fn multibyte_text_counts_characters() {
        let splitter = TextSplitter::new(5, 0);
        let chunks = splitter.split_text("ääääääää");
        assert_eq!(chunks, vec!["äääää", "äää"]);
    }

    #[test]
    fn deterministic() {
        let splitter = TextSplitter::new(12, 4);
        let text = "Alpha beta\n\nGamma delta epsilon\nzeta eta theta";
        assert_eq!(splitter.split_text(text), splitter.split_text(text));
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "a".repeat(250);
        let preview = content_preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
        assert_eq!(content_preview("short"), "short");
    }

    #[test]
    fn chunk_ids_contiguous_across_segments() {
        let splitter = TextSplitter::new(1000, 0);
        let file = loaded(vec![
            RawDocument::new("slide one").with_meta("slide_number", 1),
            RawDocument::new("slide two").with_meta("slide_number", 2),
        ]);
        let out = chunk_file(file, &splitter);
        assert_eq!(out.record.chunk_count, 2);
        assert_eq!(out.record.total_characters, 18);
        let ids: Vec<_> = out.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["abc123_0", "abc123_1"]);
        assert_eq!(out.chunks[1].metadata["slide_number"], json!(2));
        assert_eq!(out.chunks[1].metadata["chunk_index"], json!(1));
        assert_eq!(out.chunks[0].metadata["source_file"], json!("/docs/a.md"));
        assert_eq!(out.chunks[0].metadata["chunk_count"], json!(2));
    }

    #[test]
    fn chunk_metadata_is_sanitized() {
        let splitter = TextSplitter::new(1000, 0);
        let file = loaded(vec![RawDocument::new("body").with_meta("tags", json!(["a", "b"]))]);
        let out = chunk_file(file, &splitter);
        assert_eq!(out.chunks[0].metadata["tags"], json!("[\"a\",\"b\"]"));
        assert_eq!(out.flattened_keys, vec!["tags".to_string()]);
    }

    #[test]
    fn primitive_metadata_flattens_nothing() {
        let splitter = TextSplitter::new(1000, 0);
        let out = chunk_file(loaded(vec![RawDocument::new("body")]), &splitter);
        assert!(out.flattened_keys.is_empty());
    }

    #[test]
    fn record_fields_override_segment_metadata() {
        let splitter = TextSplitter::new(1000, 0);
        let file = loaded(vec![RawDocument::new("body").with_meta("file_name", "spoofed")]);
        let out = chunk_file(file, &splitter);
        assert_eq!(out.chunks[0].metadata["file_name"], json!("a.md"));
    }
}
