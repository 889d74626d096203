//! Similarity search over the vector index.
//!
//! The query is embedded with the same provider used for indexing, the
//! nearest chunks are fetched by cosine distance, and each hit is annotated
//! with a relevance band and display-ready file metadata.
//!
//! # Relevance bands
//!
//! | Distance | Band |
//! |----------|------|
//! | ≤ 0.3 | Very High |
//! | ≤ 0.5 | High |
//! | ≤ 0.7 | Medium |
//! | ≤ 0.9 | Low |
//! | > 0.9 | Very Low |

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::files::format_bytes;
use crate::models::Metadata;
use crate::vector_index::{IndexHit, VectorIndex};

/// Characters of chunk text shown in a hit preview.
pub const HIT_PREVIEW_CHARS: usize = 300;

/// Candidate multiplier when a file-type filter discards hits.
const FILTER_OVERFETCH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelevanceBand {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Medium,
    Low,
    #[serde(rename = "Very Low")]
    VeryLow,
}

impl RelevanceBand {
    pub fn from_distance(distance: f64) -> Self {
        if distance <= 0.3 {
            RelevanceBand::VeryHigh
        } else if distance <= 0.5 {
            RelevanceBand::High
        } else if distance <= 0.7 {
            RelevanceBand::Medium
        } else if distance <= 0.9 {
            RelevanceBand::Low
        } else {
            RelevanceBand::VeryLow
        }
    }
}

impl std::fmt::Display for RelevanceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelevanceBand::VeryHigh => "Very High",
            RelevanceBand::High => "High",
            RelevanceBand::Medium => "Medium",
            RelevanceBand::Low => "Low",
            RelevanceBand::VeryLow => "Very Low",
        };
        f.write_str(s)
    }
}

/// Either ranked results or a marker that nothing has been indexed yet.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    NoIndex { message: String },
    Results(SearchResult),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub results_count: usize,
    pub search_summary: SearchSummary,
    pub results: Vec<RankedHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchSummary {
    pub total_matches: usize,
    /// Distance of the best hit, 0 when there are none.
    pub top_distance: f64,
    pub files_found: usize,
    pub file_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    pub rank: usize,
    pub chunk_id: String,
    pub distance: f64,
    pub relevance_level: RelevanceBand,
    pub content: HitContent,
    pub file: HitFile,
    pub timestamps: HitTimestamps,
    pub system: HitSystem,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitContent {
    pub preview: String,
    pub full_content: String,
    pub length: usize,
    pub chunk_info: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitFile {
    pub name: String,
    pub path: String,
    pub directory: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub mime_type: String,
    pub size: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitTimestamps {
    pub created: String,
    pub modified: String,
    pub indexed: String,
    pub last_accessed: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitSystem {
    pub permissions: String,
    pub is_hidden: bool,
    pub is_symlink: bool,
    pub file_hash: String,
}

impl SearchResult {
    fn from_hits(query: &str, hits: Vec<RankedHit>) -> Self {
        let files: BTreeSet<&str> = hits.iter().map(|h| h.file.path.as_str()).collect();
        let types: BTreeSet<&str> = hits.iter().map(|h| h.file.file_type.as_str()).collect();
        let search_summary = SearchSummary {
            total_matches: hits.len(),
            top_distance: hits.first().map(|h| round4(h.distance)).unwrap_or(0.0),
            files_found: files.len(),
            file_types: types.into_iter().map(String::from).collect(),
        };
        let message = hits
            .is_empty()
            .then(|| "No relevant documents found in the indexed collection".to_string());
        Self {
            query: query.to_string(),
            results_count: hits.len(),
            search_summary,
            results: hits,
            message,
        }
    }
}

/// Find the `k` chunks nearest to `query`, optionally restricted to files
/// with extension `file_type` (`"md"` and `".md"` are equivalent).
pub async fn search(
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    query: &str,
    k: usize,
    file_type: Option<&str>,
) -> Result<SearchOutcome> {
    if query.trim().is_empty() || k == 0 {
        return Ok(SearchOutcome::Results(SearchResult::from_hits(query, Vec::new())));
    }

    if !index.exists().await? {
        return Ok(SearchOutcome::NoIndex {
            message: "No index found. Index a directory first.".to_string(),
        });
    }

    let query_vec = embedder
        .embed_query(query)
        .await
        .context("Failed to embed query")?;

    let wanted = file_type.map(normalize_extension);
    let fetch = match wanted {
        Some(_) => {
            let available = index.count().await?;
            (k * FILTER_OVERFETCH).min(available.max(k))
        }
        None => k,
    };

    let mut hits = index.query(&query_vec, fetch).await?;
    debug!(candidates = hits.len(), fetch, "vector query");

    if let Some(ext) = &wanted {
        hits.retain(|hit| {
            hit.metadata
                .get("file_extension")
                .and_then(|v| v.as_str())
                .map(|e| e.eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        });
    }
    hits.truncate(k);

    let ranked = hits
        .into_iter()
        .enumerate()
        .map(|(i, hit)| rank_hit(i + 1, hit))
        .collect();

    Ok(SearchOutcome::Results(SearchResult::from_hits(query, ranked)))
}

/// `"MD"`, `".md"` and `"md"` all become `".md"`.
fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn rank_hit(rank: usize, hit: IndexHit) -> RankedHit {
    let IndexHit {
        chunk_id,
        text,
        metadata: m,
        distance,
        ..
    } = hit;

    let chunk_index = meta_u64(&m, "chunk_index");
    let chunk_count = meta_u64(&m, "chunk_count");
    let size_bytes = meta_u64(&m, "file_size");
    let hash = meta_str(&m, "file_hash");

    let content = HitContent {
        preview: truncate_chars(&text, HIT_PREVIEW_CHARS),
        length: text.chars().count(),
        full_content: text,
        chunk_info: format!("Chunk {} of {}", chunk_index + 1, chunk_count),
    };

    let path = m
        .get("relative_path")
        .or_else(|| m.get("source_file"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let file_type = m
        .get("file_type")
        .or_else(|| m.get("file_extension"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let file = HitFile {
        name: meta_str(&m, "file_name"),
        path,
        directory: meta_str(&m, "file_directory"),
        file_type,
        mime_type: meta_str(&m, "mime_type"),
        size: format_bytes(size_bytes),
        size_bytes,
    };

    let timestamps = HitTimestamps {
        created: format_timestamp(&meta_str(&m, "created_at")),
        modified: format_timestamp(&meta_str(&m, "modified_at")),
        indexed: format_timestamp(&meta_str(&m, "indexed_at")),
        last_accessed: format_timestamp(&meta_str(&m, "accessed_at")),
    };

    let system = HitSystem {
        permissions: meta_str(&m, "file_permissions"),
        is_hidden: meta_bool(&m, "is_hidden"),
        is_symlink: meta_bool(&m, "is_symlink"),
        file_hash: format!("{}...", hash.chars().take(16).collect::<String>()),
    };

    RankedHit {
        rank,
        chunk_id,
        distance: round4(distance),
        relevance_level: RelevanceBand::from_distance(distance),
        content,
        file,
        timestamps,
        system,
        metadata: m,
    }
}

fn meta_str(m: &Metadata, key: &str) -> String {
    match m.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "Unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

fn meta_u64(m: &Metadata, key: &str) -> u64 {
    m.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

fn meta_bool(m: &Metadata, key: &str) -> bool {
    m.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// RFC 3339 → `2024-05-01 12:30:00 UTC`. Unparseable input is returned as-is.
pub fn format_timestamp(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| {
            dt.with_timezone(&chrono::Utc)
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
        })
        .unwrap_or_else(|_| ts.to_string())
}

/// Print an outcome for terminal users.
pub fn print_outcome(outcome: &SearchOutcome) {
    let result = match outcome {
        SearchOutcome::NoIndex { message } => {
            println!("{}", message);
            return;
        }
        SearchOutcome::Results(result) => result,
    };

    if result.results.is_empty() {
        println!("No results.");
        return;
    }

    for hit in &result.results {
        println!(
            "{}. [{:.4}] {} ({})",
            hit.rank, hit.distance, hit.file.path, hit.relevance_level
        );
        println!("    {}  {}", hit.content.chunk_info, hit.file.size);
        println!("    modified: {}", hit.timestamps.modified);
        println!(
            "    excerpt: \"{}\"",
            hit.content.preview.replace('\n', " ").trim()
        );
        println!();
    }
    println!(
        "{} results from {} files",
        result.results_count, result.search_summary.files_found
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::models::DocumentChunk;
    use crate::vector_index::InMemoryVectorIndex;
    use serde_json::json;

    fn chunk(id: &str, text: &str, ext: &str) -> DocumentChunk {
        let mut metadata = Metadata::new();
        metadata.insert("file_extension".into(), json!(ext));
        metadata.insert("file_type".into(), json!(ext));
        metadata.insert("relative_path".into(), json!(format!("{}{}", id, ext)));
        metadata.insert("file_name".into(), json!(format!("{}{}", id, ext)));
        metadata.insert("chunk_index".into(), json!(0));
        metadata.insert("chunk_count".into(), json!(1));
        metadata.insert("file_size".into(), json!(2048));
        metadata.insert("file_hash".into(), json!("0123456789abcdef0123456789abcdef"));
        metadata.insert("modified_at".into(), json!("2024-05-01T12:30:00+00:00"));
        DocumentChunk {
            file_path: format!("/docs/{}{}", id, ext),
            chunk_index: 0,
            text: text.into(),
            content_length: text.len(),
            chunk_id: format!("{}_0", id),
            content_preview: text.into(),
            metadata,
        }
    }

    async fn populated() -> (HashProvider, InMemoryVectorIndex) {
        let embedder = HashProvider::new(1024, 1_000_000);
        let index = InMemoryVectorIndex::new();
        let chunks = vec![
            chunk("rust", "rust ownership and borrowing rules", ".md"),
            chunk("bread", "sourdough bread needs a starter", ".txt"),
            chunk("notes", "rust ownership notes for the team", ".txt"),
        ];
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        index.create_with_documents(&chunks, &vectors).await.unwrap();
        (embedder, index)
    }

    #[test]
    fn relevance_band_thresholds() {
        assert_eq!(RelevanceBand::from_distance(0.0), RelevanceBand::VeryHigh);
        assert_eq!(RelevanceBand::from_distance(0.3), RelevanceBand::VeryHigh);
        assert_eq!(RelevanceBand::from_distance(0.31), RelevanceBand::High);
        assert_eq!(RelevanceBand::from_distance(0.5), RelevanceBand::High);
        assert_eq!(RelevanceBand::from_distance(0.7), RelevanceBand::Medium);
        assert_eq!(RelevanceBand::from_distance(0.9), RelevanceBand::Low);
        assert_eq!(RelevanceBand::from_distance(1.2), RelevanceBand::VeryLow);
    }

    #[test]
    fn band_serializes_with_spaces() {
        assert_eq!(
            serde_json::to_value(RelevanceBand::VeryHigh).unwrap(),
            json!("Very High")
        );
        assert_eq!(RelevanceBand::VeryLow.to_string(), "Very Low");
    }

    #[test]
    fn timestamp_formatting() {
        assert_eq!(
            format_timestamp("2024-05-01T14:30:00+02:00"),
            "2024-05-01 12:30:00 UTC"
        );
        assert_eq!(format_timestamp("not a date"), "not a date");
    }

    #[test]
    fn extension_normalization() {
        assert_eq!(normalize_extension("MD"), ".md");
        assert_eq!(normalize_extension(".txt"), ".txt");
    }

    #[tokio::test]
    async fn missing_index_is_distinguishable() {
        let embedder = HashProvider::new(1024, 1_000_000);
        let index = InMemoryVectorIndex::new();
        let outcome = search(&embedder, &index, "anything", 3, None).await.unwrap();
        assert!(matches!(outcome, SearchOutcome::NoIndex { .. }));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "no_index");
    }

    #[tokio::test]
    async fn empty_query_returns_no_hits() {
        let (embedder, index) = populated().await;
        let SearchOutcome::Results(result) = search(&embedder, &index, "  ", 3, None).await.unwrap()
        else {
            panic!("expected results");
        };
        assert_eq!(result.results_count, 0);
        assert!(result.message.is_some());
    }

    #[tokio::test]
    async fn hits_are_ranked_and_annotated() {
        let (embedder, index) = populated().await;
        let SearchOutcome::Results(result) = search(&embedder, &index, "rust ownership", 3, None)
            .await
            .unwrap()
        else {
            panic!("expected results");
        };

        assert_eq!(result.results_count, 3);
        let distances: Vec<f64> = result.results.iter().map(|h| h.distance).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(result.results[2].chunk_id, "bread_0");

        let top = &result.results[0];
        assert_eq!(top.rank, 1);
        assert_eq!(top.relevance_level, RelevanceBand::from_distance(top.distance));
        assert_eq!(top.content.chunk_info, "Chunk 1 of 1");
        assert_eq!(top.file.size, "2.0 KB");
        assert_eq!(top.system.file_hash, "0123456789abcdef...");
        assert_eq!(top.timestamps.modified, "2024-05-01 12:30:00 UTC");
        assert_eq!(result.search_summary.top_distance, top.distance);
        assert_eq!(result.search_summary.file_types, vec![".md", ".txt"]);
    }

    #[tokio::test]
    async fn file_type_filter_applies_before_truncation() {
        let (embedder, index) = populated().await;
        let SearchOutcome::Results(result) = search(&embedder, &index, "rust ownership", 1, Some("txt"))
            .await
            .unwrap()
        else {
            panic!("expected results");
        };
        assert_eq!(result.results_count, 1);
        assert_eq!(result.results[0].chunk_id, "notes_0");
    }
}
