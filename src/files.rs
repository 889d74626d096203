//! Inventory of indexed files.
//!
//! Read-only views over the metadata store: filtered listings, single-file
//! lookup and an overall summary. Used by `cidx files`, `cidx info` and
//! `cidx stats` to show what the index currently covers.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use walkdir::WalkDir;

use crate::metadata_store::{MetadataStore, RecordMap};
use crate::models::SourceFileRecord;
use crate::vector_index::VectorIndex;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Name,
    Size,
    #[default]
    Modified,
    Created,
    Indexed,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(SortKey::Name),
            "size" => Some(SortKey::Size),
            "modified" => Some(SortKey::Modified),
            "created" => Some(SortKey::Created),
            "indexed" => Some(SortKey::Indexed),
            _ => None,
        }
    }
}

/// Filters for [`list_indexed_files`].
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Extension, with or without the leading dot.
    pub file_type: Option<String>,
    /// Substring matched against the file's directory.
    pub directory: Option<String>,
    pub sort_by: SortKey,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    pub total_matching: usize,
    pub files: Vec<SourceFileRecord>,
}

/// List records matching `filter`, newest (or largest) first; names sort A→Z.
pub fn list_indexed_files(records: &RecordMap, filter: &FileFilter) -> FileListing {
    let wanted_ext = filter.file_type.as_deref().map(|t| {
        let t = t.trim().to_lowercase();
        if t.starts_with('.') {
            t
        } else {
            format!(".{}", t)
        }
    });

    let mut files: Vec<SourceFileRecord> = records
        .values()
        .filter(|r| match &wanted_ext {
            Some(ext) => r.file_extension.eq_ignore_ascii_case(ext),
            None => true,
        })
        .filter(|r| match &filter.directory {
            Some(dir) => r.file_directory.contains(dir.as_str()),
            None => true,
        })
        .cloned()
        .collect();

    match filter.sort_by {
        SortKey::Name => files.sort_by(|a, b| a.file_name.cmp(&b.file_name)),
        SortKey::Size => files.sort_by(|a, b| b.file_size.cmp(&a.file_size)),
        SortKey::Modified => files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at)),
        SortKey::Created => files.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Indexed => files.sort_by(|a, b| b.indexed_at.cmp(&a.indexed_at)),
    }

    let total_matching = files.len();
    let limit = filter
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    files.truncate(limit);

    FileListing {
        total_matching,
        files,
    }
}

/// Look up a record by absolute path, relative path or bare file name.
pub fn file_info<'a>(records: &'a RecordMap, path: &str) -> Option<&'a SourceFileRecord> {
    if let Some(record) = records.get(path) {
        return Some(record);
    }
    if let Ok(abs) = Path::new(path).canonicalize() {
        if let Some(record) = records.get(&abs.display().to_string()) {
            return Some(record);
        }
    }
    records
        .values()
        .find(|r| r.relative_path == path)
        .or_else(|| records.values().find(|r| r.file_name == path))
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub storage_path: String,
    pub total_files: usize,
    /// Sum of `chunk_count` over store records.
    pub total_chunks: usize,
    /// Rows actually present in the vector index.
    pub indexed_chunks: usize,
    pub total_bytes: u64,
    pub average_file_size: u64,
    pub file_types: BTreeMap<String, usize>,
    pub storage_bytes: u64,
}

pub async fn collect_stats(
    store: &MetadataStore,
    index: &dyn VectorIndex,
    storage_dir: &Path,
) -> Result<IndexStats> {
    let records = store.load();
    let total_files = records.len();
    let total_chunks = records.values().map(|r| r.chunk_count).sum();
    let total_bytes: u64 = records.values().map(|r| r.file_size).sum();

    let mut file_types = BTreeMap::new();
    for r in records.values() {
        *file_types.entry(r.file_type.clone()).or_insert(0) += 1;
    }

    let indexed_chunks = if index.exists().await? {
        index.count().await?
    } else {
        0
    };

    Ok(IndexStats {
        storage_path: storage_dir.display().to_string(),
        total_files,
        total_chunks,
        indexed_chunks,
        total_bytes,
        average_file_size: if total_files > 0 {
            total_bytes / total_files as u64
        } else {
            0
        },
        file_types,
        storage_bytes: dir_size(storage_dir),
    })
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

impl IndexStats {
    pub fn print(&self) {
        println!("Corpus Index — Stats");
        println!("====================");
        println!();
        println!("  Storage:     {}", self.storage_path);
        println!("  Size:        {}", format_bytes(self.storage_bytes));
        println!();
        println!("  Files:       {}", self.total_files);
        println!("  Chunks:      {}", self.total_chunks);
        println!(
            "  In index:    {} / {} ({}%)",
            self.indexed_chunks,
            self.total_chunks,
            if self.total_chunks > 0 {
                (self.indexed_chunks * 100) / self.total_chunks
            } else {
                0
            }
        );
        println!("  Source size: {}", format_bytes(self.total_bytes));
        println!("  Avg file:    {}", format_bytes(self.average_file_size));

        if !self.file_types.is_empty() {
            println!();
            println!("  By type:");
            println!("  {:<16} {:>6}", "TYPE", "FILES");
            println!("  {}", "-".repeat(23));
            for (file_type, count) in &self.file_types {
                println!("  {:<16} {:>6}", file_type, count);
            }
        }
        println!();
    }
}

/// Print one line per file.
pub fn print_listing(listing: &FileListing) {
    if listing.files.is_empty() {
        println!("No indexed files.");
        return;
    }
    println!(
        "  {:<40} {:>10} {:>8}   {}",
        "FILE", "SIZE", "CHUNKS", "INDEXED"
    );
    println!("  {}", "-".repeat(76));
    for f in &listing.files {
        println!(
            "  {:<40} {:>10} {:>8}   {}",
            f.relative_path,
            format_bytes(f.file_size),
            f.chunk_count,
            format_ts_relative(&f.indexed_at)
        );
    }
    if listing.total_matching > listing.files.len() {
        println!();
        println!(
            "  showing {} of {} files",
            listing.files.len(),
            listing.total_matching
        );
    }
}

pub fn print_record(record: &SourceFileRecord) {
    println!("{}", record.file_path);
    println!("  relative:    {}", record.relative_path);
    println!("  type:        {} ({})", record.file_type, record.mime_type);
    println!(
        "  size:        {} ({} bytes)",
        format_bytes(record.file_size),
        record.file_size
    );
    println!("  chunks:      {}", record.chunk_count);
    println!("  characters:  {}", record.total_characters);
    println!("  modified:    {}", record.modified_at);
    println!("  indexed:     {}", format_ts_relative(&record.indexed_at));
    println!("  permissions: {}", record.file_permissions);
    println!("  hash:        {}", record.file_hash);
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: &str) -> String {
    let Ok(then) = chrono::DateTime::parse_from_rfc3339(ts) else {
        return ts.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - then.timestamp();

    if delta < 0 {
        return format_ts_iso(then.timestamp());
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(then.timestamp())
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
