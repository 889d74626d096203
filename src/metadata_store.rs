//! Durable map of absolute file path → [`SourceFileRecord`].
//!
//! Stored as pretty-printed JSON at `<storage>/metadata.json`. A missing or
//! unreadable file loads as an empty map, which means "everything needs
//! indexing". Saves write a sibling temp file and rename it into place so a
//! crash never leaves a truncated store behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::models::SourceFileRecord;

pub const METADATA_FILE: &str = "metadata.json";

pub type RecordMap = BTreeMap<String, SourceFileRecord>;

#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            path: storage_dir.join(METADATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. Never fails: absence or corruption yields an empty map.
    pub fn load(&self) -> RecordMap {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RecordMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read metadata store, starting empty");
                return RecordMap::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "metadata store is corrupt, starting empty");
                RecordMap::new()
            }
        }
    }

    /// Atomically replace the stored map.
    pub fn save(&self, records: &RecordMap) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("metadata path has no parent directory")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(records)?;
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!(records = records.len(), path = %self.path.display(), "metadata store saved");
        Ok(())
    }

    /// Remove the stored map, if any.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// True when `path` has no record or its recorded hash differs.
pub fn needs_reindex(records: &RecordMap, path: &str, current_hash: &str) -> bool {
    records
        .get(path)
        .map(|r| r.file_hash != current_hash)
        .unwrap_or(true)
}
