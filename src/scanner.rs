//! Directory scanning, content hashing, and file stat collection.
//!
//! [`Scanner::scan`] walks a tree without following directory symlinks and
//! returns every regular file (or symlink to one) whose extension is on the
//! allow-list, sorted by path. Hidden files are included.
//!
//! [`hash_file`] streams the file through SHA-256 in fixed-size blocks, so
//! memory use does not depend on file size. An unreadable file yields an
//! empty digest, which callers treat as "skip this file this run".

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::extract::{file_extension, mime_type_for, ExtractorRegistry};
use crate::models::SourceFileRecord;

const HASH_BLOCK_SIZE: usize = 4096;

pub struct Scanner {
    extensions: BTreeSet<String>,
    excludes: GlobSet,
}

impl Scanner {
    /// `extensions` are lowercase with a leading dot; `exclude_globs` match
    /// paths relative to the scan root.
    pub fn new<I, S>(extensions: I, exclude_globs: &[String]) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
            excludes: build_globset(exclude_globs)?,
        })
    }

    /// Allow-list taken from the registered extraction strategies.
    pub fn from_registry(registry: &ExtractorRegistry, exclude_globs: &[String]) -> Result<Self> {
        Self::new(registry.extensions().map(str::to_string), exclude_globs)
    }

    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            bail!("Directory does not exist: {}", root.display());
        }
        if !root.is_dir() {
            bail!("Path is not a directory: {}", root.display());
        }
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", root.display()))?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            let path = entry.path();
            let is_candidate = entry.file_type().is_file()
                || (entry.path_is_symlink()
                    && std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false));
            if !is_candidate {
                continue;
            }

            let relative = path.strip_prefix(&root).unwrap_or(path);
            if self.excludes.is_match(relative) {
                debug!(path = %relative.display(), "excluded by glob");
                continue;
            }

            if self.extensions.contains(&file_extension(path)) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Hex SHA-256 of the file's bytes, or `""` if the file cannot be read.
pub fn hash_file(path: &Path) -> String {
    match try_hash_file(path) {
        Ok(digest) => digest,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not hash file, skipping");
            String::new()
        }
    }
}

fn try_hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Stat `path` into a record. Chunk counts and `indexed_at` are filled in
/// later by the chunker.
pub fn build_record(path: &Path, base: &Path, file_hash: &str) -> Result<SourceFileRecord> {
    let meta =
        std::fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    let is_symlink = std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_directory = path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let relative_path = path.strip_prefix(base).unwrap_or(path).display().to_string();
    let file_extension = file_extension(path);
    let file_type = if file_extension.is_empty() {
        "no_extension".to_string()
    } else {
        file_extension.clone()
    };

    let modified = meta.modified().ok();
    Ok(SourceFileRecord {
        file_path: path.display().to_string(),
        is_hidden: file_name.starts_with('.'),
        file_name,
        file_directory,
        relative_path,
        file_size: meta.len(),
        file_type,
        mime_type: mime_type_for(path),
        file_extension,
        created_at: timestamp(meta.created().ok().or(modified)),
        modified_at: timestamp(modified),
        accessed_at: timestamp(meta.accessed().ok().or(modified)),
        indexed_at: String::new(),
        chunk_count: 0,
        total_characters: 0,
        file_hash: file_hash.to_string(),
        file_permissions: permission_bits(&meta),
        is_symlink,
    })
}

fn timestamp(t: Option<SystemTime>) -> String {
    t.map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_default()
}

/// Low nine permission bits in octal, e.g. `"644"`.
#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "444".to_string()
    } else {
        "666".to_string()
    }
}
