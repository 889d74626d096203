//! Parallel document loading.
//!
//! Each file is dispatched to the extraction strategy registered for its
//! extension. A failing file (corrupt, encrypted, undecodable, no backend)
//! is logged and omitted; it never aborts the run. Files are loaded on the
//! blocking pool with at most `workers` in flight, and results come back in
//! input order regardless of completion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::extract::ExtractorRegistry;
use crate::models::{RawDocument, SourceFileRecord};
use crate::progress::{IndexProgressEvent, ProgressReporter};
use crate::scanner::build_record;

/// A file whose text was extracted, with its stat record.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub record: SourceFileRecord,
    pub documents: Vec<RawDocument>,
}

#[derive(Clone)]
pub struct Loader {
    registry: Arc<ExtractorRegistry>,
    workers: usize,
}

impl Loader {
    pub fn new(registry: Arc<ExtractorRegistry>, workers: usize) -> Self {
        Self {
            registry,
            workers: workers.max(1),
        }
    }

    /// Extract `path`. Returns an empty vec (with a warning) on any failure.
    pub fn load(&self, path: &Path) -> Vec<RawDocument> {
        load_documents(&self.registry, path)
    }

    /// Load `(path, hash)` pairs concurrently. Files that yield no text are
    /// dropped; the rest keep their input order.
    pub async fn load_all(
        &self,
        files: Vec<(PathBuf, String)>,
        base: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Vec<LoadedFile> {
        let total = files.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();

        for (idx, (path, hash)) in files.into_iter().enumerate() {
            let registry = self.registry.clone();
            let semaphore = semaphore.clone();
            let base = base.to_path_buf();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let joined =
                    tokio::task::spawn_blocking(move || load_one(&registry, &path, &base, &hash))
                        .await;
                (idx, joined)
            });
        }

        let mut loaded = Vec::new();
        let mut done = 0u64;
        while let Some(res) = set.join_next().await {
            done += 1;
            reporter.report(IndexProgressEvent::Loading { n: done, total });
            match res {
                Ok((idx, Ok(Some(file)))) => loaded.push((idx, file)),
                Ok((_, Ok(None))) => {}
                Ok((idx, Err(e))) => warn!(file = idx, error = %e, "loader task failed"),
                Err(e) => warn!(error = %e, "loader task failed"),
            }
        }

        loaded.sort_by_key(|(idx, _)| *idx);
        loaded.into_iter().map(|(_, f)| f).collect()
    }
}

fn load_documents(registry: &ExtractorRegistry, path: &Path) -> Vec<RawDocument> {
    let documents = match registry.extract(path) {
        Ok(docs) => docs,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping file");
            return Vec::new();
        }
    };

    let source = path.display().to_string();
    documents
        .into_iter()
        .filter(|d| !d.text.trim().is_empty())
        .enumerate()
        .map(|(i, doc)| {
            doc.with_meta("source", source.clone())
                .with_meta("segment_index", i)
        })
        .collect()
}

fn load_one(
    registry: &ExtractorRegistry,
    path: &Path,
    base: &Path,
    hash: &str,
) -> Option<LoadedFile> {
    let documents = load_documents(registry, path);
    if documents.is_empty() {
        debug!(path = %path.display(), "no text extracted");
        return None;
    }
    match build_record(path, base, hash) {
        Ok(record) => Some(LoadedFile {
            path: path.to_path_buf(),
            record,
            documents,
        }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<IndexProgressEvent>>);

    impl ProgressReporter for Recorder {
        fn report(&self, event: IndexProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn loader(workers: usize) -> Loader {
        Loader::new(Arc::new(ExtractorRegistry::builtin()), workers)
    }

    #[test]
    fn load_attaches_segment_metadata() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.md");
        fs::write(&path, "# Title\n\nBody").unwrap();
        let docs = loader(1).load(&path);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata["segment_index"], serde_json::json!(0));
        assert_eq!(
            docs[0].metadata["source"],
            serde_json::json!(path.display().to_string())
        );
    }

    #[test]
    fn load_failure_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        fs::write(&path, "not a pdf").unwrap();
        assert!(loader(1).load(&path).is_empty());
        assert!(loader(1).load(&tmp.path().join("tool.exe")).is_empty());
    }

    #[tokio::test]
    async fn load_all_skips_bad_files_and_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let mut files = Vec::new();
        for i in 0..12 {
            let path = tmp.path().join(format!("doc{:02}.txt", i));
            fs::write(&path, format!("document number {}", i)).unwrap();
            files.push((path, format!("hash{}", i)));
        }
        let broken = tmp.path().join("broken.docx");
        fs::write(&broken, "not a zip").unwrap();
        files.insert(3, (broken, "hx".into()));
        let empty = tmp.path().join("empty.md");
        fs::write(&empty, "  \n").unwrap();
        files.insert(7, (empty, "he".into()));

        let recorder = Recorder::default();
        let loaded = loader(3).load_all(files, tmp.path(), &recorder).await;

        assert_eq!(loaded.len(), 12);
        for (i, file) in loaded.iter().enumerate() {
            assert_eq!(file.record.file_name, format!("doc{:02}.txt", i));
            assert_eq!(file.record.file_hash, format!("hash{}", i));
            assert_eq!(file.documents[0].text, format!("document number {}", i));
        }
        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 14);
        assert_eq!(
            events.last(),
            Some(&IndexProgressEvent::Loading { n: 14, total: 14 })
        );
    }
}
