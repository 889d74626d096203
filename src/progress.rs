//! Index-run progress reporting.
//!
//! The pipeline emits [`IndexProgressEvent`]s at phase boundaries and after
//! every committed batch. Reporters write to **stderr** so stdout stays
//! parseable for scripts.
//!
//! | Event | Emitted |
//! |-------|---------|
//! | `Scanning` | once, before the directory walk |
//! | `Loading` | after each file is loaded (n of total) |
//! | `Embedding` | after each committed batch (chunks done of total) |

use std::io::Write;

/// A single progress event for an index run.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexProgressEvent {
    Scanning {
        root: String,
    },
    Loading {
        n: u64,
        total: u64,
    },
    Embedding {
        batches_completed: u64,
        chunks_completed: u64,
        total_chunks: u64,
    },
}

/// Receives progress events. Called from the ingest pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  1,200 / 5,000 chunks (12 batches)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Scanning { root } => format!("index {}  scanning...\n", root),
            IndexProgressEvent::Loading { n, total } => format!(
                "index  loading  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Embedding {
                batches_completed,
                chunks_completed,
                total_chunks,
            } => format!(
                "index  embedding  {} / {} chunks ({} batches)\n",
                format_number(*chunks_completed),
                format_number(*total_chunks),
                format_number(*batches_completed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "root": root
            }),
            IndexProgressEvent::Loading { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Embedding {
                batches_completed,
                chunks_completed,
                total_chunks,
            } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "batches_completed": batches_completed,
                "n": chunks_completed,
                "total": total_chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
