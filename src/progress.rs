//! Sync progress reporting.
//!
//! Reports what `plansync sync` is doing so users see how many files were
//! found and how many are left. Progress is emitted on **stderr** so stdout
//! stays parseable (`--json`).

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Walking the documentation root. Total unknown.
    Discovering { root: String },
    /// `path` (relative to the root) was the nth of total files handled.
    Processing {
        root: String,
        n: u64,
        total: u64,
        path: String,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync engine.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr:
/// "sync docs/plan  [1,234/5,000]  E04-search/E04-F02-cache/tasks/T-E04-F02-001.md".
pub struct StderrProgress;

impl StderrProgress {
    fn line(event: &SyncProgressEvent) -> String {
        match event {
            SyncProgressEvent::Discovering { root } => {
                format!("sync {}  scanning for markdown files...\n", root)
            }
            SyncProgressEvent::Processing { root, n, total, path } => {
                let width = format_number(*total).len();
                format!(
                    "sync {}  [{:>width$}/{}]  {}\n",
                    root,
                    format_number(*n),
                    format_number(*total),
                    path,
                    width = width
                )
            }
        }
    }
}

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = Self::line(&event);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn value(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "discovering"
            }),
            SyncProgressEvent::Processing { root, n, total, path } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "processing",
                "n": n,
                "total": total,
                "path": path
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::value(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    /// Build a reporter for this mode for the sync engine.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
