//! Sync progress reporting.
//!
//! Reports observable progress during `omnidex sync` so users see which
//! source is listing, how many detail fetches are left, and the final
//! counts. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use omnidex_core::models::PassCounts;

/// A single progress event for one source pass.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Listing the remote; total unknown.
    Discovering { source: String },
    /// Detail fetches: `n` of `total` done.
    Fetching { source: String, n: u64, total: u64 },
    Finished { source: String, counts: PassCounts },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress: `sync gh-issues  fetching  1,234 / 5,000 items`.
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { source } => {
                format!("sync {}  listing...\n", source)
            }
            SyncProgressEvent::Fetching { source, n, total } => format!(
                "sync {}  fetching  {} / {} items\n",
                source,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Finished { source, counts } => format!(
                "sync {}  done  new {}  updated {}  deleted {}  unchanged {}  failed {}\n",
                source,
                format_number(counts.new),
                format_number(counts.updated),
                format_number(counts.deleted),
                format_number(counts.unchanged),
                format_number(counts.failed)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Discovering { source } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "listing"
            }),
            SyncProgressEvent::Fetching { source, n, total } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "fetching",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Finished { source, counts } => serde_json::json!({
                "event": "finished",
                "source": source,
                "counts": counts
            }),
        };
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", obj);
        let _ = err.flush();
    }
}

pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
