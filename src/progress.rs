//! Sync progress reporting.
//!
//! Reports observable progress during `alm sync` so users see how many pages
//! have been fetched and when the new generation is being written.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// A page came back: `fetched` entities accumulated over `page` requests.
    Fetching {
        page: usize,
        total_pages: usize,
        fetched: usize,
    },
    /// Raw entities are being mapped to records.
    Normalizing { count: usize },
    /// Records are being written as a new generation.
    Publishing { count: usize },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the fetch and sync pipeline.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  page 2/3  1,000 defects".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Fetching {
                page,
                total_pages,
                fetched,
            } => format!(
                "sync  page {}/{}  {} defects\n",
                page,
                total_pages,
                format_number(*fetched as u64)
            ),
            SyncProgressEvent::Normalizing { count } => {
                format!("sync  normalizing {} defects\n", format_number(*count as u64))
            }
            SyncProgressEvent::Publishing { count } => {
                format!("sync  publishing {} defects\n", format_number(*count as u64))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_value(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Fetching {
                page,
                total_pages,
                fetched,
            } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "page": page,
                "total_pages": total_pages,
                "fetched": fetched
            }),
            SyncProgressEvent::Normalizing { count } => serde_json::json!({
                "event": "progress",
                "phase": "normalizing",
                "count": count
            }),
            SyncProgressEvent::Publishing { count } => serde_json::json!({
                "event": "progress",
                "phase": "publishing",
                "count": count
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_value(&event)) {
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

/// Progress mode for the CLI: auto, off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Auto,
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

    /// Build a reporter for this mode. `Auto` resolves via [`Self::default_for_tty`].
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Auto => Self::default_for_tty().reporter(),
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
