//! Filesystem watcher (§4.8): bridges `notify`'s std-thread event stream
//! into the async incident pipeline and debounces raw change events to
//! stable paths before tailing them. The bridging pattern (std mpsc +
//! `std::thread::spawn` drain loop) is grounded on
//! `src-tauri::file_watcher::PlanWatcher`; debouncing and the async
//! pipeline beyond it are this crate's own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;

/// Tracks the most recent change timestamp per path and yields only
/// paths that have been quiet for at least `stability` — a file mid
/// write shouldn't be tailed until it settles.
#[derive(Default)]
pub struct PathDebouncer {
    last_event_at: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
}

impl PathDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: PathBuf, at: DateTime<Utc>) {
        self.last_event_at.lock().expect("path debouncer mutex poisoned").insert(path, at);
    }

    /// Removes and returns every tracked path whose last event is at
    /// least `stability` old as of `now`.
    pub fn take_stable(&self, now: DateTime<Utc>, stability: ChronoDuration) -> Vec<PathBuf> {
        let mut guard = self.last_event_at.lock().expect("path debouncer mutex poisoned");
        let stable: Vec<PathBuf> = guard.iter().filter(|(_, at)| now - **at >= stability).map(|(p, _)| p.clone()).collect();
        for path in &stable {
            guard.remove(path);
        }
        stable
    }
}

/// Which classification branch a changed path routes through (§4.8),
/// inferred from filename conventions under the watched workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Log,
    OutputOrTargets,
    Status,
    Research,
    Unknown,
}

pub fn classify_path_kind(path: &Path) -> PathKind {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let in_dir = |segment: &str| path.components().any(|c| c.as_os_str() == segment);

    if name == "status.json" {
        PathKind::Status
    } else if in_dir("research") || name.contains("findings") {
        PathKind::Research
    } else if in_dir("outputs") || in_dir("targets") || name.ends_with(".targets") {
        PathKind::OutputOrTargets
    } else if name.ends_with(".log") || in_dir("logs") || in_dir("recon") {
        PathKind::Log
    } else {
        PathKind::Unknown
    }
}

/// Bridges a `notify` watcher into a debounced async event source.
pub struct IncidentWatcher {
    _watcher: RecommendedWatcher,
    changed_paths: tokio_mpsc::UnboundedReceiver<PathBuf>,
}

impl IncidentWatcher {
    pub fn new(watch_root: &Path) -> Result<Self, notify::Error> {
        let (std_tx, std_rx) = std_mpsc::channel::<Result<Event, notify::Error>>();
        let mut watcher = RecommendedWatcher::new(std_tx, notify::Config::default())?;
        watcher.watch(watch_root, RecursiveMode::Recursive)?;

        let (tokio_tx, tokio_rx) = tokio_mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for res in std_rx {
                match res {
                    Ok(event) => {
                        for path in event.paths {
                            if tokio_tx.send(path).is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(%err, "incident watcher error");
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher, changed_paths: tokio_rx })
    }

    /// Drains every raw change event queued since the last call without
    /// blocking, recording each into `debouncer`.
    pub fn drain_into(&mut self, debouncer: &PathDebouncer, now: DateTime<Utc>) {
        while let Ok(path) = self.changed_paths.try_recv() {
            debouncer.record(path, now);
        }
    }
}
