//! Polling file watcher.
//!
//! Deliberately no OS notification backend: the orchestrator polls once per
//! tick and a full rescan is rate-limited by the configured interval. A scan
//! walks the configured roots recursively, filters by extension, skips the
//! usual build/VCS directories, and snapshots path -> mtime. `poll` reports
//! true when the file set or any mtime differs from the previous snapshot.
//! The very first scan primes the snapshot without signaling a change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace};

const IGNORED_DIRS: &[&str] = &[".git", "zig-cache", "zig-out", "target", "node_modules"];
/// Safety valve against runaway trees.
const MAX_FILES: usize = 50_000;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub roots: Vec<PathBuf>,
    /// Extensions without the leading dot, e.g. `["zig", "c", "h"]`.
    pub extensions: Vec<String>,
    pub interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("src")],
            extensions: vec!["zig".to_string()],
            interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
pub struct Watcher {
    config: WatchConfig,
    snapshot: HashMap<PathBuf, SystemTime>,
    last_scan: Option<Instant>,
    primed: bool,
}

impl Watcher {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            snapshot: HashMap::new(),
            last_scan: None,
            primed: false,
        }
    }

    /// Cheap to call every tick; rescans at most once per interval.
    pub fn poll(&mut self) -> bool {
        if let Some(last) = self.last_scan {
            if last.elapsed() < self.config.interval {
                return false;
            }
        }
        self.last_scan = Some(Instant::now());

        let current = self.scan();
        if !self.primed {
            self.primed = true;
            self.snapshot = current;
            debug!(target: "watch", files = self.snapshot.len(), "snapshot_primed");
            return false;
        }
        let changed = current != self.snapshot;
        if changed {
            trace!(
                target: "watch",
                before = self.snapshot.len(),
                after = current.len(),
                "change_detected"
            );
            self.snapshot = current;
        }
        changed
    }

    fn scan(&self) -> HashMap<PathBuf, SystemTime> {
        let mut out = HashMap::with_capacity(self.snapshot.len().max(64));
        for root in &self.config.roots {
            self.scan_dir(root, &mut out);
        }
        out
    }

    fn scan_dir(&self, dir: &Path, out: &mut HashMap<PathBuf, SystemTime>) {
        if out.len() >= MAX_FILES {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                let skip = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| IGNORED_DIRS.contains(&name) || name.starts_with('.'));
                if !skip {
                    self.scan_dir(&path, out);
                }
            } else if file_type.is_file() && self.wanted(&path) {
                if let Ok(meta) = entry.metadata() {
                    if let Ok(mtime) = meta.modified() {
                        out.insert(path, mtime);
                    }
                }
            }
        }
    }

    fn wanted(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.config.extensions.iter().any(|want| want == ext)
    }
}
