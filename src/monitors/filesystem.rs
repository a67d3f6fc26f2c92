//! Filesystem monitor: periodic recursive scan-and-diff over a configured
//! path set. Grounded on `FileSystemMonitor` in the original
//! `real_time_monitor.py`. Uses `walkdir` for the scan, matching the
//! original's polling semantics rather than an inotify-driven push model.

use super::{EmitFn, Monitor};
use crate::cancel::CancellationToken;
use crate::model::{PerceptionEvent, PerceptionKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FileState {
    mtime: SystemTime,
    size: u64,
}

#[derive(Debug, Clone)]
pub struct FileSystemMonitorConfig {
    pub paths: Vec<PathBuf>,
    pub poll_interval_ms: u64,
    pub ignore_patterns: Vec<String>,
}

impl Default for FileSystemMonitorConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            poll_interval_ms: 1000,
            ignore_patterns: vec![
                "*.tmp".into(),
                "*.log".into(),
                ".*".into(),
                "~*".into(),
            ],
        }
    }
}

fn matches_ignore(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(suffix) = pattern.strip_prefix('*') {
            name.ends_with(suffix)
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            name.starts_with(prefix)
        } else {
            name == pattern
        }
    })
}

pub struct FileSystemMonitor {
    config: FileSystemMonitorConfig,
    states: Mutex<HashMap<PathBuf, FileState>>,
}

impl FileSystemMonitor {
    pub fn new(config: FileSystemMonitorConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn scan(&self) -> HashMap<PathBuf, FileState> {
        let mut current = HashMap::new();
        for root in &self.config.paths {
            for entry in walkdir::WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if matches_ignore(&name, &self.config.ignore_patterns) {
                    continue;
                }
                if let Ok(meta) = entry.metadata() {
                    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    current.insert(
                        entry.path().to_path_buf(),
                        FileState { mtime, size: meta.len() },
                    );
                }
            }
        }
        current
    }

    async fn scan_once(&self, emit: &EmitFn) {
        let current = self.scan();
        let mut states = self.states.lock().await;

        for (path, state) in &current {
            match states.get(path) {
                None => emit_change(emit, path, "created"),
                Some(prev) if prev != state => emit_change(emit, path, "modified"),
                _ => {}
            }
        }
        for path in states.keys() {
            if !current.contains_key(path) {
                emit_change(emit, path, "deleted");
            }
        }

        *states = current;
    }

    pub async fn run(self: Arc<Self>, emit: EmitFn, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.scan_once(&emit).await,
            }
        }
    }
}

fn emit_change(emit: &EmitFn, path: &Path, change: &str) {
    if path.as_os_str().is_empty() {
        warn!(target: "monitor.filesystem", "empty path in diff, skipping");
        return;
    }
    let mut payload = crate::model::Payload::new();
    payload.insert("path".into(), path.to_string_lossy().into_owned().into());
    payload.insert("change".into(), change.into());
    emit(PerceptionEvent::new(PerceptionKind::Filesystem, "filesystem_monitor", payload, 4));
}

#[async_trait]
impl Monitor for FileSystemMonitor {}
