//! File watcher with debouncing for vault changes.
//!
//! Uses notify-debouncer-mini for efficient file change detection, filtered
//! through a glob-based `ignorePatterns` set instead of a hardcoded `.md`-only
//! filter.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use sync_core::RelativePath;
use tokio::sync::mpsc;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: RelativePath,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

pub struct FileWatcher {
    vault_path: PathBuf,
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Track last seen mtime to filter spurious events and distinguish a create
/// from a modify (absent from the cache means "not seen before").
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

fn build_ignore_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

impl FileWatcher {
    /// 200ms debounce period to avoid rapid-fire events during saves.
    pub fn new(vault_path: PathBuf, ignore_patterns: &[String]) -> Result<Self> {
        // Canonicalize to resolve symlinks; on macOS /var/folders/... is
        // actually /private/var/folders/..., and FSEvents needs the real path.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let vault_path_clone = vault_path.clone();
        let ignore_set = build_ignore_set(ignore_patterns);

        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));
        let mtime_cache_clone = Arc::clone(&mtime_cache);

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(
                            &event,
                            &vault_path_clone,
                            &ignore_set,
                            &mtime_cache_clone,
                        ) {
                            if event_tx.send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => error!("file watcher error: {}", e),
            },
        )?;

        debouncer.watcher().watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    fn process_event(
        event: &DebouncedEvent,
        vault_path: &Path,
        ignore_set: &GlobSet,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let path = &event.path;
        let relative = path.strip_prefix(vault_path).ok()?;
        let relative_str = relative.to_str()?;

        if relative_str.starts_with(".sync") || relative_str.contains("/.sync/") {
            return None;
        }
        if ignore_set.is_match(relative_str) {
            return None;
        }

        let relative_path = relative.to_path_buf();
        let exists = path.exists();

        let kind = if exists {
            let mut cache = mtime_cache.lock().expect("mtime cache mutex poisoned");
            let metadata = std::fs::metadata(path).ok()?;
            let mtime = metadata.modified().ok()?;
            let previously_seen = cache.get(&relative_path);
            let is_create = previously_seen.is_none();
            if previously_seen == Some(&mtime) {
                // Mtime unchanged: spurious event, skip it.
                return None;
            }
            cache.insert(relative_path, mtime);
            if is_create {
                FileEventKind::Created
            } else {
                FileEventKind::Modified
            }
        } else {
            mtime_cache
                .lock()
                .expect("mtime cache mutex poisoned")
                .remove(&relative_path);
            FileEventKind::Deleted
        };

        debug!("file event: {:?} - {}", kind, relative_str);

        Some(FileEvent {
            path: RelativePath::new(relative_str),
            kind,
        })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}
