//! The history log exposed by the Client API (spec §6, §7): an append-only
//! record of sync outcomes with a subscription mechanism for a status UI,
//! grounded in the teacher's `EventBus`/`Subscription` disposer pattern.

use crate::path::RelativePath;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// The procedure whose outcome a history entry reports, used to key
/// business-error entries (spec §4.6.5, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryKind {
    Create,
    Update,
    Delete,
    Move,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub status: HistoryStatus,
    pub path: RelativePath,
    pub detail: Option<String>,
}

impl HistoryEntry {
    pub fn success(kind: HistoryKind, path: RelativePath) -> Self {
        Self {
            kind,
            status: HistoryStatus::Success,
            path,
            detail: None,
        }
    }

    pub fn error(kind: HistoryKind, path: RelativePath, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status: HistoryStatus::Error,
            path,
            detail: Some(detail.into()),
        }
    }
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    history: Weak<History>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(history) = self.history.upgrade() {
            history.unsubscribe(self.id);
        }
    }
}

/// Append-only history log plus a subscription bus for new entries.
pub struct History {
    entries: RwLock<Vec<HistoryEntry>>,
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(&HistoryEntry) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for History {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl History {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn append(&self, entry: HistoryEntry) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&entry);
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&HistoryEntry) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            history: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as TestCounter, Ordering as O};

    #[test]
    fn appended_entries_accumulate_in_order() {
        let history = History::new();
        history.append(HistoryEntry::success(HistoryKind::Create, RelativePath::new("a.md")));
        history.append(HistoryEntry::error(HistoryKind::Update, RelativePath::new("b.md"), "boom"));
        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, HistoryKind::Create);
        assert_eq!(entries[1].status, HistoryStatus::Error);
    }

    #[test]
    fn subscribers_are_notified_on_append() {
        let history = History::new();
        let count = Arc::new(TestCounter::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = history.subscribe(move |_| {
            count_clone.fetch_add(1, O::Relaxed);
        });
        history.append(HistoryEntry::success(HistoryKind::Delete, RelativePath::new("c.md")));
        assert_eq!(count.load(O::Relaxed), 1);
    }

    #[test]
    fn dropped_subscription_stops_receiving_events() {
        let history = History::new();
        let count = Arc::new(TestCounter::new(0));
        let count_clone = Arc::clone(&count);
        let sub = history.subscribe(move |_| {
            count_clone.fetch_add(1, O::Relaxed);
        });
        drop(sub);
        history.append(HistoryEntry::success(HistoryKind::Move, RelativePath::new("d.md")));
        assert_eq!(count.load(O::Relaxed), 0);
    }
}
