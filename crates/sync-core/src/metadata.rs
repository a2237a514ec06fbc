//! The document metadata model and `MetadataStore` (spec §3, §4.5).

use crate::hash::ContentHash;
use crate::ids::{DocumentId, VaultUpdateId};
use crate::covered_min::CoveredMin;
use crate::path::RelativePath;
use crate::persistence::{Persistence, PersistedDocument, Settings, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify};

/// Optimistic-concurrency metadata acknowledged by the server for a document.
/// Absent on a record means "pending, never yet acknowledged" (spec invariant 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub parent_version_id: VaultUpdateId,
    pub content_hash: ContentHash,
    pub remote_relative_path: RelativePath,
}

/// An opaque handle representing a single in-flight sync procedure's claim
/// on a record, used to serialise access through `resolve_by_path`. Handles
/// carry no data; they exist only to be tracked in `pendingUpdates` and
/// dropped (or explicitly removed) when the procedure completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingHandle(u64);

/// The mutable cell owned exclusively by `MetadataStore` (spec §3).
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub relative_path: RelativePath,
    pub document_id: DocumentId,
    pub metadata: Option<DocumentMetadata>,
    pub is_deleted: bool,
    pub parallel_version: u64,
    pending_updates: Vec<PendingHandle>,
}

impl DocumentRecord {
    pub fn is_pending(&self) -> bool {
        self.metadata.is_none()
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("a non-deleted record already exists at path {0}")]
    PathOccupied(RelativePath),
    #[error("two resolved records share documentId {0}")]
    DuplicateDocumentId(DocumentId),
    #[error("two records share path {0} and parallelVersion {1}")]
    DuplicateParallelVersion(RelativePath, u64),
    #[error("no record found for document {0}")]
    UnknownDocument(DocumentId),
    #[error("document {0} has no acknowledged metadata or is deleted")]
    NotReadyForUpdate(DocumentId),
}

struct Inner {
    records: Vec<DocumentRecord>,
    covered_min: CoveredMin,
    has_initial_sync_completed: bool,
    settings: Settings,
    next_handle: u64,
    /// Waiters parked on `resolve_by_path`, keyed by the handle they are
    /// waiting behind.
    waiters: HashMap<PendingHandle, Vec<oneshot::Sender<()>>>,
}

/// In-memory index of `DocumentRecord`s with a write-through persisted
/// projection. `MetadataStore` is the sole mutator of records; callers only
/// read fields and invoke the named mutators below.
pub struct MetadataStore<P: Persistence> {
    inner: Mutex<Inner>,
    persistence: P,
    dirty: Notify,
}

impl<P: Persistence> MetadataStore<P> {
    pub async fn load(persistence: P) -> Self {
        let snapshot = persistence.load().await.ok().flatten();
        let (records, covered_min, has_initial_sync_completed, settings) = match snapshot {
            Some(s) => {
                let records = s
                    .documents
                    .into_iter()
                    .enumerate()
                    .map(|(i, d)| DocumentRecord {
                        relative_path: d.relative_path,
                        document_id: d.document_id,
                        metadata: Some(DocumentMetadata {
                            parent_version_id: d.parent_version_id,
                            content_hash: d.content_hash,
                            remote_relative_path: d.remote_relative_path,
                        }),
                        is_deleted: d.content_hash == ContentHash::empty(),
                        parallel_version: i as u64,
                        pending_updates: Vec::new(),
                    })
                    .collect();
                (
                    records,
                    CoveredMin::new(s.last_seen_update_id),
                    s.has_initial_sync_completed,
                    s.settings.unwrap_or_default(),
                )
            }
            None => (Vec::new(), CoveredMin::new(0), false, Settings::default()),
        };
        let store = Self {
            inner: Mutex::new(Inner {
                records,
                covered_min,
                has_initial_sync_completed,
                settings,
                next_handle: 0,
                waiters: HashMap::new(),
            }),
            persistence,
            dirty: Notify::new(),
        };
        store
    }

    pub async fn has_initial_sync_completed(&self) -> bool {
        self.inner.lock().await.has_initial_sync_completed
    }

    pub async fn set_has_initial_sync_completed(&self, v: bool) {
        let mut guard = self.inner.lock().await;
        guard.has_initial_sync_completed = v;
        drop(guard);
        self.mark_dirty();
    }

    pub async fn settings(&self) -> Settings {
        self.inner.lock().await.settings.clone()
    }

    /// Replace the settings wholesale and persist. `Client::set_setting`
    /// reads-modifies-writes through this to keep the mutation atomic from
    /// the caller's perspective.
    pub async fn set_settings(&self, settings: Settings) {
        self.inner.lock().await.settings = settings;
        self.mark_dirty();
    }

    /// For each `relativePath`, the record with the highest `parallelVersion`.
    pub async fn resolved_documents(&self) -> Result<Vec<DocumentRecord>, MetadataError> {
        let guard = self.inner.lock().await;
        let mut best: HashMap<&RelativePath, &DocumentRecord> = HashMap::new();
        for record in &guard.records {
            match best.get(&record.relative_path) {
                Some(existing) if existing.parallel_version == record.parallel_version => {
                    return Err(MetadataError::DuplicateParallelVersion(
                        record.relative_path.clone(),
                        record.parallel_version,
                    ));
                }
                Some(existing) if existing.parallel_version > record.parallel_version => {}
                _ => {
                    best.insert(&record.relative_path, record);
                }
            }
        }
        Ok(best.into_values().cloned().collect())
    }

    pub async fn get_latest_by_path(&self, path: &RelativePath) -> Option<DocumentRecord> {
        let guard = self.inner.lock().await;
        guard
            .records
            .iter()
            .filter(|r| &r.relative_path == path)
            .max_by_key(|r| r.parallel_version)
            .cloned()
    }

    pub async fn get_by_id(&self, id: DocumentId) -> Option<DocumentRecord> {
        let guard = self.inner.lock().await;
        guard.records.iter().find(|r| r.document_id == id).cloned()
    }

    fn fresh_handle(guard: &mut Inner) -> PendingHandle {
        let handle = PendingHandle(guard.next_handle);
        guard.next_handle += 1;
        handle
    }

    /// Append a new pending record at `path`, one `parallelVersion` above
    /// whatever is currently resolved there, attaching `handle`.
    pub async fn create_pending(
        &self,
        document_id: DocumentId,
        path: &RelativePath,
    ) -> Result<PendingHandle, MetadataError> {
        let mut guard = self.inner.lock().await;
        if guard
            .records
            .iter()
            .any(|r| &r.relative_path == path && !r.is_deleted)
        {
            return Err(MetadataError::PathOccupied(path.clone()));
        }
        let parallel_version = guard
            .records
            .iter()
            .filter(|r| &r.relative_path == path)
            .map(|r| r.parallel_version + 1)
            .max()
            .unwrap_or(0);
        let handle = Self::fresh_handle(&mut guard);
        guard.records.push(DocumentRecord {
            relative_path: path.clone(),
            document_id,
            metadata: None,
            is_deleted: false,
            parallel_version,
            pending_updates: vec![handle],
        });
        Ok(handle)
    }

    /// Returns the latest record at `path`, after awaiting any handles
    /// already pending on it, then mints and attaches a fresh handle as the
    /// new occupant. This is the serialisation point for per-document
    /// operations: callers release the returned handle via `remove_pending`
    /// once their procedure completes.
    pub async fn resolve_by_path(
        &self,
        path: &RelativePath,
    ) -> Option<(DocumentRecord, PendingHandle)> {
        loop {
            let wait_on = {
                let mut guard = self.inner.lock().await;
                let idx = guard
                    .records
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| &r.relative_path == path)
                    .max_by_key(|(_, r)| r.parallel_version)
                    .map(|(i, _)| i);
                let Some(idx) = idx else { return None };
                let existing = guard.records[idx].pending_updates.clone();
                if existing.is_empty() {
                    let handle = Self::fresh_handle(&mut guard);
                    guard.records[idx].pending_updates.push(handle);
                    return Some((guard.records[idx].clone(), handle));
                }
                // Park behind the oldest currently-pending handle.
                let (tx, rx) = oneshot::channel();
                guard
                    .waiters
                    .entry(*existing.last().unwrap())
                    .or_default()
                    .push(tx);
                rx
            };
            let _ = wait_on.await;
        }
    }

    pub async fn update_metadata(
        &self,
        document_id: DocumentId,
        new_metadata: DocumentMetadata,
    ) {
        {
            let mut guard = self.inner.lock().await;
            if let Some(record) = guard.records.iter_mut().find(|r| r.document_id == document_id)
            {
                record.metadata = Some(new_metadata);
            }
        }
        self.mark_dirty();
    }

    /// Relocate the record at `old_path` to `new_path`, raising its
    /// `parallelVersion` above any live record at `new_path`. Fails if a
    /// non-deleted record already occupies `new_path`.
    pub async fn move_path(
        &self,
        old_path: &RelativePath,
        new_path: &RelativePath,
    ) -> Result<(), MetadataError> {
        {
            let mut guard = self.inner.lock().await;
            if guard
                .records
                .iter()
                .any(|r| &r.relative_path == new_path && !r.is_deleted)
            {
                return Err(MetadataError::PathOccupied(new_path.clone()));
            }
            let bump = guard
                .records
                .iter()
                .filter(|r| &r.relative_path == new_path)
                .map(|r| r.parallel_version + 1)
                .max()
                .unwrap_or(0);
            if let Some(record) = guard
                .records
                .iter_mut()
                .filter(|r| &r.relative_path == old_path)
                .max_by_key(|r| r.parallel_version)
            {
                record.relative_path = new_path.clone();
                record.parallel_version = record.parallel_version.max(bump);
            }
        }
        self.mark_dirty();
        Ok(())
    }

    pub async fn delete(&self, path: &RelativePath) {
        {
            let mut guard = self.inner.lock().await;
            if let Some(record) = guard
                .records
                .iter_mut()
                .filter(|r| &r.relative_path == path)
                .max_by_key(|r| r.parallel_version)
            {
                record.is_deleted = true;
            }
        }
        self.mark_dirty();
    }

    /// Drop a record entirely (used once its delete is acknowledged
    /// remotely and its trailing pending updates have settled).
    pub async fn remove(&self, document_id: DocumentId) {
        {
            let mut guard = self.inner.lock().await;
            guard.records.retain(|r| r.document_id != document_id);
        }
        self.mark_dirty();
    }

    /// Idempotent: tolerates stragglers racing a reset.
    pub async fn remove_pending(&self, document_id: DocumentId, handle: PendingHandle) {
        let wake: Vec<oneshot::Sender<()>> = {
            let mut guard = self.inner.lock().await;
            if let Some(record) = guard.records.iter_mut().find(|r| r.document_id == document_id)
            {
                record.pending_updates.retain(|h| *h != handle);
            }
            guard.waiters.remove(&handle).unwrap_or_default()
        };
        for tx in wake {
            let _ = tx.send(());
        }
    }

    pub async fn add_seen_update_id(&self, v: VaultUpdateId) {
        {
            let mut guard = self.inner.lock().await;
            guard.covered_min.add(v.0);
        }
        self.mark_dirty();
    }

    pub async fn last_seen(&self) -> VaultUpdateId {
        VaultUpdateId(self.inner.lock().await.covered_min.min())
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Serialise the resolved-records projection through the Persistence
    /// collaborator. Call sites treat this as fire-and-forget; the caller
    /// of `load`/mutators does not await durability.
    pub async fn persist_now(&self) -> Result<(), crate::persistence::PersistenceError> {
        let guard = self.inner.lock().await;
        let documents: Vec<PersistedDocument> = guard
            .records
            .iter()
            .filter(|r| !r.is_pending())
            .map(|r| PersistedDocument {
                document_id: r.document_id,
                relative_path: r.relative_path.clone(),
                parent_version_id: r.metadata.as_ref().unwrap().parent_version_id,
                content_hash: r.metadata.as_ref().unwrap().content_hash,
                remote_relative_path: r.metadata.as_ref().unwrap().remote_relative_path.clone(),
            })
            .collect();
        let snapshot = Snapshot {
            documents,
            last_seen_update_id: guard.covered_min.min(),
            has_initial_sync_completed: guard.has_initial_sync_completed,
            settings: Some(guard.settings.clone()),
        };
        drop(guard);
        self.persistence.save(&snapshot).await
    }

    /// Spawn a coalesced background save: bursts of `mark_dirty()` collapse
    /// into a single in-flight persistence call.
    pub fn spawn_persist_loop(self: &Arc<Self>)
    where
        P: 'static,
    {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                store.dirty.notified().await;
                if let Err(err) = store.persist_now().await {
                    tracing::warn!(%err, "failed to persist metadata snapshot");
                }
            }
        });
    }

    /// Wipe all in-memory records and the `CoveredMin` floor, used by
    /// `Scheduler::reset` to discard local sync state before a fresh
    /// offline-reconciliation pass. Waiters parked in `resolve_by_path` are
    /// woken so they observe an empty store rather than hanging forever.
    pub async fn clear_all(&self) {
        let waiters: Vec<oneshot::Sender<()>> = {
            let mut guard = self.inner.lock().await;
            guard.records.clear();
            guard.covered_min = CoveredMin::new(0);
            guard.has_initial_sync_completed = false;
            guard.waiters.drain().flat_map(|(_, v)| v).collect()
        };
        for tx in waiters {
            let _ = tx.send(());
        }
        self.mark_dirty();
    }
}
