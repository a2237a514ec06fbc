//! `Scheduler`: the bounded-concurrency work queue, public entry points,
//! offline-reconciliation pass, and reset/stop (spec §4.7). Grounded in the
//! teacher's `vault.rs::reconcile` walk plus a `tokio::sync::Semaphore` +
//! `JoinSet` bounded worker pool.

use crate::file_ops::FileOps;
use crate::fs::FileSystem;
use crate::hash::ContentHash;
use crate::ids::DocumentId;
use crate::keyed_locks::KeyedLocks;
use crate::merge::Merge;
use crate::metadata::MetadataStore;
use crate::path::RelativePath;
use crate::persistence::Persistence;
use crate::reset::ResetCoordinator;
use crate::syncer::CoreSyncer;
use crate::transport::{Transport, VaultUpdateNotification};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tokio::task::JoinSet;

pub struct Scheduler<F: FileSystem, M: Merge, T: Transport, P: Persistence> {
    syncer: Arc<CoreSyncer<F, M, T, P>>,
    metadata: Arc<MetadataStore<P>>,
    file_ops: Arc<FileOps<F, M>>,
    fs: Arc<F>,
    transport: Arc<T>,
    reset_coordinator: Arc<ResetCoordinator>,
    remote_update_locks: KeyedLocks<DocumentId>,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    in_flight: AtomicUsize,
    remaining_tx: watch::Sender<usize>,
    pub(crate) restart_remote_loop: Notify,
    is_sync_enabled: bool,
}

impl<F: FileSystem + 'static, M: Merge + 'static, T: Transport + 'static, P: Persistence + 'static>
    Scheduler<F, M, T, P>
{
    pub fn new(
        syncer: Arc<CoreSyncer<F, M, T, P>>,
        metadata: Arc<MetadataStore<P>>,
        file_ops: Arc<FileOps<F, M>>,
        fs: Arc<F>,
        transport: Arc<T>,
        reset_coordinator: Arc<ResetCoordinator>,
        concurrency: usize,
        is_sync_enabled: bool,
    ) -> Self {
        let (remaining_tx, _rx) = watch::channel(0);
        Self {
            syncer,
            metadata,
            file_ops,
            fs,
            transport,
            reset_coordinator,
            remote_update_locks: KeyedLocks::new(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            in_flight: AtomicUsize::new(0),
            remaining_tx,
            restart_remote_loop: Notify::new(),
            is_sync_enabled,
        }
    }

    pub fn remaining_operations(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Spec §6: a subscription for the Client API's remaining-operations
    /// count, updated on every admission to and completion of the queue.
    pub fn subscribe_remaining(&self) -> watch::Receiver<usize> {
        self.remaining_tx.subscribe()
    }

    fn publish_remaining(&self) {
        let _ = self.remaining_tx.send(self.in_flight.load(Ordering::SeqCst));
    }

    async fn spawn(self: &Arc<Self>, work: impl std::future::Future<Output = ()> + Send + 'static) {
        let semaphore = Arc::clone(&self.semaphore);
        let this = Arc::clone(self);
        this.in_flight.fetch_add(1, Ordering::SeqCst);
        this.publish_remaining();
        let mut tasks = this.tasks.lock().await;
        let in_flight_marker = Arc::clone(&this);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            work.await;
            in_flight_marker.in_flight.fetch_sub(1, Ordering::SeqCst);
            in_flight_marker.publish_remaining();
        });
    }

    /// Spec §4.7: drop if a non-deleted record already exists at `path`.
    /// `create_pending` itself mints and attaches the serialising handle; it
    /// is released once `sync_local_create` has run to completion.
    pub async fn sync_local_create(self: &Arc<Self>, path: RelativePath) {
        if let Some(record) = self.metadata.get_latest_by_path(&path).await {
            if !record.is_deleted {
                return;
            }
        }
        let document_id = DocumentId::new();
        let Ok(handle) = self.metadata.create_pending(document_id, &path).await else {
            return;
        };
        let syncer = Arc::clone(&self.syncer);
        let metadata = Arc::clone(&self.metadata);
        self.spawn(async move {
            if let Some(record) = metadata.get_by_id(document_id).await {
                let _ = syncer.sync_local_create(&record).await;
            }
            metadata.remove_pending(document_id, handle).await;
        })
        .await;
    }

    /// Spec §4.7: unconditionally mark `delete(path)` before enqueuing, so
    /// a racing in-flight update can't resurrect stale metadata. Resolved
    /// and locked through `resolve_by_path`, the same serialisation point
    /// every other per-record procedure uses.
    pub async fn sync_local_delete(self: &Arc<Self>, path: RelativePath) {
        self.metadata.delete(&path).await;
        let Some((record, handle)) = self.metadata.resolve_by_path(&path).await else {
            return;
        };
        let document_id = record.document_id;
        let syncer = Arc::clone(&self.syncer);
        let metadata = Arc::clone(&self.metadata);
        self.spawn(async move {
            let _ = syncer.sync_local_delete(&record).await;
            metadata.remove_pending(document_id, handle).await;
            metadata.remove(document_id).await;
        })
        .await;
    }

    /// Spec §4.7: a rename moves the record first; a rebound from a
    /// server-driven rename (where `remoteRelativePath` already matches)
    /// is dropped.
    pub async fn sync_local_update(self: &Arc<Self>, old_path: Option<RelativePath>, path: RelativePath) {
        if let Some(old) = &old_path {
            let at_new = self.metadata.get_latest_by_path(&path).await;
            if at_new.as_ref().map(|r| r.is_deleted).unwrap_or(true) {
                let _ = self.metadata.move_path(old, &path).await;
            }
        }
        let Some((record, handle)) = self.metadata.resolve_by_path(&path).await else {
            return;
        };
        if let Some(meta) = &record.metadata {
            if old_path.is_some() && meta.remote_relative_path == path {
                self.metadata.remove_pending(record.document_id, handle).await;
                return;
            }
        }
        let document_id = record.document_id;
        let syncer = Arc::clone(&self.syncer);
        let metadata = Arc::clone(&self.metadata);
        self.spawn(async move {
            let _ = syncer.sync_local_update(&record, old_path, false).await;
            metadata.remove_pending(document_id, handle).await;
        })
        .await;
    }

    /// Spec §4.7: a known document is resolved and locked through the same
    /// `resolve_by_path` serialisation point `sync_local_update` uses (Case
    /// A delegates straight into it with `force=true`). An unknown document
    /// is instead serialised through a dedicated `KeyedLocks` instance keyed
    /// by `documentId`, so two concurrent notifications creating the same
    /// new id never both reach `create_pending` (Case B).
    pub async fn sync_remote_update(self: &Arc<Self>, notification: VaultUpdateNotification) {
        let document_id = notification.document_id;
        match self.metadata.get_by_id(document_id).await {
            Some(known) => {
                let at_or_ahead = known
                    .metadata
                    .as_ref()
                    .map(|m| m.parent_version_id >= notification.vault_update_id)
                    .unwrap_or(false);
                if at_or_ahead {
                    self.metadata.add_seen_update_id(notification.vault_update_id).await;
                    return;
                }
                let Some((record, handle)) = self.metadata.resolve_by_path(&known.relative_path).await
                else {
                    return;
                };
                let syncer = Arc::clone(&self.syncer);
                let metadata = Arc::clone(&self.metadata);
                self.spawn(async move {
                    let _ = syncer.sync_remote_update(notification, Some(record)).await;
                    metadata.remove_pending(document_id, handle).await;
                })
                .await;
            }
            None => self.spawn_remote_create(document_id, notification).await,
        }
    }

    async fn spawn_remote_create(
        self: &Arc<Self>,
        document_id: DocumentId,
        notification: VaultUpdateNotification,
    ) {
        let this = Arc::clone(self);
        let syncer = Arc::clone(&self.syncer);
        self.spawn(async move {
            this.remote_update_locks.wait_for_lock(&document_id).await;
            let _ = syncer.sync_remote_update(notification, None).await;
            let _ = this.remote_update_locks.unlock(&document_id);
        })
        .await;
    }

    /// Wait for the current queue to fully drain.
    pub async fn wait_idle(&self) {
        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Abort every outstanding task immediately. Used for shutdown, not
    /// part of the normal reset sequence (which drains gracefully first).
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        self.in_flight.store(0, Ordering::SeqCst);
        self.publish_remaining();
    }

    /// Spec §4.7: drains current work, signals the `ResetCoordinator`,
    /// wipes `MetadataStore`, then wakes any parked `RemoteLoop` so it
    /// restarts from a clean `last_seen`.
    pub async fn reset(&self) {
        self.wait_idle().await;
        self.reset_coordinator.reset();
        self.metadata.clear_all().await;
        self.restart_remote_loop.notify_waiters();
    }

    /// Spec §4.7: the one-shot, boot-time reconciliation pass.
    pub async fn schedule_offline_reconciliation(self: &Arc<Self>) {
        if !self.is_sync_enabled {
            return;
        }

        if !self.metadata.has_initial_sync_completed().await {
            if let Ok(listing) = self.transport.get_all(None).await {
                let local_files = self.fs.list_all().await.unwrap_or_default();
                for doc in &listing.latest_documents {
                    if doc.is_deleted {
                        continue;
                    }
                    if local_files.contains(&doc.relative_path)
                        && self.metadata.get_by_id(doc.document_id).await.is_none()
                    {
                        let _ = self
                            .metadata
                            .create_pending(doc.document_id, &doc.relative_path)
                            .await;
                        self.metadata
                            .update_metadata(
                                doc.document_id,
                                crate::metadata::DocumentMetadata {
                                    parent_version_id: doc.vault_update_id,
                                    content_hash: ContentHash::empty(),
                                    remote_relative_path: doc.relative_path.clone(),
                                },
                            )
                            .await;
                    }
                }
            }
            self.metadata.set_has_initial_sync_completed(true).await;
        }

        let local_files = self.fs.list_all().await.unwrap_or_default();
        let resolved = self.metadata.resolved_documents().await.unwrap_or_default();
        let by_path: HashMap<&RelativePath, &crate::metadata::DocumentRecord> =
            resolved.iter().map(|r| (&r.relative_path, r)).collect();

        // Candidates for a move: resolved records whose path has no local
        // file, indexed by content hash for the local-file hash lookup below.
        let mut by_hash: HashMap<ContentHash, RelativePath> = HashMap::new();
        for record in &resolved {
            if !local_files.contains(&record.relative_path) {
                if let Some(meta) = &record.metadata {
                    by_hash.insert(meta.content_hash, record.relative_path.clone());
                }
            }
        }

        for path in &local_files {
            if let Some(record) = by_path.get(path) {
                if record.metadata.is_some() {
                    self.sync_local_update(None, path.clone()).await;
                    continue;
                }
            }
            let Ok(bytes) = self.file_ops.read(path).await else {
                continue;
            };
            let hash = ContentHash::of(&bytes);
            if let Some(old_path) = by_hash.get(&hash).cloned() {
                self.sync_local_update(Some(old_path), path.clone()).await;
            } else {
                self.sync_local_create(path.clone()).await;
            }
        }

        for record in &resolved {
            if !record.is_deleted && !local_files.contains(&record.relative_path) {
                self.sync_local_delete(record.relative_path.clone()).await;
            }
        }
    }
}
