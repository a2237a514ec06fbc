//! `CoreSyncer` — the four sync procedures (spec §4.6) and failure
//! classification (spec §4.6.5). Each procedure runs under the per-path
//! lock already held by `SafeFsFacade` through `FileOps`, consults
//! `MetadataStore`, performs at most one `Transport` round-trip, reconciles
//! content via `FileOps`, and appends a `History` entry.

use crate::file_ops::{FileOps, FileOpsError};
use crate::fs::FileSystem;
use crate::hash::ContentHash;
use crate::history::{History, HistoryEntry, HistoryKind};
use crate::ids::{DocumentId, VaultUpdateId};
use crate::merge::Merge;
use crate::metadata::{DocumentMetadata, DocumentRecord, MetadataError, MetadataStore};
use crate::path::RelativePath;
use crate::persistence::Persistence;
use crate::transport::{DocumentUpdate, Transport, TransportError, VaultUpdateNotification};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("file not found: {0}")]
    FileNotFound(RelativePath),
    #[error("a reset was requested")]
    Reset,
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error("{intent:?} failed: {source}")]
    Business {
        intent: HistoryKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Internal union of the errors a procedure body can raise, before
/// classification. Not exposed; `classify` reduces it to `SyncError`.
#[derive(Debug, Error)]
enum ProcError {
    #[error(transparent)]
    FileOps(#[from] FileOpsError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl ProcError {
    fn is_file_not_found(&self) -> Option<&RelativePath> {
        match self {
            ProcError::FileOps(FileOpsError::Fs(crate::fs::FsError::NotFound(p))) => Some(p),
            _ => None,
        }
    }

    fn is_reset(&self) -> bool {
        matches!(self, ProcError::Transport(TransportError::Reset))
    }
}

pub struct CoreSyncer<F: FileSystem, M: Merge, T: Transport, P: Persistence> {
    file_ops: FileOps<F, M>,
    metadata: Arc<MetadataStore<P>>,
    transport: Arc<T>,
    history: Arc<History>,
    max_file_size_bytes: u64,
}

impl<F: FileSystem, M: Merge, T: Transport, P: Persistence> CoreSyncer<F, M, T, P> {
    pub fn new(
        file_ops: FileOps<F, M>,
        metadata: Arc<MetadataStore<P>>,
        transport: Arc<T>,
        history: Arc<History>,
        max_file_size_bytes: u64,
    ) -> Self {
        Self {
            file_ops,
            metadata,
            transport,
            history,
            max_file_size_bytes,
        }
    }

    /// Spec §4.6.5: `FileNotFound` and `ResetError` complete normally;
    /// everything else is recorded as an ERROR history entry and rethrown.
    async fn classify(
        &self,
        intent: HistoryKind,
        path: RelativePath,
        result: Result<(), ProcError>,
    ) -> Result<(), SyncError> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(missing) = err.is_file_not_found() {
                    tracing::info!(path = %missing, "file vanished mid-procedure, deferring to a later delete event");
                    return Ok(());
                }
                if err.is_reset() {
                    return Ok(());
                }
                if let ProcError::Metadata(meta_err) = &err {
                    // Precondition violations are programmer errors the
                    // core raises so tests catch them, not business errors.
                    return Err(SyncError::Precondition(meta_err.to_string()));
                }
                self.history.append(HistoryEntry::error(intent, path, err.to_string()));
                Err(SyncError::Business {
                    intent,
                    source: Box::new(err),
                })
            }
        }
    }

    pub async fn sync_local_create(&self, record: &DocumentRecord) -> Result<(), SyncError> {
        let path = record.relative_path.clone();
        let result = self.do_local_create(record).await;
        self.classify(HistoryKind::Create, path, result).await
    }

    async fn do_local_create(&self, record: &DocumentRecord) -> Result<(), ProcError> {
        let bytes = self.file_ops.read(&record.relative_path).await?;
        let hash = ContentHash::of(&bytes);

        let response = self
            .transport
            .create(Some(record.document_id), &record.relative_path, &bytes)
            .await?;

        if response.relative_path != record.relative_path {
            self.file_ops
                .move_file(&record.relative_path, &response.relative_path)
                .await?;
            self.metadata
                .move_path(&record.relative_path, &response.relative_path)
                .await?;
        }

        self.metadata
            .update_metadata(
                record.document_id,
                DocumentMetadata {
                    parent_version_id: response.vault_update_id,
                    content_hash: hash,
                    remote_relative_path: response.relative_path,
                },
            )
            .await;
        self.metadata.add_seen_update_id(response.vault_update_id).await;
        self.history
            .append(HistoryEntry::success(HistoryKind::Create, record.relative_path.clone()));
        Ok(())
    }

    pub async fn sync_local_delete(&self, record: &DocumentRecord) -> Result<(), SyncError> {
        let path = record.relative_path.clone();
        let result = self.do_local_delete(record).await;
        self.classify(HistoryKind::Delete, path, result).await
    }

    async fn do_local_delete(&self, record: &DocumentRecord) -> Result<(), ProcError> {
        let response = self
            .transport
            .delete(record.document_id, &record.relative_path)
            .await?;

        let remote_relative_path = record
            .metadata
            .as_ref()
            .map(|m| m.remote_relative_path.clone())
            .unwrap_or_else(|| response.relative_path.clone());
        self.metadata
            .update_metadata(
                record.document_id,
                DocumentMetadata {
                    parent_version_id: response.vault_update_id,
                    content_hash: ContentHash::empty(),
                    remote_relative_path,
                },
            )
            .await;
        self.metadata.add_seen_update_id(response.vault_update_id).await;
        self.history
            .append(HistoryEntry::success(HistoryKind::Delete, record.relative_path.clone()));
        Ok(())
    }

    /// Spec §4.6.3. `old_path` is set when this update follows a local
    /// rename; `force` is set when driven by a remote notification for an
    /// already-known document (spec §4.6.4 Case A).
    pub async fn sync_local_update(
        &self,
        record: &DocumentRecord,
        old_path: Option<RelativePath>,
        force: bool,
    ) -> Result<(), SyncError> {
        let path = record.relative_path.clone();
        let result = self.do_local_update(record, old_path, force).await;
        self.classify(HistoryKind::Update, path, result).await
    }

    async fn do_local_update(
        &self,
        record: &DocumentRecord,
        old_path: Option<RelativePath>,
        force: bool,
    ) -> Result<(), ProcError> {
        let local_metadata = record.metadata.as_ref().ok_or_else(|| {
            MetadataError::NotReadyForUpdate(record.document_id)
        })?;
        if record.is_deleted {
            return Err(MetadataError::NotReadyForUpdate(record.document_id).into());
        }

        let bytes = self.file_ops.read(&record.relative_path).await?;
        let hash = ContentHash::of(&bytes);

        // Step 2: no-change short-circuit.
        if hash == local_metadata.content_hash && old_path.is_none() && !force {
            return Ok(());
        }

        let has_local_changes = hash != local_metadata.content_hash || old_path.is_some();

        struct Outcome {
            vault_update_id: VaultUpdateId,
            relative_path: RelativePath,
            is_deleted: bool,
            merged_content: Option<Vec<u8>>,
        }

        let outcome = if has_local_changes {
            match self
                .transport
                .put(
                    record.document_id,
                    local_metadata.parent_version_id,
                    &record.relative_path,
                    &bytes,
                )
                .await?
            {
                DocumentUpdate::Accepted {
                    vault_update_id,
                    relative_path,
                    is_deleted,
                } => Outcome {
                    vault_update_id,
                    relative_path,
                    is_deleted,
                    merged_content: None,
                },
                DocumentUpdate::MergingUpdate {
                    content,
                    vault_update_id,
                    relative_path,
                    is_deleted,
                } => Outcome {
                    vault_update_id,
                    relative_path,
                    is_deleted,
                    merged_content: Some(content),
                },
            }
        } else {
            let version = self.transport.get(record.document_id).await?;
            Outcome {
                vault_update_id: version.vault_update_id,
                relative_path: version.relative_path,
                is_deleted: version.is_deleted,
                merged_content: Some(version.content),
            }
        };

        // Step 4: a local delete may have raced our in-flight request.
        if let Some(current) = self.metadata.get_by_id(record.document_id).await {
            if current.is_deleted {
                self.metadata.add_seen_update_id(outcome.vault_update_id).await;
                return Ok(());
            }
        }

        // Step 5: stale relative to what we already know locally.
        if outcome.vault_update_id < local_metadata.parent_version_id {
            self.metadata.add_seen_update_id(outcome.vault_update_id).await;
            return Ok(());
        }

        if outcome.is_deleted {
            self.metadata.delete(&record.relative_path).await;
            self.metadata
                .update_metadata(
                    record.document_id,
                    DocumentMetadata {
                        parent_version_id: outcome.vault_update_id,
                        content_hash: ContentHash::empty(),
                        remote_relative_path: outcome.relative_path,
                    },
                )
                .await;
            self.file_ops.delete(&record.relative_path).await?;
            self.metadata.add_seen_update_id(outcome.vault_update_id).await;
            self.history.append(HistoryEntry::success(
                HistoryKind::Delete,
                record.relative_path.clone(),
            ));
            return Ok(());
        }

        let mut current_path = record.relative_path.clone();
        if outcome.relative_path != record.relative_path {
            self.file_ops
                .move_file(&current_path, &outcome.relative_path)
                .await?;
            self.metadata
                .move_path(&current_path, &outcome.relative_path)
                .await?;
            current_path = outcome.relative_path.clone();
        }

        let new_hash = if let Some(merged) = &outcome.merged_content {
            self.file_ops.write(&current_path, &bytes, merged).await?;
            ContentHash::of(merged)
        } else {
            hash
        };

        self.metadata
            .update_metadata(
                record.document_id,
                DocumentMetadata {
                    parent_version_id: outcome.vault_update_id,
                    content_hash: new_hash,
                    remote_relative_path: outcome.relative_path,
                },
            )
            .await;
        self.metadata.add_seen_update_id(outcome.vault_update_id).await;

        let kind = if force {
            HistoryKind::Update
        } else if old_path.is_some() {
            HistoryKind::Move
        } else {
            HistoryKind::Update
        };
        self.history.append(HistoryEntry::success(kind, current_path));
        Ok(())
    }

    /// Spec §4.6.4. `record` is `Some` for Case A (an already-known document,
    /// resolved and locked by the caller through `MetadataStore::resolve_by_path`)
    /// and `None` for Case B (a brand-new document, serialised by the caller
    /// through a `documentId`-keyed lock instead).
    pub async fn sync_remote_update(
        &self,
        notification: VaultUpdateNotification,
        record: Option<DocumentRecord>,
    ) -> Result<(), SyncError> {
        match record {
            Some(record) => self.sync_local_update(&record, None, true).await,
            None => {
                let path = notification.relative_path.clone();
                let result = self.do_remote_create(&notification).await;
                self.classify(HistoryKind::Create, path, result).await
            }
        }
    }

    async fn do_remote_create(&self, notification: &VaultUpdateNotification) -> Result<(), ProcError> {
        if notification.is_deleted {
            self.metadata.add_seen_update_id(notification.vault_update_id).await;
            return Ok(());
        }
        if notification.content_size > self.max_file_size_bytes {
            self.history.append(HistoryEntry::success(
                HistoryKind::Skipped,
                notification.relative_path.clone(),
            ));
            self.metadata.add_seen_update_id(notification.vault_update_id).await;
            return Ok(());
        }

        let version = self.transport.get(notification.document_id).await?;

        // A concurrent remote-update notification may have already created
        // this record between our lookup and this fetch.
        if self.metadata.get_by_id(notification.document_id).await.is_some() {
            self.metadata.add_seen_update_id(notification.vault_update_id).await;
            return Ok(());
        }

        self.file_ops.ensure_clear(&version.relative_path).await?;
        let handle = self
            .metadata
            .create_pending(notification.document_id, &version.relative_path)
            .await?;
        self.metadata
            .update_metadata(
                notification.document_id,
                DocumentMetadata {
                    parent_version_id: version.vault_update_id,
                    content_hash: ContentHash::of(&version.content),
                    remote_relative_path: version.relative_path.clone(),
                },
            )
            .await;
        self.file_ops.create(&version.relative_path, &version.content).await?;
        self.metadata
            .remove_pending(notification.document_id, handle)
            .await;
        self.metadata.add_seen_update_id(version.vault_update_id).await;
        self.history
            .append(HistoryEntry::success(HistoryKind::Create, version.relative_path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{InMemoryFs, SafeFsFacade};
    use crate::merge::TextMerge;
    use crate::persistence::InMemoryPersistence;
    use crate::transport::test_support::ScriptedTransport;
    use crate::transport::{DocumentVersion, DocumentVersionNoContent};

    type TestSyncer = CoreSyncer<InMemoryFs, TextMerge, ScriptedTransport, InMemoryPersistence>;

    async fn harness() -> (TestSyncer, Arc<MetadataStore<InMemoryPersistence>>, Arc<ScriptedTransport>, Arc<History>, Arc<InMemoryFs>) {
        let fs = Arc::new(InMemoryFs::new());
        let file_ops = FileOps::new(SafeFsFacade::new(Arc::clone(&fs)), Arc::new(TextMerge::default()));
        let metadata = Arc::new(MetadataStore::load(InMemoryPersistence::new()).await);
        let transport = Arc::new(ScriptedTransport::default());
        let history = History::new();
        let syncer = CoreSyncer::new(
            file_ops,
            Arc::clone(&metadata),
            Arc::clone(&transport),
            Arc::clone(&history),
            10 * 1024 * 1024,
        );
        (syncer, metadata, transport, history, fs)
    }

    #[tokio::test]
    async fn local_create_sets_metadata_and_history() {
        let (syncer, metadata, transport, history, fs) = harness().await;
        let path = RelativePath::new("a.md");
        fs.write(&path, b"hello").await.unwrap();
        let doc_id = DocumentId::new();
        metadata.create_pending(doc_id, &path).await.unwrap();
        let record = metadata.get_by_id(doc_id).await.unwrap();

        transport.create_responses.lock().unwrap().push(DocumentVersionNoContent {
            document_id: doc_id,
            vault_update_id: VaultUpdateId(1),
            relative_path: path.clone(),
            is_deleted: false,
        });

        syncer.sync_local_create(&record).await.unwrap();

        let updated = metadata.get_by_id(doc_id).await.unwrap();
        assert!(updated.metadata.is_some());
        assert_eq!(updated.metadata.unwrap().parent_version_id, VaultUpdateId(1));
        assert_eq!(history.entries().len(), 1);
    }

    #[tokio::test]
    async fn local_update_no_change_short_circuits() {
        let (syncer, metadata, _transport, history, fs) = harness().await;
        let path = RelativePath::new("a.md");
        fs.write(&path, b"hello").await.unwrap();
        let doc_id = DocumentId::new();
        let handle = metadata.create_pending(doc_id, &path).await.unwrap();
        metadata
            .update_metadata(
                doc_id,
                DocumentMetadata {
                    parent_version_id: VaultUpdateId(1),
                    content_hash: ContentHash::of(b"hello"),
                    remote_relative_path: path.clone(),
                },
            )
            .await;
        metadata.remove_pending(doc_id, handle).await;
        let record = metadata.get_by_id(doc_id).await.unwrap();

        syncer.sync_local_update(&record, None, false).await.unwrap();
        assert!(history.entries().is_empty());
    }

    #[tokio::test]
    async fn local_update_merging_response_writes_merged_content() {
        let (syncer, metadata, transport, _history, fs) = harness().await;
        let path = RelativePath::new("a.md");
        fs.write(&path, b"Hello beautiful world").await.unwrap();
        let doc_id = DocumentId::new();
        let handle = metadata.create_pending(doc_id, &path).await.unwrap();
        metadata
            .update_metadata(
                doc_id,
                DocumentMetadata {
                    parent_version_id: VaultUpdateId(1),
                    content_hash: ContentHash::of(b"Hello world"),
                    remote_relative_path: path.clone(),
                },
            )
            .await;
        metadata.remove_pending(doc_id, handle).await;
        let record = metadata.get_by_id(doc_id).await.unwrap();

        transport.put_responses.lock().unwrap().push(DocumentUpdate::MergingUpdate {
            content: b"Hi beautiful world".to_vec(),
            vault_update_id: VaultUpdateId(2),
            relative_path: path.clone(),
            is_deleted: false,
        });

        syncer.sync_local_update(&record, None, false).await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), b"Hi beautiful world");
    }

    #[tokio::test]
    async fn remote_create_for_unknown_document_creates_pending_then_resolves() {
        let (syncer, metadata, transport, history, fs) = harness().await;
        let doc_id = DocumentId::new();
        let path = RelativePath::new("new.md");

        transport.get_responses.lock().unwrap().push(DocumentVersion {
            document_id: doc_id,
            vault_update_id: VaultUpdateId(5),
            relative_path: path.clone(),
            is_deleted: false,
            content: b"remote content".to_vec(),
        });

        let notification = VaultUpdateNotification {
            vault_update_id: VaultUpdateId(5),
            document_id: doc_id,
            relative_path: path.clone(),
            is_deleted: false,
            content_size: 14,
            is_initial_sync: false,
        };
        syncer.sync_remote_update(notification, None).await.unwrap();

        assert_eq!(fs.read(&path).await.unwrap(), b"remote content");
        let record = metadata.get_by_id(doc_id).await.unwrap();
        assert!(!record.is_pending());
        assert_eq!(history.entries().len(), 1);
    }

    #[tokio::test]
    async fn remote_create_oversized_file_is_skipped() {
        let (syncer, metadata, _transport, history, _fs) = harness().await;
        let doc_id = DocumentId::new();
        let notification = VaultUpdateNotification {
            vault_update_id: VaultUpdateId(1),
            document_id: doc_id,
            relative_path: RelativePath::new("huge.bin"),
            is_deleted: false,
            content_size: 999_999_999,
            is_initial_sync: false,
        };
        syncer.sync_remote_update(notification, None).await.unwrap();
        assert!(metadata.get_by_id(doc_id).await.is_none());
        assert_eq!(history.entries()[0].kind, HistoryKind::Skipped);
    }
}
