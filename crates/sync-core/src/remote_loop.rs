//! `RemoteLoop`: consumes `Transport::notifications()` and dispatches each
//! item to the `Scheduler` (spec §4.8). Grounded in the teacher's
//! `sync-daemon/src/main.rs` `tokio::select!` driving loop, with the
//! listener/peer arms replaced by a single notification-stream arm and an
//! arm listening for `Scheduler::reset()` asking the loop to restart.

use crate::fs::FileSystem;
use crate::ids::VaultUpdateId;
use crate::merge::Merge;
use crate::metadata::MetadataStore;
use crate::persistence::Persistence;
use crate::reset::ResetCoordinator;
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use futures::StreamExt;
use std::sync::Arc;

pub struct RemoteLoop<F: FileSystem, M: Merge, T: Transport, P: Persistence> {
    scheduler: Arc<Scheduler<F, M, T, P>>,
    metadata: Arc<MetadataStore<P>>,
    transport: Arc<T>,
    reset_coordinator: Arc<ResetCoordinator>,
}

impl<F: FileSystem + 'static, M: Merge + 'static, T: Transport + 'static, P: Persistence + 'static>
    RemoteLoop<F, M, T, P>
{
    pub fn new(
        scheduler: Arc<Scheduler<F, M, T, P>>,
        metadata: Arc<MetadataStore<P>>,
        transport: Arc<T>,
        reset_coordinator: Arc<ResetCoordinator>,
    ) -> Self {
        Self {
            scheduler,
            metadata,
            transport,
            reset_coordinator,
        }
    }

    /// Runs until the caller drops or aborts the enclosing task. A
    /// `Scheduler::reset()` reopens the notification stream from scratch
    /// rather than trusting a reconnect to replay what it already sent.
    pub async fn run(&self) {
        loop {
            let token = self.reset_coordinator.token();
            let mut stream = self.transport.notifications();
            let mut batch_max: Option<VaultUpdateId> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = self.scheduler.restart_remote_loop.notified() => {
                        tracing::debug!("remote loop restarting after reset");
                        break;
                    }
                    next = stream.next() => {
                        let Some(notification) = next else {
                            tracing::warn!("notification stream ended, reconnecting");
                            break;
                        };
                        if token.is_cancelled() {
                            break;
                        }
                        let is_initial_sync = notification.is_initial_sync;
                        let vault_update_id = notification.vault_update_id;
                        self.scheduler.sync_remote_update(notification).await;
                        if is_initial_sync {
                            batch_max = Some(match batch_max {
                                Some(max) if max >= vault_update_id => max,
                                _ => vault_update_id,
                            });
                        } else if let Some(max) = batch_max.take() {
                            self.metadata.add_seen_update_id(max).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_ops::FileOps;
    use crate::fs::{InMemoryFs, SafeFsFacade};
    use crate::history::History;
    use crate::ids::DocumentId;
    use crate::merge::TextMerge;
    use crate::path::RelativePath;
    use crate::persistence::InMemoryPersistence;
    use crate::syncer::CoreSyncer;
    use crate::transport::test_support::ScriptedTransport;
    use crate::transport::{DocumentVersion, VaultUpdateNotification};
    use futures::stream;

    struct StreamingTransport {
        inner: ScriptedTransport,
        notifications: std::sync::Mutex<Option<Vec<VaultUpdateNotification>>>,
    }

    #[async_trait::async_trait]
    impl Transport for StreamingTransport {
        async fn create(
            &self,
            document_id: Option<DocumentId>,
            relative_path: &RelativePath,
            bytes: &[u8],
        ) -> crate::transport::Result<crate::transport::DocumentVersionNoContent> {
            self.inner.create(document_id, relative_path, bytes).await
        }
        async fn put(
            &self,
            document_id: DocumentId,
            parent_version_id: VaultUpdateId,
            relative_path: &RelativePath,
            bytes: &[u8],
        ) -> crate::transport::Result<crate::transport::DocumentUpdate> {
            self.inner.put(document_id, parent_version_id, relative_path, bytes).await
        }
        async fn delete(
            &self,
            document_id: DocumentId,
            relative_path: &RelativePath,
        ) -> crate::transport::Result<crate::transport::DocumentVersionNoContent> {
            self.inner.delete(document_id, relative_path).await
        }
        async fn get(&self, document_id: DocumentId) -> crate::transport::Result<DocumentVersion> {
            self.inner.get(document_id).await
        }
        async fn get_all(
            &self,
            since: Option<VaultUpdateId>,
        ) -> crate::transport::Result<crate::transport::GetAllResponse> {
            self.inner.get_all(since).await
        }
        async fn ping(&self) -> crate::transport::Result<crate::transport::PingResponse> {
            self.inner.ping().await
        }
        fn notifications(&self) -> futures::stream::BoxStream<'static, VaultUpdateNotification> {
            // Pends forever after the scripted items are exhausted, the way a
            // real long-lived connection would, rather than ending the stream
            // and spinning `RemoteLoop::run`'s reconnect loop.
            let items = self.notifications.lock().unwrap().take().unwrap_or_default();
            Box::pin(stream::iter(items).chain(stream::pending()))
        }
    }

    #[tokio::test]
    async fn dispatches_a_remote_create_notification() {
        let fs = Arc::new(InMemoryFs::new());
        let file_ops = FileOps::new(SafeFsFacade::new(Arc::clone(&fs)), Arc::new(TextMerge::default()));
        let metadata = Arc::new(MetadataStore::load(InMemoryPersistence::new()).await);
        let history = History::new();

        let doc_id = DocumentId::new();
        let path = RelativePath::new("remote.md");
        let inner = ScriptedTransport::default();
        inner.get_responses.lock().unwrap().push(DocumentVersion {
            document_id: doc_id,
            vault_update_id: VaultUpdateId(1),
            relative_path: path.clone(),
            is_deleted: false,
            content: b"from remote".to_vec(),
        });
        let notification = VaultUpdateNotification {
            vault_update_id: VaultUpdateId(1),
            document_id: doc_id,
            relative_path: path.clone(),
            is_deleted: false,
            content_size: 11,
            is_initial_sync: false,
        };
        let transport = Arc::new(StreamingTransport {
            inner,
            notifications: std::sync::Mutex::new(Some(vec![notification])),
        });

        let syncer = Arc::new(CoreSyncer::new(
            file_ops,
            Arc::clone(&metadata),
            Arc::clone(&transport),
            Arc::clone(&history),
            10 * 1024 * 1024,
        ));
        let file_ops_for_scheduler =
            FileOps::new(SafeFsFacade::new(Arc::clone(&fs)), Arc::new(TextMerge::default()));
        let reset_coordinator = Arc::new(ResetCoordinator::new());
        let scheduler = Arc::new(Scheduler::new(
            syncer,
            Arc::clone(&metadata),
            Arc::new(file_ops_for_scheduler),
            Arc::clone(&fs),
            Arc::clone(&transport),
            Arc::clone(&reset_coordinator),
            4,
            true,
        ));

        let remote_loop = RemoteLoop::new(
            Arc::clone(&scheduler),
            Arc::clone(&metadata),
            Arc::clone(&transport),
            reset_coordinator,
        );

        // The stream yields exactly one item then ends; run() reconnects by
        // re-invoking `notifications()`, which now yields nothing, so give
        // the loop one pass and then assert on the dispatched side effect.
        let run = tokio::spawn(async move { remote_loop.run().await });
        scheduler.wait_idle().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        run.abort();

        assert_eq!(fs.read(&path).await.unwrap(), b"from remote");
        assert!(metadata.get_by_id(doc_id).await.is_some());
    }
}
