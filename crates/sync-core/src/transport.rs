//! The consumed `Transport` interface (spec §6): typed request/response
//! operations against the remote store plus a stream of vault-update
//! notifications. Errors are retried by the implementation with bounded
//! back-off; only `TransportError::Reset` and terminal failures escape to
//! the core.

use crate::hash::ContentHash;
use crate::ids::{DocumentId, VaultUpdateId};
use crate::path::RelativePath;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("a reset was requested while awaiting the transport")]
    Reset,
    #[error("document not found")]
    NotFound,
    #[error("transport request failed: {0}")]
    Request(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A document's content and placement as last accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: DocumentId,
    pub vault_update_id: VaultUpdateId,
    pub relative_path: RelativePath,
    pub is_deleted: bool,
    pub content: Vec<u8>,
}

/// The same metadata as [`DocumentVersion`] without the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersionNoContent {
    pub document_id: DocumentId,
    pub vault_update_id: VaultUpdateId,
    pub relative_path: RelativePath,
    pub is_deleted: bool,
}

/// The server's response to a `put`: either it accepted the bytes as-is, or
/// it observed a concurrent remote change and merged on the client's behalf,
/// returning the merged bytes. The core must branch on the tag, not infer it
/// from field presence (spec design note on dynamic typing of responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DocumentUpdate {
    Accepted {
        vault_update_id: VaultUpdateId,
        relative_path: RelativePath,
        is_deleted: bool,
    },
    MergingUpdate {
        content: Vec<u8>,
        vault_update_id: VaultUpdateId,
        relative_path: RelativePath,
        is_deleted: bool,
    },
}

impl DocumentUpdate {
    pub fn vault_update_id(&self) -> VaultUpdateId {
        match self {
            Self::Accepted { vault_update_id, .. } => *vault_update_id,
            Self::MergingUpdate { vault_update_id, .. } => *vault_update_id,
        }
    }

    pub fn relative_path(&self) -> &RelativePath {
        match self {
            Self::Accepted { relative_path, .. } => relative_path,
            Self::MergingUpdate { relative_path, .. } => relative_path,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Self::Accepted { is_deleted, .. } => *is_deleted,
            Self::MergingUpdate { is_deleted, .. } => *is_deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentListing {
    pub document_id: DocumentId,
    pub relative_path: RelativePath,
    pub vault_update_id: VaultUpdateId,
    pub content_hash: ContentHash,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllResponse {
    pub latest_documents: Vec<DocumentListing>,
    pub last_update_id: VaultUpdateId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub server_version: String,
    pub is_authenticated: bool,
}

/// A remote-originated change, delivered by the streaming side of
/// [`Transport`] (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultUpdateNotification {
    pub vault_update_id: VaultUpdateId,
    pub document_id: DocumentId,
    pub relative_path: RelativePath,
    pub is_deleted: bool,
    pub content_size: u64,
    /// True when this notification is part of a post-connect replay batch;
    /// `RemoteLoop` may fast-forward `last_seen` to the batch max after
    /// dispatching every member.
    pub is_initial_sync: bool,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create(
        &self,
        document_id: Option<DocumentId>,
        relative_path: &RelativePath,
        bytes: &[u8],
    ) -> Result<DocumentVersionNoContent>;

    async fn put(
        &self,
        document_id: DocumentId,
        parent_version_id: VaultUpdateId,
        relative_path: &RelativePath,
        bytes: &[u8],
    ) -> Result<DocumentUpdate>;

    async fn delete(
        &self,
        document_id: DocumentId,
        relative_path: &RelativePath,
    ) -> Result<DocumentVersionNoContent>;

    async fn get(&self, document_id: DocumentId) -> Result<DocumentVersion>;

    async fn get_all(&self, since: Option<VaultUpdateId>) -> Result<GetAllResponse>;

    async fn ping(&self) -> Result<PingResponse>;

    /// A live or polled stream of remote changes. Implementations decide
    /// whether this is backed by a WebSocket or by repeated polling; the
    /// core treats it opaquely via `RemoteLoop`.
    fn notifications(&self) -> BoxStream<'static, VaultUpdateNotification>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;

    /// Scripted in-memory transport for exercising `CoreSyncer` without a
    /// network.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub put_responses: Mutex<Vec<DocumentUpdate>>,
        pub create_responses: Mutex<Vec<DocumentVersionNoContent>>,
        pub get_responses: Mutex<Vec<DocumentVersion>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn create(
            &self,
            _document_id: Option<DocumentId>,
            _relative_path: &RelativePath,
            _bytes: &[u8],
        ) -> Result<DocumentVersionNoContent> {
            self.create_responses
                .lock()
                .unwrap()
                .pop()
                .ok_or(TransportError::NotFound)
        }

        async fn put(
            &self,
            _document_id: DocumentId,
            _parent_version_id: VaultUpdateId,
            _relative_path: &RelativePath,
            _bytes: &[u8],
        ) -> Result<DocumentUpdate> {
            self.put_responses
                .lock()
                .unwrap()
                .pop()
                .ok_or(TransportError::NotFound)
        }

        async fn delete(
            &self,
            document_id: DocumentId,
            relative_path: &RelativePath,
        ) -> Result<DocumentVersionNoContent> {
            Ok(DocumentVersionNoContent {
                document_id,
                vault_update_id: VaultUpdateId(0),
                relative_path: relative_path.clone(),
                is_deleted: true,
            })
        }

        async fn get(&self, _document_id: DocumentId) -> Result<DocumentVersion> {
            self.get_responses
                .lock()
                .unwrap()
                .pop()
                .ok_or(TransportError::NotFound)
        }

        async fn get_all(&self, _since: Option<VaultUpdateId>) -> Result<GetAllResponse> {
            Ok(GetAllResponse {
                latest_documents: Vec::new(),
                last_update_id: VaultUpdateId(0),
            })
        }

        async fn ping(&self) -> Result<PingResponse> {
            Ok(PingResponse {
                server_version: "test".into(),
                is_authenticated: true,
            })
        }

        fn notifications(&self) -> BoxStream<'static, VaultUpdateNotification> {
            Box::pin(stream::empty())
        }
    }
}
