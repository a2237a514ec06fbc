//! The consumed `Persistence` interface (spec §6) and the snapshot shape it
//! durably stores, grounded in the teacher's `PeerStorage`/`PersistedPeers`
//! write-through pattern.

use crate::hash::ContentHash;
use crate::ids::{DocumentId, VaultUpdateId};
use crate::path::RelativePath;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialise snapshot: {0}")]
    Serialize(String),
    #[error("failed to write snapshot: {0}")]
    Io(String),
}

/// One acknowledged (non-pending) document, as written through to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub document_id: DocumentId,
    pub relative_path: RelativePath,
    pub parent_version_id: VaultUpdateId,
    pub content_hash: ContentHash,
    pub remote_relative_path: RelativePath,
}

/// User-configurable sync behaviour (spec §6 Persistence snapshot schema),
/// persisted alongside the metadata snapshot so a restart doesn't require
/// re-reading a separate config file mid-sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub remote_uri: String,
    pub token: String,
    pub vault_name: String,
    /// 1..16, the Scheduler's work-queue concurrency.
    pub sync_concurrency: usize,
    pub is_sync_enabled: bool,
    /// 1..64, the remote-create size cutoff (spec §4.6.4 Case B, S6).
    pub max_file_size_mb: u64,
    pub ignore_patterns: Vec<String>,
    /// Not named in the persisted schema but required by §4.8's "periodic
    /// task (interval from settings)" when `RemoteLoop` falls back to
    /// polling instead of holding an open notification stream.
    pub poll_interval_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            remote_uri: String::new(),
            token: String::new(),
            vault_name: String::new(),
            sync_concurrency: 4,
            is_sync_enabled: true,
            max_file_size_mb: 10,
            ignore_patterns: vec![".sync/**".to_string(), ".git/**".to_string()],
            poll_interval_seconds: 30,
        }
    }
}

/// The full persisted projection of `MetadataStore` (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub documents: Vec<PersistedDocument>,
    pub last_seen_update_id: u64,
    pub has_initial_sync_completed: bool,
    pub settings: Option<Settings>,
}

/// Durable storage for the metadata snapshot, consumed by the core as an
/// external collaborator (spec §6). Implementations must make `save`
/// atomic from the perspective of a concurrent `load` (no torn reads).
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self) -> Result<Option<Snapshot>, PersistenceError>;
    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;
}

/// In-memory `Persistence` for tests.
#[derive(Default)]
pub struct InMemoryPersistence {
    stored: RwLock<Option<Snapshot>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        Ok(self.stored.read().unwrap().clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        *self.stored.write().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_in_memory_persistence() {
        let store = InMemoryPersistence::new();
        assert!(store.load().await.unwrap().is_none());

        let snapshot = Snapshot {
            documents: vec![PersistedDocument {
                document_id: DocumentId::new(),
                relative_path: RelativePath::new("a.md"),
                parent_version_id: VaultUpdateId(1),
                content_hash: ContentHash::of(b"hi"),
                remote_relative_path: RelativePath::new("a.md"),
            }],
            last_seen_update_id: 1,
            has_initial_sync_completed: true,
            settings: Some(Settings::default()),
        };
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot));
    }
}
