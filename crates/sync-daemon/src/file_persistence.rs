//! Persistence for the metadata snapshot.
//!
//! Stores the snapshot to `.sync/snapshot.json` within the vault directory,
//! grounded in the teacher's `PeerStorage` (load-on-construct, create-parent-
//! dirs-on-first-save, tempfile-tested).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sync_core::persistence::{Persistence, PersistenceError, Snapshot};
use tokio::fs;

pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(vault_path: &Path) -> Self {
        Self {
            path: vault_path.join(".sync").join("snapshot.json"),
        }
    }
}

#[async_trait]
impl Persistence for FileSnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))?;
        let snapshot = serde_json::from_str(&contents)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::Io(e.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(snapshot)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        fs::write(&self.path, contents)
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::ids::{DocumentId, VaultUpdateId};
    use sync_core::persistence::{PersistedDocument, Settings};
    use sync_core::{ContentHash, RelativePath};
    use tempfile::TempDir;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            documents: vec![PersistedDocument {
                document_id: DocumentId::new(),
                relative_path: RelativePath::new("a.md"),
                parent_version_id: VaultUpdateId(3),
                content_hash: ContentHash::of(b"hello"),
                remote_relative_path: RelativePath::new("a.md"),
            }],
            last_seen_update_id: 3,
            has_initial_sync_completed: true,
            settings: Some(Settings::default()),
        }
    }

    #[tokio::test]
    async fn absent_snapshot_loads_as_none() {
        let temp = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(temp.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let temp = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(temp.path());
        let snapshot = sample_snapshot();

        store.save(&snapshot).await.unwrap();
        assert!(temp.path().join(".sync/snapshot.json").exists());

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn survives_across_separate_store_instances() {
        let temp = TempDir::new().unwrap();
        {
            let store = FileSnapshotStore::new(temp.path());
            store.save(&sample_snapshot()).await.unwrap();
        }
        let store = FileSnapshotStore::new(temp.path());
        assert!(store.load().await.unwrap().is_some());
    }
}
