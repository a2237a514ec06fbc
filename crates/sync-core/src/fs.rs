//! The consumed `FileSystem` interface (spec §6) and `SafeFsFacade` (spec §4.3).

use crate::keyed_locks::KeyedLocks;
use crate::path::RelativePath;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("file not found: {0}")]
    NotFound(RelativePath),
    #[error("already exists: {0}")]
    AlreadyExists(RelativePath),
    #[error("is a directory: {0}")]
    IsDirectory(RelativePath),
    #[error("not a directory: {0}")]
    NotDirectory(RelativePath),
    #[error("io error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub mtime_millis: u64,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Host filesystem adapter consumed by the core. Paths are vault-relative,
/// forward-slash separated; the adapter resolves against the vault root and
/// the host's path separator, and must not report success before durability.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn list_all(&self) -> Result<Vec<RelativePath>>;
    async fn read(&self, path: &RelativePath) -> Result<Vec<u8>>;
    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()>;
    async fn file_size(&self, path: &RelativePath) -> Result<u64>;
    async fn exists(&self, path: &RelativePath) -> Result<bool>;
    async fn create_directory(&self, path: &RelativePath) -> Result<()>;
    async fn delete(&self, path: &RelativePath) -> Result<()>;
    async fn rename(&self, old: &RelativePath, new: &RelativePath) -> Result<()>;

    /// Execute `updater` against the current text contents and write back
    /// whatever it returns, under whatever atomicity the host provides. The
    /// core assumes last-writer-wins at best.
    async fn atomic_update_text(
        &self,
        path: &RelativePath,
        updater: Box<dyn FnOnce(String) -> String + Send>,
    ) -> Result<()> {
        let current = String::from_utf8_lossy(&self.read(path).await?).into_owned();
        let updated = updater(current);
        self.write(path, updated.as_bytes()).await
    }
}

#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn list_all(&self) -> Result<Vec<RelativePath>> {
        (**self).list_all().await
    }
    async fn read(&self, path: &RelativePath) -> Result<Vec<u8>> {
        (**self).read(path).await
    }
    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }
    async fn file_size(&self, path: &RelativePath) -> Result<u64> {
        (**self).file_size(path).await
    }
    async fn exists(&self, path: &RelativePath) -> Result<bool> {
        (**self).exists(path).await
    }
    async fn create_directory(&self, path: &RelativePath) -> Result<()> {
        (**self).create_directory(path).await
    }
    async fn delete(&self, path: &RelativePath) -> Result<()> {
        (**self).delete(path).await
    }
    async fn rename(&self, old: &RelativePath, new: &RelativePath) -> Result<()> {
        (**self).rename(old, new).await
    }
}

/// Decorates a [`FileSystem`] with single-flight-per-path execution and
/// missing-file error reclassification (spec §4.3).
pub struct SafeFsFacade<F: FileSystem> {
    inner: F,
    locks: KeyedLocks<RelativePath>,
}

impl<F: FileSystem> SafeFsFacade<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            locks: KeyedLocks::new(),
        }
    }

    async fn guarded<T>(
        &self,
        path: &RelativePath,
        op: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        self.locks.wait_for_lock(path).await;
        let exists_before = self.inner.exists(path).await?;
        let result = if !exists_before {
            Err(FsError::NotFound(path.clone()))
        } else {
            op.await
        };
        self.finish_guarded(path, result).await
    }

    /// Like `guarded`, but without the pre-existence check: `write` is the
    /// one operation that must succeed against a path nothing occupies yet
    /// (fresh local creates, remote downloads). Still single-flight per path
    /// and still reclassifies a post-op failure to `NotFound` if the file
    /// vanished during the call.
    async fn guarded_create<T>(
        &self,
        path: &RelativePath,
        op: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        self.locks.wait_for_lock(path).await;
        let result = op.await;
        self.finish_guarded(path, result).await
    }

    async fn finish_guarded<T>(&self, path: &RelativePath, result: Result<T>) -> Result<T> {
        let reclassified = match result {
            Err(e) if !matches!(e, FsError::NotFound(_)) => {
                if !self.inner.exists(path).await.unwrap_or(true) {
                    Err(FsError::NotFound(path.clone()))
                } else {
                    Err(e)
                }
            }
            other => other,
        };
        self.locks
            .unlock(path)
            .expect("path lock acquired above must still be held");
        reclassified
    }

    pub async fn list_all(&self) -> Result<Vec<RelativePath>> {
        self.inner.list_all().await
    }

    pub async fn exists(&self, path: &RelativePath) -> Result<bool> {
        self.inner.exists(path).await
    }

    pub async fn read(&self, path: &RelativePath) -> Result<Vec<u8>> {
        self.guarded(path, self.inner.read(path)).await
    }

    pub async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()> {
        self.guarded_create(path, self.inner.write(path, content)).await
    }

    pub async fn file_size(&self, path: &RelativePath) -> Result<u64> {
        self.guarded(path, self.inner.file_size(path)).await
    }

    pub async fn create_directory(&self, path: &RelativePath) -> Result<()> {
        // Directory creation has no pre-existing-file precondition.
        self.inner.create_directory(path).await
    }

    pub async fn delete(&self, path: &RelativePath) -> Result<()> {
        self.guarded(path, self.inner.delete(path)).await
    }

    pub async fn atomic_update_text(
        &self,
        path: &RelativePath,
        updater: Box<dyn FnOnce(String) -> String + Send>,
    ) -> Result<()> {
        self.guarded(path, self.inner.atomic_update_text(path, updater))
            .await
    }

    /// Renames hold locks on both paths for the duration, acquired in
    /// `(old, new)` order and released in reverse.
    pub async fn rename(&self, old: &RelativePath, new: &RelativePath) -> Result<()> {
        let _guard = self.locks.wait_for_locks(&[old.clone(), new.clone()]).await;
        if !self.inner.exists(old).await? {
            return Err(FsError::NotFound(old.clone()));
        }
        let result = self.inner.rename(old, new).await;
        if let Err(e) = &result {
            if !matches!(e, FsError::NotFound(_)) && !self.inner.exists(old).await.unwrap_or(true)
            {
                return Err(FsError::NotFound(old.clone()));
            }
        }
        result
    }
}

/// In-memory `FileSystem` for tests, grounded in the teacher's `InMemoryFs`.
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<std::collections::HashSet<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn list_all(&self) -> Result<Vec<RelativePath>> {
        Ok(self
            .files
            .read()
            .unwrap()
            .keys()
            .map(|k| RelativePath::new(k.clone()))
            .collect())
    }

    async fn read(&self, path: &RelativePath) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap()
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.clone()))
    }

    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()> {
        self.files
            .write()
            .unwrap()
            .insert(path.as_str().to_string(), content.to_vec());
        Ok(())
    }

    async fn file_size(&self, path: &RelativePath) -> Result<u64> {
        self.read(path).await.map(|b| b.len() as u64)
    }

    async fn exists(&self, path: &RelativePath) -> Result<bool> {
        Ok(self.files.read().unwrap().contains_key(path.as_str())
            || self.dirs.read().unwrap().contains(path.as_str()))
    }

    async fn create_directory(&self, path: &RelativePath) -> Result<()> {
        self.dirs.write().unwrap().insert(path.as_str().to_string());
        Ok(())
    }

    async fn delete(&self, path: &RelativePath) -> Result<()> {
        if self.files.write().unwrap().remove(path.as_str()).is_some() {
            return Ok(());
        }
        if self.dirs.write().unwrap().remove(path.as_str()) {
            return Ok(());
        }
        Err(FsError::NotFound(path.clone()))
    }

    async fn rename(&self, old: &RelativePath, new: &RelativePath) -> Result<()> {
        let content = self
            .files
            .write()
            .unwrap()
            .remove(old.as_str())
            .ok_or_else(|| FsError::NotFound(old.clone()))?;
        self.files
            .write()
            .unwrap()
            .insert(new.as_str().to_string(), content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();
        let path = RelativePath::new("a.txt");
        assert!(!fs.exists(&path).await.unwrap());
        fs.write(&path, b"hello").await.unwrap();
        assert!(fs.exists(&path).await.unwrap());
        assert_eq!(fs.read(&path).await.unwrap(), b"hello");
        assert_eq!(fs.file_size(&path).await.unwrap(), 5);
        fs.delete(&path).await.unwrap();
        assert!(!fs.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn safe_fs_facade_classifies_missing_file() {
        let facade = SafeFsFacade::new(InMemoryFs::new());
        let path = RelativePath::new("missing.txt");
        let err = facade.read(&path).await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn safe_fs_facade_unlocks_after_failure() {
        let facade = SafeFsFacade::new(InMemoryFs::new());
        let path = RelativePath::new("missing.txt");
        let _ = facade.read(&path).await;
        // If the lock were leaked, this would hang forever (test would time out).
        facade.write(&path, b"now exists").await.unwrap();
        assert_eq!(facade.read(&path).await.unwrap(), b"now exists");
    }

    #[tokio::test]
    async fn safe_fs_facade_rename_holds_both_paths() {
        let facade = SafeFsFacade::new(InMemoryFs::new());
        let old = RelativePath::new("old.txt");
        let new = RelativePath::new("new.txt");
        facade.write(&old, b"data").await.unwrap();
        facade.rename(&old, &new).await.unwrap();
        assert!(!facade.exists(&old).await.unwrap());
        assert_eq!(facade.read(&new).await.unwrap(), b"data");
    }
}
