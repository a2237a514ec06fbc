//! Native filesystem implementation using tokio::fs, rooted at the vault path.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sync_core::fs::{FsError, Result};
use sync_core::{FileSystem, RelativePath};
use tokio::fs;

pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn full_path(&self, path: &RelativePath) -> PathBuf {
        self.base_path.join(path.as_str())
    }

    fn relativize(&self, path: &Path) -> Option<RelativePath> {
        path.strip_prefix(&self.base_path)
            .ok()
            .map(|p| RelativePath::new(p.to_string_lossy().replace('\\', "/")))
    }

    async fn walk(&self, dir: PathBuf, out: &mut Vec<RelativePath>) -> Result<()> {
        let mut entries = fs::read_dir(&dir).await.map_err(|e| FsError::Io(e.to_string()))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| FsError::Io(e.to_string()))? {
            let path = entry.path();
            let metadata = entry.metadata().await.map_err(|e| FsError::Io(e.to_string()))?;
            if metadata.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) == Some(".sync") {
                    continue;
                }
                Box::pin(self.walk(path, out)).await?;
            } else if let Some(rel) = self.relativize(&path) {
                out.push(rel);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn list_all(&self) -> Result<Vec<RelativePath>> {
        let mut out = Vec::new();
        self.walk(self.base_path.clone(), &mut out).await?;
        Ok(out)
    }

    async fn read(&self, path: &RelativePath) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        fs::read(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.clone()),
            _ => FsError::Io(e.to_string()),
        })
    }

    async fn write(&self, path: &RelativePath, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| FsError::Io(e.to_string()))?;
        }
        fs::write(&full_path, content).await.map_err(|e| FsError::Io(e.to_string()))
    }

    async fn file_size(&self, path: &RelativePath) -> Result<u64> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.clone()),
            _ => FsError::Io(e.to_string()),
        })?;
        Ok(metadata.len())
    }

    async fn exists(&self, path: &RelativePath) -> Result<bool> {
        Ok(self.full_path(path).exists())
    }

    async fn create_directory(&self, path: &RelativePath) -> Result<()> {
        fs::create_dir_all(self.full_path(path)).await.map_err(|e| FsError::Io(e.to_string()))
    }

    async fn delete(&self, path: &RelativePath) -> Result<()> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.clone()),
            _ => FsError::Io(e.to_string()),
        })?;
        if metadata.is_dir() {
            fs::remove_dir(&full_path).await.map_err(|e| FsError::Io(e.to_string()))
        } else {
            fs::remove_file(&full_path).await.map_err(|e| FsError::Io(e.to_string()))
        }
    }

    async fn rename(&self, old: &RelativePath, new: &RelativePath) -> Result<()> {
        let old_full = self.full_path(old);
        let new_full = self.full_path(new);
        if let Some(parent) = new_full.parent() {
            fs::create_dir_all(parent).await.map_err(|e| FsError::Io(e.to_string()))?;
        }
        fs::rename(&old_full, &new_full).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(old.clone()),
            _ => FsError::Io(e.to_string()),
        })
    }
}
