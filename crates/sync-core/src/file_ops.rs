//! Local file operations layered on `SafeFsFacade` and `Merge` (spec §4.4).

use crate::fs::{FileSystem, FsError, SafeFsFacade};
use crate::merge::{Merge, Tokenizer};
use crate::path::RelativePath;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileOpsError {
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Bridges `MetadataStore`'s view of a document to the bytes actually on
/// disk, applying the text-merge collaborator where appropriate.
pub struct FileOps<F: FileSystem, M: Merge> {
    fs: SafeFsFacade<F>,
    merge: Arc<M>,
}

impl<F: FileSystem, M: Merge> FileOps<F, M> {
    pub fn new(fs: SafeFsFacade<F>, merge: Arc<M>) -> Self {
        Self { fs, merge }
    }

    /// Read a document's current bytes, normalising CRLF to LF for text
    /// content so local edits and merge output compare consistently
    /// regardless of the editor's line-ending convention.
    pub async fn read(&self, path: &RelativePath) -> Result<Vec<u8>, FileOpsError> {
        let bytes = self.fs.read(path).await?;
        if self.merge.is_binary(&bytes) {
            return Ok(bytes);
        }
        let text = String::from_utf8_lossy(&bytes).replace("\r\n", "\n");
        Ok(text.into_bytes())
    }

    /// Create a new file at `path`. If a file already occupies `path`, this
    /// degrades to a `write` against an empty `expected` payload (spec §4.4,
    /// `create` edge case).
    pub async fn create(&self, path: &RelativePath, content: &[u8]) -> Result<(), FileOpsError> {
        if self.fs.exists(path).await? {
            self.write(path, b"", content).await?;
            return Ok(());
        }
        self.fs.write(path, content).await?;
        Ok(())
    }

    /// Write `new` to `path`. `expected` is the content the caller believes
    /// is currently on disk (the common ancestor for a 3-way merge). If the
    /// file is gone, this is a no-op (spec §4.4: "return empty bytes, no
    /// recreate"). If the extension is not mergeable or either payload is
    /// binary, overwrites directly. Otherwise, inside `atomic_update_text`:
    /// if the live text still equals `expected`, writes `new` outright;
    /// otherwise a concurrent edit has landed, and the result of
    /// `merge3(expected, current, new)` is written instead.
    pub async fn write(
        &self,
        path: &RelativePath,
        expected: &[u8],
        new: &[u8],
    ) -> Result<(), FileOpsError> {
        if !self.fs.exists(path).await? {
            return Ok(());
        }

        let mergeable = !self.merge.is_binary(new)
            && !self.merge.is_binary(expected)
            && self.merge.is_file_type_mergeable(path.extension());
        if !mergeable {
            self.fs.write(path, new).await?;
            return Ok(());
        }

        let expected_text = String::from_utf8_lossy(expected).into_owned();
        let new_text = String::from_utf8_lossy(new).into_owned();
        let merge = Arc::clone(&self.merge);
        self.fs
            .atomic_update_text(
                path,
                Box::new(move |current: String| {
                    if current == expected_text {
                        new_text
                    } else {
                        merge.merge3(&expected_text, &current, &new_text, Tokenizer::Word)
                        // merge3(original = expected, left = current on disk, right = new)
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Relocate `old` to `new`. A no-op if the paths are identical. When
    /// `new` is occupied by a different document, deconflicts by suffixing
    /// `" (N)"` before the extension (spec §4.4.1), trying successive `N`
    /// until a free path is found.
    pub async fn move_file(&self, old: &RelativePath, new: &RelativePath) -> Result<(), FileOpsError> {
        if old == new {
            return Ok(());
        }
        if !self.fs.exists(new).await? {
            self.fs.rename(old, new).await?;
            return Ok(());
        }
        let mut n = 1;
        loop {
            let candidate = new.with_disambiguator(n);
            if !self.fs.exists(&candidate).await? {
                self.fs.rename(old, &candidate).await?;
                return Ok(());
            }
            n += 1;
        }
    }

    pub async fn exists(&self, path: &RelativePath) -> Result<bool, FileOpsError> {
        Ok(self.fs.exists(path).await?)
    }

    /// If an untracked file already occupies `path`, move it aside under a
    /// disambiguated name so a remote-update can land cleanly (spec §4.6.4
    /// Case B: "the host adapter may rename any preexisting untracked file
    /// aside").
    pub async fn ensure_clear(&self, path: &RelativePath) -> Result<(), FileOpsError> {
        if !self.fs.exists(path).await? {
            return Ok(());
        }
        let mut n = 1;
        loop {
            let candidate = path.with_disambiguator(n);
            if !self.fs.exists(&candidate).await? {
                self.fs.rename(path, &candidate).await?;
                return Ok(());
            }
            n += 1;
        }
    }

    pub async fn delete(&self, path: &RelativePath) -> Result<(), FileOpsError> {
        match self.fs.delete(path).await {
            Ok(()) => Ok(()),
            Err(FsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
