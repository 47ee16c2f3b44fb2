//! Context directory management.
//!
//! On-disk layout of one allocator instance:
//!
//! ```text
//! <ctx_path>/
//! ├─ LOCK                # Advisory lock for single-writer
//! ├─ SegmentContext      # Segment counters image
//! ├─ AllocatorContexts   # Segment states, free pool, write-buffer stripes
//! └─ RebuildContext      # Rebuild target set image
//! ```
//!
//! The LOCK file ensures only one process manages the contexts at a time.

use crate::error::{CoreError, CoreResult};
use crate::io::ContextBackends;
use crate::types::ContextOwner;
use allocmeta_storage::FileBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";

/// Holds the exclusive lock on a context directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct ContextDir {
    path: PathBuf,
    _lock_file: File,
}

impl ContextDir {
    /// Opens or creates a context directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DirectoryLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_config(format!(
                    "context directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_config(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the context directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `owner`'s image file.
    #[must_use]
    pub fn file_path(&self, owner: ContextOwner) -> PathBuf {
        self.path.join(owner.file_name())
    }

    /// Opens a file backend for every context file.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a file cannot be opened or created.
    pub fn backends(&self) -> CoreResult<ContextBackends> {
        let open = |owner: ContextOwner| -> CoreResult<Arc<FileBackend>> {
            Ok(Arc::new(FileBackend::open(&self.file_path(owner))?))
        };
        Ok(ContextBackends::new(
            open(ContextOwner::SegmentCtx)?,
            open(ContextOwner::AllocatorCtx)?,
            open(ContextOwner::RebuildCtx)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let ctx_path = temp.path().join("new_ctx");

        let dir = ContextDir::open(&ctx_path, true).unwrap();
        assert!(ctx_path.is_dir());
        assert_eq!(dir.path(), ctx_path.as_path());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = ContextDir::open(&temp.path().join("nonexistent"), false);
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let ctx_path = temp.path().join("locked");

        let _dir1 = ContextDir::open(&ctx_path, true).unwrap();
        let result = ContextDir::open(&ctx_path, true);
        assert!(matches!(result, Err(CoreError::DirectoryLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let ctx_path = temp.path().join("reopen");
        {
            let _dir = ContextDir::open(&ctx_path, true).unwrap();
        }
        let _dir2 = ContextDir::open(&ctx_path, true).unwrap();
    }

    #[test]
    fn backends_use_owner_file_names() {
        let temp = tempdir().unwrap();
        let dir = ContextDir::open(temp.path(), true).unwrap();
        let _backends = dir.backends().unwrap();

        assert!(temp.path().join("SegmentContext").exists());
        assert!(temp.path().join("AllocatorContexts").exists());
        assert!(temp.path().join("RebuildContext").exists());
    }
}
