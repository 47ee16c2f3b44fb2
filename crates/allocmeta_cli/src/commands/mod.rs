//! CLI command implementations.

pub mod init;
pub mod inspect;
pub mod verify;

use allocmeta_core::{ContextOwner, CoreError};
use allocmeta_storage::{FileBackend, StorageBackend, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no context file at all.
    #[error("no allocator contexts found at {0}")]
    NoContexts(PathBuf),

    /// At least one context file failed verification.
    #[error("{0} context file(s) failed verification")]
    VerificationFailed(usize),

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads `owner`'s file from a context directory.
///
/// Returns `None` if the file is missing or empty.
pub(crate) fn read_context_file(dir: &Path, owner: ContextOwner) -> Result<Option<Vec<u8>>, CliError> {
    let path = dir.join(owner.file_name());
    if !path.exists() {
        return Ok(None);
    }
    let backend = FileBackend::open(&path)?;
    if backend.size()? == 0 {
        return Ok(None);
    }
    Ok(Some(backend.read_all()?))
}
