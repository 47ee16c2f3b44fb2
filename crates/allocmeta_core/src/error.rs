//! Error types for the allocator context manager.

use crate::types::ContextOwner;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in allocator context operations.
///
/// Contract violations (double free, freeing a segment that is not fully
/// written) are not represented here; they panic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] allocmeta_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An asynchronous flush session is already running.
    #[error("allocator context flush already in progress")]
    FlushInProgress,

    /// No free segment outside the rebuild target set is left.
    #[error("no free segment available")]
    NoFreeSegment,

    /// A persisted context file is neither absent nor a valid image.
    #[error("{owner} file is corrupted: {message}")]
    ContextCorrupted {
        /// The owner whose file failed to load.
        owner: ContextOwner,
        /// Description of the corruption.
        message: String,
    },

    /// Section index outside the owner's layout.
    #[error("{owner} has no section {section}")]
    InvalidSection {
        /// The owner that was queried.
        owner: ContextOwner,
        /// The requested section index.
        section: usize,
    },

    /// Configuration is inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The file I/O transport no longer accepts requests.
    #[error("context file transport is closed")]
    TransportClosed,

    /// Another process holds the context directory lock.
    #[error("context directory locked: another process has exclusive access")]
    DirectoryLocked,
}

impl CoreError {
    /// Creates a context corruption error.
    pub fn context_corrupted(owner: ContextOwner, message: impl Into<String>) -> Self {
        Self::ContextCorrupted {
            owner,
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed when retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FlushInProgress)
    }
}
