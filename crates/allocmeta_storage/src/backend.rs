//! Storage backend trait definition.

use crate::error::StorageResult;
use std::sync::Arc;

/// A whole-file storage backend for one context image.
///
/// Storage backends are **opaque byte stores**. The allocator writes a
/// complete, self-describing image on every flush and reads the complete
/// image back on startup; backends do not understand headers or sections.
///
/// # Invariants
///
/// - `write_all` replaces the previous content entirely; a reader never
///   observes a mix of two images
/// - `read_all` returns exactly the bytes of the last successful `write_all`
/// - An empty backend (size 0) means "no image was ever stored"
/// - Backends must be `Send + Sync`; writers serialize internally
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads the whole stored image.
    ///
    /// Returns an empty vector if nothing has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Replaces the stored image with `data`.
    ///
    /// After this returns successfully the new image is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the durability barrier fails. On
    /// error the previous image is left in place.
    fn write_all(&self, data: &[u8]) -> StorageResult<()>;

    /// Returns the current size of the stored image in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn read_all(&self) -> StorageResult<Vec<u8>> {
        (**self).read_all()
    }

    fn write_all(&self, data: &[u8]) -> StorageResult<()> {
        (**self).write_all(data)
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn sync(&self) -> StorageResult<()> {
        (**self).sync()
    }
}
