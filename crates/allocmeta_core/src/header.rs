//! Context image header and version bookkeeping.
//!
//! ## Header Format
//!
//! ```text
//! | signature (4) | version (8) | checksum (4) |
//! ```
//!
//! All fields are little-endian. The checksum is CRC32 over every byte of
//! the image that follows the header.

use crate::types::ContextOwner;
use std::sync::atomic::{AtomicU64, Ordering};

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Header at the start of every context image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtxHeader {
    /// Owner signature.
    pub signature: u32,
    /// Monotonic flush version.
    pub version: u64,
    /// CRC32 of the image payload.
    pub checksum: u32,
}

impl CtxHeader {
    /// Creates an unsealed header for `owner`.
    #[must_use]
    pub const fn new(owner: ContextOwner, version: u64) -> Self {
        Self {
            signature: owner.signature(),
            version,
            checksum: 0,
        }
    }

    /// Owner named by the signature, if any.
    #[must_use]
    pub fn owner(&self) -> Option<ContextOwner> {
        ContextOwner::from_signature(self.signature)
    }

    /// Encodes the header into the first [`HEADER_SIZE`] bytes of `dst`.
    pub fn encode_into(&self, dst: &mut [u8]) {
        dst[0..4].copy_from_slice(&self.signature.to_le_bytes());
        dst[4..12].copy_from_slice(&self.version.to_le_bytes());
        dst[12..16].copy_from_slice(&self.checksum.to_le_bytes());
    }

    /// Decodes a header from the start of `src`.
    ///
    /// Returns `None` if `src` is shorter than [`HEADER_SIZE`].
    #[must_use]
    pub fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            signature: u32::from_le_bytes([src[0], src[1], src[2], src[3]]),
            version: u64::from_le_bytes([
                src[4], src[5], src[6], src[7], src[8], src[9], src[10], src[11],
            ]),
            checksum: u32::from_le_bytes([src[12], src[13], src[14], src[15]]),
        })
    }
}

/// Version counters of one context file.
///
/// `next` is the version the next flush stamps into its header; `stored`
/// is the version of the newest image known to be on disk.
#[derive(Debug, Default)]
pub struct CtxVersion {
    next: AtomicU64,
    stored: AtomicU64,
}

impl CtxVersion {
    /// Creates counters for a file that has never been written.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the version to stamp on an outgoing image and advances.
    pub fn next_for_flush(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Version the next flush will stamp, without advancing.
    #[must_use]
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Records that the image stamped with `version` is durable.
    ///
    /// Completions may arrive out of order; the stored version never moves
    /// backwards.
    pub fn finalize(&self, version: u64) {
        self.stored.fetch_max(version, Ordering::SeqCst);
    }

    /// Resets both counters from a loaded image.
    pub fn restore(&self, version: u64) {
        self.stored.store(version, Ordering::SeqCst);
        self.next.store(version + 1, Ordering::SeqCst);
    }

    /// Version of the newest durable image.
    #[must_use]
    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::SeqCst)
    }
}
