//! Context image buffers and the capability traits of their owners.
//!
//! Every persisted collaborator implements [`ContextSections`]: it reports
//! the size of each section it contributes, snapshots those sections into a
//! [`ContextImage`] under its own lock, and hydrates itself from a loaded
//! image. Collaborators that own a whole file additionally implement
//! [`ContextFile`].

use crate::error::{CoreError, CoreResult};
use crate::header::{CtxHeader, CtxVersion, HEADER_SIZE};
use crate::layout::ImageLayout;
use crate::types::ContextOwner;
use std::ops::Range;

/// Section index of the header in every image.
pub const HEADER_SECTION: usize = 0;

/// Sections a collaborator contributes to an image.
pub trait ContextSections: Send + Sync {
    /// Section indices owned by this collaborator, in image order.
    fn sections(&self) -> Range<usize>;

    /// Size in bytes of `section`.
    fn section_size(&self, section: usize) -> usize;

    /// Serializes every owned data section into `image`.
    ///
    /// The header is stamped by the caller. Implementations hold their own
    /// structural lock for the duration of the snapshot.
    fn before_flush(&self, image: &mut ContextImage<'_>);

    /// Hydrates in-memory state from a verified image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContextCorrupted`] if a section holds values the
    /// collaborator cannot accept.
    fn after_load(&self, image: &ContextImage<'_>) -> CoreResult<()>;
}

/// A collaborator that owns a whole context file.
pub trait ContextFile: ContextSections {
    /// Which file this collaborator owns.
    fn owner(&self) -> ContextOwner;

    /// Version counters of the file.
    fn versions(&self) -> &CtxVersion;

    /// Applies the side effects of a completed store.
    fn finalize_io(&self, header: &CtxHeader) {
        self.versions().finalize(header.version);
    }

    /// Version of the newest image known to be durable.
    fn stored_version(&self) -> u64 {
        self.versions().stored()
    }
}

/// An exclusively owned buffer holding one owner's file image.
///
/// The buffer is zero-initialized to the layout's file size and is released
/// when the image is dropped, on every exit path.
#[derive(Debug)]
pub struct ContextImage<'a> {
    layout: &'a ImageLayout,
    buf: Vec<u8>,
}

impl<'a> ContextImage<'a> {
    /// Creates a zeroed image for `layout`.
    #[must_use]
    pub fn new(layout: &'a ImageLayout) -> Self {
        Self {
            layout,
            buf: vec![0; layout.file_size()],
        }
    }

    /// Wraps bytes read back from storage, verifying size, signature and
    /// checksum.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContextCorrupted`] if any check fails.
    pub fn from_bytes(layout: &'a ImageLayout, buf: Vec<u8>) -> CoreResult<Self> {
        let owner = layout.owner();
        if buf.len() != layout.file_size() {
            return Err(CoreError::context_corrupted(
                owner,
                format!(
                    "file size {} does not match layout size {}",
                    buf.len(),
                    layout.file_size()
                ),
            ));
        }
        let image = Self { layout, buf };
        let header = image.header();
        if header.signature != owner.signature() {
            return Err(CoreError::context_corrupted(
                owner,
                format!("unexpected signature {:#010x}", header.signature),
            ));
        }
        let actual = image.payload_checksum();
        if actual != header.checksum {
            return Err(CoreError::context_corrupted(
                owner,
                format!(
                    "checksum mismatch: expected {:08x}, got {actual:08x}",
                    header.checksum
                ),
            ));
        }
        Ok(image)
    }

    /// Owner of the image.
    #[must_use]
    pub fn owner(&self) -> ContextOwner {
        self.layout.owner()
    }

    /// Bytes of `section`.
    ///
    /// # Panics
    ///
    /// Panics if `section` is not part of the layout.
    #[must_use]
    pub fn section(&self, section: usize) -> &[u8] {
        &self.buf[self.layout.sections()[section].range()]
    }

    /// Mutable bytes of `section`.
    ///
    /// # Panics
    ///
    /// Panics if `section` is not part of the layout.
    pub fn section_mut(&mut self, section: usize) -> &mut [u8] {
        let range = self.layout.sections()[section].range();
        &mut self.buf[range]
    }

    /// Decodes the header section.
    #[must_use]
    pub fn header(&self) -> CtxHeader {
        CtxHeader::decode(&self.buf).unwrap_or_default()
    }

    /// Writes `header` into the header section.
    pub fn write_header(&mut self, header: &CtxHeader) {
        header.encode_into(self.section_mut(HEADER_SECTION));
    }

    /// Stamps the payload checksum into the header.
    ///
    /// Must be called after every section has been written.
    pub fn seal(&mut self) {
        let mut header = self.header();
        header.checksum = self.payload_checksum();
        self.write_header(&header);
    }

    fn payload_checksum(&self) -> u32 {
        crc32fast::hash(self.buf.get(HEADER_SIZE..).unwrap_or_default())
    }

    /// Raw image bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Releases the buffer for hand-off to the I/O transport.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Writes `values` as consecutive little-endian `u32`s into `dst`.
pub(crate) fn encode_u32s(dst: &mut [u8], values: impl IntoIterator<Item = u32>) {
    for (chunk, value) in dst.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}

/// Reads consecutive little-endian `u32`s from `src`.
pub(crate) fn decode_u32s(src: &[u8]) -> impl Iterator<Item = u32> + '_ {
    src.chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}
