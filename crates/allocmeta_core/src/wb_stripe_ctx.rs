//! Write-buffer stripe allocation state.
//!
//! Persisted inside the allocator context image, after the allocator's own
//! sections, but guarded by its own locks.

use crate::allocator_ctx::NUM_ALLOCATION_INFO;
use crate::bitmap::SegmentBitmap;
use crate::config::AllocatorConfig;
use crate::context::{decode_u32s, encode_u32s, ContextImage, ContextSections};
use crate::error::{CoreError, CoreResult};
use crate::types::{ContextOwner, StripeId};
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;

/// Section holding the write-buffer stripe allocation bitmap.
pub const AC_ALLOCATE_WBLSID_BITMAP: usize = NUM_ALLOCATION_INFO;
/// Section holding the per-volume active stripe tails.
pub const AC_ACTIVE_STRIPE_TAIL: usize = NUM_ALLOCATION_INFO + 1;
/// Number of sections in the allocator context image.
pub const NUM_ALLOCATOR_CTX_SECTIONS: usize = NUM_ALLOCATION_INFO + 2;

/// Encoded size of one [`StripeTail`].
const TAIL_SIZE: usize = 8;

/// Next write position of a volume's active write-buffer stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeTail {
    /// Write-buffer stripe being filled.
    pub stripe: StripeId,
    /// Next block offset within the stripe.
    pub offset: u32,
}

impl StripeTail {
    /// Tail of a volume with no active stripe.
    pub const UNMAPPED: Self = Self {
        stripe: StripeId::UNMAPPED,
        offset: u32::MAX,
    };
}

/// Write-buffer stripe bitmap and active stripe tails.
#[derive(Debug)]
pub struct WbStripeCtx {
    allocated: Mutex<SegmentBitmap>,
    tails: Mutex<Vec<StripeTail>>,
}

impl WbStripeCtx {
    /// Creates a context with every write-buffer stripe free.
    #[must_use]
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            allocated: Mutex::new(SegmentBitmap::new(config.num_wb_stripes as usize)),
            tails: Mutex::new(vec![StripeTail::UNMAPPED; config.max_volumes as usize]),
        }
    }

    /// Takes a free write-buffer stripe.
    pub fn allocate_wb_stripe(&self) -> Option<StripeId> {
        let mut allocated = self.allocated.lock();
        let index = allocated.find_zero_from(0)?;
        allocated.set(index);
        Some(StripeId::new(index as u32))
    }

    /// Returns a write-buffer stripe.
    ///
    /// # Panics
    ///
    /// Panics if the stripe was not allocated.
    pub fn release_wb_stripe(&self, stripe: StripeId) {
        let was_allocated = self.allocated.lock().clear(stripe.as_u32() as usize);
        assert!(was_allocated, "write-buffer {stripe} released twice");
    }

    /// Number of write-buffer stripes in use.
    #[must_use]
    pub fn num_allocated_wb_stripes(&self) -> usize {
        self.allocated.lock().count_ones()
    }

    /// Sets the active stripe tail of `volume`.
    pub fn set_active_stripe_tail(&self, volume: usize, tail: StripeTail) {
        self.tails.lock()[volume] = tail;
    }

    /// Active stripe tail of `volume`.
    #[must_use]
    pub fn active_stripe_tail(&self, volume: usize) -> StripeTail {
        self.tails.lock()[volume]
    }

    /// Lock guarding the write-buffer stripe bitmap.
    pub fn lock_bitmap(&self) -> MutexGuard<'_, SegmentBitmap> {
        self.allocated.lock()
    }

    fn num_volumes(&self) -> usize {
        self.tails.lock().len()
    }
}

impl ContextSections for WbStripeCtx {
    fn sections(&self) -> Range<usize> {
        AC_ALLOCATE_WBLSID_BITMAP..NUM_ALLOCATOR_CTX_SECTIONS
    }

    fn section_size(&self, section: usize) -> usize {
        match section {
            AC_ALLOCATE_WBLSID_BITMAP => self.allocated.lock().encoded_len(),
            AC_ACTIVE_STRIPE_TAIL => self.num_volumes() * TAIL_SIZE,
            _ => 0,
        }
    }

    fn before_flush(&self, image: &mut ContextImage<'_>) {
        {
            let allocated = self.allocated.lock();
            allocated.encode_into(image.section_mut(AC_ALLOCATE_WBLSID_BITMAP));
        }
        let tails = self.tails.lock();
        encode_u32s(
            image.section_mut(AC_ACTIVE_STRIPE_TAIL),
            tails.iter().flat_map(|t| [t.stripe.as_u32(), t.offset]),
        );
    }

    fn after_load(&self, image: &ContextImage<'_>) -> CoreResult<()> {
        let mut allocated = self.allocated.lock();
        let restored = SegmentBitmap::decode(image.section(AC_ALLOCATE_WBLSID_BITMAP), allocated.len())
            .ok_or_else(|| {
                CoreError::context_corrupted(ContextOwner::AllocatorCtx, "malformed write-buffer bitmap")
            })?;
        *allocated = restored;
        drop(allocated);

        let words: Vec<u32> = decode_u32s(image.section(AC_ACTIVE_STRIPE_TAIL)).collect();
        let mut tails = self.tails.lock();
        for (tail, pair) in tails.iter_mut().zip(words.chunks_exact(2)) {
            *tail = StripeTail {
                stripe: StripeId::new(pair[0]),
                offset: pair[1],
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> WbStripeCtx {
        WbStripeCtx::new(&AllocatorConfig::new().num_wb_stripes(3).max_volumes(2))
    }

    #[test]
    fn stripes_are_handed_out_until_exhausted() {
        let ctx = ctx();
        assert_eq!(ctx.allocate_wb_stripe(), Some(StripeId::new(0)));
        assert_eq!(ctx.allocate_wb_stripe(), Some(StripeId::new(1)));
        assert_eq!(ctx.allocate_wb_stripe(), Some(StripeId::new(2)));
        assert_eq!(ctx.allocate_wb_stripe(), None);

        ctx.release_wb_stripe(StripeId::new(1));
        assert_eq!(ctx.num_allocated_wb_stripes(), 2);
        assert_eq!(ctx.allocate_wb_stripe(), Some(StripeId::new(1)));
    }

    #[test]
    fn tails_default_to_unmapped() {
        let ctx = ctx();
        assert_eq!(ctx.active_stripe_tail(1), StripeTail::UNMAPPED);

        let tail = StripeTail {
            stripe: StripeId::new(2),
            offset: 17,
        };
        ctx.set_active_stripe_tail(1, tail);
        assert_eq!(ctx.active_stripe_tail(1), tail);
    }

    #[test]
    fn sections_follow_allocator_sections() {
        let ctx = ctx();
        assert_eq!(ctx.sections().start, NUM_ALLOCATION_INFO);
        assert_eq!(ctx.section_size(AC_ACTIVE_STRIPE_TAIL), 16);
        assert_eq!(ctx.section_size(AC_ALLOCATE_WBLSID_BITMAP), 8);
    }
}
