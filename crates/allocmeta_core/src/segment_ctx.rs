//! Per-segment occupancy counters.

use crate::config::AllocatorConfig;
use crate::context::{
    decode_u32s, encode_u32s, ContextFile, ContextImage, ContextSections, HEADER_SECTION,
};
use crate::error::{CoreError, CoreResult};
use crate::header::{CtxVersion, HEADER_SIZE};
use crate::types::{ContextOwner, SegmentId};
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

/// Section holding one `u32` valid block count per segment.
pub const SC_VALID_BLOCK_COUNT: usize = 1;
/// Section holding one `u32` occupied stripe count per segment.
pub const SC_OCCUPIED_STRIPE_COUNT: usize = 2;
/// Number of sections in the segment context image.
pub const NUM_SEGMENT_CTX_SECTIONS: usize = 3;

/// Valid-block and occupied-stripe counts of every user segment.
///
/// Counters are atomics and may be updated concurrently from any thread.
/// The structural lock only serializes image snapshots against each other
/// and against bulk restores.
#[derive(Debug)]
pub struct SegmentCtx {
    valid_block_counts: Box<[AtomicU32]>,
    occupied_stripe_counts: Box<[AtomicU32]>,
    blks_per_segment: u32,
    stripes_per_segment: u32,
    version: CtxVersion,
    ctx_lock: Mutex<()>,
}

impl SegmentCtx {
    /// Creates zeroed counters for every user segment.
    #[must_use]
    pub fn new(config: &AllocatorConfig) -> Self {
        let n = config.num_user_area_segments as usize;
        Self {
            valid_block_counts: (0..n).map(|_| AtomicU32::new(0)).collect(),
            occupied_stripe_counts: (0..n).map(|_| AtomicU32::new(0)).collect(),
            blks_per_segment: config.blks_per_segment(),
            stripes_per_segment: config.stripes_per_segment,
            version: CtxVersion::new(),
            ctx_lock: Mutex::new(()),
        }
    }

    /// Number of tracked segments.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.valid_block_counts.len()
    }

    /// Current valid block count of `segment`.
    #[must_use]
    pub fn valid_block_count(&self, segment: SegmentId) -> u32 {
        self.valid_block_counts[segment.index()].load(Ordering::SeqCst)
    }

    /// Adds `count` valid blocks, returning the new count.
    ///
    /// # Panics
    ///
    /// Panics if the count would exceed the blocks of one segment.
    pub fn increase_valid_block_count(&self, segment: SegmentId, count: u32) -> u32 {
        let new = self.valid_block_counts[segment.index()].fetch_add(count, Ordering::SeqCst) + count;
        assert!(
            new <= self.blks_per_segment,
            "{segment} valid block count {new} exceeds {}",
            self.blks_per_segment
        );
        new
    }

    /// Removes `count` valid blocks, returning the new count.
    ///
    /// # Panics
    ///
    /// Panics if more blocks are invalidated than are valid.
    pub fn decrease_valid_block_count(&self, segment: SegmentId, count: u32) -> u32 {
        let prev = self.valid_block_counts[segment.index()].fetch_sub(count, Ordering::SeqCst);
        assert!(
            prev >= count,
            "{segment} invalidated {count} blocks but only {prev} were valid"
        );
        prev - count
    }

    /// Current occupied stripe count of `segment`.
    #[must_use]
    pub fn occupied_stripe_count(&self, segment: SegmentId) -> u32 {
        self.occupied_stripe_counts[segment.index()].load(Ordering::SeqCst)
    }

    /// Records one more written stripe, returning the new count.
    ///
    /// # Panics
    ///
    /// Panics if the segment already had every stripe written.
    pub fn increase_occupied_stripe_count(&self, segment: SegmentId) -> u32 {
        let new = self.occupied_stripe_counts[segment.index()].fetch_add(1, Ordering::SeqCst) + 1;
        assert!(
            new <= self.stripes_per_segment,
            "{segment} occupied stripe count {new} exceeds {}",
            self.stripes_per_segment
        );
        new
    }

    /// Overwrites the occupied stripe count of `segment`.
    pub fn set_occupied_stripe_count(&self, segment: SegmentId, count: u32) {
        self.occupied_stripe_counts[segment.index()].store(count, Ordering::SeqCst);
    }

    /// Structural lock guarding image snapshots.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.ctx_lock.lock()
    }

    fn counters_size(&self) -> usize {
        self.num_segments() * 4
    }
}

impl ContextSections for SegmentCtx {
    fn sections(&self) -> Range<usize> {
        0..NUM_SEGMENT_CTX_SECTIONS
    }

    fn section_size(&self, section: usize) -> usize {
        match section {
            HEADER_SECTION => HEADER_SIZE,
            SC_VALID_BLOCK_COUNT | SC_OCCUPIED_STRIPE_COUNT => self.counters_size(),
            _ => 0,
        }
    }

    fn before_flush(&self, image: &mut ContextImage<'_>) {
        let _guard = self.ctx_lock.lock();
        encode_u32s(
            image.section_mut(SC_VALID_BLOCK_COUNT),
            self.valid_block_counts.iter().map(|c| c.load(Ordering::SeqCst)),
        );
        encode_u32s(
            image.section_mut(SC_OCCUPIED_STRIPE_COUNT),
            self.occupied_stripe_counts.iter().map(|c| c.load(Ordering::SeqCst)),
        );
    }

    fn after_load(&self, image: &ContextImage<'_>) -> CoreResult<()> {
        let _guard = self.ctx_lock.lock();
        let valid: Vec<u32> = decode_u32s(image.section(SC_VALID_BLOCK_COUNT)).collect();
        let occupied: Vec<u32> = decode_u32s(image.section(SC_OCCUPIED_STRIPE_COUNT)).collect();

        if let Some(pos) = valid.iter().position(|&v| v > self.blks_per_segment) {
            return Err(CoreError::context_corrupted(
                ContextOwner::SegmentCtx,
                format!("segment {pos} has {} valid blocks", valid[pos]),
            ));
        }
        if let Some(pos) = occupied.iter().position(|&v| v > self.stripes_per_segment) {
            return Err(CoreError::context_corrupted(
                ContextOwner::SegmentCtx,
                format!("segment {pos} has {} occupied stripes", occupied[pos]),
            ));
        }

        for (counter, value) in self.valid_block_counts.iter().zip(valid) {
            counter.store(value, Ordering::SeqCst);
        }
        for (counter, value) in self.occupied_stripe_counts.iter().zip(occupied) {
            counter.store(value, Ordering::SeqCst);
        }
        self.version.restore(image.header().version);
        Ok(())
    }
}

impl ContextFile for SegmentCtx {
    fn owner(&self) -> ContextOwner {
        ContextOwner::SegmentCtx
    }

    fn versions(&self) -> &CtxVersion {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::CtxHeader;
    use crate::layout::LayoutBuilder;

    fn config() -> AllocatorConfig {
        AllocatorConfig::new()
            .num_user_area_segments(8)
            .stripes_per_segment(4)
            .blks_per_stripe(2)
    }

    #[test]
    fn counters_start_at_zero() {
        let ctx = SegmentCtx::new(&config());
        assert_eq!(ctx.num_segments(), 8);
        assert_eq!(ctx.valid_block_count(SegmentId::new(3)), 0);
        assert_eq!(ctx.occupied_stripe_count(SegmentId::new(3)), 0);
    }

    #[test]
    fn occupied_stripe_count_increments() {
        let ctx = SegmentCtx::new(&config());
        let seg = SegmentId::new(2);
        assert_eq!(ctx.increase_occupied_stripe_count(seg), 1);
        assert_eq!(ctx.increase_occupied_stripe_count(seg), 2);
        ctx.set_occupied_stripe_count(seg, 0);
        assert_eq!(ctx.occupied_stripe_count(seg), 0);
    }

    #[test]
    fn valid_block_count_round_trip() {
        let ctx = SegmentCtx::new(&config());
        let seg = SegmentId::new(1);
        assert_eq!(ctx.increase_valid_block_count(seg, 5), 5);
        assert_eq!(ctx.decrease_valid_block_count(seg, 2), 3);
    }

    #[test]
    #[should_panic(expected = "only 1 were valid")]
    fn over_invalidation_panics() {
        let ctx = SegmentCtx::new(&config());
        let seg = SegmentId::new(1);
        ctx.increase_valid_block_count(seg, 1);
        ctx.decrease_valid_block_count(seg, 2);
    }

    #[test]
    fn image_restores_counters_and_version() {
        let source = SegmentCtx::new(&config());
        source.increase_valid_block_count(SegmentId::new(4), 7);
        source.increase_occupied_stripe_count(SegmentId::new(4));
        source.version.restore(41);

        let layout = LayoutBuilder::new(ContextOwner::SegmentCtx)
            .append(&source)
            .build();
        let mut image = ContextImage::new(&layout);
        image.write_header(&CtxHeader::new(
            ContextOwner::SegmentCtx,
            source.versions().next_for_flush(),
        ));
        source.before_flush(&mut image);
        image.seal();

        let target = SegmentCtx::new(&config());
        let image = ContextImage::from_bytes(&layout, image.into_bytes()).unwrap();
        target.after_load(&image).unwrap();

        assert_eq!(target.valid_block_count(SegmentId::new(4)), 7);
        assert_eq!(target.occupied_stripe_count(SegmentId::new(4)), 1);
        assert_eq!(target.stored_version(), 42);
    }
}
