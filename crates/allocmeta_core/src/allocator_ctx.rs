//! Segment states and the free segment pool.

use crate::bitmap::SegmentBitmap;
use crate::config::AllocatorConfig;
use crate::context::{decode_u32s, encode_u32s, ContextFile, ContextImage, ContextSections, HEADER_SECTION};
use crate::error::{CoreError, CoreResult};
use crate::header::{CtxVersion, HEADER_SIZE};
use crate::types::{ContextOwner, SegmentId, SegmentState, StripeId};
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

/// Section holding the current SSD LSID.
pub const AC_CURRENT_SSD_LSID: usize = 1;
/// Section holding the segment allocation bitmap.
pub const AC_SEGMENT_ALLOC_BITMAP: usize = 2;
/// Section holding one state byte per segment.
pub const AC_SEGMENT_STATES: usize = 3;
/// Number of sections owned by the allocator context itself. The
/// write-back stripe sections follow in the same image.
pub const NUM_ALLOCATION_INFO: usize = 4;

/// State guarded by the allocator context structural lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsdCursor {
    /// First stripe of the segment currently receiving SSD writes.
    pub current_ssd_lsid: StripeId,
}

#[derive(Debug)]
struct FreeSegmentPool {
    allocated: SegmentBitmap,
    cursor: usize,
}

/// Segment states, the free segment pool, and the SSD write cursor.
///
/// Lock order: structural lock, then a segment state lock, then the free
/// pool lock. A segment state lock is never held while taking the
/// structural lock.
#[derive(Debug)]
pub struct AllocatorCtx {
    pool: Mutex<FreeSegmentPool>,
    num_free: AtomicU32,
    states: Box<[Mutex<SegmentState>]>,
    ctx_lock: Mutex<SsdCursor>,
    stripes_per_segment: u32,
    version: CtxVersion,
}

impl AllocatorCtx {
    /// Creates a context with every segment free.
    #[must_use]
    pub fn new(config: &AllocatorConfig) -> Self {
        let n = config.num_user_area_segments;
        Self {
            pool: Mutex::new(FreeSegmentPool {
                allocated: SegmentBitmap::new(n as usize),
                cursor: 0,
            }),
            num_free: AtomicU32::new(n),
            states: (0..n).map(|_| Mutex::new(SegmentState::Free)).collect(),
            ctx_lock: Mutex::new(SsdCursor {
                current_ssd_lsid: StripeId::UNMAPPED,
            }),
            stripes_per_segment: config.stripes_per_segment,
            version: CtxVersion::new(),
        }
    }

    /// Number of tracked segments.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.states.len()
    }

    /// Takes a free segment out of the pool.
    ///
    /// The scan starts at `start`, or after the last allocated segment when
    /// `start` is `None`, and wraps around once. Returns `None` when every
    /// segment is allocated.
    pub fn allocate_free_segment(&self, start: Option<SegmentId>) -> Option<SegmentId> {
        let mut pool = self.pool.lock();
        let from = start.map_or(pool.cursor, SegmentId::index);
        let index = pool.allocated.find_zero_from(from)?;
        pool.allocated.set(index);
        pool.cursor = index + 1;
        self.num_free.fetch_sub(1, Ordering::SeqCst);
        Some(SegmentId::new(index as u32))
    }

    /// Returns `segment` to the free pool.
    ///
    /// # Panics
    ///
    /// Panics if `segment` is already free.
    pub fn release_segment(&self, segment: SegmentId) {
        let mut pool = self.pool.lock();
        let was_allocated = pool.allocated.clear(segment.index());
        assert!(was_allocated, "{segment} released twice");
        self.num_free.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns true if `segment` is out of the free pool.
    #[must_use]
    pub fn is_allocated(&self, segment: SegmentId) -> bool {
        self.pool.lock().allocated.test(segment.index())
    }

    /// Segments currently out of the free pool, ascending.
    #[must_use]
    pub fn used_segments(&self) -> Vec<SegmentId> {
        let pool = self.pool.lock();
        pool.allocated
            .iter_ones()
            .map(|i| SegmentId::new(i as u32))
            .collect()
    }

    /// Free segment count without taking the pool lock.
    ///
    /// May be stale by the time the caller looks at it.
    #[must_use]
    pub fn num_free_segments(&self) -> u32 {
        self.num_free.load(Ordering::Relaxed)
    }

    /// Free segment count computed under the pool lock.
    #[must_use]
    pub fn num_free_segments_locked(&self) -> u32 {
        let pool = self.pool.lock();
        (pool.allocated.len() - pool.allocated.count_ones()) as u32
    }

    /// Locks the state of one segment.
    ///
    /// Every state transition happens through the returned guard.
    pub fn lock_segment(&self, segment: SegmentId) -> MutexGuard<'_, SegmentState> {
        self.states[segment.index()].lock()
    }

    /// Reads the state of one segment.
    #[must_use]
    pub fn segment_state(&self, segment: SegmentId) -> SegmentState {
        *self.lock_segment(segment)
    }

    /// Takes the structural lock.
    pub fn lock(&self) -> MutexGuard<'_, SsdCursor> {
        self.ctx_lock.lock()
    }

    /// Points the SSD write cursor at the first stripe of `segment`.
    ///
    /// The caller holds the structural lock and passes its guard.
    pub fn set_next_ssd_lsid(&self, cursor: &mut SsdCursor, segment: SegmentId) {
        cursor.current_ssd_lsid = StripeId::first_of(segment, self.stripes_per_segment);
    }

    /// Current SSD write cursor.
    #[must_use]
    pub fn current_ssd_lsid(&self) -> StripeId {
        self.ctx_lock.lock().current_ssd_lsid
    }

    fn restore_pool(&self, allocated: SegmentBitmap) {
        let mut pool = self.pool.lock();
        let free = allocated.len() - allocated.count_ones();
        pool.cursor = allocated
            .iter_ones()
            .last()
            .map_or(0, |last| last + 1);
        pool.allocated = allocated;
        self.num_free.store(free as u32, Ordering::SeqCst);
    }
}

impl ContextSections for AllocatorCtx {
    fn sections(&self) -> Range<usize> {
        0..NUM_ALLOCATION_INFO
    }

    fn section_size(&self, section: usize) -> usize {
        match section {
            HEADER_SECTION => HEADER_SIZE,
            AC_CURRENT_SSD_LSID => 4,
            AC_SEGMENT_ALLOC_BITMAP => SegmentBitmap::encoded_len_for(self.num_segments()),
            AC_SEGMENT_STATES => self.num_segments(),
            _ => 0,
        }
    }

    fn before_flush(&self, image: &mut ContextImage<'_>) {
        let cursor = self.ctx_lock.lock();
        encode_u32s(
            image.section_mut(AC_CURRENT_SSD_LSID),
            [cursor.current_ssd_lsid.as_u32()],
        );
        {
            let pool = self.pool.lock();
            pool.allocated
                .encode_into(image.section_mut(AC_SEGMENT_ALLOC_BITMAP));
        }
        let states = image.section_mut(AC_SEGMENT_STATES);
        for (byte, state) in states.iter_mut().zip(self.states.iter()) {
            *byte = state.lock().as_byte();
        }
    }

    fn after_load(&self, image: &ContextImage<'_>) -> CoreResult<()> {
        let mut cursor = self.ctx_lock.lock();
        let owner = ContextOwner::AllocatorCtx;

        let allocated = SegmentBitmap::decode(
            image.section(AC_SEGMENT_ALLOC_BITMAP),
            self.num_segments(),
        )
        .ok_or_else(|| CoreError::context_corrupted(owner, "malformed segment bitmap"))?;

        let mut states = Vec::with_capacity(self.num_segments());
        for (index, &byte) in image.section(AC_SEGMENT_STATES).iter().enumerate() {
            let state = SegmentState::from_byte(byte).ok_or_else(|| {
                CoreError::context_corrupted(owner, format!("segment {index} has state byte {byte}"))
            })?;
            states.push(state);
        }

        let lsid = decode_u32s(image.section(AC_CURRENT_SSD_LSID))
            .next()
            .map_or(StripeId::UNMAPPED, StripeId::new);

        cursor.current_ssd_lsid = lsid;
        for (slot, state) in self.states.iter().zip(states) {
            *slot.lock() = state;
        }
        self.restore_pool(allocated);
        self.version.restore(image.header().version);
        Ok(())
    }
}

impl ContextFile for AllocatorCtx {
    fn owner(&self) -> ContextOwner {
        ContextOwner::AllocatorCtx
    }

    fn versions(&self) -> &CtxVersion {
        &self.version
    }
}
