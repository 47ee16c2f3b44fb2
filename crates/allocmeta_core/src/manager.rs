//! Allocator context manager.
//!
//! Drives segment lifecycle transitions, GC victim selection and rebuild
//! delegation, and keeps the three context files consistent with memory.
//!
//! # Lock order
//!
//! 1. manager rebuild lock (`make_rebuild_target`, `stop_rebuilding`)
//! 2. segment and allocator issue locks (image build and enqueue)
//! 3. allocator structural lock (`set_next_ssd_lsid`, allocator snapshot)
//! 4. one segment state lock
//! 5. rebuild issue lock
//! 6. free pool lock, rebuild target lock, write-buffer locks
//!
//! Locks of the same level are never held together. Segment counters are
//! atomics and need no lock.
//!
//! An owner's issue lock is held from stamping a version into its image
//! until the image is queued, so versions reach storage in order.

use crate::allocator_ctx::AllocatorCtx;
use crate::config::AllocatorConfig;
use crate::context::{ContextFile, ContextImage, ContextSections};
use crate::dir::ContextDir;
use crate::error::{CoreError, CoreResult};
use crate::gc::GcPolicy;
use crate::header::CtxHeader;
use crate::io::{ContextBackends, FileIoManager, IoCompletion, LoadOutcome};
use crate::layout::SectionLayoutTable;
use crate::metrics::{MetricKey, MetricsSink, NoopMetrics};
use crate::rebuild_ctx::{RebuildCtx, RebuildUpdate};
use crate::scheduler::{EventScheduler, WorkerScheduler};
use crate::segment_ctx::SegmentCtx;
use crate::session::{FlushCallback, FlushSession, SessionEnd};
use crate::types::{ContextOwner, GcMode, SegmentId, SegmentState, StripeId};
use crate::wb_stripe_ctx::WbStripeCtx;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// State shared with the I/O completion handlers.
struct Contexts {
    segment_ctx: SegmentCtx,
    allocator_ctx: AllocatorCtx,
    wb_stripe_ctx: WbStripeCtx,
    rebuild_ctx: RebuildCtx,
    session: FlushSession,
    scheduler: Arc<dyn EventScheduler>,
    metrics: Arc<dyn MetricsSink>,
}

impl Contexts {
    /// Collaborators writing into `owner`'s image, in section order.
    fn sources(&self, owner: ContextOwner) -> Vec<&dyn ContextSections> {
        match owner {
            ContextOwner::SegmentCtx => vec![&self.segment_ctx],
            ContextOwner::AllocatorCtx => vec![&self.allocator_ctx, &self.wb_stripe_ctx],
            ContextOwner::RebuildCtx => vec![&self.rebuild_ctx],
        }
    }

    fn file(&self, owner: ContextOwner) -> &dyn ContextFile {
        match owner {
            ContextOwner::SegmentCtx => &self.segment_ctx,
            ContextOwner::AllocatorCtx => &self.allocator_ctx,
            ContextOwner::RebuildCtx => &self.rebuild_ctx,
        }
    }

    /// Runs on the I/O worker when an asynchronous store finishes.
    fn on_store_complete(&self, completion: IoCompletion) {
        let IoCompletion {
            owner,
            bytes,
            result,
        } = completion;
        let stored = match result {
            Ok(()) => {
                let header = CtxHeader::decode(&bytes).unwrap_or_default();
                self.file(owner).finalize_io(&header);
                debug!(
                    %owner,
                    version = header.version,
                    pending = self.session.pending(),
                    "context file stored"
                );
                true
            }
            Err(err) => {
                error!(%owner, error = %err, "failed to store context file");
                false
            }
        };
        drop(bytes);

        // Rebuild images are written out of band and are not part of a session.
        if owner == ContextOwner::RebuildCtx {
            return;
        }
        let end = self.session.complete(owner, stored);
        self.metrics
            .publish(MetricKey::PendingIoCount, u64::from(self.session.pending()));
        if let Some(end) = end {
            self.finish_session(end);
        }
    }

    fn finish_session(&self, end: SessionEnd) {
        let outcome = end.outcome;
        debug!(
            stored = outcome.stored,
            failed = outcome.failed,
            "flush session finished"
        );
        if let Some(callback) = end.callback {
            self.scheduler.enqueue(Box::new(move || callback(outcome)));
        }
    }
}

#[derive(Debug, Default)]
struct GcModeState {
    prev: GcMode,
    cur: GcMode,
}

/// The allocator context manager.
///
/// # Opening
///
/// ```rust,ignore
/// use allocmeta_core::{AllocatorConfig, ContextManager};
/// use std::path::Path;
///
/// let manager = ContextManager::open_dir(Path::new("ctx"), AllocatorConfig::default())?;
/// let segment = manager.allocate_free_segment();
/// manager.flush_contexts_sync()?;
/// manager.close();
/// ```
///
/// Closing does not flush; callers flush first when the current state
/// must survive.
pub struct ContextManager {
    /// Dropped first so queued writes finish while the directory is locked.
    io: FileIoManager,
    config: AllocatorConfig,
    layouts: SectionLayoutTable,
    contexts: Arc<Contexts>,
    gc_policy: GcPolicy,
    gc_mode: Mutex<GcModeState>,
    rebuild_lock: Mutex<()>,
    issue_locks: [Mutex<()>; 3],
    /// Context directory (holds the lock). None for caller-provided backends.
    dir: Option<ContextDir>,
}

impl ContextManager {
    /// Initializes the collaborators and loads or creates every context
    /// file.
    ///
    /// A missing or empty file is created from the default in-memory state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for an unusable configuration,
    /// [`CoreError::ContextCorrupted`] if a persisted file is neither absent
    /// nor a valid image, or a storage error if a file cannot be read or
    /// created.
    pub fn open(
        config: AllocatorConfig,
        backends: ContextBackends,
        scheduler: Arc<dyn EventScheduler>,
        metrics: Arc<dyn MetricsSink>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let contexts = Arc::new(Contexts {
            segment_ctx: SegmentCtx::new(&config),
            allocator_ctx: AllocatorCtx::new(&config),
            wb_stripe_ctx: WbStripeCtx::new(&config),
            rebuild_ctx: RebuildCtx::new(&config),
            session: FlushSession::new(),
            scheduler,
            metrics,
        });
        let layouts = SectionLayoutTable::for_config(&config);
        let io = FileIoManager::new(backends)?;

        let manager = Self {
            gc_policy: GcPolicy::from_config(&config),
            config,
            dir: None,
            layouts,
            contexts,
            io,
            gc_mode: Mutex::new(GcModeState::default()),
            rebuild_lock: Mutex::new(()),
            issue_locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
        };
        manager.load_contexts()?;
        info!(
            segments = manager.config.num_user_area_segments,
            free_segments = manager.free_segment_count(),
            "allocator contexts opened"
        );
        Ok(manager)
    }

    /// Opens the contexts stored in a directory, creating it if needed.
    ///
    /// Holds the directory lock until the manager is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DirectoryLocked`] if another process has the
    /// directory open, plus every error of [`open`](Self::open).
    pub fn open_dir(path: &Path, config: AllocatorConfig) -> CoreResult<Self> {
        let dir = ContextDir::open(path, true)?;
        let backends = dir.backends()?;
        let scheduler = Arc::new(WorkerScheduler::new()?);
        let mut manager = Self::open(config, backends, scheduler, Arc::new(NoopMetrics))?;
        manager.dir = Some(dir);
        Ok(manager)
    }

    fn load_contexts(&self) -> CoreResult<()> {
        for owner in ContextOwner::ALL {
            let layout = self.layouts.image(owner);
            match self.io.load_sync(owner, layout.file_size())? {
                LoadOutcome::Absent => {
                    info!(%owner, "context file absent, creating it");
                    self.flush_owner_sync(owner)?;
                }
                LoadOutcome::Loaded(bytes) => {
                    let image = ContextImage::from_bytes(layout, bytes)?;
                    for source in self.contexts.sources(owner) {
                        source.after_load(&image)?;
                    }
                    info!(%owner, version = image.header().version, "context file loaded");
                }
            }
        }
        Ok(())
    }

    /// Stops the I/O transport after finishing queued writes.
    ///
    /// Does not flush. Asynchronous flushes issued afterwards fail with
    /// [`CoreError::TransportClosed`].
    pub fn close(&self) {
        self.io.close();
        info!("allocator contexts closed");
    }

    // === Segment lifecycle ===

    /// Records one more written stripe in the segment containing `lsid`.
    ///
    /// When this fills the segment, it is freed if no block in it is valid
    /// and marked [`SegmentState::Ssd`] otherwise.
    pub fn update_occupied_stripe_count(&self, lsid: StripeId) {
        let stripes = self.config.stripes_per_segment;
        let segment = lsid.segment(stripes);
        let contexts = &*self.contexts;
        if contexts.segment_ctx.increase_occupied_stripe_count(segment) != stripes {
            return;
        }

        let mut state = contexts.allocator_ctx.lock_segment(segment);
        if contexts.segment_ctx.valid_block_count(segment) == 0 {
            // A segment still being filled is out of the pool but not yet SSD.
            if *state != SegmentState::Free || contexts.allocator_ctx.is_allocated(segment) {
                self.free_segment(segment, &mut state);
            }
        } else {
            *state = SegmentState::Ssd;
        }
    }

    /// Frees a fully written segment whose last valid block went away.
    ///
    /// Does nothing unless the segment is [`SegmentState::Ssd`] or
    /// [`SegmentState::Victim`]. Returns true if the segment was freed.
    ///
    /// # Panics
    ///
    /// Panics if the segment is in use but not every stripe was written.
    pub fn free_user_data_segment(&self, segment: SegmentId) -> bool {
        let mut state = self.contexts.allocator_ctx.lock_segment(segment);
        if !matches!(*state, SegmentState::Ssd | SegmentState::Victim) {
            return false;
        }
        let occupied = self.contexts.segment_ctx.occupied_stripe_count(segment);
        assert_eq!(
            occupied, self.config.stripes_per_segment,
            "{segment} freed with {occupied} occupied stripes"
        );
        self.free_segment(segment, &mut state);
        true
    }

    /// Marks `count` blocks of `segment` valid. Returns the new count.
    pub fn validate_blocks(&self, segment: SegmentId, count: u32) -> u32 {
        self.contexts
            .segment_ctx
            .increase_valid_block_count(segment, count)
    }

    /// Marks `count` blocks of `segment` invalid.
    ///
    /// Frees the segment when this removes its last valid block and every
    /// stripe has been written. Returns true if the segment was freed.
    pub fn invalidate_blocks(&self, segment: SegmentId, count: u32) -> bool {
        let remaining = self
            .contexts
            .segment_ctx
            .decrease_valid_block_count(segment, count);
        remaining == 0
            && self.contexts.segment_ctx.occupied_stripe_count(segment)
                == self.config.stripes_per_segment
            && self.free_user_data_segment(segment)
    }

    /// Returns a segment to the pool. The caller holds its state lock.
    fn free_segment(&self, segment: SegmentId, state: &mut SegmentState) {
        let contexts = &*self.contexts;
        contexts.segment_ctx.set_occupied_stripe_count(segment, 0);
        *state = SegmentState::Free;
        contexts.allocator_ctx.release_segment(segment);

        let free = contexts.allocator_ctx.num_free_segments();
        contexts
            .metrics
            .publish(MetricKey::FreeSegmentCount, u64::from(free));
        info!(segment_id = segment.as_u32(), free_segments = free, "segment freed");

        if contexts.rebuild_ctx.free_segment_in_rebuild_target(segment) == RebuildUpdate::NeedsFlush {
            // logged by the issuer
            let _ = self.flush_rebuild_async();
        }
    }

    /// Takes a free segment that is not a rebuild target.
    ///
    /// The scan continues from the last allocated segment. Returns `None`
    /// when no such segment is left.
    pub fn allocate_free_segment(&self) -> Option<SegmentId> {
        let allocator = &self.contexts.allocator_ctx;
        let rebuild = &self.contexts.rebuild_ctx;

        let mut candidate = allocator.allocate_free_segment(None);
        let mut skipped = 0usize;
        while let Some(segment) = candidate {
            if !rebuild.is_rebuild_target_segment(segment) {
                break;
            }
            debug!(segment_id = segment.as_u32(), "segment is a rebuild target, skipping");
            allocator.release_segment(segment);
            skipped += 1;
            candidate = if skipped < allocator.num_segments() {
                allocator.allocate_free_segment(Some(segment.next()))
            } else {
                None
            };
        }

        let free = allocator.num_free_segments();
        match candidate {
            Some(segment) => info!(
                segment_id = segment.as_u32(),
                free_segments = free,
                "user data segment allocated"
            ),
            None => error!(free_segments = free, "failed to allocate segment"),
        }
        self.contexts
            .metrics
            .publish(MetricKey::FreeSegmentCount, u64::from(free));
        candidate
    }

    /// Selects the SSD segment with the fewest valid blocks for GC.
    ///
    /// Segments with no valid block are skipped; ties go to the lowest id.
    /// The chosen segment becomes [`SegmentState::Victim`]. If it changes
    /// state before it can be claimed, the scan is repeated.
    pub fn allocate_gc_victim_segment(&self) -> Option<SegmentId> {
        self.claim_gc_victim(Self::scan_gc_victim)
    }

    /// Lowest-id SSD segment with the fewest valid blocks, and its count.
    fn scan_gc_victim(&self) -> Option<(SegmentId, u32)> {
        let allocator = &self.contexts.allocator_ctx;
        let segment_ctx = &self.contexts.segment_ctx;

        let mut victim = None;
        let mut min_valid = self.config.blks_per_segment();
        for index in 0..self.config.num_user_area_segments {
            let segment = SegmentId::new(index);
            let state = allocator.lock_segment(segment);
            let valid = segment_ctx.valid_block_count(segment);
            if *state != SegmentState::Ssd || valid == 0 {
                continue;
            }
            if valid < min_valid {
                victim = Some((segment, valid));
                min_valid = valid;
            }
        }
        victim
    }

    fn claim_gc_victim(&self, mut scan: impl FnMut(&Self) -> Option<(SegmentId, u32)>) -> Option<SegmentId> {
        let allocator = &self.contexts.allocator_ctx;
        let (segment, min_valid) = loop {
            let (segment, valid) = scan(self)?;
            let mut state = allocator.lock_segment(segment);
            let current = *state;
            if current == SegmentState::Ssd {
                *state = SegmentState::Victim;
                break (segment, valid);
            }
            debug!(segment_id = segment.as_u32(), state = %current, "victim changed state during scan, rescanning");
        };
        info!(
            segment_id = segment.as_u32(),
            valid_blocks = min_valid,
            free_segments = allocator.num_free_segments(),
            "GC victim selected"
        );
        self.contexts
            .metrics
            .publish(MetricKey::GcVictimSegment, u64::from(segment.as_u32()));
        Some(segment)
    }

    // === GC mode ===

    /// GC urgency for the current free segment count.
    ///
    /// The count is read without the pool lock. A metric is published when
    /// the mode differs from the previous call.
    pub fn current_gc_mode(&self) -> GcMode {
        let free = self.contexts.allocator_ctx.num_free_segments();
        let mode = self.gc_policy.mode_for(free);
        let mut gc = self.gc_mode.lock();
        gc.prev = gc.cur;
        gc.cur = mode;
        if gc.prev != gc.cur {
            debug!(free_segments = free, from = ?gc.prev, to = ?gc.cur, "GC mode changed");
            self.contexts
                .metrics
                .publish(MetricKey::GcMode, u64::from(mode.as_byte()));
        }
        mode
    }

    /// Free segment threshold of `mode`; `None` for [`GcMode::NoGc`].
    #[must_use]
    pub fn gc_threshold(&self, mode: GcMode) -> Option<u32> {
        self.gc_policy.threshold(mode)
    }

    /// Free segment count, read without the pool lock.
    #[must_use]
    pub fn free_segment_count(&self) -> u32 {
        self.contexts.allocator_ctx.num_free_segments()
    }

    /// Free segment count, computed under the pool lock.
    #[must_use]
    pub fn free_segment_count_locked(&self) -> u32 {
        self.contexts.allocator_ctx.num_free_segments_locked()
    }

    /// Moves the SSD write cursor to a newly allocated segment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoFreeSegment`] if no segment can be allocated.
    pub fn set_next_ssd_lsid(&self) -> CoreResult<()> {
        let allocator = &self.contexts.allocator_ctx;
        let mut cursor = allocator.lock();
        let segment = self.allocate_free_segment().ok_or_else(|| {
            error!("free segments exhausted, SSD LSID not moved");
            CoreError::NoFreeSegment
        })?;
        allocator.set_next_ssd_lsid(&mut cursor, segment);
        info!(
            segment_id = segment.as_u32(),
            lsid = cursor.current_ssd_lsid.as_u32(),
            "next SSD LSID set"
        );
        Ok(())
    }

    /// Version of `owner`'s newest durable image.
    #[must_use]
    pub fn stored_context_version(&self, owner: ContextOwner) -> u64 {
        self.contexts.file(owner).stored_version()
    }

    // === Rebuild ===

    /// Next segment to rebuild, if any is left.
    pub fn allocate_rebuild_target_segment(&self) -> Option<SegmentId> {
        self.contexts.rebuild_ctx.next_rebuild_target()
    }

    /// Returns true if a stopped rebuild has to be run again.
    #[must_use]
    pub fn need_rebuild_again(&self) -> bool {
        self.contexts.rebuild_ctx.need_rebuild_again()
    }

    /// Removes a rebuilt segment from the target set.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild image write cannot be issued.
    pub fn release_rebuild_segment(&self, segment: SegmentId) -> CoreResult<()> {
        match self.contexts.rebuild_ctx.release_rebuild_segment(segment) {
            RebuildUpdate::NeedsFlush => self.flush_rebuild_async(),
            RebuildUpdate::Unchanged => Ok(()),
        }
    }

    /// Makes every in-use segment a rebuild target.
    ///
    /// Returns the number of targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild image write cannot be issued.
    pub fn make_rebuild_target(&self) -> CoreResult<usize> {
        let _guard = self.rebuild_lock.lock();
        let used = self.contexts.allocator_ctx.used_segments();
        let update = self.contexts.rebuild_ctx.make_rebuild_target(&used);
        let count = self.contexts.rebuild_ctx.rebuild_target_segments_count();
        info!(targets = count, "rebuild targets made");
        if update == RebuildUpdate::NeedsFlush {
            self.flush_rebuild_async()?;
        }
        Ok(count)
    }

    /// Abandons the running rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild image write cannot be issued.
    pub fn stop_rebuilding(&self) -> CoreResult<()> {
        let _guard = self.rebuild_lock.lock();
        info!("stopping rebuild");
        match self.contexts.rebuild_ctx.stop_rebuilding() {
            RebuildUpdate::NeedsFlush => self.flush_rebuild_async(),
            RebuildUpdate::Unchanged => Ok(()),
        }
    }

    // === Sections ===

    /// Snapshot of one section of `owner`'s image.
    ///
    /// The header section carries the version the next flush will stamp;
    /// taking a snapshot does not advance it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSection`] if `section` is out of range.
    pub fn context_section(&self, owner: ContextOwner, section: usize) -> CoreResult<Vec<u8>> {
        let info = self.layouts.image(owner).section(section)?;
        let version = self.contexts.file(owner).versions().peek_next();
        let bytes = self.build_image(owner, version);
        Ok(bytes[info.range()].to_vec())
    }

    /// Size of one section of `owner`'s image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSection`] if `section` is out of range.
    pub fn context_section_size(&self, owner: ContextOwner, section: usize) -> CoreResult<usize> {
        Ok(self.layouts.image(owner).section(section)?.size)
    }

    /// Section layouts of every context file.
    #[must_use]
    pub fn section_layout(&self) -> &SectionLayoutTable {
        &self.layouts
    }

    // === Persistence ===

    /// Writes every context file and waits for each to be durable.
    ///
    /// Each image is queued behind the writes of any running asynchronous
    /// session, so it is never overwritten by an older image. Stops at the
    /// first failure; files already written stay written.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the failed write.
    pub fn flush_contexts_sync(&self) -> CoreResult<()> {
        for owner in ContextOwner::ALL {
            self.flush_owner_sync(owner)?;
        }
        Ok(())
    }

    /// Starts writing the segment and allocator context files.
    ///
    /// Returns once the writes are queued. `callback` runs on the scheduler
    /// after both writes finished.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushInProgress`] while the previous session is
    /// still running, or the error of a write that could not be issued. In
    /// the latter case `callback` is dropped without being called.
    pub fn flush_contexts_async(&self, callback: Option<FlushCallback>) -> CoreResult<()> {
        let owners = ContextOwner::TRACKED;
        let total = owners.len() as u32;
        self.contexts.session.try_begin(total, callback)?;
        self.contexts
            .metrics
            .publish(MetricKey::PendingIoCount, u64::from(total));

        for (issued, owner) in owners.into_iter().enumerate() {
            if let Err(err) = self.flush_owner_async(owner) {
                let unissued = total - issued as u32;
                if let Some(end) = self.contexts.session.retire(unissued) {
                    self.contexts.finish_session(end);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Returns true while an asynchronous flush session is running.
    #[must_use]
    pub fn is_flush_in_progress(&self) -> bool {
        self.contexts.session.is_in_progress()
    }

    fn build_image(&self, owner: ContextOwner, version: u64) -> Vec<u8> {
        let mut image = ContextImage::new(self.layouts.image(owner));
        image.write_header(&CtxHeader::new(owner, version));
        for source in self.contexts.sources(owner) {
            source.before_flush(&mut image);
        }
        image.seal();
        image.into_bytes()
    }

    /// Builds the next image of `owner`. The caller holds its issue lock.
    fn prepare_image(&self, owner: ContextOwner) -> Vec<u8> {
        let version = self.contexts.file(owner).versions().next_for_flush();
        self.build_image(owner, version)
    }

    fn flush_owner_sync(&self, owner: ContextOwner) -> CoreResult<()> {
        let _issue = self.issue_locks[owner.index()].lock();
        let bytes = self.prepare_image(owner);
        let header = CtxHeader::decode(&bytes).unwrap_or_default();
        if let Err(err) = self.io.store_sync(owner, bytes) {
            error!(%owner, error = %err, "failed to store context file");
            return Err(err);
        }
        self.contexts.file(owner).finalize_io(&header);
        debug!(%owner, version = header.version, "context file stored");
        Ok(())
    }

    fn flush_owner_async(&self, owner: ContextOwner) -> CoreResult<()> {
        let _issue = self.issue_locks[owner.index()].lock();
        let bytes = self.prepare_image(owner);
        let contexts = Arc::clone(&self.contexts);
        let issued = self.io.store_async(
            owner,
            bytes,
            Box::new(move |completion| contexts.on_store_complete(completion)),
        );
        if let Err(err) = &issued {
            error!(%owner, error = %err, "failed to issue context store");
        }
        issued
    }

    fn flush_rebuild_async(&self) -> CoreResult<()> {
        self.flush_owner_async(ContextOwner::RebuildCtx)
    }

    // === Accessors ===

    /// Configuration the manager was opened with.
    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Directory holding the context files, if opened from one.
    #[must_use]
    pub fn dir(&self) -> Option<&ContextDir> {
        self.dir.as_ref()
    }

    /// Segment counters.
    #[must_use]
    pub fn segment_ctx(&self) -> &SegmentCtx {
        &self.contexts.segment_ctx
    }

    /// Segment states and free pool.
    #[must_use]
    pub fn allocator_ctx(&self) -> &AllocatorCtx {
        &self.contexts.allocator_ctx
    }

    /// Write-buffer stripe state.
    #[must_use]
    pub fn wb_stripe_ctx(&self) -> &WbStripeCtx {
        &self.contexts.wb_stripe_ctx
    }

    /// Rebuild target set.
    #[must_use]
    pub fn rebuild_ctx(&self) -> &RebuildCtx {
        &self.contexts.rebuild_ctx
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("config", &self.config)
            .field("dir", &self.dir)
            .field("flush_in_progress", &self.is_flush_in_progress())
            .finish_non_exhaustive()
    }
}
