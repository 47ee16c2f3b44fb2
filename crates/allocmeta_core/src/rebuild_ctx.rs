//! Rebuild target set.
//!
//! Segments that held data when a device failed are collected into the
//! target set. The rebuild worker takes them one at a time; normal
//! allocation never hands out a segment that is still a target.
//!
//! The image holds the target set and the need-again flag. The progress
//! cursor is not persisted: a segment handed out before a restart is still
//! a target and is handed out again.

use crate::bitmap::SegmentBitmap;
use crate::config::AllocatorConfig;
use crate::context::{decode_u32s, encode_u32s, ContextFile, ContextImage, ContextSections, HEADER_SECTION};
use crate::error::{CoreError, CoreResult};
use crate::header::{CtxVersion, HEADER_SIZE};
use crate::types::{ContextOwner, SegmentId};
use parking_lot::Mutex;
use std::ops::Range;

/// Section holding the target segment bitmap.
pub const RC_TARGET_SEGMENTS: usize = 1;
/// Section holding the need-again flag as a little-endian `u32`.
pub const RC_REBUILD_STATE: usize = 2;
/// Number of sections in the rebuild context image.
pub const NUM_REBUILD_CTX_SECTIONS: usize = 3;

/// Whether a rebuild mutation left the persisted image stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildUpdate {
    /// The target set did not change.
    Unchanged,
    /// The target set changed and the rebuild image must be rewritten.
    NeedsFlush,
}

impl RebuildUpdate {
    fn changed(changed: bool) -> Self {
        if changed {
            Self::NeedsFlush
        } else {
            Self::Unchanged
        }
    }
}

#[derive(Debug)]
struct RebuildState {
    targets: SegmentBitmap,
    current: Option<SegmentId>,
    need_again: bool,
}

/// Rebuild target set and rebuild progress.
#[derive(Debug)]
pub struct RebuildCtx {
    state: Mutex<RebuildState>,
    version: CtxVersion,
}

impl RebuildCtx {
    /// Creates an empty target set.
    #[must_use]
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            state: Mutex::new(RebuildState {
                targets: SegmentBitmap::new(config.num_user_area_segments as usize),
                current: None,
                need_again: false,
            }),
            version: CtxVersion::new(),
        }
    }

    /// Replaces the target set with `used` and clears the need-again flag.
    pub fn make_rebuild_target(&self, used: &[SegmentId]) -> RebuildUpdate {
        let mut state = self.state.lock();
        let was_needed = state.need_again;
        state.targets.clear_all();
        for segment in used {
            state.targets.set(segment.index());
        }
        state.current = None;
        state.need_again = false;
        RebuildUpdate::changed(!used.is_empty() || was_needed)
    }

    /// Takes the next target after the one currently being rebuilt.
    ///
    /// The segment stays in the set until it is released. Returns `None`
    /// once every target has been handed out.
    pub fn next_rebuild_target(&self) -> Option<SegmentId> {
        let mut state = self.state.lock();
        let from = state.current.map_or(0, |seg| seg.index() + 1);
        let next = state
            .targets
            .next_one_from(from)
            .map(|index| SegmentId::new(index as u32));
        state.current = next;
        next
    }

    /// Removes a rebuilt segment from the set.
    pub fn release_rebuild_segment(&self, segment: SegmentId) -> RebuildUpdate {
        let mut state = self.state.lock();
        RebuildUpdate::changed(state.targets.clear(segment.index()))
    }

    /// Drops `segment` from the set because it was freed before being
    /// rebuilt.
    pub fn free_segment_in_rebuild_target(&self, segment: SegmentId) -> RebuildUpdate {
        let mut state = self.state.lock();
        let removed = state.targets.clear(segment.index());
        if removed {
            tracing::debug!(segment_id = segment.as_u32(), "freed segment dropped from rebuild targets");
        }
        RebuildUpdate::changed(removed)
    }

    /// Abandons the running rebuild. The next rebuild must start over.
    pub fn stop_rebuilding(&self) -> RebuildUpdate {
        let mut state = self.state.lock();
        let had_targets = state.targets.count_ones() > 0;
        let was_needed = state.need_again;
        state.targets.clear_all();
        state.current = None;
        state.need_again = true;
        RebuildUpdate::changed(had_targets || !was_needed)
    }

    /// Returns true if a stopped rebuild has to be run again.
    #[must_use]
    pub fn need_rebuild_again(&self) -> bool {
        self.state.lock().need_again
    }

    /// Returns true if `segment` is in the target set.
    #[must_use]
    pub fn is_rebuild_target_segment(&self, segment: SegmentId) -> bool {
        self.state.lock().targets.test(segment.index())
    }

    /// Number of segments still in the target set.
    #[must_use]
    pub fn rebuild_target_segments_count(&self) -> usize {
        self.state.lock().targets.count_ones()
    }
}

impl ContextSections for RebuildCtx {
    fn sections(&self) -> Range<usize> {
        0..NUM_REBUILD_CTX_SECTIONS
    }

    fn section_size(&self, section: usize) -> usize {
        match section {
            HEADER_SECTION => HEADER_SIZE,
            RC_TARGET_SEGMENTS => self.state.lock().targets.encoded_len(),
            RC_REBUILD_STATE => 4,
            _ => 0,
        }
    }

    fn before_flush(&self, image: &mut ContextImage<'_>) {
        let state = self.state.lock();
        state.targets.encode_into(image.section_mut(RC_TARGET_SEGMENTS));
        encode_u32s(
            image.section_mut(RC_REBUILD_STATE),
            [u32::from(state.need_again)],
        );
    }

    fn after_load(&self, image: &ContextImage<'_>) -> CoreResult<()> {
        let mut state = self.state.lock();
        let targets = SegmentBitmap::decode(image.section(RC_TARGET_SEGMENTS), state.targets.len())
            .ok_or_else(|| {
                CoreError::context_corrupted(ContextOwner::RebuildCtx, "malformed target bitmap")
            })?;
        let need_again = match decode_u32s(image.section(RC_REBUILD_STATE)).next() {
            Some(0) => false,
            Some(1) => true,
            flag => {
                return Err(CoreError::context_corrupted(
                    ContextOwner::RebuildCtx,
                    format!("need-again flag {flag:?}"),
                ))
            }
        };
        state.targets = targets;
        state.current = None;
        state.need_again = need_again;
        self.version.restore(image.header().version);
        Ok(())
    }
}

impl ContextFile for RebuildCtx {
    fn owner(&self) -> ContextOwner {
        ContextOwner::RebuildCtx
    }

    fn versions(&self) -> &CtxVersion {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::CtxHeader;
    use crate::layout::{ImageLayout, LayoutBuilder};

    fn ctx() -> RebuildCtx {
        RebuildCtx::new(&AllocatorConfig::new().num_user_area_segments(16))
    }

    fn segs(ids: &[u32]) -> Vec<SegmentId> {
        ids.iter().copied().map(SegmentId::new).collect()
    }

    #[test]
    fn targets_are_handed_out_in_order() {
        let ctx = ctx();
        assert_eq!(ctx.make_rebuild_target(&segs(&[3, 9, 1])), RebuildUpdate::NeedsFlush);
        assert_eq!(ctx.rebuild_target_segments_count(), 3);

        assert_eq!(ctx.next_rebuild_target(), Some(SegmentId::new(1)));
        assert_eq!(ctx.next_rebuild_target(), Some(SegmentId::new(3)));
        assert_eq!(ctx.next_rebuild_target(), Some(SegmentId::new(9)));
        assert_eq!(ctx.next_rebuild_target(), None);
        // still members until released
        assert!(ctx.is_rebuild_target_segment(SegmentId::new(3)));
    }

    #[test]
    fn empty_target_set_needs_no_flush() {
        let ctx = ctx();
        assert_eq!(ctx.make_rebuild_target(&[]), RebuildUpdate::Unchanged);
        assert_eq!(ctx.next_rebuild_target(), None);
    }

    #[test]
    fn release_reports_membership_change() {
        let ctx = ctx();
        ctx.make_rebuild_target(&segs(&[4]));
        assert_eq!(ctx.release_rebuild_segment(SegmentId::new(4)), RebuildUpdate::NeedsFlush);
        assert_eq!(ctx.release_rebuild_segment(SegmentId::new(4)), RebuildUpdate::Unchanged);
        assert_eq!(ctx.free_segment_in_rebuild_target(SegmentId::new(5)), RebuildUpdate::Unchanged);
    }

    #[test]
    fn stop_requests_another_rebuild() {
        let ctx = ctx();
        ctx.make_rebuild_target(&segs(&[2, 6]));
        assert!(!ctx.need_rebuild_again());
        assert_eq!(ctx.stop_rebuilding(), RebuildUpdate::NeedsFlush);
        assert!(ctx.need_rebuild_again());
        assert_eq!(ctx.rebuild_target_segments_count(), 0);

        ctx.make_rebuild_target(&segs(&[2]));
        assert!(!ctx.need_rebuild_again());
    }

    fn image_of(source: &RebuildCtx) -> (ImageLayout, Vec<u8>) {
        let layout = LayoutBuilder::new(ContextOwner::RebuildCtx).append(source).build();
        let mut image = ContextImage::new(&layout);
        image.write_header(&CtxHeader::new(
            ContextOwner::RebuildCtx,
            source.versions().next_for_flush(),
        ));
        source.before_flush(&mut image);
        image.seal();
        let bytes = image.into_bytes();
        (layout, bytes)
    }

    #[test]
    fn image_restores_targets() {
        let source = ctx();
        source.make_rebuild_target(&segs(&[0, 15]));
        source.next_rebuild_target();
        let (layout, bytes) = image_of(&source);

        let target = ctx();
        let image = ContextImage::from_bytes(&layout, bytes).unwrap();
        target.after_load(&image).unwrap();
        assert!(target.is_rebuild_target_segment(SegmentId::new(15)));
        assert_eq!(target.rebuild_target_segments_count(), 2);
        assert!(!target.need_rebuild_again());
        assert_eq!(target.stored_version(), 0);
        // progress starts over after a load
        assert_eq!(target.next_rebuild_target(), Some(SegmentId::new(0)));
    }

    #[test]
    fn image_restores_need_again() {
        let source = ctx();
        source.make_rebuild_target(&segs(&[3]));
        source.stop_rebuilding();
        let (layout, bytes) = image_of(&source);

        let target = ctx();
        target
            .after_load(&ContextImage::from_bytes(&layout, bytes).unwrap())
            .unwrap();
        assert!(target.need_rebuild_again());
        assert_eq!(target.rebuild_target_segments_count(), 0);
    }

    #[test]
    fn stop_without_targets_still_needs_flush() {
        let ctx = ctx();
        assert_eq!(ctx.stop_rebuilding(), RebuildUpdate::NeedsFlush);
        assert_eq!(ctx.stop_rebuilding(), RebuildUpdate::Unchanged);
        // clearing the flag must reach the image too
        assert_eq!(ctx.make_rebuild_target(&[]), RebuildUpdate::NeedsFlush);
        assert!(!ctx.need_rebuild_again());
    }

    #[test]
    fn unknown_need_again_flag_is_corruption() {
        let source = ctx();
        let layout = LayoutBuilder::new(ContextOwner::RebuildCtx).append(&source).build();
        let mut image = ContextImage::new(&layout);
        image.write_header(&CtxHeader::new(ContextOwner::RebuildCtx, 0));
        encode_u32s(image.section_mut(RC_REBUILD_STATE), [7]);
        image.seal();

        let image = ContextImage::from_bytes(&layout, image.into_bytes()).unwrap();
        assert!(matches!(
            ctx().after_load(&image),
            Err(CoreError::ContextCorrupted { .. })
        ));
    }
}
