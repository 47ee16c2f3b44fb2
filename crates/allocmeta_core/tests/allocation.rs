//! Integration tests for segment allocation, GC victim selection and
//! rebuild coordination.

mod common;

use allocmeta_core::{
    AllocatorConfig, ContextBackends, ContextOwner, GcMode, MetricKey, SegmentId, SegmentState,
    StripeId,
};
use common::{make_ssd, open_in_memory, open_with, small_config, wait_for, write_stripes};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

fn seg(id: u32) -> SegmentId {
    SegmentId::new(id)
}

#[test]
fn fresh_start_allocates_segment_zero() {
    let (manager, stats) = open_in_memory();
    assert_eq!(manager.allocate_free_segment(), Some(seg(0)));
    assert_eq!(manager.allocate_free_segment(), Some(seg(1)));
    assert_eq!(stats.get(MetricKey::FreeSegmentCount), 14);
    assert_eq!(manager.free_segment_count_locked(), 14);
}

#[test]
fn allocation_exhausts_to_none() {
    let (manager, _) = open_in_memory();
    for expected in 0..16 {
        assert_eq!(manager.allocate_free_segment(), Some(seg(expected)));
    }
    assert_eq!(manager.allocate_free_segment(), None);
    assert_eq!(manager.free_segment_count(), 0);
    assert_eq!(manager.current_gc_mode(), GcMode::UrgentGc);
}

#[test]
fn victim_is_lowest_id_among_fewest_valid_blocks() {
    let (manager, stats) = open_in_memory();
    make_ssd(&manager, seg(2), 5);
    make_ssd(&manager, seg(5), 3);
    make_ssd(&manager, seg(7), 3);
    // segment 9 stays free with no valid blocks

    assert_eq!(manager.allocate_gc_victim_segment(), Some(seg(5)));
    assert_eq!(manager.allocator_ctx().segment_state(seg(5)), SegmentState::Victim);
    assert_eq!(stats.get(MetricKey::GcVictimSegment), 5);

    // victims are no longer eligible
    assert_eq!(manager.allocate_gc_victim_segment(), Some(seg(7)));
    assert_eq!(manager.allocate_gc_victim_segment(), Some(seg(2)));
    assert_eq!(manager.allocate_gc_victim_segment(), None);
}

#[test]
fn no_victim_without_ssd_segments() {
    let (manager, _) = open_in_memory();
    manager.validate_blocks(seg(4), 3);
    assert_eq!(manager.allocate_gc_victim_segment(), None);
}

#[test]
fn victim_can_be_freed_after_gc() {
    let (manager, _) = open_in_memory();
    make_ssd(&manager, seg(1), 2);
    assert_eq!(manager.allocate_gc_victim_segment(), Some(seg(1)));

    assert!(manager.invalidate_blocks(seg(1), 2));
    assert_eq!(manager.allocator_ctx().segment_state(seg(1)), SegmentState::Free);
    assert_eq!(manager.free_segment_count(), 16);
}

#[test]
fn last_stripe_of_empty_segment_frees_it() {
    let (manager, stats) = open_in_memory();
    for expected in 0..4 {
        assert_eq!(manager.allocate_free_segment(), Some(seg(expected)));
    }
    write_stripes(&manager, seg(3), 3);
    assert_eq!(stats.get(MetricKey::FreeSegmentCount), 12);
    assert!(manager.allocator_ctx().is_allocated(seg(3)));

    // any stripe inside segment 3 counts
    manager.update_occupied_stripe_count(StripeId::new(3 * 4 + 2));

    assert_eq!(stats.get(MetricKey::FreeSegmentCount), 13);
    assert_eq!(manager.allocator_ctx().segment_state(seg(3)), SegmentState::Free);
    assert!(!manager.allocator_ctx().is_allocated(seg(3)));
    assert_eq!(manager.segment_ctx().occupied_stripe_count(seg(3)), 0);
}

#[test]
fn last_stripe_with_valid_blocks_marks_ssd() {
    let (manager, _) = open_in_memory();
    let segment = manager.allocate_free_segment().unwrap();
    manager.validate_blocks(segment, 1);
    write_stripes(&manager, segment, 4);
    assert_eq!(manager.allocator_ctx().segment_state(segment), SegmentState::Ssd);
    assert_eq!(manager.free_segment_count(), 15);
}

#[test]
#[should_panic(expected = "occupied stripes")]
fn freeing_partially_written_segment_panics() {
    let (manager, _) = open_in_memory();
    make_ssd(&manager, seg(0), 1);
    manager.segment_ctx().set_occupied_stripe_count(seg(0), 2);
    manager.free_user_data_segment(seg(0));
}

#[test]
fn allocation_skips_rebuild_targets() {
    let (manager, _) = open_in_memory();
    manager
        .rebuild_ctx()
        .make_rebuild_target(&[seg(0), seg(1), seg(3)]);

    assert_eq!(manager.allocate_free_segment(), Some(seg(2)));
    assert_eq!(manager.allocate_free_segment(), Some(seg(4)));
    assert!(!manager.allocator_ctx().is_allocated(seg(3)));
    assert_eq!(manager.free_segment_count(), 14);
}

#[test]
fn allocation_fails_when_only_rebuild_targets_are_free() {
    let config = small_config().num_user_area_segments(4).gc_thresholds(2, 1);
    let (manager, _) = open_with(config, ContextBackends::in_memory());
    manager.allocate_free_segment().unwrap();
    manager
        .rebuild_ctx()
        .make_rebuild_target(&[seg(1), seg(2), seg(3)]);

    assert_eq!(manager.allocate_free_segment(), None);
    // skipped candidates went back to the pool
    assert_eq!(manager.free_segment_count(), 3);
    assert_eq!(manager.free_segment_count_locked(), 3);
}

#[test]
fn rebuild_flow_persists_out_of_band() {
    let (manager, _) = open_in_memory();
    manager.allocate_free_segment().unwrap();
    manager.allocate_free_segment().unwrap();
    let initial = manager.stored_context_version(ContextOwner::RebuildCtx);

    assert_eq!(manager.make_rebuild_target().unwrap(), 2);
    assert!(wait_for(|| {
        manager.stored_context_version(ContextOwner::RebuildCtx) > initial
    }));
    // rebuild writes never open a flush session
    assert!(!manager.is_flush_in_progress());

    assert_eq!(manager.allocate_rebuild_target_segment(), Some(seg(0)));
    manager.release_rebuild_segment(seg(0)).unwrap();
    assert_eq!(manager.allocate_rebuild_target_segment(), Some(seg(1)));
    assert_eq!(manager.allocate_rebuild_target_segment(), None);

    assert!(!manager.need_rebuild_again());
    manager.stop_rebuilding().unwrap();
    assert!(manager.need_rebuild_again());
    assert!(!manager.rebuild_ctx().is_rebuild_target_segment(seg(1)));
}

#[test]
fn freed_segment_leaves_rebuild_targets() {
    let (manager, _) = open_in_memory();
    let segment = manager.allocate_free_segment().unwrap();
    manager.validate_blocks(segment, 1);
    write_stripes(&manager, segment, 4);
    assert_eq!(manager.make_rebuild_target().unwrap(), 1);

    assert!(manager.invalidate_blocks(segment, 1));
    assert!(!manager.rebuild_ctx().is_rebuild_target_segment(segment));
}

#[test]
fn gc_mode_tracks_free_segments() {
    let (manager, stats) = open_in_memory();
    assert_eq!(manager.current_gc_mode(), GcMode::NoGc);
    for _ in 0..10 {
        manager.allocate_free_segment().unwrap();
    }
    assert_eq!(manager.current_gc_mode(), GcMode::NormalGc);
    for _ in 0..4 {
        manager.allocate_free_segment().unwrap();
    }
    assert_eq!(manager.current_gc_mode(), GcMode::UrgentGc);
    assert_eq!(stats.get(MetricKey::GcMode), u64::from(GcMode::UrgentGc.as_byte()));
}

#[test]
fn concurrent_fill_and_free_returns_every_segment() {
    let config = AllocatorConfig::new()
        .num_user_area_segments(64)
        .stripes_per_segment(8)
        .blks_per_stripe(4)
        .gc_thresholds(8, 2);
    let (manager, _) = open_with(config, ContextBackends::in_memory());
    let manager = Arc::new(manager);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..50 {
                    let Some(segment) = manager.allocate_free_segment() else {
                        continue;
                    };
                    manager.validate_blocks(segment, 2);
                    write_stripes(&manager, segment, 8);
                    manager.invalidate_blocks(segment, 1);
                    manager.invalidate_blocks(segment, 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.free_segment_count(), 64);
    assert_eq!(manager.free_segment_count_locked(), 64);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn victim_matches_linear_minimum(
        layout in prop::collection::vec((any::<bool>(), 0u32..32), 16)
    ) {
        let (manager, _) = open_in_memory();
        let mut expected: Option<(u32, u32)> = None;
        for (index, &(ssd, valid)) in layout.iter().enumerate() {
            let segment = seg(index as u32);
            if ssd && valid > 0 {
                make_ssd(&manager, segment, valid);
                if expected.map_or(true, |(_, best)| valid < best) {
                    expected = Some((index as u32, valid));
                }
            } else {
                manager.validate_blocks(segment, valid);
            }
        }

        let victim = manager.allocate_gc_victim_segment();
        prop_assert_eq!(victim, expected.map(|(id, _)| seg(id)));
    }
}
