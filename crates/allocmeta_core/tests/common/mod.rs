//! Helpers shared by the integration tests.

#![allow(dead_code)]

use allocmeta_core::{
    AllocatorConfig, AllocatorStats, ContextBackends, ContextManager, SegmentId, StripeId,
    WorkerScheduler,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 16 segments of 4 stripes, 8 blocks per stripe.
pub fn small_config() -> AllocatorConfig {
    AllocatorConfig::new()
        .num_user_area_segments(16)
        .stripes_per_segment(4)
        .blks_per_stripe(8)
        .num_wb_stripes(8)
        .max_volumes(4)
        .gc_thresholds(6, 2)
}

pub fn open_with(config: AllocatorConfig, backends: ContextBackends) -> (ContextManager, Arc<AllocatorStats>) {
    let stats = Arc::new(AllocatorStats::new());
    let manager = ContextManager::open(
        config,
        backends,
        Arc::new(WorkerScheduler::new().unwrap()),
        stats.clone(),
    )
    .unwrap();
    (manager, stats)
}

pub fn open_in_memory() -> (ContextManager, Arc<AllocatorStats>) {
    open_with(small_config(), ContextBackends::in_memory())
}

/// Writes `stripes` stripes of `segment`, starting at its first stripe.
pub fn write_stripes(manager: &ContextManager, segment: SegmentId, stripes: u32) {
    let per_segment = manager.config().stripes_per_segment;
    let first = StripeId::first_of(segment, per_segment).as_u32();
    for i in 0..stripes {
        manager.update_occupied_stripe_count(StripeId::new(first + i));
    }
}

/// Takes `segment` out of the pool and fills it with `valid` valid blocks.
pub fn make_ssd(manager: &ContextManager, segment: SegmentId, valid: u32) {
    assert_eq!(
        manager.allocator_ctx().allocate_free_segment(Some(segment)),
        Some(segment)
    );
    manager.validate_blocks(segment, valid);
    write_stripes(manager, segment, manager.config().stripes_per_segment);
}

/// Polls `condition` until it holds or five seconds pass.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
