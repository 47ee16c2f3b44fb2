//! Benchmark utilities.

use allocmeta_core::{
    AllocatorConfig, ContextBackends, ContextManager, NoopMetrics, SegmentId, StripeId,
    WorkerScheduler,
};
use std::sync::Arc;

/// Geometry used by every benchmark: `segments` segments of 64 stripes.
#[must_use]
pub fn bench_config(segments: u32) -> AllocatorConfig {
    AllocatorConfig::new()
        .num_user_area_segments(segments)
        .stripes_per_segment(64)
        .blks_per_stripe(64)
        .num_wb_stripes(1024)
        .max_volumes(16)
        .gc_thresholds(segments / 8, segments / 32)
}

/// Opens a manager over in-memory backends.
///
/// # Panics
///
/// Panics if the manager cannot be opened.
#[must_use]
pub fn open_in_memory(config: AllocatorConfig) -> ContextManager {
    ContextManager::open(
        config,
        ContextBackends::in_memory(),
        Arc::new(WorkerScheduler::new().unwrap()),
        Arc::new(NoopMetrics),
    )
    .unwrap()
}

/// Allocates every segment and fills it, leaving a varying number of
/// valid blocks so victim selection has to scan.
pub fn fill_all_segments(manager: &ContextManager) {
    let stripes = manager.config().stripes_per_segment;
    let blks = manager.config().blks_per_segment();
    while let Some(segment) = manager.allocate_free_segment() {
        manager.validate_blocks(segment, 1 + (segment.as_u32() * 7919) % (blks - 1));
        write_segment(manager, segment, stripes);
    }
}

/// Marks every stripe of `segment` written.
pub fn write_segment(manager: &ContextManager, segment: SegmentId, stripes: u32) {
    let first = StripeId::first_of(segment, stripes).as_u32();
    for stripe in first..first + stripes {
        manager.update_occupied_stripe_count(StripeId::new(stripe));
    }
}
