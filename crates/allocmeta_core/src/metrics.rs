//! Allocator gauges and the metrics sink they are published to.
//!
//! # Usage
//!
//! ```rust,ignore
//! use allocmeta_core::{AllocatorStats, ContextManager};
//! use std::sync::Arc;
//!
//! let stats = Arc::new(AllocatorStats::new());
//! let manager = ContextManager::open(config, backends, scheduler, stats.clone())?;
//!
//! manager.allocate_free_segment();
//! println!("free segments: {}", stats.snapshot().free_segment_count);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gauges published by the context manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    /// Segments left in the free pool.
    FreeSegmentCount,
    /// Segment most recently selected as GC victim.
    GcVictimSegment,
    /// Current GC mode, as [`crate::GcMode::as_byte`].
    GcMode,
    /// Context writes outstanding in the running flush session.
    PendingIoCount,
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FreeSegmentCount => "free_segment_count",
            Self::GcVictimSegment => "gc_victim_segment",
            Self::GcMode => "gc_mode",
            Self::PendingIoCount => "pending_io_count",
        };
        f.write_str(name)
    }
}

/// Destination of gauge updates.
///
/// Publishing is fire-and-forget and must not block.
pub trait MetricsSink: Send + Sync {
    /// Records the latest value of `key`.
    fn publish(&self, key: MetricKey, value: u64);
}

/// Sink that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn publish(&self, _key: MetricKey, _value: u64) {}
}

/// In-process gauge recorder.
///
/// All gauges are atomic and can be read while the manager is running.
#[derive(Debug, Default)]
pub struct AllocatorStats {
    free_segment_count: AtomicU64,
    gc_victim_segment: AtomicU64,
    gc_mode: AtomicU64,
    pending_io_count: AtomicU64,
    // Total number of updates received.
    publishes: AtomicU64,
}

impl AllocatorStats {
    /// Creates a recorder with every gauge at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn gauge(&self, key: MetricKey) -> &AtomicU64 {
        match key {
            MetricKey::FreeSegmentCount => &self.free_segment_count,
            MetricKey::GcVictimSegment => &self.gc_victim_segment,
            MetricKey::GcMode => &self.gc_mode,
            MetricKey::PendingIoCount => &self.pending_io_count,
        }
    }

    /// Latest value of `key`.
    pub fn get(&self, key: MetricKey) -> u64 {
        self.gauge(key).load(Ordering::Relaxed)
    }

    /// Total number of updates received.
    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all gauges.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            free_segment_count: self.get(MetricKey::FreeSegmentCount),
            gc_victim_segment: self.get(MetricKey::GcVictimSegment),
            gc_mode: self.get(MetricKey::GcMode),
            pending_io_count: self.get(MetricKey::PendingIoCount),
            publishes: self.publishes(),
        }
    }
}

impl MetricsSink for AllocatorStats {
    fn publish(&self, key: MetricKey, value: u64) {
        self.gauge(key).store(value, Ordering::Relaxed);
        self.publishes.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of allocator gauges.
///
/// Unlike `AllocatorStats`, this is a plain struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Segments left in the free pool.
    pub free_segment_count: u64,
    /// Segment most recently selected as GC victim.
    pub gc_victim_segment: u64,
    /// Current GC mode.
    pub gc_mode: u64,
    /// Context writes outstanding.
    pub pending_io_count: u64,
    /// Total number of updates received.
    pub publishes: u64,
}
