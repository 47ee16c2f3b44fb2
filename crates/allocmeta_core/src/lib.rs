//! # allocmeta core
//!
//! Allocation metadata manager of a log-structured block store.
//!
//! This crate provides:
//! - Segment lifecycle tracking (free, SSD, GC victim) and the free pool
//! - GC victim selection and GC urgency policy
//! - Rebuild target bookkeeping
//! - Section-based context images with versioned, checksummed headers
//! - Synchronous and asynchronous flushes with per-session completion
//!
//! ## Context Files
//!
//! | File | Owner | Contents |
//! |------|-------|----------|
//! | `SegmentContext` | [`SegmentCtx`] | valid block and occupied stripe counts |
//! | `AllocatorContexts` | [`AllocatorCtx`], [`WbStripeCtx`] | SSD LSID, free pool, segment states, write-buffer stripes |
//! | `RebuildContext` | [`RebuildCtx`] | rebuild target set, need-again flag |
//!
//! ## Example
//!
//! ```rust
//! use allocmeta_core::{AllocatorConfig, ContextBackends, ContextManager, NoopMetrics, WorkerScheduler};
//! use std::sync::Arc;
//!
//! let config = AllocatorConfig::new().num_user_area_segments(64).stripes_per_segment(8);
//! let manager = ContextManager::open(
//!     config,
//!     ContextBackends::in_memory(),
//!     Arc::new(WorkerScheduler::new().unwrap()),
//!     Arc::new(NoopMetrics),
//! )
//! .unwrap();
//!
//! assert_eq!(manager.allocate_free_segment().map(|s| s.as_u32()), Some(0));
//! manager.flush_contexts_sync().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod allocator_ctx;
mod bitmap;
mod config;
mod context;
mod dir;
mod error;
mod gc;
mod header;
mod io;
mod layout;
mod manager;
mod metrics;
mod rebuild_ctx;
mod scheduler;
mod segment_ctx;
mod session;
mod types;
mod wb_stripe_ctx;

pub use allocator_ctx::{
    AllocatorCtx, SsdCursor, AC_CURRENT_SSD_LSID, AC_SEGMENT_ALLOC_BITMAP, AC_SEGMENT_STATES,
    NUM_ALLOCATION_INFO,
};
pub use bitmap::SegmentBitmap;
pub use config::AllocatorConfig;
pub use context::{ContextFile, ContextImage, ContextSections, HEADER_SECTION};
pub use dir::ContextDir;
pub use error::{CoreError, CoreResult};
pub use gc::GcPolicy;
pub use header::{CtxHeader, CtxVersion, HEADER_SIZE};
pub use io::{CompletionHandler, ContextBackends, FileIoManager, IoCompletion, LoadOutcome};
pub use layout::{ImageLayout, LayoutBuilder, SectionInfo, SectionLayoutTable};
pub use manager::ContextManager;
pub use metrics::{AllocatorStats, MetricKey, MetricsSink, NoopMetrics, StatsSnapshot};
pub use rebuild_ctx::{
    RebuildCtx, RebuildUpdate, NUM_REBUILD_CTX_SECTIONS, RC_REBUILD_STATE, RC_TARGET_SEGMENTS,
};
pub use scheduler::{Event, EventScheduler, WorkerScheduler};
pub use segment_ctx::{
    SegmentCtx, NUM_SEGMENT_CTX_SECTIONS, SC_OCCUPIED_STRIPE_COUNT, SC_VALID_BLOCK_COUNT,
};
pub use session::{FlushCallback, FlushOutcome, FlushSession, SessionEnd};
pub use types::{ContextOwner, GcMode, SegmentId, SegmentState, StripeId};
pub use wb_stripe_ctx::{
    StripeTail, WbStripeCtx, AC_ACTIVE_STRIPE_TAIL, AC_ALLOCATE_WBLSID_BITMAP,
    NUM_ALLOCATOR_CTX_SECTIONS,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
