//! Allocator configuration.

use crate::error::{CoreError, CoreResult};

/// Address geometry and GC policy for one allocator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Number of segments in the user data area.
    pub num_user_area_segments: u32,

    /// Stripes per segment.
    pub stripes_per_segment: u32,

    /// Blocks per stripe.
    pub blks_per_stripe: u32,

    /// Number of write-buffer stripes tracked by the write-back context.
    pub num_wb_stripes: u32,

    /// Number of volumes with an active stripe tail.
    pub max_volumes: u32,

    /// Free segment count at or below which normal GC starts.
    pub normal_gc_threshold: u32,

    /// Free segment count at or below which GC becomes urgent.
    pub urgent_gc_threshold: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            num_user_area_segments: 1024,
            stripes_per_segment: 1024,
            blks_per_stripe: 128,
            num_wb_stripes: 1024,
            max_volumes: 256,
            normal_gc_threshold: 20,
            urgent_gc_threshold: 5,
        }
    }
}

impl AllocatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of user-area segments.
    #[must_use]
    pub const fn num_user_area_segments(mut self, value: u32) -> Self {
        self.num_user_area_segments = value;
        self
    }

    /// Sets the number of stripes per segment.
    #[must_use]
    pub const fn stripes_per_segment(mut self, value: u32) -> Self {
        self.stripes_per_segment = value;
        self
    }

    /// Sets the number of blocks per stripe.
    #[must_use]
    pub const fn blks_per_stripe(mut self, value: u32) -> Self {
        self.blks_per_stripe = value;
        self
    }

    /// Sets the number of write-buffer stripes.
    #[must_use]
    pub const fn num_wb_stripes(mut self, value: u32) -> Self {
        self.num_wb_stripes = value;
        self
    }

    /// Sets the number of volumes.
    #[must_use]
    pub const fn max_volumes(mut self, value: u32) -> Self {
        self.max_volumes = value;
        self
    }

    /// Sets both GC thresholds.
    #[must_use]
    pub const fn gc_thresholds(mut self, normal: u32, urgent: u32) -> Self {
        self.normal_gc_threshold = normal;
        self.urgent_gc_threshold = urgent;
        self
    }

    /// Blocks per segment.
    #[must_use]
    pub const fn blks_per_segment(&self) -> u32 {
        self.stripes_per_segment * self.blks_per_stripe
    }

    /// Checks that the geometry is usable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if any dimension is zero, the
    /// segment geometry overflows, or the urgent threshold is above the
    /// normal one.
    pub fn validate(&self) -> CoreResult<()> {
        if self.num_user_area_segments == 0 {
            return Err(CoreError::invalid_config("num_user_area_segments is zero"));
        }
        if self.num_user_area_segments == u32::MAX {
            return Err(CoreError::invalid_config(
                "num_user_area_segments collides with the unmapped marker",
            ));
        }
        if self.stripes_per_segment == 0 || self.blks_per_stripe == 0 {
            return Err(CoreError::invalid_config("segment geometry is zero"));
        }
        if self
            .stripes_per_segment
            .checked_mul(self.blks_per_stripe)
            .is_none()
            || self
                .num_user_area_segments
                .checked_mul(self.stripes_per_segment)
                .is_none()
        {
            return Err(CoreError::invalid_config("segment geometry overflows u32"));
        }
        if self.urgent_gc_threshold > self.normal_gc_threshold {
            return Err(CoreError::invalid_config(format!(
                "urgent GC threshold {} is above normal threshold {}",
                self.urgent_gc_threshold, self.normal_gc_threshold
            )));
        }
        Ok(())
    }
}
