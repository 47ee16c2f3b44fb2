//! Garbage collection urgency policy.

use crate::config::AllocatorConfig;
use crate::types::GcMode;

/// Maps the free segment count to a [`GcMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcPolicy {
    normal: u32,
    urgent: u32,
}

impl GcPolicy {
    /// Creates a policy from explicit thresholds.
    ///
    /// `urgent` is expected to be at most `normal`.
    #[must_use]
    pub const fn new(normal: u32, urgent: u32) -> Self {
        Self { normal, urgent }
    }

    /// Creates a policy from the configured thresholds.
    #[must_use]
    pub const fn from_config(config: &AllocatorConfig) -> Self {
        Self::new(config.normal_gc_threshold, config.urgent_gc_threshold)
    }

    /// GC mode for `free_segments` free segments.
    #[must_use]
    pub const fn mode_for(&self, free_segments: u32) -> GcMode {
        if free_segments <= self.urgent {
            GcMode::UrgentGc
        } else if free_segments <= self.normal {
            GcMode::NormalGc
        } else {
            GcMode::NoGc
        }
    }

    /// Free segment threshold at which `mode` starts.
    ///
    /// [`GcMode::NoGc`] has no threshold.
    #[must_use]
    pub const fn threshold(&self, mode: GcMode) -> Option<u32> {
        match mode {
            GcMode::NoGc => None,
            GcMode::NormalGc => Some(self.normal),
            GcMode::UrgentGc => Some(self.urgent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_follow_thresholds() {
        let policy = GcPolicy::new(20, 5);
        assert_eq!(policy.mode_for(100), GcMode::NoGc);
        assert_eq!(policy.mode_for(21), GcMode::NoGc);
        assert_eq!(policy.mode_for(20), GcMode::NormalGc);
        assert_eq!(policy.mode_for(6), GcMode::NormalGc);
        assert_eq!(policy.mode_for(5), GcMode::UrgentGc);
        assert_eq!(policy.mode_for(0), GcMode::UrgentGc);
    }

    #[test]
    fn no_gc_has_no_threshold() {
        let policy = GcPolicy::from_config(&AllocatorConfig::new().gc_thresholds(30, 3));
        assert_eq!(policy.threshold(GcMode::NoGc), None);
        assert_eq!(policy.threshold(GcMode::NormalGc), Some(30));
        assert_eq!(policy.threshold(GcMode::UrgentGc), Some(3));
    }
}
