//! Core type definitions for the allocator.

use std::fmt;

/// Identifier of a user-area segment.
///
/// Valid ids are `0..num_user_area_segments`. APIs return
/// `Option<SegmentId>`; [`SegmentId::UNMAPPED`] only appears in on-disk
/// encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// On-disk marker for "no segment".
    pub const UNMAPPED: Self = Self(u32::MAX);

    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the id as an index into per-segment tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the next segment id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if this is the on-disk "no segment" marker.
    #[must_use]
    pub const fn is_unmapped(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// Logical stripe identifier (LSID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StripeId(pub u32);

impl StripeId {
    /// On-disk marker for "no stripe".
    pub const UNMAPPED: Self = Self(u32::MAX);

    /// Creates a new stripe ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the segment containing this stripe.
    #[must_use]
    pub const fn segment(self, stripes_per_segment: u32) -> SegmentId {
        SegmentId(self.0 / stripes_per_segment)
    }

    /// Returns the first stripe of `segment`.
    #[must_use]
    pub const fn first_of(segment: SegmentId, stripes_per_segment: u32) -> Self {
        Self(segment.0 * stripes_per_segment)
    }
}

impl fmt::Display for StripeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsid:{}", self.0)
    }
}

/// Lifecycle state of a segment.
///
/// Rebuild-target membership is tracked separately by the rebuild context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SegmentState {
    /// In the free pool.
    #[default]
    Free = 0,
    /// Allocated and holding user data.
    Ssd = 1,
    /// Selected for garbage collection.
    Victim = 2,
}

impl SegmentState {
    /// Converts a byte to a segment state.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Free),
            1 => Some(Self::Ssd),
            2 => Some(Self::Victim),
            _ => None,
        }
    }

    /// Converts the state to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "FREE",
            Self::Ssd => "SSD",
            Self::Victim => "VICTIM",
        };
        f.write_str(name)
    }
}

/// Garbage collection urgency derived from the free segment count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum GcMode {
    /// Enough free segments; no GC needed.
    #[default]
    NoGc = 0,
    /// Free segments are getting scarce.
    NormalGc = 1,
    /// Free segments are nearly exhausted.
    UrgentGc = 2,
}

impl GcMode {
    /// Converts the mode to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The persisted context files, one image each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextOwner {
    /// Valid-block and occupied-stripe counts.
    SegmentCtx,
    /// Segment states, free pool and the embedded write-back stripe sections.
    AllocatorCtx,
    /// Rebuild target set.
    RebuildCtx,
}

impl ContextOwner {
    /// Every owner in load order.
    pub const ALL: [Self; 3] = [Self::SegmentCtx, Self::AllocatorCtx, Self::RebuildCtx];

    /// Owners that take part in an asynchronous flush session.
    pub const TRACKED: [Self; 2] = [Self::SegmentCtx, Self::AllocatorCtx];

    /// Header signature identifying the owner's image.
    #[must_use]
    pub const fn signature(self) -> u32 {
        match self {
            Self::SegmentCtx => 0xAFAF_AFAF,
            Self::AllocatorCtx => 0xBFBF_BFBF,
            Self::RebuildCtx => 0xCFCF_CFCF,
        }
    }

    /// Looks up the owner stamped into a header.
    #[must_use]
    pub fn from_signature(signature: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|owner| owner.signature() == signature)
    }

    /// File name of the owner's image inside a context directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::SegmentCtx => "SegmentContext",
            Self::AllocatorCtx => "AllocatorContexts",
            Self::RebuildCtx => "RebuildContext",
        }
    }

    /// Position of the owner in per-owner tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::SegmentCtx => 0,
            Self::AllocatorCtx => 1,
            Self::RebuildCtx => 2,
        }
    }
}

impl fmt::Display for ContextOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SegmentCtx => "SegmentCtx",
            Self::AllocatorCtx => "AllocatorCtx",
            Self::RebuildCtx => "RebuildCtx",
        };
        f.write_str(name)
    }
}
