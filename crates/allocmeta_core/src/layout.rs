//! Section layout of the context images.
//!
//! ```text
//! SegmentContext    | header | valid block counts | occupied stripe counts |
//! AllocatorContexts | header | ssd lsid | alloc bitmap | states | wb bitmap | stripe tails |
//! RebuildContext    | header | target segments |
//! ```
//!
//! Offsets are computed once at startup from the sizes each collaborator
//! reports; section 0 of every image is the header.

use crate::allocator_ctx::AllocatorCtx;
use crate::config::AllocatorConfig;
use crate::context::ContextSections;
use crate::error::{CoreError, CoreResult};
use crate::rebuild_ctx::RebuildCtx;
use crate::segment_ctx::SegmentCtx;
use crate::types::ContextOwner;
use crate::wb_stripe_ctx::WbStripeCtx;
use std::ops::Range;

/// Position of one section inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo {
    /// Byte offset from the start of the image.
    pub offset: usize,
    /// Section size in bytes.
    pub size: usize,
}

impl SectionInfo {
    /// Byte range covered by the section.
    #[must_use]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// Ordered, contiguous sections of one owner's image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    owner: ContextOwner,
    sections: Vec<SectionInfo>,
}

impl ImageLayout {
    /// Owner of the image.
    #[must_use]
    pub fn owner(&self) -> ContextOwner {
        self.owner
    }

    /// Number of sections, header included.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Looks up a section.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSection`] if `section` is out of range.
    pub fn section(&self, section: usize) -> CoreResult<SectionInfo> {
        self.sections
            .get(section)
            .copied()
            .ok_or(CoreError::InvalidSection {
                owner: self.owner,
                section,
            })
    }

    /// All sections in image order.
    #[must_use]
    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    /// Total image size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.sections.last().map_or(0, |s| s.offset + s.size)
    }
}

/// Appends sections to one image, keeping offsets contiguous.
#[derive(Debug)]
pub struct LayoutBuilder {
    layout: ImageLayout,
    offset: usize,
}

impl LayoutBuilder {
    /// Starts an empty layout for `owner`.
    #[must_use]
    pub fn new(owner: ContextOwner) -> Self {
        Self {
            layout: ImageLayout {
                owner,
                sections: Vec::new(),
            },
            offset: 0,
        }
    }

    /// Appends every section `source` contributes.
    ///
    /// # Panics
    ///
    /// Panics if `source` does not continue the section numbering where the
    /// previous source stopped.
    #[must_use]
    pub fn append(mut self, source: &dyn ContextSections) -> Self {
        let sections = source.sections();
        assert_eq!(
            sections.start,
            self.layout.sections.len(),
            "{} sections must be appended in order",
            self.layout.owner
        );
        for section in sections {
            let size = source.section_size(section);
            self.layout.sections.push(SectionInfo {
                offset: self.offset,
                size,
            });
            self.offset += size;
        }
        self
    }

    /// Finishes the layout.
    #[must_use]
    pub fn build(self) -> ImageLayout {
        self.layout
    }
}

/// Layouts of every owner image.
#[derive(Debug, Clone)]
pub struct SectionLayoutTable {
    images: [ImageLayout; 3],
}

impl SectionLayoutTable {
    /// Creates a table from per-owner layouts.
    ///
    /// # Panics
    ///
    /// Panics if the layouts are not given in [`ContextOwner::ALL`] order.
    #[must_use]
    pub fn new(images: [ImageLayout; 3]) -> Self {
        for (layout, owner) in images.iter().zip(ContextOwner::ALL) {
            assert_eq!(layout.owner, owner);
        }
        Self { images }
    }

    /// Layouts implied by `config`, without touching any file.
    #[must_use]
    pub fn for_config(config: &AllocatorConfig) -> Self {
        let segment = SegmentCtx::new(config);
        let allocator = AllocatorCtx::new(config);
        let wb_stripe = WbStripeCtx::new(config);
        let rebuild = RebuildCtx::new(config);
        Self::new([
            LayoutBuilder::new(ContextOwner::SegmentCtx).append(&segment).build(),
            LayoutBuilder::new(ContextOwner::AllocatorCtx)
                .append(&allocator)
                .append(&wb_stripe)
                .build(),
            LayoutBuilder::new(ContextOwner::RebuildCtx).append(&rebuild).build(),
        ])
    }

    /// Layout of `owner`'s image.
    #[must_use]
    pub fn image(&self, owner: ContextOwner) -> &ImageLayout {
        &self.images[owner.index()]
    }

    /// Total size of `owner`'s file.
    #[must_use]
    pub fn file_size(&self, owner: ContextOwner) -> usize {
        self.image(owner).file_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextImage;

    struct Fixed {
        first: usize,
        sizes: Vec<usize>,
    }

    impl ContextSections for Fixed {
        fn sections(&self) -> Range<usize> {
            self.first..self.first + self.sizes.len()
        }

        fn section_size(&self, section: usize) -> usize {
            self.sizes[section - self.first]
        }

        fn before_flush(&self, _image: &mut ContextImage<'_>) {}

        fn after_load(&self, _image: &ContextImage<'_>) -> CoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn offsets_are_contiguous_across_sources() {
        let head = Fixed {
            first: 0,
            sizes: vec![16, 4, 8],
        };
        let tail = Fixed {
            first: 3,
            sizes: vec![10, 2],
        };
        let layout = LayoutBuilder::new(ContextOwner::AllocatorCtx)
            .append(&head)
            .append(&tail)
            .build();

        let offsets: Vec<_> = layout.sections().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 16, 20, 28, 38]);
        assert_eq!(layout.file_size(), 40);
        assert_eq!(layout.section(3).unwrap().range(), 28..38);
    }

    #[test]
    fn unknown_section_is_an_error() {
        let layout = LayoutBuilder::new(ContextOwner::RebuildCtx).build();
        assert!(matches!(
            layout.section(1),
            Err(CoreError::InvalidSection { section: 1, .. })
        ));
        assert_eq!(layout.file_size(), 0);
    }

    #[test]
    #[should_panic(expected = "appended in order")]
    fn out_of_order_source_panics() {
        let tail = Fixed {
            first: 3,
            sizes: vec![1],
        };
        let _ = LayoutBuilder::new(ContextOwner::AllocatorCtx).append(&tail);
    }

    #[test]
    fn config_layout_matches_geometry() {
        let config = AllocatorConfig::new()
            .num_user_area_segments(100)
            .num_wb_stripes(70)
            .max_volumes(3);
        let table = SectionLayoutTable::for_config(&config);

        let segment = table.image(ContextOwner::SegmentCtx);
        assert_eq!(segment.section_count(), 3);
        assert_eq!(segment.section(1).unwrap().size, 400);

        let allocator = table.image(ContextOwner::AllocatorCtx);
        assert_eq!(allocator.section_count(), 6);
        // one state byte per segment
        assert_eq!(allocator.section(3).unwrap().size, 100);
        assert_eq!(allocator.section(5).unwrap().size, 3 * 8);

        let rebuild = table.image(ContextOwner::RebuildCtx);
        assert_eq!(rebuild.section_count(), 3);
        assert_eq!(rebuild.section(2).unwrap().size, 4);
    }
}
