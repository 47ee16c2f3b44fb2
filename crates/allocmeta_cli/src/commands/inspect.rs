//! Inspect command implementation.

use super::{read_context_file, CliError};
use allocmeta_core::{
    AllocatorConfig, ContextImage, ContextOwner, CoreError, SectionLayoutTable, SegmentBitmap,
    SegmentState, StripeId, AC_ALLOCATE_WBLSID_BITMAP, AC_CURRENT_SSD_LSID,
    AC_SEGMENT_ALLOC_BITMAP, AC_SEGMENT_STATES, RC_REBUILD_STATE, RC_TARGET_SEGMENTS,
};
use serde::Serialize;
use std::path::Path;

/// Context directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Context directory path.
    pub path: String,
    /// One report per context file.
    pub files: Vec<FileReport>,
    /// Allocation state decoded from the allocator and rebuild images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AllocationSummary>,
}

/// Header and layout of one context file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// File name inside the directory.
    pub file: &'static str,
    /// Bytes on disk; zero if absent.
    pub size: u64,
    /// Size implied by the geometry.
    pub expected_size: usize,
    /// Version stamped in the header, if the header could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Whether size, signature and checksum all check out.
    pub valid: bool,
    /// Section table (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionReport>>,
}

/// Position of one section.
#[derive(Debug, Serialize)]
pub struct SectionReport {
    /// Section index; 0 is the header.
    pub index: usize,
    /// Byte offset in the file.
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
}

/// Segment accounting decoded from the images.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct AllocationSummary {
    /// Segments in the free pool.
    pub free_segments: usize,
    /// Segments marked SSD.
    pub ssd_segments: usize,
    /// Segments selected for GC.
    pub victim_segments: usize,
    /// First stripe of the current SSD write segment.
    pub ssd_lsid: Option<u32>,
    /// Write-buffer stripes in use.
    pub wb_stripes_in_use: usize,
    /// Segments waiting to be rebuilt.
    pub rebuild_targets: Option<usize>,
    /// Whether a stopped rebuild has to be run again.
    pub rebuild_needed: Option<bool>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    config: &AllocatorConfig,
    show_sections: bool,
    format: &str,
) -> Result<(), CliError> {
    config.validate()?;
    let layouts = SectionLayoutTable::for_config(config);
    let result = inspect(path, config, &layouts, show_sections)?;

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(
    path: &Path,
    config: &AllocatorConfig,
    layouts: &SectionLayoutTable,
    show_sections: bool,
) -> Result<InspectResult, CliError> {
    let mut files = Vec::new();
    let mut allocator_image = None;
    let mut rebuild_image = None;
    let mut found = false;

    for owner in ContextOwner::ALL {
        let layout = layouts.image(owner);
        let bytes = read_context_file(path, owner)?;
        found |= bytes.is_some();
        let size = bytes.as_ref().map_or(0, |b| b.len() as u64);

        let image = bytes.and_then(|b| ContextImage::from_bytes(layout, b).ok());
        let report = FileReport {
            file: owner.file_name(),
            size,
            expected_size: layout.file_size(),
            version: image.as_ref().map(|i| i.header().version),
            valid: image.is_some(),
            sections: show_sections.then(|| {
                layout
                    .sections()
                    .iter()
                    .enumerate()
                    .map(|(index, s)| SectionReport {
                        index,
                        offset: s.offset,
                        size: s.size,
                    })
                    .collect()
            }),
        };
        files.push(report);

        match owner {
            ContextOwner::AllocatorCtx => allocator_image = image,
            ContextOwner::RebuildCtx => rebuild_image = image,
            ContextOwner::SegmentCtx => {}
        }
    }

    if !found {
        return Err(CliError::NoContexts(path.to_path_buf()));
    }

    let summary = allocator_image
        .as_ref()
        .map(|image| summarize(config, image, rebuild_image.as_ref()))
        .transpose()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        files,
        summary,
    })
}

/// Decodes the segment states section of a verified allocator image.
pub(crate) fn decode_states(image: &ContextImage<'_>) -> Result<Vec<SegmentState>, CoreError> {
    image
        .section(AC_SEGMENT_STATES)
        .iter()
        .enumerate()
        .map(|(index, &byte)| {
            SegmentState::from_byte(byte).ok_or_else(|| {
                CoreError::context_corrupted(
                    ContextOwner::AllocatorCtx,
                    format!("segment {index} has state byte {byte}"),
                )
            })
        })
        .collect()
}

fn decode_bitmap(
    image: &ContextImage<'_>,
    section: usize,
    len: u32,
) -> Result<SegmentBitmap, CoreError> {
    SegmentBitmap::decode(image.section(section), len as usize).ok_or_else(|| {
        CoreError::context_corrupted(image.owner(), format!("malformed bitmap in section {section}"))
    })
}

fn summarize(
    config: &AllocatorConfig,
    allocator: &ContextImage<'_>,
    rebuild: Option<&ContextImage<'_>>,
) -> Result<AllocationSummary, CoreError> {
    let states = decode_states(allocator)?;
    let allocated = decode_bitmap(allocator, AC_SEGMENT_ALLOC_BITMAP, config.num_user_area_segments)?;
    let wb = decode_bitmap(allocator, AC_ALLOCATE_WBLSID_BITMAP, config.num_wb_stripes)?;

    let lsid_bytes = allocator.section(AC_CURRENT_SSD_LSID);
    let lsid = StripeId::new(u32::from_le_bytes([
        lsid_bytes[0],
        lsid_bytes[1],
        lsid_bytes[2],
        lsid_bytes[3],
    ]));

    let rebuild_targets = rebuild
        .map(|image| decode_bitmap(image, RC_TARGET_SEGMENTS, config.num_user_area_segments))
        .transpose()?
        .map(|targets| targets.count_ones());
    let rebuild_needed = rebuild.map(|image| image.section(RC_REBUILD_STATE)[0] != 0);

    Ok(AllocationSummary {
        free_segments: allocated.len() - allocated.count_ones(),
        ssd_segments: states.iter().filter(|s| **s == SegmentState::Ssd).count(),
        victim_segments: states.iter().filter(|s| **s == SegmentState::Victim).count(),
        ssd_lsid: (lsid != StripeId::UNMAPPED).then(|| lsid.as_u32()),
        wb_stripes_in_use: wb.count_ones(),
        rebuild_targets,
        rebuild_needed,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Allocator Context Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Files:");
    for file in &result.files {
        let status = match (file.size, file.valid) {
            (0, _) => "absent".to_string(),
            (_, true) => format!("v{}", file.version.unwrap_or_default()),
            (_, false) => "CORRUPTED".to_string(),
        };
        println!(
            "  {:<18} {:>10} / {:>10} bytes  {}",
            file.file, file.size, file.expected_size, status
        );
        if let Some(sections) = &file.sections {
            for section in sections {
                println!(
                    "    [{}] offset {:>10}  size {:>10}",
                    section.index, section.offset, section.size
                );
            }
        }
    }

    if let Some(summary) = &result.summary {
        println!();
        println!("Segments:");
        println!("  Free:    {}", summary.free_segments);
        println!("  SSD:     {}", summary.ssd_segments);
        println!("  Victim:  {}", summary.victim_segments);
        match summary.ssd_lsid {
            Some(lsid) => println!("  SSD LSID: {lsid}"),
            None => println!("  SSD LSID: unmapped"),
        }
        println!();
        println!("Write buffer stripes in use: {}", summary.wb_stripes_in_use);
        if let Some(targets) = summary.rebuild_targets {
            println!("Rebuild targets:             {targets}");
        }
        if summary.rebuild_needed == Some(true) {
            println!("Rebuild stopped, must run again");
        }
    }
}
