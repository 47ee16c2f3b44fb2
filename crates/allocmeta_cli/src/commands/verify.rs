//! Verify command implementation.

use super::inspect::decode_states;
use super::{read_context_file, CliError};
use allocmeta_core::{AllocatorConfig, ContextImage, ContextOwner, CoreError, SectionLayoutTable};
use std::path::Path;

/// Verification result of one context file.
#[derive(Debug, PartialEq, Eq)]
pub enum FileStatus {
    /// Nothing stored yet.
    Absent,
    /// Size, signature, checksum and contents check out.
    Valid {
        /// Version stamped in the header.
        version: u64,
    },
    /// The file cannot be loaded.
    Corrupted(String),
}

/// Runs the verify command.
pub fn run(path: &Path, config: &AllocatorConfig) -> Result<(), CliError> {
    println!("Verifying allocator contexts at {}", path.display());
    println!();

    let results = verify(path, config)?;
    let mut failed = 0;
    for (owner, status) in &results {
        match status {
            FileStatus::Absent => {
                println!("  {:<18} absent (created on next open)", owner.file_name());
            }
            FileStatus::Valid { version } => {
                println!("  {:<18} ok, version {version}", owner.file_name());
            }
            FileStatus::Corrupted(reason) => {
                failed += 1;
                println!("  {:<18} CORRUPTED: {reason}", owner.file_name());
            }
        }
    }

    println!();
    if failed == 0 {
        println!("✓ Context verification passed");
        Ok(())
    } else {
        println!("✗ Context verification failed");
        Err(CliError::VerificationFailed(failed))
    }
}

fn verify(path: &Path, config: &AllocatorConfig) -> Result<Vec<(ContextOwner, FileStatus)>, CliError> {
    config.validate()?;
    let layouts = SectionLayoutTable::for_config(config);

    let mut results = Vec::with_capacity(ContextOwner::ALL.len());
    for owner in ContextOwner::ALL {
        let status = match read_context_file(path, owner)? {
            None => FileStatus::Absent,
            Some(bytes) => match check_image(&layouts, owner, bytes) {
                Ok(version) => FileStatus::Valid { version },
                Err(err) => FileStatus::Corrupted(err.to_string()),
            },
        };
        results.push((owner, status));
    }

    if results.iter().all(|(_, status)| *status == FileStatus::Absent) {
        return Err(CliError::NoContexts(path.to_path_buf()));
    }
    Ok(results)
}

fn check_image(
    layouts: &SectionLayoutTable,
    owner: ContextOwner,
    bytes: Vec<u8>,
) -> Result<u64, CoreError> {
    let image = ContextImage::from_bytes(layouts.image(owner), bytes)?;
    if owner == ContextOwner::AllocatorCtx {
        decode_states(&image)?;
    }
    Ok(image.header().version)
}
