//! Init command implementation.

use super::CliError;
use allocmeta_core::{AllocatorConfig, ContextManager, ContextOwner};
use std::path::Path;

/// Runs the init command.
///
/// Opening a directory writes every missing context file from the default
/// state; existing files are loaded and left as they are.
pub fn run(path: &Path, config: AllocatorConfig) -> Result<(), CliError> {
    let manager = ContextManager::open_dir(path, config)?;

    println!("Initialized allocator contexts at {}", path.display());
    for owner in ContextOwner::ALL {
        println!(
            "  {:<18} {:>10} bytes  version {}",
            owner.file_name(),
            manager.section_layout().file_size(owner),
            manager.stored_context_version(owner)
        );
    }
    println!("  free segments: {}", manager.free_segment_count());

    manager.close();
    Ok(())
}
