//! allocmeta CLI
//!
//! Command-line tools for allocator context directories.
//!
//! # Commands
//!
//! - `inspect` - Display context file headers, sections and allocation summary
//! - `verify` - Verify context file sizes, signatures and checksums
//! - `init` - Create the context files of a fresh allocator

mod commands;

use allocmeta_core::AllocatorConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// allocmeta command-line context tools.
#[derive(Parser)]
#[command(name = "allocmeta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the context directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(flatten)]
    geometry: Geometry,

    #[command(subcommand)]
    command: Commands,
}

/// Address geometry the context files were written with.
///
/// Unset values fall back to the allocator defaults.
#[derive(Args, Debug, Default)]
struct Geometry {
    /// Number of user-area segments
    #[arg(global = true, long)]
    segments: Option<u32>,

    /// Stripes per segment
    #[arg(global = true, long)]
    stripes_per_segment: Option<u32>,

    /// Blocks per stripe
    #[arg(global = true, long)]
    blks_per_stripe: Option<u32>,

    /// Number of write-buffer stripes
    #[arg(global = true, long)]
    wb_stripes: Option<u32>,

    /// Number of volumes
    #[arg(global = true, long)]
    volumes: Option<u32>,
}

impl Geometry {
    fn to_config(&self) -> AllocatorConfig {
        let mut config = AllocatorConfig::default();
        if let Some(value) = self.segments {
            config = config.num_user_area_segments(value);
        }
        if let Some(value) = self.stripes_per_segment {
            config = config.stripes_per_segment(value);
        }
        if let Some(value) = self.blks_per_stripe {
            config = config.blks_per_stripe(value);
        }
        if let Some(value) = self.wb_stripes {
            config = config.num_wb_stripes(value);
        }
        if let Some(value) = self.volumes {
            config = config.max_volumes(value);
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Display context file headers and an allocation summary
    Inspect {
        /// Show the section table of every file
        #[arg(short, long)]
        sections: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify context file integrity
    Verify,

    /// Create the context files of a fresh allocator
    Init,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.geometry.to_config();
    match cli.command {
        Commands::Inspect { sections, format } => {
            let path = cli.path.ok_or("Context path required for inspect")?;
            commands::inspect::run(&path, &config, sections, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Context path required for verify")?;
            commands::verify::run(&path, &config)?;
        }
        Commands::Init => {
            let path = cli.path.ok_or("Context path required for init")?;
            commands::init::run(&path, config)?;
        }
        Commands::Version => {
            println!("allocmeta CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("allocmeta core v{}", allocmeta_core::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_overrides_defaults() {
        let cli = Cli::parse_from([
            "allocmeta",
            "--segments",
            "64",
            "--volumes",
            "2",
            "verify",
        ]);
        let config = cli.geometry.to_config();
        assert_eq!(config.num_user_area_segments, 64);
        assert_eq!(config.max_volumes, 2);
        assert_eq!(
            config.stripes_per_segment,
            AllocatorConfig::default().stripes_per_segment
        );
    }

    #[test]
    fn global_path_after_subcommand() {
        let cli = Cli::parse_from(["allocmeta", "inspect", "--path", "ctx", "--format", "json"]);
        assert_eq!(cli.path, Some(PathBuf::from("ctx")));
        assert!(matches!(cli.command, Commands::Inspect { ref format, .. } if format == "json"));
    }
}
