//! Command-line overrides shared by Ridgeline binaries.

use std::path::PathBuf;

use clap::Args;

use crate::Config;

/// Options that override values loaded from `ridgeline.ron`.
///
/// Binaries flatten this into their own parser with `#[command(flatten)]`.
#[derive(Args, Debug, Default, Clone, PartialEq)]
pub struct CliArgs {
    /// Number of chunk workers (0 = automatic).
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Per-request timeout in milliseconds (0 = none).
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Erosion droplets per eroded chunk.
    #[arg(long)]
    pub droplets: Option<u32>,

    /// Base seed for erosion.
    #[arg(long)]
    pub erosion_seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(size) = args.pool_size {
            self.workers.pool_size = size;
        }
        if let Some(ms) = args.timeout_ms {
            self.workers.request_timeout_ms = ms;
        }
        if let Some(droplets) = args.droplets {
            self.terrain.erosion_droplets = droplets;
        }
        if let Some(seed) = args.erosion_seed {
            self.terrain.erosion_seed = seed;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
