//! Configuration for Ridgeline.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line via clap. Unknown or missing fields fall back to defaults so
//! old and new config files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, Config, DebugConfig, TerrainConfig, WorkersConfig, default_config_dir,
};
pub use error::ConfigError;
