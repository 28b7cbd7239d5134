use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "imgtier",
    version,
    about = "Fetch, cache and downsample images",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache parent directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load images through the caches and the network.
    Fetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Target width in pixels.
        #[arg(long, default_value_t = 0)]
        width: u32,

        /// Target height in pixels.
        #[arg(long, default_value_t = 0)]
        height: u32,

        /// Wait for each image in turn instead of submitting them all.
        #[arg(long)]
        blocking: bool,
    },

    /// Decode a local image file with downsampling.
    Decode {
        /// Image file path.
        path: PathBuf,

        /// Target width in pixels.
        #[arg(long, default_value_t = 0)]
        width: u32,

        /// Target height in pixels.
        #[arg(long, default_value_t = 0)]
        height: u32,
    },
}
