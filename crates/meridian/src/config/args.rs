//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// Meridian game server.
#[derive(Parser, Debug, Default)]
#[command(name = "meridian", version, about)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Override the worker thread count.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Enable debug-level logging.
    #[arg(short, long)]
    pub debug: bool,
}
