use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

/// Telegram control panel for a Termux device
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Install root: holds `.env`, `data/` and `logs/`
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Env file to load (defaults to `<root>/.env`)
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace). Overrides RUST_LOG.
    #[arg(long)]
    pub log_level: Option<LevelFilter>,
}

impl Args {
    pub fn env_path(&self) -> PathBuf {
        self.env_file
            .clone()
            .unwrap_or_else(|| self.root.join(".env"))
    }
}
