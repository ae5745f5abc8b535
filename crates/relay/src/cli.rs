//! Command-line interface.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use cr_domain::config::Config;

#[derive(Parser)]
#[command(name = "coderelay", version, about = "Bridge chat channels to per-repo LLM coding agents")]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "coderelay.yaml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the bridge (default when no subcommand is given).
    Serve,
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the version.
    Version,
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path)
        .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))
}
