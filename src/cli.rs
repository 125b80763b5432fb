//! Command-line surface (ambient; spec §6 calls this "sketch only"). Three
//! subcommands: `start` runs the daemon loop, `sync` runs one catch-up pass
//! per repo and exits, `status` reports cursors without touching the cloud.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "metarelay", version, about = "Local event-relay daemon")]
pub struct Cli {
    /// Path to the YAML config file. Defaults to `./metarelay.yaml`.
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (overrides `log_level` in config and
    /// `RUST_LOG`).
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the daemon: catch-up then subscribe, per repo, until shutdown.
    Start,
    /// Run one catch-up pass per configured repo, then exit.
    Sync,
    /// Print the stored cursor for each configured repo.
    Status,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("metarelay.yaml")
}
