//! The `epaxosd` command line: a single `serve` subcommand whose flags
//! override whatever the layered config loader found.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "epaxosd")]
#[command(author, version, about = "A leaderless, dependency-tracking ePaxos replica", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start this replica and serve the `Epaxos` RPCs until signalled.
    Serve {
        /// Overrides the config's `name` (which peer entry is this one).
        #[arg(long)]
        name: Option<String>,

        /// Overrides the config's RNG seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Overrides the config's run duration; the replica shuts itself
        /// down cleanly once this elapses.
        #[arg(long, value_parser = humantime::parse_duration)]
        uptime: Option<Duration>,

        /// Overrides the config's metrics output path.
        #[arg(long)]
        outpath: Option<PathBuf>,
    },
}
