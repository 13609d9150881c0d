//! Command-line interface of the fleet daemon.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line interface of the fleet daemon.
#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "Fleet image build-and-release daemon")]
pub struct Cli {
    /// Path to the configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Recover interrupted builds and serve the API
    Serve,
    /// Parse and display the configuration file
    Parse,
    /// Mark interrupted builds as failed and exit
    Recover,
}
