//! Main CLI parser and top-level argument handling.

use clap::Parser;

use crate::commands::Commands;

/// Talk to a voice agent from the terminal.
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Full-duplex voice conversations with a remote voice agent")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}
