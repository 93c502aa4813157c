//! Subcommands and their arguments.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a voice conversation (Ctrl-C to hang up)
    Talk(TalkArgs),

    /// List microphones
    Devices,

    /// Print the effective pipeline configuration as JSON
    Config {
        /// JSON file with configuration overrides
        #[arg(long, env = "PARLEY_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// How conversation events are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable transcript
    #[default]
    Text,
    /// One JSON event per line
    Json,
}

#[derive(Debug, Args)]
pub struct TalkArgs {
    /// Voice agent endpoint
    #[arg(long, env = "PARLEY_AGENT_URL")]
    pub url: Option<String>,

    /// Access token (falls back to DEEPGRAM_API_KEY)
    #[arg(long, env = "PARLEY_AGENT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// JSON file with configuration overrides
    #[arg(long, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input device name (default: system default)
    #[arg(long)]
    pub device: Option<String>,

    /// System instructions for the agent
    #[arg(long)]
    pub instructions: Option<String>,

    /// What the agent says when the session opens
    #[arg(long)]
    pub greeting: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Show the microphone level meter
    #[arg(long)]
    pub meter: bool,
}
