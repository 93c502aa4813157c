//! `parley` command-line client.
//!
//! Thin terminal front end over [`parley_voice::VoicePipeline`].

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used only by the binary.
use anyhow as _;
use dotenvy as _;
use tracing_subscriber as _;

#[cfg(test)]
use tempfile as _;

pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use commands::{Commands, OutputFormat, TalkArgs};
pub use error::CliError;
pub use parser::Cli;
