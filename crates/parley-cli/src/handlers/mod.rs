//! Command handlers.
//!
//! Each handler parses CLI-specific input, calls into `parley-voice`,
//! and formats the result for the terminal.

pub mod config;
pub mod devices;
pub mod talk;
