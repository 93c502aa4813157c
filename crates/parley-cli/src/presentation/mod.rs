//! Terminal rendering of pipeline events.
//!
//! Format-only: nothing here talks to the pipeline.

pub mod events;

pub use events::{Line, render_event};
