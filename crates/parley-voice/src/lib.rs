//! Full-duplex voice conversations with a remote voice agent.
//!
//! Microphone audio is streamed to the agent as 16 kHz linear16 frames while
//! the agent's synthesized speech is buffered and played back gaplessly. The
//! user can talk over the agent at any time: the agent's "user started
//! speaking" signal cuts playback off immediately.
//!
//! Start with [`VoicePipeline`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley_voice::{EnvCredentials, VoicePipeline, VoicePipelineConfig};
//!
//! # async fn run() -> Result<(), parley_voice::VoiceError> {
//! let (mut pipeline, mut events) =
//!     VoicePipeline::new(VoicePipelineConfig::default(), Arc::new(EnvCredentials));
//! pipeline.start().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unused_crate_dependencies)]

pub mod analysis;
pub mod audio_io;
pub mod audio_local;
mod audio_thread;
pub mod capture;
pub mod capture_engine;
pub mod config;
pub mod credentials;
pub mod error;
pub mod pcm;
pub mod pipeline;
pub mod playback;
pub mod playback_buffer;
pub mod protocol;
mod session;
pub mod state;
pub mod transport;

// Re-export key types for convenience
pub use audio_io::{
    AudioDeviceInfo, AudioSink, AudioSource, CaptureEvent, CaptureStream, PlaybackCompletion,
    PlaybackNotice,
};
pub use config::{
    AgentProfile, AudioSettings, CaptureConstraints, ConfigError, ProviderSpec, TransportSettings,
    VoicePipelineConfig,
};
pub use credentials::{AgentCredentials, CredentialSource, EnvCredentials, StaticCredentials};
pub use error::VoiceError;
pub use pipeline::{TranscriptEntry, VoiceEvent, VoicePipeline};
pub use protocol::{AgentEvent, Role};
pub use session::SessionStats;
pub use state::ConversationState;
pub use transport::{
    AgentConnector, AgentLink, ConnectionStatus, InboundFrame, OutboundFrame, TransportStats,
    WebSocketConnector,
};
