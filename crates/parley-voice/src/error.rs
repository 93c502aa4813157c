//! Voice pipeline error types.

/// Errors that can occur in the voice pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// No audio input device found.
    #[error("No audio input device found")]
    NoInputDevice,

    /// No audio output device found.
    #[error("No audio output device found")]
    NoOutputDevice,

    /// Microphone permission denied.
    #[error("Microphone permission denied")]
    MicrophonePermissionDenied,

    /// Failed to open audio input stream.
    #[error("Failed to open audio input stream: {0}")]
    InputStreamError(String),

    /// Failed to open or drive the audio output stream.
    #[error("Failed to open audio output stream: {0}")]
    OutputStreamError(String),

    /// The microphone stopped delivering audio mid-session.
    #[error("Microphone disconnected: {0}")]
    InputDeviceLost(String),

    /// Audio resampling error.
    #[error("Audio resampling failed: {0}")]
    ResampleError(String),

    /// The dedicated audio thread exited unexpectedly.
    #[error("Audio thread died")]
    AudioThreadDied,

    /// The credential source could not produce a connection token.
    #[error("Failed to obtain agent credentials: {0}")]
    Credentials(String),

    /// Connecting to the voice agent failed (refused, TLS, bad URL, ...).
    #[error("Failed to connect to voice agent: {0}")]
    ConnectFailed(String),

    /// The handshake did not complete within the configured timeout.
    #[error("Voice agent handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    /// The connection closed and the reconnect budget is spent.
    #[error("Lost connection to voice agent after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The voice agent reported an error.
    #[error("Voice agent error: {0}")]
    Remote(String),

    /// Invalid pipeline configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Whether this error ends the session.
    ///
    /// Microphone and audio-thread failures end the session, as does an
    /// exhausted reconnect budget. Everything else is surfaced to the
    /// observer while the session keeps running.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoInputDevice
                | Self::MicrophonePermissionDenied
                | Self::InputStreamError(_)
                | Self::InputDeviceLost(_)
                | Self::ReconnectExhausted { .. }
                | Self::AudioThreadDied
        )
    }
}
