//! CLI-specific error types and exit codes.

use parley_voice::VoiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// The voice pipeline failed to start or ended with a fatal error.
    #[error(transparent)]
    Voice(#[from] VoiceError),

    /// The session ended with a fatal error reported as an event.
    #[error("Session ended: {0}")]
    SessionFailed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file not found, permission denied, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map error to an exit code (sysexits.h where one fits).
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Voice(VoiceError::Config(_)) | Self::Config(_) => 78, // EX_CONFIG
            Self::Voice(VoiceError::Credentials(_) | VoiceError::MicrophonePermissionDenied) => {
                77 // EX_NOPERM
            }
            Self::Voice(
                VoiceError::ConnectFailed(_)
                | VoiceError::HandshakeTimeout(_)
                | VoiceError::ReconnectExhausted { .. },
            )
            | Self::SessionFailed(_) => 69, // EX_UNAVAILABLE
            Self::Io(_) => 74,                                          // EX_IOERR
            Self::Voice(_) => 1,
        }
    }
}
