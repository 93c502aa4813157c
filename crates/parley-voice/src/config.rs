//! Pipeline configuration types and validation.
//!
//! All sections deserialize with `#[serde(default)]` so a partial JSON
//! document (or none at all) yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default microphone sample rate sent to the agent (16 kHz mono).
pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Default sample rate of synthesized speech received from the agent.
pub const DEFAULT_PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per outbound capture block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Inbound samples accumulated before a chunk is queued for playback.
pub const DEFAULT_PLAYBACK_BUFFER_SAMPLES: usize = 3200;

/// Number of points in the waveform telemetry sample.
pub const WAVEFORM_POINTS: usize = 64;

// ── Sections ───────────────────────────────────────────────────────

/// Audio framing and analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Sample rate of outbound PCM frames.
    pub capture_sample_rate: u32,
    /// Sample rate the output device is opened at (the agent's output rate).
    pub playback_sample_rate: u32,
    /// Samples per outbound frame.
    pub block_size: usize,
    /// Inbound sample count that triggers a playback flush.
    pub playback_buffer_samples: usize,
    /// Cadence of level/waveform telemetry, in milliseconds.
    pub analysis_interval_ms: u64,
    /// Snapshot length used for level/waveform analysis (power of two).
    pub analysis_fft_size: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            capture_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            playback_sample_rate: DEFAULT_PLAYBACK_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            playback_buffer_samples: DEFAULT_PLAYBACK_BUFFER_SAMPLES,
            analysis_interval_ms: 50,
            analysis_fft_size: 256,
        }
    }
}

/// Requested microphone processing.
///
/// Native hosts rarely expose echo cancellation, noise suppression or gain
/// control through `cpal`; these flags are forwarded to backends that can
/// honour them and logged otherwise. Mono and the sample rate are always
/// enforced (by down-mixing and resampling if the device can't open at them).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Preferred input device name; `None` uses the system default.
    pub device_name: Option<String>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            device_name: None,
        }
    }
}

/// Connection and reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Reconnect attempts allowed between successful handshakes.
    pub max_reconnect_attempts: u32,
    /// Upper bound on connect + upgrade.
    pub handshake_timeout_ms: u64,
    /// WebSocket ping cadence while open; `0` disables pings.
    pub keepalive_interval_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 2_000,
            max_reconnect_attempts: 5,
            handshake_timeout_ms: 10_000,
            keepalive_interval_ms: 8_000,
        }
    }
}

impl TransportSettings {
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub const fn keepalive_interval(&self) -> Option<Duration> {
        if self.keepalive_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.keepalive_interval_ms))
        }
    }
}

/// A provider/model pair for one agent stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider identifier understood by the agent service (e.g. `"deepgram"`).
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
}

impl ProviderSpec {
    pub fn new(kind: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            model: model.into(),
        }
    }
}

/// The conversational persona sent in the settings message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    /// Speech recognition.
    pub listen: ProviderSpec,
    /// Response generation.
    pub think: ProviderSpec,
    /// System instructions for the response model.
    pub instructions: String,
    /// Speech synthesis (voice).
    pub speak: ProviderSpec,
    /// Spoken by the agent when the session opens.
    pub greeting: String,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            listen: ProviderSpec::new("deepgram", "nova-3"),
            think: ProviderSpec::new("open_ai", "gpt-4o-mini"),
            instructions: "You are a friendly voice assistant. Keep answers short and \
                           conversational."
                .to_string(),
            speak: ProviderSpec::new("deepgram", "aura-2-thalia-en"),
            greeting: "Hello! How can I help you today?".to_string(),
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────

/// Configuration for the voice pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicePipelineConfig {
    pub audio: AudioSettings,
    pub capture: CaptureConstraints,
    pub transport: TransportSettings,
    pub agent: AgentProfile,
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Sample rate must be between 8000 and 96000 Hz, got {0}")]
    InvalidSampleRate(u32),

    #[error("Capture block size must be between 256 and 65536 samples, got {0}")]
    InvalidBlockSize(usize),

    #[error("Playback buffer threshold must be at least 1 sample")]
    EmptyPlaybackBuffer,

    #[error("Analysis snapshot size must be a power of two >= {min}, got {got}")]
    InvalidFftSize { min: usize, got: usize },

    #[error("Analysis interval must be at least 10 ms, got {0}")]
    InvalidAnalysisInterval(u64),

    #[error("Handshake timeout must be non-zero")]
    ZeroHandshakeTimeout,

    #[error("Agent settings could not be encoded: {0}")]
    SettingsEncoding(String),
}

impl VoicePipelineConfig {
    /// Validate value ranges. Called by `VoicePipeline::start`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        for rate in [audio.capture_sample_rate, audio.playback_sample_rate] {
            if !(8_000..=96_000).contains(&rate) {
                return Err(ConfigError::InvalidSampleRate(rate));
            }
        }

        if !(256..=65_536).contains(&audio.block_size) {
            return Err(ConfigError::InvalidBlockSize(audio.block_size));
        }

        if audio.playback_buffer_samples == 0 {
            return Err(ConfigError::EmptyPlaybackBuffer);
        }

        if audio.analysis_fft_size < WAVEFORM_POINTS || !audio.analysis_fft_size.is_power_of_two()
        {
            return Err(ConfigError::InvalidFftSize {
                min: WAVEFORM_POINTS,
                got: audio.analysis_fft_size,
            });
        }

        if audio.analysis_interval_ms < 10 {
            return Err(ConfigError::InvalidAnalysisInterval(
                audio.analysis_interval_ms,
            ));
        }

        if self.transport.handshake_timeout_ms == 0 {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }

        Ok(())
    }
}
