//! Voice pipeline: the public entry point for a conversation session.
//!
//! ```text
//!   Idle ──(settings applied)──► Listening ──► Thinking ──► Speaking
//!    ▲                              ▲                          │
//!    │                              └──(playback drained)──────┘
//!    └──────────────(stop / fatal error)── any state
//! ```
//!
//! [`VoicePipeline::start`] acquires the microphone, fetches credentials and
//! spawns the session driver; from then on everything happens on that one
//! task and is reported through [`VoiceEvent`]s. [`VoicePipeline::stop`]
//! tears the session down and waits for it to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio_io::{AudioDeviceInfo, AudioSink, AudioSource};
use crate::audio_local;
use crate::capture_engine::AudioCaptureEngine;
use crate::config::{ConfigError, VoicePipelineConfig};
use crate::credentials::CredentialSource;
use crate::error::VoiceError;
use crate::playback_buffer::PlaybackBufferEngine;
use crate::protocol::{Role, SettingsMessage};
use crate::session::{Control, Session, SessionStats};
use crate::state::ConversationState;
use crate::transport::{AgentConnector, ConnectionStatus, TransportSession, WebSocketConnector};

// ── Events emitted by the pipeline ─────────────────────────────────

/// A finalized line of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    #[must_use]
    pub fn new(role: Role, text: String) -> Self {
        Self {
            role,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// Events emitted by the voice pipeline to the UI / application layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// Conversation state changed.
    StateChanged(ConversationState),

    /// In-progress transcript text. Empty when cleared.
    InterimText(String),

    /// A final transcript line.
    Transcript(TranscriptEntry),

    /// Something went wrong. Fatal errors end the session.
    Error { message: String, fatal: bool },

    /// Microphone level (0.0–1.0), every analysis tick.
    AudioLevel(f32),

    /// 64-point microphone waveform in [-1, 1], every analysis tick.
    Waveform(Vec<f32>),

    /// Connection to the voice agent changed.
    Connection(ConnectionStatus),
}

// ── Voice pipeline ─────────────────────────────────────────────────

/// Owns at most one live session at a time.
pub struct VoicePipeline {
    config: VoicePipelineConfig,
    connector: Arc<dyn AgentConnector>,
    credentials: Arc<dyn CredentialSource>,

    /// Event sender channel.
    event_tx: mpsc::UnboundedSender<VoiceEvent>,

    /// Current conversation state, shared with the running session.
    state: Arc<watch::Sender<ConversationState>>,

    /// Stats of the current (or last) session.
    stats: watch::Receiver<SessionStats>,

    /// Whether a session is live. Cleared by `stop` and by fatal errors.
    is_active: Arc<AtomicBool>,

    control: Option<mpsc::UnboundedSender<Control>>,
    driver: Option<JoinHandle<()>>,
}

impl VoicePipeline {
    /// Create a new voice pipeline.
    ///
    /// Returns the pipeline and a receiver for [`VoiceEvent`]s.
    #[must_use]
    pub fn new(
        config: VoicePipelineConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> (Self, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConversationState::Idle);
        let (_, stats) = watch::channel(SessionStats::default());

        let pipeline = Self {
            config,
            connector: Arc::new(WebSocketConnector),
            credentials,
            event_tx,
            state: Arc::new(state),
            stats,
            is_active: Arc::new(AtomicBool::new(false)),
            control: None,
            driver: None,
        };

        (pipeline, event_rx)
    }

    /// Replace the WebSocket connector (alternate transports, tests).
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn AgentConnector>) -> Self {
        self.connector = connector;
        self
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start a session on the local microphone and speaker.
    ///
    /// No-op if a session is already running.
    pub async fn start(&mut self) -> Result<(), VoiceError> {
        if self.is_active() {
            return Ok(());
        }
        let (source, sink) = match audio_local::new_pair() {
            Ok(pair) => pair,
            Err(error) => return Err(self.fail_start(error)),
        };
        self.start_with_audio(Box::new(source), Box::new(sink)).await
    }

    /// Start a session on the given audio backends.
    ///
    /// On any failure the pipeline is left idle with nothing acquired, a
    /// fatal [`VoiceEvent::Error`] is emitted and the error is returned.
    pub async fn start_with_audio(
        &mut self,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
    ) -> Result<(), VoiceError> {
        if self.is_active() {
            tracing::debug!("Voice pipeline already running");
            return Ok(());
        }
        // Reap a session that ended on its own.
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }

        if let Err(error) = self.config.validate() {
            return Err(self.fail_start(error.into()));
        }
        let settings_message = match SettingsMessage::from_config(&self.config).to_json() {
            Ok(json) => json,
            Err(error) => {
                let error = ConfigError::SettingsEncoding(error.to_string());
                return Err(self.fail_start(error.into()));
            }
        };

        self.is_active.store(true, Ordering::SeqCst);

        let audio = &self.config.audio;
        let mut capture = AudioCaptureEngine::new(source, audio, self.config.capture.clone());
        if let Err(error) = capture.start() {
            return Err(self.fail_start(error));
        }

        let credentials = match self.credentials.fetch().await {
            Ok(credentials) => credentials,
            Err(error) => {
                capture.stop();
                return Err(self.fail_start(error));
            }
        };

        let (playback, playback_rx) = PlaybackBufferEngine::new(
            sink,
            audio.playback_sample_rate,
            audio.playback_buffer_samples,
        );
        let (transport, transport_rx) = TransportSession::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.credentials),
            self.config.transport.clone(),
            settings_message,
        );
        let (stats_tx, stats_rx) = watch::channel(SessionStats::default());
        self.stats = stats_rx;

        let session = Session {
            capture,
            playback,
            playback_rx,
            transport,
            transport_rx,
            events: self.event_tx.clone(),
            state: Arc::clone(&self.state),
            stats_tx,
            is_active: Arc::clone(&self.is_active),
            analysis_interval: Duration::from_millis(audio.analysis_interval_ms),
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.control = Some(control_tx);
        self.driver = Some(tokio::spawn(session.run(control_rx, credentials)));

        tracing::info!(
            capture_rate = audio.capture_sample_rate,
            playback_rate = audio.playback_sample_rate,
            "Voice pipeline started"
        );
        Ok(())
    }

    /// Stop the session and release the microphone, speaker and connection.
    ///
    /// Idempotent; safe to call before `start`. Returns once the session
    /// has fully shut down.
    pub async fn stop(&mut self) {
        self.is_active.store(false, Ordering::SeqCst);

        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
        if let Some(driver) = self.driver.take()
            && let Err(error) = driver.await
        {
            tracing::warn!(%error, "Voice session task ended abnormally");
        }

        self.ensure_idle();
    }

    fn fail_start(&mut self, error: VoiceError) -> VoiceError {
        self.is_active.store(false, Ordering::SeqCst);
        tracing::error!(%error, "Failed to start voice pipeline");
        self.ensure_idle();
        self.emit(VoiceEvent::Error {
            message: error.to_string(),
            fatal: true,
        });
        error
    }

    /// Force the observable state to Idle, emitting the change if any.
    fn ensure_idle(&self) {
        let changed = self.state.send_if_modified(|state| {
            let was_active = *state != ConversationState::Idle;
            *state = ConversationState::Idle;
            was_active
        });
        if changed {
            self.emit(VoiceEvent::StateChanged(ConversationState::Idle));
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    #[must_use]
    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    /// Counters of the current session, or of the last one after it ended.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        *self.stats.borrow()
    }

    #[must_use]
    pub const fn config(&self) -> &VoicePipelineConfig {
        &self.config
    }

    /// List microphones on this machine.
    pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>, VoiceError> {
        audio_local::list_input_devices()
    }

    /// Send an event to the UI layer.
    fn emit(&self, event: VoiceEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        // The driver tears down on its own once it sees the request.
        self.is_active.store(false, Ordering::SeqCst);
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
    }
}
