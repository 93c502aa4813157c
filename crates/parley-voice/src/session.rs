//! The session driver: one task that owns every live component.
//!
//! All inputs (device audio, playback completions, transport events, the
//! telemetry tick and stop requests) are consumed by a single `select!`
//! loop, so each handler runs to completion before the next input is looked
//! at. Stop requests are polled first; transport events are polled before
//! playback completions so a barge-in always beats a completion that raced
//! with it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::audio_io::{CaptureEvent, PlaybackNotice};
use crate::capture_engine::AudioCaptureEngine;
use crate::credentials::AgentCredentials;
use crate::error::VoiceError;
use crate::pipeline::{TranscriptEntry, VoiceEvent};
use crate::playback_buffer::{PlaybackBufferEngine, PlaybackSignal};
use crate::protocol::AgentEvent;
use crate::state::{ConversationState, ConversationStateMachine, StateInput};
use crate::transport::{
    ConnectionStatus, Inbound, TransportEvent, TransportSession, TransportStats, TransportUpdate,
};

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Capture frames dropped because the connection was not open.
    pub frames_suppressed: u64,
    /// Agent speech chunks that played to completion.
    pub chunks_played: u64,
    /// Final transcript lines delivered.
    pub transcripts: u64,
    /// Barge-ins that cut off agent speech.
    pub interruptions: u64,
    pub transport: TransportStats,
}

pub(crate) enum Control {
    Stop,
}

/// Everything the driver needs, assembled by `VoicePipeline::start`.
pub(crate) struct Session {
    pub capture: AudioCaptureEngine,
    pub playback: PlaybackBufferEngine,
    pub playback_rx: mpsc::UnboundedReceiver<PlaybackNotice>,
    pub transport: TransportSession,
    pub transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    pub events: mpsc::UnboundedSender<VoiceEvent>,
    pub state: Arc<watch::Sender<ConversationState>>,
    pub stats_tx: watch::Sender<SessionStats>,
    pub is_active: Arc<AtomicBool>,
    pub analysis_interval: Duration,
}

/// Per-run bookkeeping that isn't a component.
struct Driver {
    session: Session,
    machine: ConversationStateMachine,
    interim: String,
    stats: SessionStats,
}

impl Session {
    /// Run until stopped or a fatal error occurs.
    pub async fn run(self, control: mpsc::UnboundedReceiver<Control>, credentials: AgentCredentials) {
        let mut driver = Driver {
            session: self,
            machine: ConversationStateMachine::new(),
            interim: String::new(),
            stats: SessionStats::default(),
        };
        driver.run(control, credentials).await;
    }
}

impl Driver {
    async fn run(&mut self, mut control: mpsc::UnboundedReceiver<Control>, credentials: AgentCredentials) {
        self.session.transport.connect(Some(credentials));
        self.emit(VoiceEvent::Connection(self.session.transport.status()));

        let mut ticker = tokio::time::interval(self.session.analysis_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let failure = loop {
            let step = tokio::select! {
                biased;

                // Stop request, or the pipeline was dropped.
                _ = control.recv() => break None,

                Some(event) = self.session.transport_rx.recv() => self.on_transport(event),

                Some(notice) = self.session.playback_rx.recv() => {
                    let signals = self.session.playback.on_notice(notice);
                    self.on_playback(signals)
                }

                event = self.session.capture.recv() => self.on_capture(event),

                _ = ticker.tick() => {
                    self.on_tick();
                    Ok(())
                }
            };
            if let Err(error) = step {
                break Some(error);
            }
        };

        self.teardown(failure);
    }

    // ── Transport ──────────────────────────────────────────────────

    fn on_transport(&mut self, event: TransportEvent) -> Result<(), VoiceError> {
        match self.session.transport.handle(event) {
            TransportUpdate::Nothing => {}
            TransportUpdate::Opened => {
                self.emit(VoiceEvent::Connection(ConnectionStatus::Connected));
            }
            TransportUpdate::Inbound(Inbound::Audio(samples)) => {
                let signals = self.session.playback.ingest(samples);
                return self.on_playback(signals);
            }
            TransportUpdate::Inbound(Inbound::Event(event)) => return self.on_agent_event(event),
            TransportUpdate::Reconnecting { .. } => {
                self.emit(VoiceEvent::Connection(self.session.transport.status()));
            }
            TransportUpdate::Exhausted { attempts } => {
                return self.report(VoiceError::ReconnectExhausted { attempts });
            }
        }
        Ok(())
    }

    fn on_agent_event(&mut self, event: AgentEvent) -> Result<(), VoiceError> {
        match event {
            AgentEvent::Welcome { request_id } => {
                tracing::debug!(request_id = request_id.as_deref().unwrap_or("-"), "Agent welcome");
            }
            AgentEvent::SettingsApplied => {
                tracing::info!("Agent accepted session settings");
                self.transition(StateInput::SessionStarted);
            }
            AgentEvent::UserStartedSpeaking => {
                let playback = &mut self.session.playback;
                if playback.is_playing() || playback.queued_chunks() > 0 {
                    self.stats.interruptions += 1;
                }
                playback.interrupt();
                self.transition(StateInput::UserStartedSpeaking);
            }
            AgentEvent::AgentThinking => self.transition(StateInput::AgentThinking),
            AgentEvent::AgentStartedSpeaking => self.transition(StateInput::AgentStartedSpeaking),
            AgentEvent::AgentAudioDone => {
                self.transition(StateInput::AgentAudioDone);
                let signals = self.session.playback.flush();
                return self.on_playback(signals);
            }
            AgentEvent::Transcript {
                role,
                text,
                is_final: true,
            } => {
                self.set_interim(String::new());
                self.stats.transcripts += 1;
                self.emit(VoiceEvent::Transcript(TranscriptEntry::new(role, text)));
            }
            AgentEvent::Transcript { text, .. } => self.set_interim(text),
            AgentEvent::Error { description } => {
                tracing::warn!(%description, "Voice agent reported an error");
                return self.report(VoiceError::Remote(description));
            }
        }
        Ok(())
    }

    fn set_interim(&mut self, text: String) {
        if self.interim != text {
            self.interim.clone_from(&text);
            self.emit(VoiceEvent::InterimText(text));
        }
    }

    // ── Playback ───────────────────────────────────────────────────

    fn on_playback(&mut self, signals: Vec<PlaybackSignal>) -> Result<(), VoiceError> {
        self.stats.chunks_played = self.session.playback.chunks_played();
        for signal in signals {
            match signal {
                PlaybackSignal::ChunkStarted { chunk_id, samples } => {
                    tracing::trace!(chunk_id, samples, "Playing agent audio");
                    self.transition(StateInput::PlaybackStarted);
                }
                PlaybackSignal::QueueExhausted => self.transition(StateInput::PlaybackIdle),
                PlaybackSignal::Failed(error) => self.report(error)?,
            }
        }
        Ok(())
    }

    // ── Capture ────────────────────────────────────────────────────

    fn on_capture(&mut self, event: Option<CaptureEvent>) -> Result<(), VoiceError> {
        match event {
            Some(CaptureEvent::Samples(samples)) => {
                let frames = match self.session.capture.process(&samples) {
                    Ok(frames) => frames,
                    Err(error) => {
                        tracing::warn!(%error, "Dropping microphone audio");
                        return Ok(());
                    }
                };
                for frame in frames {
                    let transport = &mut self.session.transport;
                    if !(transport.is_open() && transport.send_audio(frame.to_pcm16_le())) {
                        self.stats.frames_suppressed += 1;
                    }
                }
            }
            Some(CaptureEvent::Lost(reason)) => return self.on_microphone_lost(reason),
            None => return self.on_microphone_lost("stream ended".to_string()),
        }
        Ok(())
    }

    /// Without a microphone the user can no longer take a turn.
    fn on_microphone_lost(&mut self, reason: String) -> Result<(), VoiceError> {
        self.session.capture.mark_lost();
        self.report(VoiceError::InputDeviceLost(reason))
    }

    fn on_tick(&mut self) {
        if let Some(reading) = self.session.capture.telemetry() {
            self.emit(VoiceEvent::AudioLevel(reading.level));
            self.emit(VoiceEvent::Waveform(reading.waveform));
        }
        self.publish_stats();
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    fn teardown(&mut self, failure: Option<VoiceError>) {
        self.session.is_active.store(false, Ordering::SeqCst);

        self.session.playback.interrupt();
        self.session.transport.close();
        self.session.capture.stop();
        self.set_interim(String::new());
        self.transition(StateInput::Stopped);
        self.emit(VoiceEvent::Connection(ConnectionStatus::Disconnected));
        self.publish_stats();

        match failure {
            Some(error) => {
                tracing::error!(%error, "Voice session failed");
                self.emit(VoiceEvent::Error {
                    message: error.to_string(),
                    fatal: true,
                });
            }
            None => tracing::info!(stats = ?self.stats, "Voice session stopped"),
        }
    }

    /// Surface an error. Fatal errors are handed back to end the session.
    fn report(&self, error: VoiceError) -> Result<(), VoiceError> {
        if error.is_fatal() {
            return Err(error);
        }
        self.emit(VoiceEvent::Error {
            message: error.to_string(),
            fatal: false,
        });
        Ok(())
    }

    fn transition(&mut self, input: StateInput) {
        if let Some(state) = self.machine.apply(input) {
            self.session.state.send_replace(state);
            self.emit(VoiceEvent::StateChanged(state));
        }
    }

    fn publish_stats(&mut self) {
        self.stats.transport = self.session.transport.stats();
        self.session.stats_tx.send_replace(self.stats);
    }

    /// Send an event to the observer. A closed channel just means nobody is
    /// listening.
    fn emit(&self, event: VoiceEvent) {
        let _ = self.session.events.send(event);
    }
}
