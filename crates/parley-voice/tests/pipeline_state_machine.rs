//! Integration tests for the `VoicePipeline` session lifecycle.
//!
//! These tests drive a full session using a scripted microphone, a recording
//! speaker and an in-memory agent connection. No audio hardware or network
//! access is required. Time is paused, so reconnect delays and telemetry
//! ticks advance instantly.
//!
//! # What is tested
//!
//! - Settings are the first frame; the acknowledgement moves Idle → Listening
//! - Capture frames are suppressed until the connection is open
//! - A full turn: Listening → Thinking → Speaking → Listening
//! - Barge-in stops playback and late completions are ignored
//! - Playback resuming after an underrun returns to Speaking
//! - A dropped connection reconnects with fresh settings; `stop` cancels a
//!   pending reconnect
//! - Reconnect budget exhaustion and microphone loss are fatal
//! - Start failures (microphone, credentials) leave nothing acquired
//! - `start` is idempotent; `stop` is idempotent and safe before `start`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_voice::{
    AgentConnector, AgentCredentials, AgentLink, AudioSink, AudioSource, CaptureConstraints,
    CaptureEvent, CaptureStream, ConnectionStatus, ConversationState, InboundFrame,
    OutboundFrame, PlaybackCompletion, Role, StaticCredentials, TransportSettings, VoiceError,
    VoiceEvent, VoicePipeline, VoicePipelineConfig,
};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

// ── Mock microphone ────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Mic {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>>,
    starts: Arc<AtomicUsize>,
    fail_with_permission: bool,
}

impl Mic {
    fn denied() -> Self {
        Self {
            fail_with_permission: true,
            ..Self::default()
        }
    }

    fn speak(&self, samples: usize) {
        let guard = self.tx.lock().unwrap();
        let tx = guard.as_ref().expect("microphone is open");
        tx.send(CaptureEvent::Samples(vec![0.25; samples])).unwrap();
    }

    /// The device disappears mid-stream.
    fn unplug(&self) {
        let guard = self.tx.lock().unwrap();
        let tx = guard.as_ref().expect("microphone is open");
        tx.send(CaptureEvent::Lost("device unplugged".into())).unwrap();
    }

    fn is_open(&self) -> bool {
        self.tx.lock().unwrap().is_some()
    }
}

impl AudioSource for Mic {
    fn start_capture(
        &self,
        _constraints: &CaptureConstraints,
        sample_rate: u32,
    ) -> Result<CaptureStream, VoiceError> {
        if self.fail_with_permission {
            return Err(VoiceError::MicrophonePermissionDenied);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, events) = mpsc::unbounded_channel();
        *self.tx.lock().unwrap() = Some(tx);
        Ok(CaptureStream {
            sample_rate,
            events,
        })
    }

    fn stop_capture(&self) {
        self.tx.lock().unwrap().take();
    }
}

// ── Mock speaker ───────────────────────────────────────────────────

#[derive(Default)]
struct SpeakerLog {
    played: Vec<usize>,
    pending: Vec<PlaybackCompletion>,
    stops: usize,
}

#[derive(Clone, Default)]
struct Speaker(Arc<Mutex<SpeakerLog>>);

impl Speaker {
    fn played(&self) -> Vec<usize> {
        self.0.lock().unwrap().played.clone()
    }

    fn stops(&self) -> usize {
        self.0.lock().unwrap().stops
    }

    /// Report the oldest outstanding chunk as finished.
    fn finish_oldest(&self) {
        let done = self.0.lock().unwrap().pending.remove(0);
        done.finished();
    }
}

impl AudioSink for Speaker {
    fn play(
        &self,
        samples: Vec<f32>,
        _sample_rate: u32,
        done: PlaybackCompletion,
    ) -> Result<(), VoiceError> {
        let mut log = self.0.lock().unwrap();
        log.played.push(samples.len());
        log.pending.push(done);
        Ok(())
    }

    fn stop(&self) {
        self.0.lock().unwrap().stops += 1;
    }
}

// ── Mock agent ─────────────────────────────────────────────────────

/// The agent's end of one connection.
struct Agent {
    from_client: mpsc::UnboundedReceiver<OutboundFrame>,
    to_client: mpsc::UnboundedSender<InboundFrame>,
}

impl Agent {
    fn send_json(&self, json: &str) {
        self.to_client.send(InboundFrame::Text(json.to_string())).unwrap();
    }

    fn send_audio(&self, samples: usize) {
        let bytes = vec![0u8; samples * 2];
        self.to_client.send(InboundFrame::Binary(bytes)).unwrap();
    }

    async fn next_frame(&mut self) -> Option<OutboundFrame> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
    }
}

struct Connector {
    accept: bool,
    attempts: AtomicUsize,
    agents: mpsc::UnboundedSender<Agent>,
}

impl Connector {
    fn new(accept: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Agent>) {
        let (agents, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accept,
            attempts: AtomicUsize::new(0),
            agents,
        };
        (Arc::new(connector), rx)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentConnector for Connector {
    async fn connect(
        &self,
        _credentials: &AgentCredentials,
        _settings: &TransportSettings,
    ) -> Result<AgentLink, VoiceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return Err(VoiceError::ConnectFailed("connection refused".into()));
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.agents.send(Agent {
            from_client: out_rx,
            to_client: in_tx,
        });
        Ok(AgentLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn credentials() -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new(AgentCredentials::new(
        "ws://agent.test",
        "token",
    )))
}

fn pipeline_with(
    config: VoicePipelineConfig,
    connector: Arc<Connector>,
) -> (VoicePipeline, mpsc::UnboundedReceiver<VoiceEvent>) {
    let (pipeline, rx) = VoicePipeline::new(config, credentials());
    (pipeline.with_connector(connector), rx)
}

/// Drain all pending events from the event receiver and return them.
fn drain_events(rx: &mut mpsc::UnboundedReceiver<VoiceEvent>) -> Vec<VoiceEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

/// Wait for the first event matching `pred`, skipping everything else.
async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<VoiceEvent>,
    pred: impl Fn(&VoiceEvent) -> bool,
) -> VoiceEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_for_state(rx: &mut mpsc::UnboundedReceiver<VoiceEvent>, state: ConversationState) {
    wait_for(rx, |e| *e == VoiceEvent::StateChanged(state)).await;
}

async fn next_agent(agents: &mut mpsc::UnboundedReceiver<Agent>) -> Agent {
    tokio::time::timeout(WAIT, agents.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("connector alive")
}

/// Let the session task work through everything queued.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Start a session and complete the settings handshake.
async fn listening_session() -> (
    VoicePipeline,
    mpsc::UnboundedReceiver<VoiceEvent>,
    Agent,
    Mic,
    Speaker,
) {
    let (connector, mut agents) = Connector::new(true);
    let (mut pipeline, mut rx) = pipeline_with(VoicePipelineConfig::default(), connector);
    let mic = Mic::default();
    let speaker = Speaker::default();

    pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(speaker.clone()))
        .await
        .unwrap();

    let mut agent = next_agent(&mut agents).await;
    assert!(matches!(agent.next_frame().await, Some(OutboundFrame::Text(_))));
    agent.send_json(r#"{"type":"SettingsApplied"}"#);
    wait_for_state(&mut rx, ConversationState::Listening).await;

    (pipeline, rx, agent, mic, speaker)
}

// ── Tests ──────────────────────────────────────────────────────────

#[test]
fn initial_state_is_idle() {
    let (pipeline, _rx) = VoicePipeline::new(VoicePipelineConfig::default(), credentials());
    assert_eq!(pipeline.state(), ConversationState::Idle);
    assert!(!pipeline.is_active());
}

#[tokio::test(start_paused = true)]
async fn stop_before_start_is_silent() {
    let (connector, _agents) = Connector::new(true);
    let (mut pipeline, mut rx) = pipeline_with(VoicePipelineConfig::default(), connector);

    pipeline.stop().await;
    pipeline.stop().await;

    assert_eq!(pipeline.state(), ConversationState::Idle);
    assert!(drain_events(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn settings_frame_precedes_audio_and_ack_starts_listening() {
    let (connector, mut agents) = Connector::new(true);
    let (mut pipeline, mut rx) = pipeline_with(VoicePipelineConfig::default(), connector);
    let mic = Mic::default();

    pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(Speaker::default()))
        .await
        .unwrap();
    assert!(pipeline.is_active());
    assert_eq!(pipeline.state(), ConversationState::Idle);

    // One full block arrives before the connection is open: dropped.
    mic.speak(4096);

    let mut agent = next_agent(&mut agents).await;
    let Some(OutboundFrame::Text(settings)) = agent.next_frame().await else {
        panic!("settings must be the first frame");
    };
    let settings: serde_json::Value = serde_json::from_str(&settings).unwrap();
    assert_eq!(settings["type"], "Settings");
    assert_eq!(settings["audio"]["input"]["sample_rate"], 16_000);

    // Once open, each full block goes out as one binary frame.
    mic.speak(4096);
    assert_eq!(
        agent.next_frame().await,
        Some(OutboundFrame::Binary(vec![0x00, 0x20].repeat(4096)))
    );

    agent.send_json(r#"{"type":"SettingsApplied"}"#);
    wait_for_state(&mut rx, ConversationState::Listening).await;

    settle().await;
    let stats = pipeline.stats();
    assert_eq!(stats.frames_suppressed, 1);
    assert_eq!(stats.transport.audio_frames_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn full_turn_returns_to_listening_when_playback_drains() {
    let (mut pipeline, mut rx, agent, _mic, speaker) = listening_session().await;

    agent.send_json(r#"{"type":"AgentThinking"}"#);
    wait_for_state(&mut rx, ConversationState::Thinking).await;

    agent.send_json(r#"{"type":"AgentStartedSpeaking"}"#);
    wait_for_state(&mut rx, ConversationState::Speaking).await;

    // Below the jitter threshold: held until the agent says it is done.
    agent.send_audio(1000);
    settle().await;
    assert!(speaker.played().is_empty());

    agent.send_json(r#"{"type":"AgentAudioDone"}"#);
    settle().await;
    assert_eq!(speaker.played(), vec![1000]);
    assert_eq!(pipeline.state(), ConversationState::Speaking);

    speaker.finish_oldest();
    wait_for_state(&mut rx, ConversationState::Listening).await;

    pipeline.stop().await;
    assert_eq!(pipeline.stats().chunks_played, 1);
}

#[tokio::test(start_paused = true)]
async fn barge_in_stops_playback_and_ignores_late_completion() {
    let (mut pipeline, mut rx, agent, _mic, speaker) = listening_session().await;

    agent.send_json(r#"{"type":"AgentThinking"}"#);
    agent.send_json(r#"{"type":"AgentStartedSpeaking"}"#);
    wait_for_state(&mut rx, ConversationState::Speaking).await;

    agent.send_audio(2000);
    agent.send_audio(1600); // crosses 3200: first chunk starts
    agent.send_audio(3200); // queued
    agent.send_audio(3200); // queued
    agent.send_audio(1000); // pending below the threshold
    settle().await;
    assert_eq!(speaker.played(), vec![3600]);

    agent.send_json(r#"{"type":"UserStartedSpeaking"}"#);
    wait_for_state(&mut rx, ConversationState::Listening).await;
    assert_eq!(speaker.stops(), 1);

    // The interrupted chunk reports completion late; neither queued chunk plays.
    speaker.finish_oldest();
    settle().await;
    assert_eq!(speaker.played(), vec![3600]);
    assert_eq!(pipeline.state(), ConversationState::Listening);

    // The next reply accumulates from scratch.
    agent.send_json(r#"{"type":"AgentStartedSpeaking"}"#);
    agent.send_audio(3200);
    wait_for_state(&mut rx, ConversationState::Speaking).await;
    settle().await;
    assert_eq!(speaker.played(), vec![3600, 3200]);

    pipeline.stop().await;
    assert_eq!(pipeline.stats().interruptions, 1);
}

#[tokio::test(start_paused = true)]
async fn playback_after_underrun_is_speaking_again() {
    let (mut pipeline, mut rx, agent, _mic, speaker) = listening_session().await;

    agent.send_json(r#"{"type":"AgentThinking"}"#);
    agent.send_json(r#"{"type":"AgentStartedSpeaking"}"#);
    wait_for_state(&mut rx, ConversationState::Speaking).await;

    agent.send_audio(3200);
    settle().await;
    assert_eq!(speaker.played(), vec![3200]);

    // The first chunk drains before the rest of the reply arrives.
    speaker.finish_oldest();
    wait_for_state(&mut rx, ConversationState::Listening).await;

    agent.send_audio(3200);
    wait_for_state(&mut rx, ConversationState::Speaking).await;
    assert_eq!(speaker.played(), vec![3200, 3200]);
    assert_eq!(pipeline.state(), ConversationState::Speaking);

    agent.send_json(r#"{"type":"AgentAudioDone"}"#);
    settle().await;
    assert_eq!(pipeline.state(), ConversationState::Speaking);

    speaker.finish_oldest();
    wait_for_state(&mut rx, ConversationState::Listening).await;

    pipeline.stop().await;
    assert_eq!(pipeline.stats().chunks_played, 2);
}

#[tokio::test(start_paused = true)]
async fn transcripts_and_interim_text() {
    let (mut pipeline, mut rx, agent, _mic, _speaker) = listening_session().await;

    agent.send_json(r#"{"type":"InterimTranscript","text":"hel"}"#);
    let event = wait_for(&mut rx, |e| matches!(e, VoiceEvent::InterimText(_))).await;
    assert_eq!(event, VoiceEvent::InterimText("hel".into()));

    agent.send_json(r#"{"type":"ConversationText","role":"user","content":"hello"}"#);
    // Interim text is cleared before the final line is delivered.
    let event = wait_for(&mut rx, |e| matches!(e, VoiceEvent::InterimText(_))).await;
    assert_eq!(event, VoiceEvent::InterimText(String::new()));
    let VoiceEvent::Transcript(entry) =
        wait_for(&mut rx, |e| matches!(e, VoiceEvent::Transcript(_))).await
    else {
        unreachable!()
    };
    assert_eq!(entry.role, Role::User);
    assert_eq!(entry.text, "hello");

    agent.send_json(r#"{"type":"ConversationText","role":"assistant","content":"Hi!"}"#);
    let VoiceEvent::Transcript(entry) =
        wait_for(&mut rx, |e| matches!(e, VoiceEvent::Transcript(_))).await
    else {
        unreachable!()
    };
    assert_eq!(entry.role, Role::Assistant);

    pipeline.stop().await;
    assert_eq!(pipeline.stats().transcripts, 2);
}

#[tokio::test(start_paused = true)]
async fn agent_error_is_not_fatal() {
    let (mut pipeline, mut rx, agent, _mic, _speaker) = listening_session().await;

    agent.send_json(r#"{"type":"Error","description":"rate limited"}"#);
    let event = wait_for(&mut rx, |e| matches!(e, VoiceEvent::Error { .. })).await;
    let VoiceEvent::Error { message, fatal } = event else {
        unreachable!()
    };
    assert!(!fatal);
    assert!(message.contains("rate limited"));
    assert!(pipeline.is_active());
    assert_eq!(pipeline.state(), ConversationState::Listening);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn telemetry_is_emitted_while_capturing() {
    let (mut pipeline, mut rx, _agent, mic, _speaker) = listening_session().await;

    mic.speak(512);
    wait_for(&mut rx, |e| matches!(e, VoiceEvent::AudioLevel(_))).await;
    let VoiceEvent::Waveform(points) =
        wait_for(&mut rx, |e| matches!(e, VoiceEvent::Waveform(_))).await
    else {
        unreachable!()
    };
    assert_eq!(points.len(), 64);
    assert!(points.iter().all(|p| (-1.0..=1.0).contains(p)));

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_with_fresh_settings() {
    let (connector, mut agents) = Connector::new(true);
    let mut config = VoicePipelineConfig::default();
    // One attempt per drop: only passes if the counter resets on reopen.
    config.transport.max_reconnect_attempts = 1;
    let (mut pipeline, mut rx) = pipeline_with(config, connector);
    let mic = Mic::default();

    pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(Speaker::default()))
        .await
        .unwrap();

    let mut agent = next_agent(&mut agents).await;
    assert!(matches!(agent.next_frame().await, Some(OutboundFrame::Text(_))));
    agent.send_json(r#"{"type":"SettingsApplied"}"#);
    wait_for_state(&mut rx, ConversationState::Listening).await;

    for _ in 0..2 {
        drop(agent);
        wait_for(&mut rx, |e| {
            *e == VoiceEvent::Connection(ConnectionStatus::Reconnecting {
                attempt: 1,
                max_attempts: 1,
            })
        })
        .await;

        agent = next_agent(&mut agents).await;
        let Some(OutboundFrame::Text(settings)) = agent.next_frame().await else {
            panic!("settings must be the first frame on a new connection");
        };
        assert!(settings.contains("\"Settings\""));
        wait_for(&mut rx, |e| {
            *e == VoiceEvent::Connection(ConnectionStatus::Connected)
        })
        .await;

        // Audio flows on the new connection.
        mic.speak(4096);
        assert!(matches!(agent.next_frame().await, Some(OutboundFrame::Binary(_))));
    }

    assert!(pipeline.is_active());
    assert_eq!(pipeline.state(), ConversationState::Listening);
    pipeline.stop().await;
    assert_eq!(pipeline.stats().transport.reconnects, 2);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_reconnect() {
    let (connector, mut agents) = Connector::new(true);
    let (mut pipeline, mut rx) = pipeline_with(VoicePipelineConfig::default(), connector.clone());

    pipeline
        .start_with_audio(Box::new(Mic::default()), Box::new(Speaker::default()))
        .await
        .unwrap();
    let mut agent = next_agent(&mut agents).await;
    agent.next_frame().await;
    agent.send_json(r#"{"type":"SettingsApplied"}"#);
    wait_for_state(&mut rx, ConversationState::Listening).await;

    drop(agent);
    wait_for(&mut rx, |e| {
        matches!(
            e,
            VoiceEvent::Connection(ConnectionStatus::Reconnecting { .. })
        )
    })
    .await;

    // Stop while the reconnect delay is still running.
    pipeline.stop().await;
    let delay = TransportSettings::default().reconnect_delay();
    tokio::time::sleep(delay * 10).await;

    assert_eq!(connector.attempts(), 1);
    assert!(agents.try_recv().is_err(), "no connection after stop");
    assert_eq!(pipeline.state(), ConversationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn reconnect_exhaustion_is_fatal() {
    let (connector, _agents) = Connector::new(false);
    let mut config = VoicePipelineConfig::default();
    config.transport.max_reconnect_attempts = 2;
    let (mut pipeline, mut rx) = pipeline_with(config, connector);
    let mic = Mic::default();

    pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(Speaker::default()))
        .await
        .unwrap();

    let event = wait_for(&mut rx, |e| matches!(e, VoiceEvent::Error { .. })).await;
    let VoiceEvent::Error { message, fatal } = event else {
        unreachable!()
    };
    assert!(fatal);
    assert!(message.contains('2'), "got {message}");

    assert!(!pipeline.is_active());
    assert_eq!(pipeline.state(), ConversationState::Idle);
    assert!(!mic.is_open());
    assert_eq!(pipeline.stats().transport.reconnects, 2);

    // A stopped session can be stopped again.
    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn losing_the_microphone_ends_the_session() {
    let (mut pipeline, mut rx, mut agent, mic, _speaker) = listening_session().await;

    mic.unplug();
    let event = wait_for(&mut rx, |e| matches!(e, VoiceEvent::Error { .. })).await;
    let VoiceEvent::Error { message, fatal } = event else {
        unreachable!()
    };
    assert!(fatal);
    assert!(message.contains("device unplugged"), "got {message}");

    assert!(!pipeline.is_active());
    assert_eq!(pipeline.state(), ConversationState::Idle);
    assert!(!mic.is_open());
    assert_eq!(agent.next_frame().await, None);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn microphone_denial_fails_start() {
    let (connector, mut agents) = Connector::new(true);
    let (mut pipeline, mut rx) = pipeline_with(VoicePipelineConfig::default(), connector);

    let err = pipeline
        .start_with_audio(Box::new(Mic::denied()), Box::new(Speaker::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::MicrophonePermissionDenied));

    assert!(!pipeline.is_active());
    assert_eq!(pipeline.state(), ConversationState::Idle);
    let events = drain_events(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [VoiceEvent::Error { fatal: true, .. }]
    ));

    settle().await;
    assert!(agents.try_recv().is_err(), "no connection attempt expected");
}

#[tokio::test(start_paused = true)]
async fn credential_failure_releases_microphone() {
    let (connector, _agents) = Connector::new(true);
    let empty = Arc::new(StaticCredentials::new(AgentCredentials::new("ws://x", "")));
    let (pipeline, _rx) = VoicePipeline::new(VoicePipelineConfig::default(), empty);
    let mut pipeline = pipeline.with_connector(connector);
    let mic = Mic::default();

    let err = pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(Speaker::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::Credentials(_)));
    assert_eq!(mic.starts.load(Ordering::SeqCst), 1);
    assert!(!mic.is_open());
    assert!(!pipeline.is_active());
}

#[tokio::test(start_paused = true)]
async fn invalid_config_fails_start() {
    let (connector, _agents) = Connector::new(true);
    let mut config = VoicePipelineConfig::default();
    config.audio.block_size = 10;
    let (mut pipeline, _rx) = pipeline_with(config, connector);
    let mic = Mic::default();

    let err = pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(Speaker::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::Config(_)));
    assert_eq!(mic.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn start_twice_is_a_no_op() {
    let (connector, mut agents) = Connector::new(true);
    let (mut pipeline, _rx) = pipeline_with(VoicePipelineConfig::default(), connector);
    let mic = Mic::default();

    pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(Speaker::default()))
        .await
        .unwrap();
    pipeline
        .start_with_audio(Box::new(mic.clone()), Box::new(Speaker::default()))
        .await
        .unwrap();

    next_agent(&mut agents).await;
    settle().await;
    assert!(agents.try_recv().is_err(), "only one connection expected");
    assert_eq!(mic.starts.load(Ordering::SeqCst), 1);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_releases_everything_and_is_idempotent() {
    let (mut pipeline, mut rx, mut agent, mic, _speaker) = listening_session().await;

    pipeline.stop().await;
    assert_eq!(pipeline.state(), ConversationState::Idle);
    assert!(!pipeline.is_active());
    assert!(!mic.is_open());
    wait_for_state(&mut rx, ConversationState::Idle).await;

    // The client side of the connection is gone.
    assert_eq!(agent.next_frame().await, None);

    pipeline.stop().await;
    let states: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, VoiceEvent::StateChanged(_)))
        .collect();
    assert!(states.is_empty(), "second stop must not emit: {states:?}");
}

#[tokio::test(start_paused = true)]
async fn session_can_restart_after_stop() {
    let (connector, mut agents) = Connector::new(true);
    let (mut pipeline, mut rx) = pipeline_with(VoicePipelineConfig::default(), connector);

    for _ in 0..2 {
        pipeline
            .start_with_audio(Box::new(Mic::default()), Box::new(Speaker::default()))
            .await
            .unwrap();
        let mut agent = next_agent(&mut agents).await;
        agent.next_frame().await;
        agent.send_json(r#"{"type":"SettingsApplied"}"#);
        wait_for_state(&mut rx, ConversationState::Listening).await;
        pipeline.stop().await;
        wait_for_state(&mut rx, ConversationState::Idle).await;
    }
}
