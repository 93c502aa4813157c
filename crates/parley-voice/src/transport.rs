//! Full-duplex link to the voice agent.
//!
//! Two layers:
//!
//! - [`AgentConnector`] opens one connection and hands back an [`AgentLink`]
//!   (a pair of channels). [`WebSocketConnector`] is the production
//!   implementation: it performs the upgrade with an `Authorization` header
//!   and runs a pump task that shuttles frames and sends keepalive pings.
//! - [`TransportSession`] owns the connection policy: it sends the settings
//!   message when a link opens, demultiplexes inbound frames, gates outbound
//!   audio on the link being open, and decides between reconnecting and
//!   giving up when the link drops.
//!
//! Everything asynchronous the session starts (connect attempts, reconnect
//! timers, inbound forwarding) reports back through a single
//! [`TransportEvent`] channel tagged with a connection generation. Events
//! from an older generation are discarded, so a late callback from a
//! previous connection can never affect the current one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::TransportSettings;
use crate::credentials::{AgentCredentials, CredentialSource};
use crate::error::VoiceError;
use crate::pcm;
use crate::protocol::{AgentEvent, decode_event};

/// Longest text preview included in "dropped message" logs.
const LOG_PREVIEW_CHARS: usize = 120;

// ── Links ──────────────────────────────────────────────────────────

/// A frame to send to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// A frame received from the agent, or the end of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    /// The connection ended. Always the last frame on a link.
    Closed { reason: Option<String> },
}

/// An open connection. Dropping `outbound` closes it.
#[derive(Debug)]
pub struct AgentLink {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Opens connections to the voice agent.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Connect and complete the protocol handshake within
    /// `settings.handshake_timeout()`.
    async fn connect(
        &self,
        credentials: &AgentCredentials,
        settings: &TransportSettings,
    ) -> Result<AgentLink, VoiceError>;
}

// ── WebSocket connector ────────────────────────────────────────────

/// Connects over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl AgentConnector for WebSocketConnector {
    async fn connect(
        &self,
        credentials: &AgentCredentials,
        settings: &TransportSettings,
    ) -> Result<AgentLink, VoiceError> {
        let mut request = credentials
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::ConnectFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", credentials.token))
            .map_err(|e| VoiceError::Credentials(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        tracing::debug!(url = %credentials.url, "Connecting to voice agent");
        let (ws, _response) = tokio::time::timeout(settings.handshake_timeout(), connect_async(request))
            .await
            .map_err(|_| VoiceError::HandshakeTimeout(settings.handshake_timeout_ms))?
            .map_err(|e| VoiceError::ConnectFailed(e.to_string()))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws, out_rx, in_tx, settings.keepalive_interval()));

        Ok(AgentLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Shuttle frames between the socket and the link channels until either
/// side goes away.
async fn pump(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    keepalive: Option<Duration>,
) {
    let (mut write, mut read) = ws.split();
    let mut ping = keepalive.map(|period| tokio::time::interval_at(Instant::now() + period, period));

    let reason = loop {
        tokio::select! {
            msg = read.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => InboundFrame::Text(text),
                    Some(Ok(Message::Binary(bytes))) => InboundFrame::Binary(bytes),
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| format!("closed by server ({}): {}", f.code, f.reason));
                    }
                    None => break Some("connection closed by server".to_string()),
                    Some(Err(e)) => break Some(format!("read error: {e}")),
                    // Ping/Pong are answered by tungstenite.
                    Some(Ok(_)) => continue,
                };
                if inbound.send(frame).is_err() {
                    // Nobody is listening any more; shut the socket.
                    let _ = write.close().await;
                    return;
                }
            }
            out = outbound.recv() => {
                let Some(frame) = out else {
                    // Local close.
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    return;
                };
                let message = match frame {
                    OutboundFrame::Text(text) => Message::Text(text),
                    OutboundFrame::Binary(bytes) => Message::Binary(bytes),
                };
                if let Err(e) = write.send(message).await {
                    break Some(format!("send error: {e}"));
                }
            }
            () = tick(ping.as_mut()) => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    break Some(format!("ping error: {e}"));
                }
            }
        }
    };

    let _ = inbound.send(InboundFrame::Closed { reason });
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Session ────────────────────────────────────────────────────────

/// Connection status reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32, max_attempts: u32 },
    Disconnected,
}

/// Completion of something the transport started in the background.
#[derive(Debug)]
pub struct TransportEvent {
    generation: u64,
    kind: TransportEventKind,
}

#[derive(Debug)]
enum TransportEventKind {
    Opened(AgentLink),
    Failed(VoiceError),
    Frame(InboundFrame),
    ReconnectDue,
}

/// Demultiplexed inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Agent speech as PCM16 samples.
    Audio(Vec<i16>),
    Event(AgentEvent),
}

/// What a [`TransportEvent`] meant for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportUpdate {
    /// Stale, internal, or nothing to report.
    Nothing,
    /// A connection opened and the settings message was sent.
    Opened,
    Inbound(Inbound),
    /// The connection dropped; another attempt is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// The connection dropped and the reconnect budget is spent.
    Exhausted { attempts: u32 },
}

/// Transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub audio_frames_sent: u64,
    pub audio_bytes_sent: u64,
    pub audio_bytes_received: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub reconnects: u64,
}

pub struct TransportSession {
    connector: Arc<dyn AgentConnector>,
    credentials: Arc<dyn CredentialSource>,
    settings: TransportSettings,
    settings_message: String,

    events: mpsc::UnboundedSender<TransportEvent>,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    attempts: u32,
    carry: Option<u8>,
    status: ConnectionStatus,
    closed: bool,
    tasks: Vec<JoinHandle<()>>,
    stats: TransportStats,
}

impl TransportSession {
    /// `settings_message` is sent verbatim as the first frame of every
    /// connection. Background completions arrive on the returned receiver
    /// and must be passed to [`handle`](Self::handle).
    #[must_use]
    pub fn new(
        connector: Arc<dyn AgentConnector>,
        credentials: Arc<dyn CredentialSource>,
        settings: TransportSettings,
        settings_message: String,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            connector,
            credentials,
            settings,
            settings_message,
            events,
            generation: 0,
            outbound: None,
            attempts: 0,
            carry: None,
            status: ConnectionStatus::Disconnected,
            closed: false,
            tasks: Vec::new(),
            stats: TransportStats::default(),
        };
        (session, events_rx)
    }

    /// Start a connection attempt in the background.
    ///
    /// `credentials` skips the fetch for this attempt (used for the first
    /// connection, whose credentials were already validated).
    pub fn connect(&mut self, credentials: Option<AgentCredentials>) {
        if self.closed {
            return;
        }
        self.generation += 1;
        self.outbound = None;
        if self.attempts == 0 {
            self.status = ConnectionStatus::Connecting;
        }

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let source = Arc::clone(&self.credentials);
        let settings = self.settings.clone();
        let events = self.events.clone();

        self.spawn(async move {
            let result = async {
                let credentials = match credentials {
                    Some(c) => c,
                    None => source.fetch().await?,
                };
                connector.connect(&credentials, &settings).await
            }
            .await;

            let kind = match result {
                Ok(link) => TransportEventKind::Opened(link),
                Err(e) => TransportEventKind::Failed(e),
            };
            let _ = events.send(TransportEvent { generation, kind });
        });
    }

    /// Process one background completion.
    pub fn handle(&mut self, event: TransportEvent) -> TransportUpdate {
        if self.closed || event.generation != self.generation {
            return TransportUpdate::Nothing;
        }

        match event.kind {
            TransportEventKind::Opened(link) => self.on_opened(link),
            TransportEventKind::Failed(error) => {
                tracing::warn!(%error, "Voice agent connection attempt failed");
                self.on_lost()
            }
            TransportEventKind::Frame(InboundFrame::Closed { reason }) => {
                tracing::warn!(
                    reason = reason.as_deref().unwrap_or("none"),
                    "Voice agent connection closed"
                );
                self.on_lost()
            }
            TransportEventKind::Frame(frame) => self
                .demux(frame)
                .map_or(TransportUpdate::Nothing, TransportUpdate::Inbound),
            TransportEventKind::ReconnectDue => {
                self.connect(None);
                TransportUpdate::Nothing
            }
        }
    }

    fn on_opened(&mut self, link: AgentLink) -> TransportUpdate {
        let AgentLink { outbound, mut inbound } = link;

        if outbound
            .send(OutboundFrame::Text(self.settings_message.clone()))
            .is_err()
        {
            tracing::warn!("Voice agent link closed before settings could be sent");
            return self.on_lost();
        }

        let generation = self.generation;
        let events = self.events.clone();
        self.spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let last = matches!(frame, InboundFrame::Closed { .. });
                let event = TransportEvent {
                    generation,
                    kind: TransportEventKind::Frame(frame),
                };
                if events.send(event).is_err() || last {
                    return;
                }
            }
            // Pump vanished without a close frame.
            let _ = events.send(TransportEvent {
                generation,
                kind: TransportEventKind::Frame(InboundFrame::Closed { reason: None }),
            });
        });

        if self.attempts > 0 {
            tracing::info!(after_attempts = self.attempts, "Reconnected to voice agent");
        } else {
            tracing::info!("Connected to voice agent");
        }
        self.outbound = Some(outbound);
        self.attempts = 0;
        self.carry = None;
        self.status = ConnectionStatus::Connected;
        TransportUpdate::Opened
    }

    /// The current connection is gone (or never came up).
    fn on_lost(&mut self) -> TransportUpdate {
        self.outbound = None;
        self.carry = None;

        let max = self.settings.max_reconnect_attempts;
        if self.attempts >= max {
            self.status = ConnectionStatus::Disconnected;
            return TransportUpdate::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.stats.reconnects += 1;
        self.status = ConnectionStatus::Reconnecting {
            attempt: self.attempts,
            max_attempts: max,
        };

        let delay = self.settings.reconnect_delay();
        let generation = self.generation;
        let events = self.events.clone();
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(TransportEvent {
                generation,
                kind: TransportEventKind::ReconnectDue,
            });
        });

        tracing::info!(
            attempt = self.attempts,
            max_attempts = max,
            delay_ms = self.settings.reconnect_delay_ms,
            "Scheduling voice agent reconnect"
        );
        TransportUpdate::Reconnecting {
            attempt: self.attempts,
            delay,
        }
    }

    fn demux(&mut self, frame: InboundFrame) -> Option<Inbound> {
        match frame {
            InboundFrame::Binary(bytes) => {
                self.stats.audio_bytes_received += bytes.len() as u64;
                Some(Inbound::Audio(self.decode_audio(&bytes)))
            }
            InboundFrame::Text(text) => {
                self.stats.messages_received += 1;
                match decode_event(&text) {
                    Ok(event) => {
                        tracing::trace!(kind = event.kind(), "Agent message");
                        Some(Inbound::Event(event))
                    }
                    Err(error) => {
                        self.stats.messages_dropped += 1;
                        let preview: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
                        tracing::warn!(%error, message = %preview, "Dropping agent message");
                        None
                    }
                }
            }
            InboundFrame::Closed { .. } => None,
        }
    }

    /// PCM16 samples, carrying an odd trailing byte into the next frame.
    fn decode_audio(&mut self, bytes: &[u8]) -> Vec<i16> {
        let (samples, rest) = match self.carry.take() {
            Some(first) => {
                let mut joined = Vec::with_capacity(bytes.len() + 1);
                joined.push(first);
                joined.extend_from_slice(bytes);
                pcm::decode_pcm16_le(&joined)
            }
            None => pcm::decode_pcm16_le(bytes),
        };
        self.carry = rest;
        samples
    }

    /// Send one capture frame. Returns `false` (and sends nothing) unless
    /// the connection is open.
    pub fn send_audio(&mut self, payload: Vec<u8>) -> bool {
        let Some(outbound) = &self.outbound else {
            return false;
        };
        let len = payload.len() as u64;
        if outbound.send(OutboundFrame::Binary(payload)).is_err() {
            // The close frame is already on its way through the event channel.
            self.outbound = None;
            return false;
        }
        self.stats.audio_frames_sent += 1;
        self.stats.audio_bytes_sent += len;
        true
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.outbound.is_some()
    }

    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub const fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Close the connection and cancel everything in flight. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.generation += 1;
        // Dropping the sender makes the pump send a close frame.
        self.outbound = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.status = ConnectionStatus::Disconnected;
        tracing::debug!("Voice agent transport closed");
    }

    fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(task));
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}
