//! `AudioSource` and `AudioSink` trait abstractions for voice pipeline audio I/O.
//!
//! These traits decouple the session from any specific audio backend:
//!
//! | Implementor | Where used |
//! |---|---|
//! | [`LocalAudioSource`](crate::audio_local::LocalAudioSource) / [`LocalAudioSink`](crate::audio_local::LocalAudioSink) | Desktop and CLI: cpal capture + rodio playback on the local machine |
//! | test doubles | Integration tests: scripted microphone and recording speaker |
//!
//! Both traits are **object-safe** (`Box<dyn AudioSource>` / `Box<dyn AudioSink>`).
//! All methods take `&self`; interior mutability (channels, atomic flags)
//! handles state changes inside each implementation.

use tokio::sync::mpsc;

use crate::config::CaptureConstraints;
use crate::error::VoiceError;

/// Information about an available audio input device.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

// ── Capture ────────────────────────────────────────────────────────

/// Message delivered from a running microphone stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Mono f32 samples at [`CaptureStream::sample_rate`].
    Samples(Vec<f32>),
    /// The device stopped delivering audio (unplugged, driver error).
    Lost(String),
}

/// A live microphone stream handed back by [`AudioSource::start_capture`].
#[derive(Debug)]
pub struct CaptureStream {
    /// Rate the device actually opened at. May differ from the requested
    /// rate; the capture engine resamples in that case.
    pub sample_rate: u32,
    pub events: mpsc::UnboundedReceiver<CaptureEvent>,
}

/// Abstraction over an audio input source (microphone capture).
pub trait AudioSource: Send + Sync {
    /// Acquire the microphone and begin streaming mono samples.
    ///
    /// `sample_rate` is the preferred rate; implementations open at it when
    /// the device supports it.
    fn start_capture(
        &self,
        constraints: &CaptureConstraints,
        sample_rate: u32,
    ) -> Result<CaptureStream, VoiceError>;

    /// Release the microphone. Idempotent.
    fn stop_capture(&self);
}

// ── Playback ───────────────────────────────────────────────────────

/// Completion report for one played chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackNotice {
    pub chunk_id: u64,
    /// `Err` carries a description when the chunk could not be played out.
    pub outcome: Result<(), String>,
}

/// One-shot handle a sink uses to report that a chunk finished.
///
/// Reports for chunks that were interrupted are ignored by the playback
/// engine (it matches on `chunk_id`), so sinks need no cancellation logic
/// beyond dropping queued audio on [`AudioSink::stop`].
#[derive(Debug)]
pub struct PlaybackCompletion {
    chunk_id: u64,
    tx: mpsc::UnboundedSender<PlaybackNotice>,
}

impl PlaybackCompletion {
    pub(crate) const fn new(chunk_id: u64, tx: mpsc::UnboundedSender<PlaybackNotice>) -> Self {
        Self { chunk_id, tx }
    }

    #[must_use]
    pub const fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    /// The chunk drained naturally.
    pub fn finished(self) {
        self.report(Ok(()));
    }

    /// The chunk could not be played to the end.
    pub fn failed(self, reason: impl Into<String>) {
        self.report(Err(reason.into()));
    }

    fn report(self, outcome: Result<(), String>) {
        // Receiver gone means the session was torn down.
        let _ = self.tx.send(PlaybackNotice {
            chunk_id: self.chunk_id,
            outcome,
        });
    }
}

/// Abstraction over an audio output sink (agent speech playback).
pub trait AudioSink: Send + Sync {
    /// Queue `samples` (mono f32) behind anything already playing.
    ///
    /// Implementations must call `done` once the chunk has been played out
    /// and must not insert silence between consecutive chunks.
    fn play(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        done: PlaybackCompletion,
    ) -> Result<(), VoiceError>;

    /// Stop playback immediately and discard queued audio. Completion
    /// handles for discarded chunks may be dropped without firing.
    fn stop(&self);
}
