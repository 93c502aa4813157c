//! Dedicated audio I/O thread. Isolates `!Send` audio resources from the async runtime.
//!
//! `cpal::Stream` (capture) and `rodio::OutputStream` (playback) are `!Send` on
//! some platforms. Both are confined to a single OS thread; the rest of the
//! crate talks to them through [`AudioThreadHandle`], a `Send + Sync` proxy
//! that routes every call through an [`AudioCommand`].

use std::sync::mpsc;
use std::thread;

use tokio::sync::mpsc as tokio_mpsc;

use crate::audio_io::{CaptureEvent, PlaybackCompletion};
use crate::capture::AudioCapture;
use crate::config::CaptureConstraints;
use crate::error::VoiceError;
use crate::playback::AudioPlayback;

// ── Commands ───────────────────────────────────────────────────────

/// A command sent to the audio thread.
enum AudioCommand {
    /// Acquire the microphone; replies with the device sample rate.
    StartCapture {
        constraints: CaptureConstraints,
        sample_rate: u32,
        events: tokio_mpsc::UnboundedSender<CaptureEvent>,
        reply: mpsc::Sender<Result<u32, VoiceError>>,
    },

    /// Release the microphone (fire-and-forget).
    StopCapture,

    /// Queue a chunk behind whatever is playing.
    Play {
        samples: Vec<f32>,
        sample_rate: u32,
        done: PlaybackCompletion,
        reply: mpsc::Sender<Result<(), VoiceError>>,
    },

    /// Stop playback immediately (fire-and-forget).
    StopPlayback,

    /// Shut down the audio thread, releasing all resources.
    Shutdown,
}

// ── Handle (Send + Sync proxy) ─────────────────────────────────────

/// `Send + Sync` handle to the dedicated audio I/O thread.
///
/// All methods take `&self`. Request/reply methods block the caller until the
/// audio thread responds, which takes microseconds plus the device operation.
pub struct AudioThreadHandle {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioThreadHandle {
    /// Spawn the audio thread.
    ///
    /// No device is opened here: the microphone is acquired by
    /// [`start_capture`](Self::start_capture) and the speaker on first play.
    pub fn spawn() -> Result<Self, VoiceError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();

        let thread = thread::Builder::new()
            .name("parley-audio".into())
            .spawn(move || Self::run(&cmd_rx))?;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    // ── Capture ────────────────────────────────────────────────────

    pub fn start_capture(
        &self,
        constraints: &CaptureConstraints,
        sample_rate: u32,
        events: tokio_mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<u32, VoiceError> {
        self.send_and_recv(|reply| AudioCommand::StartCapture {
            constraints: constraints.clone(),
            sample_rate,
            events,
            reply,
        })
    }

    pub fn stop_capture(&self) {
        let _ = self.cmd_tx.send(AudioCommand::StopCapture);
    }

    // ── Playback ───────────────────────────────────────────────────

    pub fn play(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        done: PlaybackCompletion,
    ) -> Result<(), VoiceError> {
        self.send_and_recv(|reply| AudioCommand::Play {
            samples,
            sample_rate,
            done,
            reply,
        })
    }

    pub fn stop_playback(&self) {
        let _ = self.cmd_tx.send(AudioCommand::StopPlayback);
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Send a command that expects a `Result<T, VoiceError>` reply. Channel
    /// failures map to [`VoiceError::AudioThreadDied`].
    fn send_and_recv<T>(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<T, VoiceError>>) -> AudioCommand,
    ) -> Result<T, VoiceError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| VoiceError::AudioThreadDied)?;
        rx.recv().map_err(|_| VoiceError::AudioThreadDied)?
    }

    // ── Audio thread event loop ────────────────────────────────────

    /// Owns `AudioCapture` and `AudioPlayback` for their entire lifetime.
    fn run(cmd_rx: &mpsc::Receiver<AudioCommand>) {
        let mut capture = AudioCapture::new();
        let mut playback = AudioPlayback::new();

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                AudioCommand::StartCapture {
                    constraints,
                    sample_rate,
                    events,
                    reply,
                } => {
                    let _ = reply.send(capture.start(&constraints, sample_rate, events));
                }

                AudioCommand::StopCapture => capture.stop(),

                AudioCommand::Play {
                    samples,
                    sample_rate,
                    done,
                    reply,
                } => {
                    let _ = reply.send(playback.play(samples, sample_rate, done));
                }

                AudioCommand::StopPlayback => playback.stop(),

                AudioCommand::Shutdown => break,
            }
        }

        // `capture` and `playback` are dropped here, on the audio thread.
        tracing::debug!("Audio thread shutting down");
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        // The thread may already be dead.
        let _ = self.cmd_tx.send(AudioCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
