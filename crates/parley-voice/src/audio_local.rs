//! Local (cpal/rodio) adapters for the [`AudioSource`] and [`AudioSink`] traits.
//!
//! [`LocalAudioSource`] and [`LocalAudioSink`] share a single
//! `Arc<AudioThreadHandle>`: the audio OS thread owns both the cpal capture
//! stream and the rodio playback sink. Every method on the handle takes
//! `&self`, so no `Mutex` is needed around it.
//!
//! ```no_run
//! # use parley_voice::{VoiceError, audio_local::new_pair};
//! let (source, sink) = new_pair()?;
//! # Ok::<(), VoiceError>(())
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio_io::{
    AudioDeviceInfo, AudioSink, AudioSource, CaptureStream, PlaybackCompletion,
};
use crate::audio_thread::AudioThreadHandle;
use crate::config::CaptureConstraints;
use crate::error::VoiceError;

// ── LocalAudioSource ───────────────────────────────────────────────

/// Local microphone adapter. Created by [`new_pair`].
pub struct LocalAudioSource {
    handle: Arc<AudioThreadHandle>,
}

impl AudioSource for LocalAudioSource {
    fn start_capture(
        &self,
        constraints: &CaptureConstraints,
        sample_rate: u32,
    ) -> Result<CaptureStream, VoiceError> {
        let (tx, events) = mpsc::unbounded_channel();
        let sample_rate = self.handle.start_capture(constraints, sample_rate, tx)?;
        Ok(CaptureStream {
            sample_rate,
            events,
        })
    }

    fn stop_capture(&self) {
        self.handle.stop_capture();
    }
}

// ── LocalAudioSink ─────────────────────────────────────────────────

/// Local speaker adapter. Created by [`new_pair`].
pub struct LocalAudioSink {
    handle: Arc<AudioThreadHandle>,
}

impl AudioSink for LocalAudioSink {
    fn play(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        done: PlaybackCompletion,
    ) -> Result<(), VoiceError> {
        self.handle.play(samples, sample_rate, done)
    }

    fn stop(&self) {
        self.handle.stop_playback();
    }
}

// ── Constructor ────────────────────────────────────────────────────

/// Spawn one [`AudioThreadHandle`] and return a source/sink pair sharing it.
///
/// # Errors
///
/// Returns [`VoiceError::Io`] if the audio thread cannot be spawned.
pub fn new_pair() -> Result<(LocalAudioSource, LocalAudioSink), VoiceError> {
    let handle = Arc::new(AudioThreadHandle::spawn()?);
    let source = LocalAudioSource {
        handle: Arc::clone(&handle),
    };
    let sink = LocalAudioSink { handle };
    Ok((source, sink))
}

/// List input devices without starting a session.
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>, VoiceError> {
    crate::capture::AudioCapture::list_devices()
}
