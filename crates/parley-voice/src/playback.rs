//! Agent speech output via `rodio`.
//!
//! Chunks are appended to a single `Sink`, which plays queued sources
//! back-to-back without gaps. Each chunk is followed by an
//! [`EmptyCallback`](rodio::source::EmptyCallback) that fires the chunk's
//! completion handle once the sink reaches it.

use std::sync::Mutex;

use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink};

use crate::audio_io::PlaybackCompletion;
use crate::error::VoiceError;

/// Audio playback handle. Owned by the audio thread.
///
/// The output device is opened lazily on the first chunk so a missing
/// speaker only fails playback, never session start.
#[derive(Default)]
pub struct AudioPlayback {
    /// rodio output stream (must be kept alive) and its handle.
    output: Option<(OutputStream, OutputStreamHandle)>,

    /// Current playback sink (recreated after every stop).
    sink: Option<Sink>,
}

impl AudioPlayback {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            output: None,
            sink: None,
        }
    }

    fn sink(&mut self) -> Result<&Sink, VoiceError> {
        if self.output.is_none() {
            let output = OutputStream::try_default()
                .map_err(|e| VoiceError::OutputStreamError(e.to_string()))?;
            tracing::info!("Audio playback initialized on default output device");
            self.output = Some(output);
        }

        if self.sink.is_none() {
            let Some((_, handle)) = &self.output else {
                return Err(VoiceError::NoOutputDevice);
            };
            let sink =
                Sink::try_new(handle).map_err(|e| VoiceError::OutputStreamError(e.to_string()))?;
            self.sink = Some(sink);
        }

        self.sink.as_ref().ok_or(VoiceError::NoOutputDevice)
    }

    /// Queue a mono chunk and arrange for `done` to fire when it has played.
    pub fn play(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        done: PlaybackCompletion,
    ) -> Result<(), VoiceError> {
        let sink = self.sink()?;
        let chunk_id = done.chunk_id();
        let len = samples.len();

        // EmptyCallback takes `Fn`; the completion fires at most once.
        let done = Mutex::new(Some(done));
        sink.append(SamplesBuffer::new(1, sample_rate, samples));
        sink.append(EmptyCallback::<f32>::new(Box::new(move || {
            if let Some(done) = done.lock().ok().and_then(|mut slot| slot.take()) {
                done.finished();
            }
        })));

        tracing::trace!(chunk_id, samples = len, sample_rate, "Chunk queued for playback");
        Ok(())
    }

    /// Stop immediately and drop everything queued.
    pub fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
            tracing::debug!("Audio playback stopped");
        }
    }
}
