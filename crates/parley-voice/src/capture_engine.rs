//! Microphone capture engine.
//!
//! Turns the raw device stream from an [`AudioSource`] into fixed-size
//! outbound blocks at the capture rate, and keeps a snapshot buffer for
//! level/waveform telemetry. Two independent paths hang off every delivery:
//!
//! ```text
//! device ─► resample ─┬─► frame assembler ─► block_size frames ─► transport
//!                     └─► snapshot ring ──► analyser (on the telemetry tick)
//! ```

use rubato::{FftFixedIn, Resampler as _};
use tokio::sync::mpsc;

use crate::analysis::{SignalAnalyzer, SnapshotRing, waveform};
use crate::audio_io::{AudioSource, CaptureEvent};
use crate::config::{AudioSettings, CaptureConstraints};
use crate::error::VoiceError;
use crate::pcm;

/// Input chunk size handed to the FFT resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// One outbound block of mono capture audio at the capture rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Little-endian linear16 payload for the wire.
    #[must_use]
    pub fn to_pcm16_le(&self) -> Vec<u8> {
        pcm::encode_pcm16_le(&self.samples)
    }
}

/// A single telemetry reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Normalized input level in `[0, 1]`.
    pub level: f32,
    /// 64 points in `[-1, 1]`.
    pub waveform: Vec<f32>,
}

// ── Resampling ─────────────────────────────────────────────────────

/// Streaming wrapper around rubato's fixed-input FFT resampler.
///
/// Deliveries of arbitrary length are buffered until a full resampler
/// chunk is available.
struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    fn new(from_rate: u32, to_rate: u32) -> Result<Self, VoiceError> {
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLE_CHUNK,
            2, // sub-chunks for quality
            1, // mono
        )
        .map_err(|e| VoiceError::ResampleError(e.to_string()))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, VoiceError> {
        self.pending.extend_from_slice(input);
        let mut output = Vec::new();

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let result = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| VoiceError::ResampleError(e.to_string()))?;
            if let Some(channel) = result.first() {
                output.extend_from_slice(channel);
            }
        }

        Ok(output)
    }
}

// ── Frame assembly ─────────────────────────────────────────────────

/// Cuts a continuous sample stream into blocks of exactly `block_size`.
#[derive(Debug)]
struct FrameAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    fn new(block_size: usize) -> Self {
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame { samples });
        }
        frames
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Owns the microphone for the lifetime of a session.
pub struct AudioCaptureEngine {
    source: Box<dyn AudioSource>,
    constraints: CaptureConstraints,
    capture_rate: u32,
    stream: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    resampler: Option<StreamResampler>,
    assembler: FrameAssembler,
    ring: SnapshotRing,
    analyzer: SignalAnalyzer,
}

impl AudioCaptureEngine {
    #[must_use]
    pub fn new(
        source: Box<dyn AudioSource>,
        settings: &AudioSettings,
        constraints: CaptureConstraints,
    ) -> Self {
        Self {
            source,
            constraints,
            capture_rate: settings.capture_sample_rate,
            stream: None,
            resampler: None,
            assembler: FrameAssembler::new(settings.block_size),
            ring: SnapshotRing::new(settings.analysis_fft_size),
            analyzer: SignalAnalyzer::new(settings.analysis_fft_size),
        }
    }

    /// Acquire the microphone.
    ///
    /// Any acquisition failure is returned as-is; permission and
    /// missing-device errors are fatal to the session.
    pub fn start(&mut self) -> Result<(), VoiceError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self
            .source
            .start_capture(&self.constraints, self.capture_rate)?;

        self.resampler = if stream.sample_rate == self.capture_rate {
            None
        } else {
            tracing::info!(
                device_rate = stream.sample_rate,
                capture_rate = self.capture_rate,
                "Resampling microphone input"
            );
            match StreamResampler::new(stream.sample_rate, self.capture_rate) {
                Ok(r) => Some(r),
                Err(e) => {
                    self.source.stop_capture();
                    return Err(e);
                }
            }
        };

        self.assembler.clear();
        self.ring.clear();
        self.analyzer.reset();
        self.stream = Some(stream.events);
        Ok(())
    }

    /// Release the microphone and drop any partial block. Idempotent.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            self.source.stop_capture();
        }
        self.resampler = None;
        self.assembler.clear();
        self.ring.clear();
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Next message from the device. Pending forever while stopped, so it
    /// can sit in a `select!` unconditionally.
    pub async fn recv(&mut self) -> Option<CaptureEvent> {
        match &mut self.stream {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Feed one device delivery; returns the completed outbound frames.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<AudioFrame>, VoiceError> {
        let resampled;
        let samples = match &mut self.resampler {
            Some(resampler) => {
                resampled = resampler.process(samples)?;
                resampled.as_slice()
            }
            None => samples,
        };

        self.ring.push(samples);
        Ok(self.assembler.push(samples))
    }

    /// The device went away. Releases the source and stops telemetry.
    pub fn mark_lost(&mut self) {
        tracing::warn!("Microphone stream lost");
        self.stop();
    }

    /// Level and waveform of the most recent audio, or `None` while stopped.
    pub fn telemetry(&mut self) -> Option<Telemetry> {
        if self.stream.is_none() {
            return None;
        }
        let snapshot = self.ring.snapshot();
        Some(Telemetry {
            level: self.analyzer.level(&snapshot),
            waveform: waveform(&snapshot),
        })
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
