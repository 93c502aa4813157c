//! Level and waveform telemetry for the microphone signal.
//!
//! Both measurements work on a snapshot of the most recent `fft_size`
//! capture samples and mirror the byte-domain analyser that browser-based
//! clients expose, so UI code written against either looks the same:
//!
//! - **level**: Blackman-windowed FFT, magnitudes smoothed over time,
//!   converted to decibels and scaled to a byte in `[MIN_DB, MAX_DB]`; the
//!   level is the mean byte divided by 255.
//! - **waveform**: the snapshot quantised to unsigned bytes (`128 * (1 + x)`),
//!   downsampled with stride `fft_size / 64`, each point mapped back to
//!   `[-1, 1]` as `(byte - 128) / 128`.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::config::WAVEFORM_POINTS;

/// Lower bound of the decibel range mapped to byte 0.
const MIN_DB: f32 = -100.0;

/// Upper bound of the decibel range mapped to byte 255.
const MAX_DB: f32 = -30.0;

/// Weight of the previous spectrum when smoothing.
const SMOOTHING: f32 = 0.8;

// ── Snapshot buffer ────────────────────────────────────────────────

/// Holds the most recent `capacity` capture samples.
#[derive(Debug)]
pub struct SnapshotRing {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SnapshotRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append samples, evicting the oldest beyond capacity.
    pub fn push(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.capacity);
        for &s in &samples[skip..] {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(s);
        }
    }

    /// Copy out exactly `capacity` samples, zero-padded at the front while
    /// the ring is still filling.
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.capacity - self.samples.len()];
        out.extend(self.samples.iter().copied());
        out
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

// ── Analyser ───────────────────────────────────────────────────────

/// Computes level and waveform from capture snapshots.
pub struct SignalAnalyzer {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex32>,
}

impl SignalAnalyzer {
    /// Create an analyser for snapshots of `fft_size` samples.
    ///
    /// `fft_size` must be a power of two no smaller than the waveform length;
    /// config validation guarantees this.
    #[must_use]
    pub fn new(fft_size: usize) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        #[allow(clippy::cast_precision_loss)]
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let x = i as f32 / n;
                0.08f32.mul_add((4.0 * PI * x).cos(), 0.5f32.mul_add(-(2.0 * PI * x).cos(), 0.42))
            })
            .collect();

        Self {
            fft_size,
            fft,
            window,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex32::new(0.0, 0.0); fft_size],
        }
    }

    #[must_use]
    pub const fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Byte-scaled magnitude spectrum (`fft_size / 2` bins).
    pub fn byte_spectrum(&mut self, snapshot: &[f32]) -> Vec<u8> {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let x = snapshot.get(i).copied().unwrap_or(0.0);
            *slot = Complex32::new(x * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        #[allow(clippy::cast_precision_loss)]
        let n = self.fft_size as f32;
        let mut bytes = Vec::with_capacity(self.smoothed.len());
        for (bin, prev) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[bin].norm() / n;
            let value = SMOOTHING.mul_add(*prev, (1.0 - SMOOTHING) * magnitude);
            *prev = if value.is_finite() { value } else { 0.0 };

            let db = 20.0 * prev.log10();
            let scaled = (255.0 / (MAX_DB - MIN_DB)) * (db - MIN_DB);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let byte = if scaled.is_nan() {
                0
            } else {
                scaled.floor().clamp(0.0, 255.0) as u8
            };
            bytes.push(byte);
        }
        bytes
    }

    /// Mean spectrum magnitude normalized to `[0, 1]`.
    pub fn level(&mut self, snapshot: &[f32]) -> f32 {
        let bytes = self.byte_spectrum(snapshot);
        if bytes.is_empty() {
            return 0.0;
        }
        let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f32 / bytes.len() as f32;
        (mean / 255.0).clamp(0.0, 1.0)
    }

    /// Forget smoothing history (e.g. when capture restarts).
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Quantise a float sample to the unsigned-byte time domain.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn time_domain_byte(sample: f32) -> u8 {
    let v = 128.0 * (1.0 + sample);
    if v.is_nan() {
        128
    } else {
        v.floor().clamp(0.0, 255.0) as u8
    }
}

/// Downsample a snapshot into the fixed 64-point waveform in `[-1, 1]`.
#[must_use]
pub fn waveform(snapshot: &[f32]) -> Vec<f32> {
    let stride = (snapshot.len() / WAVEFORM_POINTS).max(1);
    (0..WAVEFORM_POINTS)
        .map(|i| {
            let byte = snapshot
                .get(i * stride)
                .copied()
                .map_or(128, time_domain_byte);
            (f32::from(byte) - 128.0) / 128.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, freq_bin: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let phase = 2.0 * PI * (freq_bin * i) as f32 / len as f32;
                amplitude * phase.sin()
            })
            .collect()
    }

    #[test]
    fn silence_has_zero_level() {
        let mut analyzer = SignalAnalyzer::new(256);
        let level = analyzer.level(&[0.0; 256]);
        assert!(level.abs() < f32::EPSILON, "got {level}");
    }

    /// Deterministic broadband noise in [-0.5, 0.5).
    fn noise(len: usize) -> Vec<f32> {
        let mut state: u32 = 0x1234_5678;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                #[allow(clippy::cast_precision_loss)]
                let unit = (state >> 8) as f32 / (1u32 << 24) as f32;
                unit - 0.5
            })
            .collect()
    }

    #[test]
    fn broadband_signal_raises_level() {
        let mut analyzer = SignalAnalyzer::new(256);
        let signal = noise(256);
        // Let smoothing settle.
        let mut level = 0.0;
        for _ in 0..30 {
            level = analyzer.level(&signal);
        }
        assert!(level > 0.5, "got {level}");
        assert!(level <= 1.0);
    }

    #[test]
    fn reset_clears_smoothing() {
        let mut analyzer = SignalAnalyzer::new(256);
        let signal = noise(256);
        for _ in 0..5 {
            analyzer.level(&signal);
        }
        analyzer.reset();
        assert!(analyzer.level(&[0.0; 256]).abs() < f32::EPSILON);
    }

    #[test]
    fn waveform_has_64_points_in_range() {
        let snapshot = sine(256, 3, 1.0);
        let wave = waveform(&snapshot);
        assert_eq!(wave.len(), WAVEFORM_POINTS);
        assert!(wave.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn waveform_uses_stride_and_byte_mapping() {
        // Snapshot of 128 → stride 2; only even indices are sampled.
        let mut snapshot = vec![0.0f32; 128];
        snapshot[2] = -1.0;
        snapshot[3] = 1.0;
        let wave = waveform(&snapshot);
        assert!((wave[1] + 1.0).abs() < f32::EPSILON);
        assert!(wave[0].abs() < f32::EPSILON);
        // Full scale positive maps to byte 255 → 127/128.
        assert!((waveform(&[1.0; 64])[0] - 127.0 / 128.0).abs() < f32::EPSILON);
    }

    #[test]
    fn ring_keeps_most_recent_samples() {
        let mut ring = SnapshotRing::new(4);
        ring.push(&[1.0, 2.0]);
        assert_eq!(ring.snapshot(), vec![0.0, 0.0, 1.0, 2.0]);
        ring.push(&[3.0, 4.0, 5.0]);
        assert_eq!(ring.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
        ring.push(&[6.0, 7.0, 8.0, 9.0, 10.0]);
        assert_eq!(ring.snapshot(), vec![7.0, 8.0, 9.0, 10.0]);
        ring.clear();
        assert_eq!(ring.snapshot(), vec![0.0; 4]);
    }
}
