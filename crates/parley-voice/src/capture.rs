//! Microphone input via `cpal`.
//!
//! Opens the selected input device, preferring a mono configuration at the
//! requested rate. Whatever the device actually opens at, the stream callback
//! down-mixes to mono and forwards each hardware buffer as a
//! [`CaptureEvent::Samples`] message; resampling happens later in the
//! capture engine.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use tokio::sync::mpsc;

use crate::audio_io::{AudioDeviceInfo, CaptureEvent};
use crate::config::CaptureConstraints;
use crate::error::VoiceError;

/// Live microphone capture. Owned by the audio thread (`cpal::Stream` is
/// `!Send` on some hosts).
#[derive(Default)]
pub struct AudioCapture {
    /// The active cpal input stream (None when not recording).
    stream: Option<Stream>,
}

impl AudioCapture {
    #[must_use]
    pub const fn new() -> Self {
        Self { stream: None }
    }

    /// Acquire the microphone and start streaming into `tx`.
    ///
    /// Returns the rate the device opened at.
    pub fn start(
        &mut self,
        constraints: &CaptureConstraints,
        preferred_rate: u32,
        tx: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<u32, VoiceError> {
        // A second start replaces the previous stream.
        self.stop();

        let device = select_device(constraints.device_name.as_deref())?;
        let config = choose_config(&device, preferred_rate)?;
        let sample_rate = config.sample_rate().0;

        if constraints.echo_cancellation || constraints.noise_suppression || constraints.auto_gain_control
        {
            tracing::debug!(
                echo_cancellation = constraints.echo_cancellation,
                noise_suppression = constraints.noise_suppression,
                auto_gain_control = constraints.auto_gain_control,
                "Input processing constraints are left to the host audio stack"
            );
        }

        let stream = build_input_stream(&device, &config, tx)?;
        stream.play().map_err(|e| map_play_error(&e))?;

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels(),
            format = ?config.sample_format(),
            "Microphone capture started"
        );

        self.stream = Some(stream);
        Ok(sample_rate)
    }

    /// Release the microphone.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Microphone capture stopped");
        }
    }

    /// List available audio input devices.
    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, VoiceError> {
        let host = cpal::default_host();
        let default_name = host
            .default_input_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_default();

        let devices = host
            .input_devices()
            .map_err(|e| VoiceError::InputStreamError(e.to_string()))?;

        Ok(devices
            .filter_map(|device| device.name().ok())
            .map(|name| AudioDeviceInfo {
                is_default: name == default_name,
                name,
            })
            .collect())
    }
}

fn select_device(name: Option<&str>) -> Result<Device, VoiceError> {
    let host = cpal::default_host();

    if let Some(wanted) = name {
        let found = host
            .input_devices()
            .map_err(|e| VoiceError::InputStreamError(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted));
        if let Some(device) = found {
            return Ok(device);
        }
        tracing::warn!(device = wanted, "Requested input device not found, using default");
    }

    host.default_input_device().ok_or(VoiceError::NoInputDevice)
}

/// Prefer a mono (then any-channel) config covering `rate` in a format we
/// can convert; fall back to the device default.
fn choose_config(device: &Device, rate: u32) -> Result<SupportedStreamConfig, VoiceError> {
    let supported = |format: SampleFormat| {
        matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::I32)
    };

    if let Ok(ranges) = device.supported_input_configs() {
        let mut candidates: Vec<_> = ranges
            .filter(|r| supported(r.sample_format()))
            .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
            .collect();
        candidates.sort_by_key(|r| (r.channels() != 1, r.sample_format() != SampleFormat::F32));
        if let Some(range) = candidates.into_iter().next() {
            return Ok(range.with_sample_rate(SampleRate(rate)));
        }
    }

    device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => VoiceError::NoInputDevice,
        other => VoiceError::InputStreamError(other.to_string()),
    })
}

fn build_input_stream(
    device: &Device,
    config: &SupportedStreamConfig,
    tx: mpsc::UnboundedSender<CaptureEvent>,
) -> Result<Stream, VoiceError> {
    let stream_config: StreamConfig = config.clone().into();
    let channels = usize::from(stream_config.channels.max(1));
    let sample_format = config.sample_format();

    let err_tx = tx.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!(%err, "Audio input stream error");
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            let _ = err_tx.send(CaptureEvent::Lost(err.to_string()));
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(CaptureEvent::Samples(downmix(data, channels, |s| s)));
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let mono = downmix(data, channels, |s| f32::from(s) / 32_768.0);
                let _ = tx.send(CaptureEvent::Samples(mono));
            },
            err_fn,
            None,
        ),
        SampleFormat::I32 => device.build_input_stream(
            &stream_config,
            move |data: &[i32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_precision_loss)]
                let mono = downmix(data, channels, |s| s as f32 / 2_147_483_648.0);
                let _ = tx.send(CaptureEvent::Samples(mono));
            },
            err_fn,
            None,
        ),
        _ => {
            return Err(VoiceError::InputStreamError(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream.map_err(|e| map_build_error(&e))
}

fn map_build_error(err: &cpal::BuildStreamError) -> VoiceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => VoiceError::NoInputDevice,
        cpal::BuildStreamError::BackendSpecific { err } if is_permission_error(&err.description) => {
            VoiceError::MicrophonePermissionDenied
        }
        other => VoiceError::InputStreamError(other.to_string()),
    }
}

fn map_play_error(err: &cpal::PlayStreamError) -> VoiceError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => VoiceError::NoInputDevice,
        cpal::PlayStreamError::BackendSpecific { err } if is_permission_error(&err.description) => {
            VoiceError::MicrophonePermissionDenied
        }
        other => VoiceError::InputStreamError(other.to_string()),
    }
}

fn is_permission_error(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
}

/// Average interleaved frames down to mono, converting each sample with `f`.
fn downmix<T: Copy>(data: &[T], channels: usize, f: impl Fn(T) -> f32) -> Vec<f32> {
    if channels <= 1 {
        return data.iter().map(|&s| f(s)).collect();
    }
    #[allow(clippy::cast_precision_loss)]
    let n = channels as f32;
    data.chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| f(s)).sum::<f32>() / n)
        .collect()
}
