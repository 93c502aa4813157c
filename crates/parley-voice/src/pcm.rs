//! Linear16 PCM conversion between the audio devices (f32) and the wire (i16 LE).

/// Encode one float sample to signed 16-bit PCM.
///
/// The input is clamped to [-1, 1]; negative values scale by 0x8000 and
/// non-negative values by 0x7fff, then round to nearest. This maps -1.0 to
/// `i16::MIN` and 1.0 to `i16::MAX` exactly.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_sample(sample: f32) -> i16 {
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    let scaled = if s < 0.0 {
        s * 32_768.0
    } else {
        s * 32_767.0
    };
    scaled.round() as i16
}

/// Decode one signed 16-bit PCM sample to a float in [-1, 1).
#[must_use]
pub fn decode_sample(sample: i16) -> f32 {
    f32::from(sample) / 32_768.0
}

/// Encode a float block into little-endian PCM16 bytes ready to send.
#[must_use]
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.extend_from_slice(&encode_sample(s).to_le_bytes());
    }
    buf
}

/// Split little-endian PCM16 bytes into samples.
///
/// A trailing odd byte cannot form a sample; it is returned separately so the
/// caller can carry it into the next delivery.
#[must_use]
pub fn decode_pcm16_le(bytes: &[u8]) -> (Vec<i16>, Option<u8>) {
    let chunks = bytes.chunks_exact(2);
    let remainder = chunks.remainder().first().copied();
    let samples = chunks
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    (samples, remainder)
}

/// Convert PCM16 samples to normalized floats for the output device.
#[must_use]
pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().copied().map(decode_sample).collect()
}
