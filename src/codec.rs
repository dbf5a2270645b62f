//! PCM conversions between float samples and the wire formats.

use crate::error::{LiveError, Result};
use base64::engine::general_purpose;
use base64::Engine;

/// Convert float samples in [-1, 1] to 16-bit little-endian PCM bytes.
/// Out-of-range samples are clamped.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Convert 16-bit little-endian PCM bytes to float samples.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::Decode(format!(
            "odd PCM byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect())
}

/// Base64-encode raw bytes for a realtime input message.
pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Decode a base64 audio fragment into playable float samples.
pub fn decode_fragment(data: &str) -> Result<Vec<f32>> {
    let bytes = general_purpose::STANDARD.decode(data)?;
    pcm16_to_f32(&bytes)
}

/// Root-mean-square level of a block of samples. Empty input is silent.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
