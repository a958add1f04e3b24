//! 16-bit little-endian PCM wire bytes to audio frames

use base64::{engine::general_purpose, Engine as _};

use crate::audio::buffer::AudioFrame;
use crate::constants::PCM_SAMPLE_WIDTH;
use crate::error::CodecError;

/// Decode a PCM payload into a frame at the given format
pub fn decode(data: &[u8], sample_rate: u32, channels: u16) -> Result<AudioFrame, CodecError> {
    if data.len() % PCM_SAMPLE_WIDTH != 0 {
        return Err(CodecError::OddByteLength(data.len()));
    }
    if channels == 0 {
        return Err(CodecError::UnsupportedFormat("zero channels".to_string()));
    }
    let sample_count = data.len() / PCM_SAMPLE_WIDTH;
    if sample_count % channels as usize != 0 {
        return Err(CodecError::PartialFrame {
            len: data.len(),
            channels,
        });
    }

    let samples: Vec<f32> = data
        .chunks_exact(PCM_SAMPLE_WIDTH)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect();

    Ok(AudioFrame::new(samples, sample_rate, channels, 0))
}

/// Decode a base64-wrapped PCM payload
pub fn decode_base64(text: &str, sample_rate: u32, channels: u16) -> Result<AudioFrame, CodecError> {
    let bytes = general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
    decode(&bytes, sample_rate, channels)
}
