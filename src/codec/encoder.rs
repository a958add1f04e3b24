//! Float samples to 16-bit little-endian PCM wire frames

use base64::{engine::general_purpose, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::PCM_SAMPLE_WIDTH;

/// Encoded outbound audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// Signed 16-bit little-endian samples
    pub payload: Bytes,
    pub sample_rate: u32,
}

impl WireFrame {
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.payload)
    }

    /// Number of samples carried
    pub fn sample_count(&self) -> usize {
        self.payload.len() / PCM_SAMPLE_WIDTH
    }

    /// JSON-ready form for text-based transports
    pub fn to_realtime_input(&self) -> RealtimeInput {
        RealtimeInput {
            data: self.to_base64(),
            mime_type: self.mime_type(),
        }
    }
}

/// `{ "data": <base64>, "mimeType": "audio/pcm;rate=16000" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub data: String,
    pub mime_type: String,
}

/// Convert one float sample in [-1, 1] to i16, clipping out-of-range values
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode float samples as a 16-bit little-endian PCM frame
pub fn encode(samples: &[f32], sample_rate: u32) -> WireFrame {
    let mut payload = BytesMut::with_capacity(samples.len() * PCM_SAMPLE_WIDTH);
    for &sample in samples {
        payload.put_i16_le(sample_to_i16(sample));
    }
    WireFrame {
        payload: payload.freeze(),
        sample_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_little_endian() {
        let frame = encode(&[0.0, 1.0, -1.0], 16_000);
        assert_eq!(frame.payload.as_ref(), &[0x00, 0x00, 0xFF, 0x7F, 0x01, 0x80]);
        assert_eq!(frame.sample_count(), 3);
    }

    #[test]
    fn test_encode_clips_out_of_range() {
        let frame = encode(&[1.7, -3.0, f32::NAN], 16_000);
        let samples: Vec<i16> = frame
            .payload
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX, 0]);
    }

    #[test]
    fn test_realtime_input_json() {
        let frame = encode(&[0.0, 0.0], 16_000);
        let json = serde_json::to_value(frame.to_realtime_input()).unwrap();
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["data"], "AAAAAA==");
    }
}
