//! Error types for the duplex voice session

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Permission denied for device: {0}")]
    PermissionDenied(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio context already closed")]
    ContextClosed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Frame codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Payload of {0} bytes is not a whole number of 16-bit samples")]
    OddByteLength(usize),

    #[error("Payload of {len} bytes does not divide into {channels} channel(s)")]
    PartialFrame { len: usize, channels: u16 },

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Transport closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Streaming session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(AudioError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(NetworkError),

    #[error("Transport error: {0}")]
    Transport(NetworkError),

    #[error("Playback unavailable: {0}")]
    Playback(AudioError),

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Session was disconnected while connecting")]
    Aborted,

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::resample::resample;
    use crate::codec::decode;

    fn to_playback_rate(pcm: &[u8], playback_rate: u32) -> Result<Vec<f32>> {
        let frame = decode(pcm, 16_000, 1)?;
        Ok(resample(frame.samples(), 16_000, playback_rate)?)
    }

    #[test]
    fn test_subsystem_errors_convert() {
        assert!(matches!(
            to_playback_rate(&[1, 2, 3], 24_000),
            Err(Error::Codec(CodecError::OddByteLength(3)))
        ));
        assert!(matches!(
            to_playback_rate(&[0, 0, 0, 0], 0),
            Err(Error::Audio(AudioError::UnsupportedFormat(_)))
        ));
        assert_eq!(to_playback_rate(&[0, 0, 0, 0], 24_000).unwrap().len(), 3);
    }
}
