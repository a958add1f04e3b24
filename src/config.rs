//! Session and audio configuration
//!
//! Loaded from TOML; every section has defaults matching the remote
//! service's fixed formats (16 kHz mono capture, 24 kHz mono playback).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Opaque bundle forwarded to the remote service at connect time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Finished system instruction text
    pub instruction_text: String,
    /// Target voice identifier
    pub voice_id: String,
    /// Target language identifier (BCP-47)
    pub language_code: String,
}

impl SessionConfig {
    pub fn new(
        instruction_text: impl Into<String>,
        voice_id: impl Into<String>,
        language_code: impl Into<String>,
    ) -> Self {
        Self {
            instruction_text: instruction_text.into(),
            voice_id: voice_id.into(),
            language_code: language_code.into(),
        }
    }

    /// Reject bundles the remote service cannot accept
    pub fn validate(&self) -> Result<(), Error> {
        if self.voice_id.trim().is_empty() {
            return Err(Error::Config("voice_id must not be empty".to_string()));
        }
        if self.language_code.trim().is_empty() {
            return Err(Error::Config("language_code must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instruction_text: String::new(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
        }
    }
}

/// Microphone framing parameters; captured audio is always mono
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Samples per emitted frame
    pub frame_size: usize,
}

impl CaptureConfig {
    /// Wall-clock length of one emitted frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate as u64)
    }

    /// MIME type announced for outbound frames
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }
}

/// Format of inbound synthesized audio and the output stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Linear gain applied at the output stage
    pub output_gain: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            channels: PLAYBACK_CHANNELS,
            output_gain: 1.0,
        }
    }
}

/// Device selection and audio formats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    /// Input device name; `None` selects the host default
    pub input_device: Option<String>,
    /// Output device name; `None` selects the host default
    pub output_device: Option<String>,
}

impl AudioSettings {
    /// Reject formats the pipeline cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.capture.sample_rate == 0 {
            return Err(Error::Config("capture.sample_rate must be positive".to_string()));
        }
        if self.capture.frame_size == 0 {
            return Err(Error::Config("capture.frame_size must be positive".to_string()));
        }
        if self.playback.sample_rate == 0 {
            return Err(Error::Config("playback.sample_rate must be positive".to_string()));
        }
        if self.playback.channels == 0 {
            return Err(Error::Config("playback.channels must be positive".to_string()));
        }
        if !self.playback.output_gain.is_finite() || self.playback.output_gain < 0.0 {
            return Err(Error::Config(format!(
                "playback.output_gain must be a non-negative number, got {}",
                self.playback.output_gain
            )));
        }
        Ok(())
    }
}

/// Per-session resource bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Captured frames allowed to wait for the transport before new ones are dropped
    pub outbound_queue_frames: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            outbound_queue_frames: OUTBOUND_QUEUE_FRAMES,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub audio: AudioSettings,
    pub limits: SessionLimits,
}

impl AppConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.session.validate()?;
        self.audio.validate()?;
        if self.limits.outbound_queue_frames == 0 {
            return Err(Error::Config(
                "limits.outbound_queue_frames must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Platform config location, e.g. `~/.config/duplex-voice/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "duplex-voice")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Ignoring unreadable config: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_formats() {
        let config = AppConfig::default();
        assert_eq!(config.audio.capture.sample_rate, 16_000);
        assert_eq!(config.audio.capture.frame_size, 4096);
        assert_eq!(config.audio.playback.sample_rate, 24_000);
        assert_eq!(config.audio.capture.mime_type(), "audio/pcm;rate=16000");

        let ms = config.audio.capture.frame_duration().as_millis();
        assert_eq!(ms, 256);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [session]
            instructionText = "Keep answers short."
            voiceId = "Puck"
            languageCode = "de-DE"

            [audio]
            input_device = "USB Mic"

            [audio.playback]
            output_gain = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.session.voice_id, "Puck");
        assert_eq!(config.audio.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.audio.playback.output_gain, 0.5);
        assert_eq!(config.audio.playback.sample_rate, 24_000);
        assert_eq!(config.limits.outbound_queue_frames, OUTBOUND_QUEUE_FRAMES);
    }

    #[test]
    fn test_validate_rejects_empty_voice() {
        let config = SessionConfig::new("hi", " ", "en-US");
        assert!(config.validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_rates_and_sizes_are_rejected() {
        for text in [
            "[audio.capture]\nsample_rate = 0",
            "[audio.capture]\nframe_size = 0",
            "[audio.playback]\nsample_rate = 0",
            "[audio.playback]\nchannels = 0",
            "[audio.playback]\noutput_gain = -1.0",
            "[limits]\noutbound_queue_frames = 0",
            "[session]\nvoiceId = \"\"",
        ] {
            assert!(
                matches!(AppConfig::from_toml(text), Err(Error::Config(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_default_settings_validate() {
        assert!(AppConfig::default().validate().is_ok());
        let mut settings = AudioSettings::default();
        settings.playback.output_gain = f32::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_session() {
        let mut config = AppConfig::default();
        config.session = SessionConfig::new("Be brief.", "Kore", "en-GB");
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }
}
