//! Scoped ownership of a session's audio resources
//!
//! One guard per session holds the input device, the capture-rate context
//! and the playback context. Each is acquired at most once and released at
//! most once, whether teardown comes from a normal close, a remote close, a
//! failed connect, or the guard simply being dropped.

use crate::audio::capture::{CaptureContext, SharedCaptureContext};
use crate::audio::device::{AudioBackend, InputDevice};
use crate::audio::playback::{CompletionSender, PlaybackContext};
use crate::config::{CaptureConfig, PlaybackConfig};
use crate::error::AudioError;

#[derive(Default)]
pub struct ResourceGuard {
    input: Option<Box<dyn InputDevice>>,
    capture: Option<SharedCaptureContext>,
    playback: Option<Box<dyn PlaybackContext>>,
    released: bool,
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the input device; a second call returns the same device
    pub fn acquire_input(
        &mut self,
        backend: &dyn AudioBackend,
    ) -> Result<&mut dyn InputDevice, AudioError> {
        if self.released {
            return Err(AudioError::ContextClosed);
        }
        if self.input.is_none() {
            self.input = Some(backend.acquire_input()?);
        }
        match self.input.as_deref_mut() {
            Some(input) => Ok(input),
            None => Err(AudioError::ContextClosed),
        }
    }

    /// Open the capture-rate context for the acquired device's format
    pub fn open_capture_context(
        &mut self,
        config: &CaptureConfig,
    ) -> Result<SharedCaptureContext, AudioError> {
        if self.released {
            return Err(AudioError::ContextClosed);
        }
        if let Some(context) = &self.capture {
            return Ok(context.clone());
        }
        let format = self
            .input
            .as_ref()
            .map(|input| input.native_format())
            .ok_or_else(|| AudioError::DeviceNotFound("input not acquired".to_string()))?;

        let context = CaptureContext::shared(format, config)?;
        self.capture = Some(context.clone());
        Ok(context)
    }

    /// Open the playback-rate context
    pub fn open_playback(
        &mut self,
        backend: &dyn AudioBackend,
        config: &PlaybackConfig,
        completions: CompletionSender,
    ) -> Result<(), AudioError> {
        if self.released {
            return Err(AudioError::ContextClosed);
        }
        if self.playback.is_none() {
            self.playback = Some(backend.open_playback(config, completions)?);
        }
        Ok(())
    }

    pub fn input_mut(&mut self) -> Option<&mut (dyn InputDevice + 'static)> {
        self.input.as_deref_mut()
    }

    pub fn capture_context(&self) -> Option<SharedCaptureContext> {
        self.capture.clone()
    }

    pub fn playback_mut(&mut self) -> Option<&mut (dyn PlaybackContext + 'static)> {
        self.playback.as_deref_mut()
    }

    /// Release everything held. Returns `false` if already released.
    ///
    /// Order: processors and audio output stop first, then both contexts
    /// close, then the device goes back to the host.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let held = self.holds_resources();

        if let Some(input) = self.input.as_deref_mut() {
            input.stop();
        }
        if let Some(playback) = self.playback.as_deref_mut() {
            playback.stop_all();
        }

        if let Some(capture) = self.capture.take() {
            capture.lock().close();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.close();
        }

        if let Some(mut input) = self.input.take() {
            input.release();
        }

        if held {
            tracing::debug!("Session resources released");
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether any resource is currently held
    pub fn holds_resources(&self) -> bool {
        self.input.is_some() || self.capture.is_some() || self.playback.is_some()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}
