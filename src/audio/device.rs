//! Audio device enumeration, the backend seam, and the cpal input device
//!
//! A session never talks to cpal directly: it asks an [`AudioBackend`] for
//! an input device and a playback context, so tests can substitute a fake
//! backend with a manual clock.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::playback::{CompletionSender, CpalPlaybackContext, PlaybackContext};
use crate::config::{AudioSettings, PlaybackConfig};
use crate::error::AudioError;

/// Receives raw interleaved blocks from the device callback
pub type SampleSink = crossbeam_channel::Sender<Vec<f32>>;

/// Native format delivered by an input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An acquired microphone
pub trait InputDevice: Send {
    fn name(&self) -> &str;

    fn native_format(&self) -> NativeFormat;

    /// Attach a processor; every callback block is forwarded to `sink`
    /// without waiting on the consumer.
    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError>;

    /// Detach the processor. Idempotent.
    fn stop(&mut self);

    /// Give the device back to the host. Idempotent.
    fn release(&mut self);
}

/// Source of per-session audio resources
pub trait AudioBackend: Send + Sync {
    /// Acquire the input device, failing fast on permission or absence
    fn acquire_input(&self) -> Result<Box<dyn InputDevice>, AudioError>;

    /// Open a playback-rate context; finished chunks are reported on `completions`
    fn open_playback(
        &self,
        config: &PlaybackConfig,
        completions: CompletionSender,
    ) -> Result<Box<dyn PlaybackContext>, AudioError>;
}

/// Device description for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(AudioDeviceInfo {
                        id: format!("output:{}", name),
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                    });
                }
            }
        }
    }

    devices
}

/// Find an input device by name, or the host default
pub(crate) fn find_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string())),
    }
}

/// Find an output device by name, or the host default
pub(crate) fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(wanted) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string())),
    }
}

/// Microphone backed by a cpal input stream
pub struct CpalInputDevice {
    name: String,
    device: Option<cpal::Device>,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalInputDevice {
    /// Acquire a device by name, or the default input
    pub fn acquire(name: Option<&str>) -> Result<Self, AudioError> {
        let device = find_input_device(name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        // Querying the config is where hosts surface access denial
        let supported = device.default_input_config().map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                AudioError::DeviceNotFound(name.clone())
            }
            other => AudioError::PermissionDenied(format!("{}: {}", name, other)),
        })?;

        tracing::info!(
            device = %name,
            sample_rate = supported.sample_rate().0,
            channels = supported.channels(),
            "Acquired input device"
        );

        Ok(Self {
            name,
            device: Some(device),
            config: supported.config(),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }
}

impl InputDevice for CpalInputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn native_format(&self) -> NativeFormat {
        NativeFormat {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
        }
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let device = self
            .device
            .clone()
            .ok_or_else(|| AudioError::DeviceNotFound(self.name.clone()))?;

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let config = self.config.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture-stream".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // Disconnected once the pump is gone
                        let _ = sink.send(data.to_vec());
                    },
                    move |err| {
                        tracing::error!("Input stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".to_string())));
        if ready.is_err() {
            self.stop();
        }
        ready
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn release(&mut self) {
        self.stop();
        if self.device.take().is_some() {
            tracing::debug!(device = %self.name, "Released input device");
        }
    }
}

impl Drop for CpalInputDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Host audio through cpal
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    settings: AudioSettings,
}

impl CpalBackend {
    pub fn new(settings: AudioSettings) -> Self {
        Self { settings }
    }
}

impl AudioBackend for CpalBackend {
    fn acquire_input(&self) -> Result<Box<dyn InputDevice>, AudioError> {
        let device = CpalInputDevice::acquire(self.settings.input_device.as_deref())?;
        Ok(Box::new(device))
    }

    fn open_playback(
        &self,
        config: &PlaybackConfig,
        completions: CompletionSender,
    ) -> Result<Box<dyn PlaybackContext>, AudioError> {
        let context =
            CpalPlaybackContext::open(self.settings.output_device.as_deref(), config, completions)?;
        Ok(Box::new(context))
    }
}
