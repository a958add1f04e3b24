//! Microphone capture pipeline
//!
//! The device callback only forwards raw blocks over a channel. A dedicated
//! pump thread converts them to the capture format and cuts fixed-size
//! frames, so a slow frame consumer never stalls the device.

use crossbeam_channel::{unbounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, FrameAccumulator};
use crate::audio::device::{InputDevice, NativeFormat};
use crate::audio::resample::{downmix_to_mono, StreamResampler};
use crate::config::CaptureConfig;
use crate::error::AudioError;

/// Capture-rate processing context: native device format to capture format
pub struct CaptureContext {
    source: NativeFormat,
    resampler: StreamResampler,
    closed: bool,
}

/// Capture context shared between the session and the pump thread
pub type SharedCaptureContext = Arc<Mutex<CaptureContext>>;

impl CaptureContext {
    pub fn new(source: NativeFormat, config: &CaptureConfig) -> Result<Self, AudioError> {
        Ok(Self {
            source,
            resampler: StreamResampler::new(source.sample_rate, config.sample_rate)?,
            closed: false,
        })
    }

    pub fn shared(
        source: NativeFormat,
        config: &CaptureConfig,
    ) -> Result<SharedCaptureContext, AudioError> {
        Ok(Arc::new(Mutex::new(Self::new(source, config)?)))
    }

    /// Convert one interleaved native block to mono samples at the capture rate
    pub fn convert(&mut self, block: &[f32]) -> Result<Vec<f32>, AudioError> {
        if self.closed {
            return Err(AudioError::ContextClosed);
        }
        let mono = downmix_to_mono(block, self.source.channels);
        let mut out = Vec::with_capacity(mono.len());
        self.resampler.process(&mono, &mut out)?;
        Ok(out)
    }

    pub fn source_format(&self) -> NativeFormat {
        self.source
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.resampler.reset();
            tracing::debug!("Capture context closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Running capture: device blocks in, fixed-size frames out
pub struct CapturePipeline {
    running: Arc<AtomicBool>,
    pump_handle: Option<JoinHandle<()>>,
    frames_emitted: Arc<AtomicU64>,
    config: CaptureConfig,
}

impl CapturePipeline {
    /// Attach to `device` and invoke `on_frame` once per `config.frame_size`
    /// samples, in arrival order.
    ///
    /// If the device refuses to start nothing is left running.
    pub fn start<F>(
        device: &mut dyn InputDevice,
        context: SharedCaptureContext,
        config: CaptureConfig,
        mut on_frame: F,
    ) -> Result<Self, AudioError>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        let (raw_tx, raw_rx) = unbounded::<Vec<f32>>();
        device.start(raw_tx)?;

        let running = Arc::new(AtomicBool::new(true));
        let frames_emitted = Arc::new(AtomicU64::new(0));
        let running_pump = running.clone();
        let emitted = frames_emitted.clone();

        let spawned = thread::Builder::new()
            .name("capture-pump".to_string())
            .spawn(move || {
                let mut accumulator = FrameAccumulator::new(config.frame_size, config.sample_rate);

                while running_pump.load(Ordering::Acquire) {
                    let block = match raw_rx.recv_timeout(Duration::from_millis(10)) {
                        Ok(block) => block,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    let samples = match context.lock().convert(&block) {
                        Ok(samples) => samples,
                        Err(e) => {
                            tracing::debug!("Capture pump stopping: {}", e);
                            break;
                        }
                    };

                    accumulator.push(&samples, |frame| {
                        if running_pump.load(Ordering::Acquire) {
                            emitted.fetch_add(1, Ordering::Relaxed);
                            on_frame(frame);
                        }
                    });
                }
            });

        let pump_handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                device.stop();
                return Err(AudioError::StreamError(e.to_string()));
            }
        };

        tracing::info!(
            device = %device.name(),
            frame_size = config.frame_size,
            sample_rate = config.sample_rate,
            "Capture pipeline started"
        );

        Ok(Self {
            running,
            pump_handle: Some(pump_handle),
            frames_emitted,
            config,
        })
    }

    /// Silence further `on_frame` calls and join the pump. Idempotent.
    ///
    /// The partial remainder is discarded; the device itself stays attached
    /// until its owner stops it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.pump_handle.take() {
            let _ = handle.join();
            tracing::info!(
                frames = self.frames_emitted.load(Ordering::Relaxed),
                "Capture pipeline stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Total frames handed to `on_frame`
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
