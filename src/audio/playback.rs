//! Playback-rate audio context
//!
//! A [`PlaybackContext`] owns the hardware playback clock and renders chunks
//! that were committed to absolute start times. The cpal implementation mixes
//! committed chunks sample-accurately inside the output callback and counts
//! rendered frames to drive the clock.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::buffer::AudioFrame;
use crate::audio::device::find_output_device;
use crate::audio::resample::{downmix_to_mono, resample};
use crate::config::PlaybackConfig;
use crate::error::AudioError;

/// Cancellation handle for a committed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk-{}", self.0)
    }
}

/// Natural-completion notifications from the audio thread
pub type CompletionSender = UnboundedSender<ChunkId>;

/// Hardware playback clock plus the ability to commit and cancel chunks
pub trait PlaybackContext: Send {
    /// Seconds since the context started, monotonically non-decreasing
    fn current_time(&self) -> f64;

    /// Commit `frame` to begin playing at `start_at` (clock seconds)
    ///
    /// Returns the start actually committed. It is later than `start_at`
    /// when the clock passed `start_at` before the chunk was committed.
    fn start_chunk(&mut self, id: ChunkId, frame: &AudioFrame, start_at: f64)
        -> Result<f64, AudioError>;

    /// Stop a committed chunk; no sample of it is rendered after this returns
    fn stop_chunk(&mut self, id: ChunkId);

    /// Stop every committed chunk
    fn stop_all(&mut self);

    /// Shut the context down. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

struct Voice {
    id: ChunkId,
    start_frame: u64,
    /// Mono samples at the device rate
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }

    fn sample_at(&self, frame: u64) -> Option<f32> {
        if frame < self.start_frame {
            return None;
        }
        self.samples.get((frame - self.start_frame) as usize).copied()
    }
}

/// Committed chunks shared with the output callback
struct Mixer {
    voices: Vec<Voice>,
    /// Frames rendered since the stream started
    rendered: u64,
    gain: f32,
    completions: CompletionSender,
}

impl Mixer {
    fn new(gain: f32, completions: CompletionSender) -> Self {
        Self {
            voices: Vec::new(),
            rendered: 0,
            gain,
            completions,
        }
    }

    /// Fill one interleaved output buffer and retire finished voices
    fn render(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let base = self.rendered;
        let mut frames = 0u64;

        for (i, out) in data.chunks_exact_mut(channels).enumerate() {
            let pos = base + i as u64;
            let mixed: f32 = self.voices.iter().filter_map(|v| v.sample_at(pos)).sum();
            out.fill((mixed * self.gain).clamp(-1.0, 1.0));
            frames += 1;
        }

        self.rendered = base + frames;
        let rendered = self.rendered;
        let completions = &self.completions;
        self.voices.retain(|voice| {
            if voice.end_frame() <= rendered {
                let _ = completions.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

/// Playback context on a cpal output stream
pub struct CpalPlaybackContext {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    device_rate: u32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalPlaybackContext {
    /// Open the output device and start rendering silence
    pub fn open(
        device_name: Option<&str>,
        config: &PlaybackConfig,
        completions: CompletionSender,
    ) -> Result<Self, AudioError> {
        let device = find_output_device(device_name)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
        let stream_config: StreamConfig = supported.config();
        let device_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels as usize;

        let mixer = Arc::new(Mutex::new(Mixer::new(config.output_gain, completions)));
        let clock = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let mixer_cb = mixer.clone();
        let clock_cb = clock.clone();
        let running_loop = running.clone();

        let handle = thread::Builder::new()
            .name("playback-stream".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut mixer = mixer_cb.lock();
                        mixer.render(data, channels);
                        clock_cb.store(mixer.rendered, Ordering::Release);
                    },
                    move |err| {
                        tracing::error!("Output stream error: {}", err);
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

                while running_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut context = Self {
            mixer,
            clock,
            device_rate,
            running,
            thread_handle: Some(handle),
        };

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("playback thread exited".to_string())));
        if let Err(e) = ready {
            context.close();
            return Err(e);
        }

        tracing::info!(
            device_rate,
            channels,
            source_rate = config.sample_rate,
            "Playback context opened"
        );
        Ok(context)
    }

    /// Output device sample rate
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl PlaybackContext for CpalPlaybackContext {
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn start_chunk(
        &mut self,
        id: ChunkId,
        frame: &AudioFrame,
        start_at: f64,
    ) -> Result<f64, AudioError> {
        if self.is_closed() {
            return Err(AudioError::ContextClosed);
        }

        let mono = downmix_to_mono(frame.samples(), frame.channels());
        let samples = resample(&mono, frame.sample_rate(), self.device_rate)?;
        let requested = (start_at * self.device_rate as f64).round().max(0.0) as u64;

        let mut mixer = self.mixer.lock();
        let start_frame = requested.max(mixer.rendered);
        mixer.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        drop(mixer);

        if start_frame == requested {
            Ok(start_at)
        } else {
            tracing::debug!(%id, late_frames = start_frame - requested, "Chunk start moved to clock");
            Ok(start_frame as f64 / self.device_rate as f64)
        }
    }

    fn stop_chunk(&mut self, id: ChunkId) {
        self.mixer.lock().voices.retain(|v| v.id != id);
    }

    fn stop_all(&mut self) {
        self.mixer.lock().voices.clear();
    }

    fn close(&mut self) {
        self.stop_all();
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Playback context closed");
        }
    }

    fn is_closed(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CpalPlaybackContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn voice(id: u64, start_frame: u64, samples: Vec<f32>) -> Voice {
        Voice {
            id: ChunkId(id),
            start_frame,
            samples,
        }
    }

    #[test]
    fn test_render_places_voices_at_start_frame() {
        let (tx, _rx) = unbounded_channel();
        let mut mixer = Mixer::new(1.0, tx);
        mixer.voices.push(voice(1, 2, vec![0.5, 0.5]));

        let mut out = vec![1.0f32; 6];
        mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(mixer.rendered, 6);
    }

    #[test]
    fn test_back_to_back_voices_do_not_gap() {
        let (tx, _rx) = unbounded_channel();
        let mut mixer = Mixer::new(1.0, tx);
        mixer.voices.push(voice(1, 0, vec![0.1; 3]));
        mixer.voices.push(voice(2, 3, vec![0.2; 3]));

        let mut out = vec![0.0f32; 12];
        mixer.render(&mut out, 2);

        assert_eq!(out, vec![0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn test_finished_voices_report_completion() {
        let (tx, mut rx) = unbounded_channel();
        let mut mixer = Mixer::new(1.0, tx);
        mixer.voices.push(voice(7, 0, vec![0.1; 4]));
        mixer.voices.push(voice(8, 4, vec![0.1; 4]));

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);

        assert_eq!(rx.try_recv().unwrap(), ChunkId(7));
        assert!(rx.try_recv().is_err());
        assert_eq!(mixer.voices.len(), 1);
    }

    #[test]
    fn test_gain_and_clipping() {
        let (tx, _rx) = unbounded_channel();
        let mut mixer = Mixer::new(0.5, tx);
        mixer.voices.push(voice(1, 0, vec![0.8, 0.8]));
        mixer.voices.push(voice(2, 0, vec![0.8, 3.0]));

        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 1);

        assert!((out[0] - 0.8).abs() < 1e-6);
        assert_eq!(out[1], 1.0);
    }
}
