//! Fake audio backend with a hand-driven playback clock

#![allow(dead_code)]

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use duplex_voice::audio::{
    AudioBackend, AudioFrame, ChunkId, CompletionSender, InputDevice, NativeFormat,
    PlaybackContext, SampleSink,
};
use duplex_voice::config::PlaybackConfig;
use duplex_voice::error::AudioError;

/// A chunk the session committed to playback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Started {
    pub id: ChunkId,
    pub start_at: f64,
    pub duration: f64,
}

/// Everything the fake resources observed
#[derive(Default)]
pub struct Recorder {
    pub input_acquired: AtomicUsize,
    pub input_stopped: AtomicUsize,
    pub input_released: AtomicUsize,
    pub playback_opened: AtomicUsize,
    pub playback_closed: AtomicUsize,
    pub clock: Mutex<f64>,
    pub started: Mutex<Vec<Started>>,
    pub stopped: Mutex<Vec<ChunkId>>,
    /// Input acquisitions in progress
    pub acquiring: AtomicUsize,
    /// When set, `acquire_input` blocks its thread until the sender fires
    pub acquire_gate: Mutex<Option<Receiver<()>>>,
    sink: Mutex<Option<SampleSink>>,
    completions: Mutex<Option<CompletionSender>>,
}

impl Recorder {
    pub fn set_time(&self, secs: f64) {
        *self.clock.lock() = secs;
    }

    /// Push samples as if the microphone callback fired
    pub fn feed(&self, samples: Vec<f32>) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.send(samples).is_ok(),
            None => false,
        }
    }

    /// Report that a chunk finished playing
    pub fn finish(&self, id: ChunkId) {
        if let Some(tx) = self.completions.lock().as_ref() {
            let _ = tx.send(id);
        }
    }

    /// Make the next input acquisition block like a slow device driver
    pub fn gate_acquire(&self) -> Sender<()> {
        let (tx, rx) = bounded(1);
        *self.acquire_gate.lock() = Some(rx);
        tx
    }

    pub fn started(&self) -> Vec<Started> {
        self.started.lock().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct FakeInput {
    recorder: Arc<Recorder>,
}

impl InputDevice for FakeInput {
    fn name(&self) -> &str {
        "fake-mic"
    }

    fn native_format(&self) -> NativeFormat {
        NativeFormat {
            sample_rate: 16_000,
            channels: 1,
        }
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError> {
        *self.recorder.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if self.recorder.sink.lock().take().is_some() {
            self.recorder.input_stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release(&mut self) {
        self.recorder.input_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakePlayback {
    recorder: Arc<Recorder>,
    closed: bool,
}

impl PlaybackContext for FakePlayback {
    fn current_time(&self) -> f64 {
        *self.recorder.clock.lock()
    }

    fn start_chunk(
        &mut self,
        id: ChunkId,
        frame: &AudioFrame,
        start_at: f64,
    ) -> Result<f64, AudioError> {
        if self.closed {
            return Err(AudioError::ContextClosed);
        }
        self.recorder.started.lock().push(Started {
            id,
            start_at,
            duration: frame.duration_secs(),
        });
        Ok(start_at)
    }

    fn stop_chunk(&mut self, id: ChunkId) {
        self.recorder.stopped.lock().push(id);
    }

    fn stop_all(&mut self) {}

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.recorder.playback_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub recorder: Arc<Recorder>,
    pub deny_input: bool,
    pub fail_playback: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for FakeBackend {
    fn acquire_input(&self) -> Result<Box<dyn InputDevice>, AudioError> {
        if self.deny_input {
            return Err(AudioError::PermissionDenied("fake-mic".to_string()));
        }
        let gate = self.recorder.acquire_gate.lock().take();
        if let Some(gate) = gate {
            self.recorder.acquiring.fetch_add(1, Ordering::SeqCst);
            let _ = gate.recv();
            self.recorder.acquiring.fetch_sub(1, Ordering::SeqCst);
        }
        self.recorder.input_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            recorder: self.recorder.clone(),
        }))
    }

    fn open_playback(
        &self,
        _config: &PlaybackConfig,
        completions: CompletionSender,
    ) -> Result<Box<dyn PlaybackContext>, AudioError> {
        if self.fail_playback {
            return Err(AudioError::DeviceNotFound("fake-speaker".to_string()));
        }
        self.recorder.playback_opened.fetch_add(1, Ordering::SeqCst);
        *self.recorder.completions.lock() = Some(completions);
        Ok(Box::new(FakePlayback {
            recorder: self.recorder.clone(),
            closed: false,
        }))
    }
}

/// Poll `condition` until it holds, yielding to the runtime in between
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
