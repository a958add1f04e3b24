//! Audio frames and the fixed-size frame accumulator
//!
//! The accumulator turns irregular device callback blocks into frames of
//! exactly `frame_size` samples, preserving order and never emitting a
//! partial frame.

use std::sync::Arc;
use std::time::Duration;

use crate::constants::CAPTURE_CHANNELS;

/// Immutable buffer of interleaved linear PCM samples
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
    /// Frame sequence number within its stream
    sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, sequence: u32) -> Self {
        Self {
            samples: Arc::from(samples.into_boxed_slice()),
            sample_rate,
            channels: channels.max(1),
            sequence,
        }
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples_per_channel() as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Collects samples until a full frame is available
pub struct FrameAccumulator {
    pending: Vec<f32>,
    frame_size: usize,
    sample_rate: u32,
    next_sequence: u32,
}

impl FrameAccumulator {
    /// `frame_size` is in mono samples; zero is treated as one
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            pending: Vec::with_capacity(frame_size * 2),
            frame_size,
            sample_rate,
            next_sequence: 0,
        }
    }

    /// Append samples, invoking `emit` once per completed frame in arrival order
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return;
        }

        let mut drained = self.pending.drain(..complete * self.frame_size);
        for _ in 0..complete {
            let frame: Vec<f32> = drained.by_ref().take(self.frame_size).collect();
            let sequence = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            emit(AudioFrame::new(frame, self.sample_rate, CAPTURE_CHANNELS, sequence));
        }
    }

    /// Samples held back waiting for a full frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of frames emitted so far
    pub fn frames_emitted(&self) -> u32 {
        self.next_sequence
    }

    /// Discard the partial remainder
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(acc: &mut FrameAccumulator, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        acc.push(samples, |f| frames.push(f));
        frames
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 4800], 24_000, 1, 0);
        assert!((frame.duration_secs() - 0.2).abs() < 1e-9);

        let stereo = AudioFrame::new(vec![0.0; 4800], 24_000, 2, 0);
        assert_eq!(stereo.samples_per_channel(), 2400);
        assert!((stereo.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_empty_frame_has_zero_duration() {
        let frame = AudioFrame::new(Vec::new(), 24_000, 1, 0);
        assert!(frame.is_empty());
        assert_eq!(frame.duration_secs(), 0.0);
    }

    #[test]
    fn test_holds_partial_frame() {
        let mut acc = FrameAccumulator::new(4, 16_000);
        assert!(collect(&mut acc, &[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(acc.pending_len(), 3);

        let frames = collect(&mut acc, &[0.4, 0.5]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples(), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(acc.pending_len(), 1);
    }

    #[test]
    fn test_large_push_emits_multiple_frames_in_order() {
        let mut acc = FrameAccumulator::new(2, 16_000);
        let frames = collect(&mut acc, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].sequence(), 0);
        assert_eq!(frames[2].sequence(), 2);
        assert_eq!(frames[2].samples(), &[5.0, 6.0]);
        assert_eq!(acc.pending_len(), 1);
    }

    #[test]
    fn test_clear_drops_remainder() {
        let mut acc = FrameAccumulator::new(4, 16_000);
        collect(&mut acc, &[1.0, 2.0]);
        acc.clear();
        let frames = collect(&mut acc, &[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(frames[0].samples(), &[3.0, 4.0, 5.0, 6.0]);
    }

    proptest! {
        #[test]
        fn prop_frames_are_exact_and_ordered(
            pushes in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 0..300), 0..40),
            frame_size in 1usize..128,
        ) {
            let mut acc = FrameAccumulator::new(frame_size, 16_000);
            let mut emitted = Vec::new();
            let mut pushed = Vec::new();

            for block in &pushes {
                pushed.extend_from_slice(block);
                acc.push(block, |f| emitted.push(f));
            }

            for frame in &emitted {
                prop_assert_eq!(frame.samples().len(), frame_size);
            }

            let flat: Vec<f32> = emitted.iter().flat_map(|f| f.samples().to_vec()).collect();
            prop_assert_eq!(flat.len() + acc.pending_len(), pushed.len());
            prop_assert_eq!(&flat[..], &pushed[..flat.len()]);
            prop_assert!(acc.pending_len() < frame_size);
        }
    }
}
