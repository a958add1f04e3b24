//! Gapless playback scheduling on the hardware clock
//!
//! Chunks are committed in receipt order at `max(watermark, now)`, and the
//! watermark advances to the committed end. Under jitter chunks queue up
//! back-to-back; after a stall the next chunk starts at the current time
//! rather than after an artificial gap. Nothing ever overlaps.

use std::collections::HashMap;

use crate::audio::buffer::AudioFrame;
use crate::audio::playback::{ChunkId, PlaybackContext};
use crate::error::AudioError;

/// A chunk committed to the playback clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    /// Committed start, in playback clock seconds
    pub start_at: f64,
    /// Seconds
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Watermark scheduler over a [`PlaybackContext`]
///
/// Not internally synchronized; the owning session serializes calls.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    /// Next free start time
    watermark: f64,
    /// Committed chunks that have neither finished nor been cancelled
    live: HashMap<ChunkId, ScheduledChunk>,
    next_id: u64,
    scheduled: u64,
    completed: u64,
    interruptions: u64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `frame` directly after everything already scheduled.
    ///
    /// Returns `None` for an empty chunk, which only pulls the watermark up
    /// to the current time.
    pub fn schedule(
        &mut self,
        context: &mut dyn PlaybackContext,
        frame: &AudioFrame,
    ) -> Result<Option<ScheduledChunk>, AudioError> {
        let now = context.current_time();
        let requested = self.watermark.max(now);
        let duration = frame.duration_secs();

        if duration <= 0.0 {
            self.watermark = requested;
            return Ok(None);
        }

        let id = ChunkId(self.next_id);
        // The clock can pass `requested` before the context commits the chunk
        let start_at = context.start_chunk(id, frame, requested)?.max(requested);
        self.next_id += 1;

        let chunk = ScheduledChunk {
            id,
            start_at,
            duration,
        };
        self.live.insert(id, chunk);
        self.watermark = chunk.end_at();
        self.scheduled += 1;

        tracing::trace!(
            chunk_id = %id,
            now,
            requested,
            start_at,
            duration,
            watermark = self.watermark,
            "Scheduled chunk"
        );
        Ok(Some(chunk))
    }

    /// Natural completion; the watermark already covers the chunk's end
    pub fn complete(&mut self, id: ChunkId) -> bool {
        let removed = self.live.remove(&id).is_some();
        if removed {
            self.completed += 1;
        }
        removed
    }

    /// Barge-in: stop everything live and restart the watermark at `now`
    pub fn interrupt(&mut self, context: &mut dyn PlaybackContext) {
        let cancelled = self.cancel_live(context);
        self.watermark = context.current_time();
        self.interruptions += 1;
        tracing::debug!(cancelled, watermark = self.watermark, "Playback interrupted");
    }

    /// Stop everything live without touching the watermark (teardown)
    pub fn cancel_all(&mut self, context: &mut dyn PlaybackContext) -> usize {
        self.cancel_live(context)
    }

    fn cancel_live(&mut self, context: &mut dyn PlaybackContext) -> usize {
        let count = self.live.len();
        for id in self.live.keys() {
            context.stop_chunk(*id);
        }
        self.live.clear();
        count
    }

    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, id: ChunkId) -> bool {
        self.live.contains_key(&id)
    }

    /// Live chunks ordered by start time
    pub fn live_chunks(&self) -> Vec<ScheduledChunk> {
        let mut chunks: Vec<ScheduledChunk> = self.live.values().copied().collect();
        chunks.sort_by(|a, b| a.start_at.total_cmp(&b.start_at));
        chunks
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.scheduled,
            completed: self.completed,
            interruptions: self.interruptions,
            live: self.live.len(),
        }
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub completed: u64,
    pub interruptions: u64,
    pub live: usize,
}
