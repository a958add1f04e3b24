//! Playback scheduling

pub mod playback_scheduler;

pub use playback_scheduler::{PlaybackScheduler, ScheduledChunk, SchedulerStats};
