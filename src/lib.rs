//! # Duplex Voice
//!
//! Real-time duplex audio streaming to a remote conversational voice service.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          StreamingSession                               │
//! │                                                                         │
//! │  ┌────────────┐  raw blocks  ┌───────────────┐  AudioFrame  ┌─────────┐ │
//! │  │ Microphone │ ───────────▶ │ Capture pump  │ ───────────▶ │         │ │
//! │  │ (cpal cb)  │  crossbeam   │ 16 kHz mono,  │  bounded     │         │ │
//! │  └────────────┘              │ 4096-sample   │  tokio mpsc  │         │ │
//! │                              │ frames        │              │ Session │ │
//! │                              └───────────────┘              │ event   │ │
//! │                                                             │ loop    │ │
//! │  ┌────────────┐  TransportEvent (audio / interrupted /      │ (one    │ │
//! │  │ Transport  │ ──────────────── closed / error) ─────────▶ │ tokio   │ │
//! │  │ (duplex)   │ ◀──────────────── WireFrame (s16le) ─────── │ task)   │ │
//! │  └────────────┘                                             │         │ │
//! │                                                             │         │ │
//! │  ┌────────────┐  chunk finished            ┌────────────┐   │         │ │
//! │  │ Speaker    │ ─────────────────────────▶ │ Playback   │ ◀─│         │ │
//! │  │ (cpal cb)  │ ◀── start_at / stop ────── │ Scheduler  │   └─────────┘ │
//! │  └────────────┘                            │ watermark  │               │
//! │                                            └────────────┘               │
//! │                                                                         │
//! │  ResourceGuard: input device, capture-rate context, playback context    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod scheduler;
pub mod session;

pub use config::{AppConfig, SessionConfig};
pub use error::{Error, Result};
pub use session::{CallSummary, EndReason, SessionState, StreamingSession};

/// Application-wide constants
pub mod constants {
    /// Sample rate expected by the remote service for microphone audio
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Microphone audio is sent mono
    pub const CAPTURE_CHANNELS: u16 = 1;

    /// Samples per outbound frame (~256 ms at 16 kHz)
    pub const CAPTURE_FRAME_SIZE: usize = 4096;

    /// Sample rate of synthesized audio from the remote service
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Synthesized audio is mono
    pub const PLAYBACK_CHANNELS: u16 = 1;

    /// Bytes per 16-bit PCM sample on the wire
    pub const PCM_SAMPLE_WIDTH: usize = 2;

    /// Captured frames allowed to wait for the transport
    pub const OUTBOUND_QUEUE_FRAMES: usize = 32;

    /// Default voice for synthesized speech
    pub const DEFAULT_VOICE_ID: &str = "Kore";

    /// Default conversation language
    pub const DEFAULT_LANGUAGE_CODE: &str = "en-US";
}
