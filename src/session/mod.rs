//! Streaming session lifecycle

pub mod guard;
pub mod state;
pub mod streaming;

pub use guard::ResourceGuard;
pub use state::{CallSummary, EndReason, SessionState, SessionStats};
pub use streaming::StreamingSession;
