//! Session lifecycle state and call bookkeeping

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Resources may be held in this state
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Open | SessionState::Closing
        )
    }
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum EndReason {
    /// The caller hung up
    LocalHangup,
    /// The remote service closed the session
    RemoteClosed,
    /// Setup or transport failure
    Failed(String),
}

/// Result of a finished or running call, for the call log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSummary {
    pub session_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub end_reason: Option<EndReason>,
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Frames produced by the capture pipeline
    pub frames_captured: u64,
    /// Frames accepted by the transport
    pub frames_sent: u64,
    /// Frames dropped because the transport was not ready, full, or failed
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub chunks_completed: u64,
    pub decode_errors: u64,
    pub interruptions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Closing.is_terminal());
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Connecting.is_active());
    }

    #[test]
    fn test_end_reason_json() {
        let json = serde_json::to_value(EndReason::Failed("boom".to_string())).unwrap();
        assert_eq!(json["reason"], "failed");
        assert_eq!(json["detail"], "boom");
    }
}
