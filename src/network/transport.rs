//! Abstract duplex transport to the remote voice service
//!
//! The session only needs to open a link, push encoded frames without
//! waiting, receive tagged events, and ask for a close. The wire protocol
//! behind that is up to the implementation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::codec::WireFrame;
use crate::config::SessionConfig;
use crate::error::NetworkError;

/// What the remote service should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Everything the transport forwards at open time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub config: SessionConfig,
    /// MIME type of outbound frames, e.g. `audio/pcm;rate=16000`
    pub input_mime_type: String,
    /// Rate the service synthesizes at
    pub output_sample_rate: u32,
    pub response_modality: ResponseModality,
}

/// Audio carried by an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPayload {
    Base64(String),
    Raw(Bytes),
}

/// Inbound event from the remote service
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A chunk of synthesized speech
    Audio(AudioPayload),
    /// The user started talking over the agent
    Interrupted,
    /// The far end closed the session
    Closed,
    /// The link failed mid-session
    Error(String),
}

/// Outbound half of an open link
pub trait FrameSender: Send {
    /// Queue a frame without waiting for the link
    fn try_send(&self, frame: WireFrame) -> Result<(), NetworkError>;

    /// Ask the far end to close. Best-effort.
    fn close(&self) -> Result<(), NetworkError>;
}

/// An open duplex link
pub struct TransportLink {
    pub sender: Box<dyn FrameSender>,
    pub events: UnboundedReceiver<TransportEvent>,
}

/// Opens duplex links to the remote service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the link is open (the handshake completed)
    async fn open(&self, setup: &SessionSetup) -> Result<TransportLink, NetworkError>;
}
