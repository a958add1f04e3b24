//! Duplex transport to the remote voice service

pub mod loopback;
pub mod transport;

pub use loopback::{LoopbackTransport, RemoteEnd};
pub use transport::{
    AudioPayload, FrameSender, ResponseModality, SessionSetup, Transport, TransportEvent,
    TransportLink,
};
