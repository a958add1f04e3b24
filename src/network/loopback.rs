//! In-memory duplex transport
//!
//! Each `open` creates a link whose far side is exposed as a [`RemoteEnd`]:
//! the holder plays the remote service, injecting audio and control events
//! and reading the frames the session sent.

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::Notify;

use crate::codec::WireFrame;
use crate::error::NetworkError;
use crate::network::transport::{
    AudioPayload, FrameSender, SessionSetup, Transport, TransportEvent, TransportLink,
};

#[derive(Default)]
struct LoopbackState {
    fail_next_open: Option<NetworkError>,
    gate: Option<Arc<Notify>>,
    waiting: usize,
    remote: Option<RemoteEnd>,
    setups: Vec<SessionSetup>,
}

/// Transport whose remote side lives in the same process
#[derive(Clone)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
    queue_capacity: usize,
}

impl LoopbackTransport {
    /// `queue_capacity` bounds frames waiting for the remote to read them
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState::default())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Make the next `open` fail with `error`
    pub fn fail_next_open(&self, error: NetworkError) {
        self.state.lock().fail_next_open = Some(error);
    }

    /// Hold subsequent `open` calls until [`release_open`](Self::release_open)
    pub fn hold_open(&self) {
        self.state.lock().gate = Some(Arc::new(Notify::new()));
    }

    pub fn release_open(&self) {
        if let Some(gate) = self.state.lock().gate.take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    /// `open` calls currently held at the gate
    pub fn waiting_opens(&self) -> usize {
        self.state.lock().waiting
    }

    /// Far side of the most recently opened link
    pub fn remote(&self) -> Option<RemoteEnd> {
        self.state.lock().remote.clone()
    }

    /// Setups received so far, in open order
    pub fn setups(&self) -> Vec<SessionSetup> {
        self.state.lock().setups.clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, setup: &SessionSetup) -> Result<TransportLink, NetworkError> {
        let gate = self.state.lock().gate.clone();
        if let Some(gate) = gate {
            self.state.lock().waiting += 1;
            gate.notified().await;
            self.state.lock().waiting -= 1;
        }

        let mut state = self.state.lock();
        state.setups.push(setup.clone());
        if let Some(error) = state.fail_next_open.take() {
            return Err(error);
        }

        let (events_tx, events_rx) = unbounded_channel();
        let (frames_tx, frames_rx) = bounded(self.queue_capacity);
        let close_requested = Arc::new(AtomicBool::new(false));

        state.remote = Some(RemoteEnd {
            events: events_tx,
            frames: frames_rx,
            close_requested: close_requested.clone(),
        });

        tracing::debug!(voice = %setup.config.voice_id, "Loopback link opened");

        Ok(TransportLink {
            sender: Box::new(LoopbackSender {
                frames: frames_tx,
                close_requested,
            }),
            events: events_rx,
        })
    }
}

struct LoopbackSender {
    frames: Sender<WireFrame>,
    close_requested: Arc<AtomicBool>,
}

impl FrameSender for LoopbackSender {
    fn try_send(&self, frame: WireFrame) -> Result<(), NetworkError> {
        if self.close_requested.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        self.frames.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => NetworkError::QueueFull,
            TrySendError::Disconnected(_) => NetworkError::Closed,
        })
    }

    fn close(&self) -> Result<(), NetworkError> {
        self.close_requested.store(true, Ordering::Release);
        Ok(())
    }
}

/// The remote service's side of a loopback link
#[derive(Clone)]
pub struct RemoteEnd {
    events: UnboundedSender<TransportEvent>,
    frames: Receiver<WireFrame>,
    close_requested: Arc<AtomicBool>,
}

impl RemoteEnd {
    fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Deliver a chunk of raw PCM bytes
    pub fn send_audio(&self, pcm: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Audio(AudioPayload::Raw(pcm.into())))
    }

    /// Deliver a chunk as base64 text
    pub fn send_audio_base64(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Audio(AudioPayload::Base64(text.into())))
    }

    pub fn interrupt(&self) -> bool {
        self.emit(TransportEvent::Interrupted)
    }

    pub fn close(&self) -> bool {
        self.emit(TransportEvent::Closed)
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(message.into()))
    }

    /// Next frame the session sent, if any
    pub fn try_recv_frame(&self) -> Option<WireFrame> {
        self.frames.try_recv().ok()
    }

    /// Wait up to `timeout` for the next frame
    pub fn recv_frame_timeout(&self, timeout: std::time::Duration) -> Option<WireFrame> {
        self.frames.recv_timeout(timeout).ok()
    }

    /// Whether the session asked to close the link
    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::config::SessionConfig;
    use crate::network::transport::ResponseModality;

    fn setup() -> SessionSetup {
        SessionSetup {
            config: SessionConfig::default(),
            input_mime_type: "audio/pcm;rate=16000".to_string(),
            output_sample_rate: 24_000,
            response_modality: ResponseModality::Audio,
        }
    }

    #[tokio::test]
    async fn test_frames_reach_remote_in_order() {
        let transport = LoopbackTransport::new(4);
        let link = transport.open(&setup()).await.unwrap();
        let remote = transport.remote().unwrap();

        link.sender.try_send(encode(&[0.1], 16_000)).unwrap();
        link.sender.try_send(encode(&[0.2], 16_000)).unwrap();

        assert_eq!(remote.try_recv_frame().unwrap(), encode(&[0.1], 16_000));
        assert_eq!(remote.try_recv_frame().unwrap(), encode(&[0.2], 16_000));
        assert!(remote.try_recv_frame().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let transport = LoopbackTransport::new(1);
        let link = transport.open(&setup()).await.unwrap();

        link.sender.try_send(encode(&[0.0], 16_000)).unwrap();
        assert_eq!(
            link.sender.try_send(encode(&[0.0], 16_000)),
            Err(NetworkError::QueueFull)
        );
    }

    #[tokio::test]
    async fn test_events_flow_to_session() {
        let transport = LoopbackTransport::new(4);
        let mut link = transport.open(&setup()).await.unwrap();
        let remote = transport.remote().unwrap();

        remote.send_audio(vec![0u8, 0]);
        remote.interrupt();
        remote.close();

        assert!(matches!(link.events.recv().await, Some(TransportEvent::Audio(_))));
        assert_eq!(link.events.recv().await, Some(TransportEvent::Interrupted));
        assert_eq!(link.events.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_failed_open_records_setup() {
        let transport = LoopbackTransport::new(4);
        transport.fail_next_open(NetworkError::ConnectionFailed("refused".to_string()));

        assert!(transport.open(&setup()).await.is_err());
        assert_eq!(transport.setups().len(), 1);
        assert!(transport.remote().is_none());
        assert!(transport.open(&setup()).await.is_ok());
    }

    #[tokio::test]
    async fn test_held_open_waits_for_release() {
        let transport = LoopbackTransport::new(4);
        transport.hold_open();

        let opener = transport.clone();
        let pending = tokio::spawn(async move { opener.open(&setup()).await.is_ok() });
        while transport.waiting_opens() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(transport.setups().is_empty());

        transport.release_open();
        assert!(pending.await.unwrap());
        assert_eq!(transport.waiting_opens(), 0);
    }

    #[tokio::test]
    async fn test_close_stops_sends() {
        let transport = LoopbackTransport::new(4);
        let link = transport.open(&setup()).await.unwrap();
        link.sender.close().unwrap();

        assert!(transport.remote().unwrap().close_requested());
        assert_eq!(
            link.sender.try_send(encode(&[0.0], 16_000)),
            Err(NetworkError::Closed)
        );
    }
}
