//! Streaming session orchestration
//!
//! A session wires the capture pipeline through the frame codec into the
//! transport, and transport audio through the codec into the playback
//! scheduler. All session state sits behind one lock; a single dispatcher
//! task per session drains the three event sources (transport, captured
//! frames, playback completions) and handles each event to completion, so
//! handlers never interleave with each other or with `disconnect()`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError, UnboundedReceiver};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::audio::buffer::AudioFrame;
use crate::audio::capture::CapturePipeline;
use crate::audio::device::AudioBackend;
use crate::audio::playback::{ChunkId, CompletionSender};
use crate::codec::{self, encode};
use crate::config::{AppConfig, AudioSettings, CaptureConfig, SessionConfig, SessionLimits};
use crate::error::{AudioError, CodecError, NetworkError, SessionError};
use crate::network::transport::{
    AudioPayload, FrameSender, ResponseModality, SessionSetup, Transport, TransportEvent,
    TransportLink,
};
use crate::scheduler::PlaybackScheduler;
use crate::session::guard::ResourceGuard;
use crate::session::state::{CallSummary, EndReason, SessionState, SessionStats};

type RemoteCloseCallback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Box<dyn FnOnce(SessionError) + Send>;

/// Caller callbacks registered at connect time; each fires at most once
struct Callbacks {
    on_remote_close: RemoteCloseCallback,
    on_error: ErrorCallback,
}

/// Callback invocation deferred until the session lock is released
enum Notification {
    RemoteClosed(Callbacks),
    Failed(Callbacks, SessionError),
}

impl Notification {
    fn fire(self) {
        match self {
            Notification::RemoteClosed(callbacks) => (callbacks.on_remote_close)(),
            Notification::Failed(callbacks, error) => {
                (callbacks.on_error)(error);
                (callbacks.on_remote_close)();
            }
        }
    }
}

enum Dispatch {
    Transport(Option<TransportEvent>),
    Captured(AudioFrame),
    Completed(ChunkId),
}

struct SessionCore {
    id: Uuid,
    state: SessionState,
    guard: ResourceGuard,
    scheduler: PlaybackScheduler,
    capture: Option<CapturePipeline>,
    outbound: Option<Box<dyn FrameSender>>,
    shutdown: Option<Arc<Notify>>,
    callbacks: Option<Callbacks>,
    settings: AudioSettings,
    stats: SessionStats,
    last_decode_error: Option<CodecError>,
    started_at: Option<DateTime<Utc>>,
    opened_at: Option<Instant>,
    call_duration: Option<Duration>,
    end_reason: Option<EndReason>,
}

impl SessionCore {
    fn new(id: Uuid, settings: AudioSettings) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            guard: ResourceGuard::new(),
            scheduler: PlaybackScheduler::new(),
            capture: None,
            outbound: None,
            shutdown: None,
            callbacks: None,
            settings,
            stats: SessionStats::default(),
            last_decode_error: None,
            started_at: None,
            opened_at: None,
            call_duration: None,
            end_reason: None,
        }
    }

    /// Stop capture, cancel playback, close the link, release resources.
    ///
    /// Runs at most once per session; returns the callbacks so the caller
    /// can decide which to fire once the lock is dropped.
    fn teardown(
        &mut self,
        terminal: SessionState,
        reason: EndReason,
        close_transport: bool,
    ) -> Option<Callbacks> {
        if !self.state.is_active() {
            return None;
        }
        self.state = SessionState::Closing;

        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(playback) = self.guard.playback_mut() {
            let cancelled = self.scheduler.cancel_all(playback);
            if cancelled > 0 {
                tracing::debug!(session_id = %self.id, cancelled, "Cancelled live chunks");
            }
        }
        if let Some(outbound) = self.outbound.take() {
            if close_transport {
                // The far end may never acknowledge; local teardown goes on regardless
                if let Err(e) = outbound.close() {
                    tracing::debug!(session_id = %self.id, "Close request not delivered: {}", e);
                }
            }
        }
        self.guard.release();
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.notify_one();
        }

        self.call_duration = Some(
            self.opened_at
                .map(|opened| opened.elapsed())
                .unwrap_or_default(),
        );
        tracing::info!(
            session_id = %self.id,
            state = ?terminal,
            reason = ?reason,
            "Session ended"
        );
        self.end_reason = Some(reason);
        self.state = terminal;
        self.callbacks.take()
    }

    /// Handle one event; returns whether the dispatcher should keep running
    fn handle(&mut self, step: Dispatch) -> (bool, Option<Notification>) {
        if self.state != SessionState::Open {
            return (false, None);
        }

        match step {
            Dispatch::Transport(Some(TransportEvent::Audio(payload))) => {
                self.play(payload);
                (true, None)
            }
            Dispatch::Transport(Some(TransportEvent::Interrupted)) => {
                if let Some(playback) = self.guard.playback_mut() {
                    self.scheduler.interrupt(playback);
                }
                (true, None)
            }
            Dispatch::Transport(Some(TransportEvent::Closed)) | Dispatch::Transport(None) => {
                tracing::info!(session_id = %self.id, "Remote closed the session");
                let notification = self
                    .teardown(SessionState::Closed, EndReason::RemoteClosed, false)
                    .map(Notification::RemoteClosed);
                (false, notification)
            }
            Dispatch::Transport(Some(TransportEvent::Error(message))) => {
                tracing::error!(session_id = %self.id, "Transport error: {}", message);
                let error = SessionError::Transport(NetworkError::Transport(message.clone()));
                let notification = self
                    .teardown(SessionState::Failed, EndReason::Failed(message), true)
                    .map(|callbacks| Notification::Failed(callbacks, error));
                (false, notification)
            }
            Dispatch::Captured(frame) => {
                self.send(frame);
                (true, None)
            }
            Dispatch::Completed(id) => {
                self.scheduler.complete(id);
                (true, None)
            }
        }
    }

    /// Decode an inbound chunk and hand it to the scheduler
    fn play(&mut self, payload: AudioPayload) {
        let playback = self.settings.playback;
        let decoded = match &payload {
            AudioPayload::Base64(text) => {
                codec::decode_base64(text, playback.sample_rate, playback.channels)
            }
            AudioPayload::Raw(bytes) => codec::decode(bytes, playback.sample_rate, playback.channels),
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session_id = %self.id, "Dropping inbound chunk: {}", e);
                self.stats.decode_errors += 1;
                self.last_decode_error = Some(e);
                return;
            }
        };

        if let Some(context) = self.guard.playback_mut() {
            if let Err(e) = self.scheduler.schedule(context, &frame) {
                tracing::warn!(session_id = %self.id, "Failed to schedule chunk: {}", e);
            }
        }
    }

    /// Encode a captured frame and push it to the transport without waiting
    fn send(&mut self, frame: AudioFrame) {
        self.stats.frames_captured += 1;
        let Some(outbound) = self.outbound.as_ref() else {
            self.stats.frames_dropped += 1;
            return;
        };

        let wire = encode(frame.samples(), frame.sample_rate());
        match outbound.try_send(wire) {
            Ok(()) => self.stats.frames_sent += 1,
            Err(e) => {
                self.stats.frames_dropped += 1;
                tracing::debug!(
                    session_id = %self.id,
                    sequence = frame.sequence(),
                    "Dropped outbound frame: {}",
                    e
                );
            }
        }
    }
}

/// One duplex voice session with a remote conversational service
///
/// Sessions are single-use: `connect` is valid only from `Idle`, and once a
/// session reaches `Closed` or `Failed` it stays there. Dropping a session
/// disconnects it.
pub struct StreamingSession {
    id: Uuid,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    settings: AudioSettings,
    limits: SessionLimits,
    core: Arc<Mutex<SessionCore>>,
    /// Frames lost between the capture pump and the dispatcher
    handoff_drops: Arc<AtomicU64>,
}

impl StreamingSession {
    pub fn new(backend: Arc<dyn AudioBackend>, transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(
            backend,
            transport,
            AudioSettings::default(),
            SessionLimits::default(),
        )
    }

    pub fn from_config(
        config: &AppConfig,
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_settings(backend, transport, config.audio.clone(), config.limits)
    }

    pub fn with_settings(
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
        settings: AudioSettings,
        limits: SessionLimits,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            backend,
            transport,
            core: Arc::new(Mutex::new(SessionCore::new(id, settings.clone()))),
            settings,
            limits,
            handoff_drops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the session.
    ///
    /// Acquires the microphone and both audio contexts on the blocking pool,
    /// opens the transport, then starts streaming. The session lock is never
    /// held while a device is opening. Setup failures are returned here and also
    /// reported through `on_error` after all resources are released.
    /// Mid-session, `on_remote_close` fires when the far end closes, and
    /// `on_error` followed by `on_remote_close` when the link fails.
    pub async fn connect<C, E>(
        &self,
        config: SessionConfig,
        on_remote_close: C,
        on_error: E,
    ) -> Result<(), SessionError>
    where
        C: FnOnce() + Send + 'static,
        E: FnOnce(SessionError) + Send + 'static,
    {
        config
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;
        self.settings
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        {
            let mut core = self.core.lock();
            if core.state != SessionState::Idle {
                return Err(SessionError::InvalidState {
                    operation: "connect",
                    state: core.state,
                });
            }
            core.state = SessionState::Connecting;
            core.started_at = Some(Utc::now());
            core.callbacks = Some(Callbacks {
                on_remote_close: Box::new(on_remote_close),
                on_error: Box::new(on_error),
            });
            tracing::info!(session_id = %self.id, voice = %config.voice_id, "Connecting");
        }

        // Opening device streams blocks until the host answers
        let backend = self.backend.clone();
        let settings = self.settings.clone();
        let acquired =
            run_blocking(move || acquire_resources(&*backend, &settings, completion_tx)).await;

        let aborted = {
            let mut core = self.core.lock();
            if core.state != SessionState::Connecting {
                Some(acquired.ok())
            } else {
                match acquired {
                    Ok(guard) => core.guard = guard,
                    Err(error) => return self.fail_setup(core, error),
                }
                None
            }
        };
        if let Some(late) = aborted {
            if let Some(guard) = late {
                discard(guard, None).await;
            }
            return Err(SessionError::Aborted);
        }

        let setup = SessionSetup {
            config,
            input_mime_type: self.settings.capture.mime_type(),
            output_sample_rate: self.settings.playback.sample_rate,
            response_modality: ResponseModality::Audio,
        };
        let opened = self.transport.open(&setup).await;

        let (events, mut guard) = {
            let mut core = self.core.lock();
            if core.state != SessionState::Connecting {
                // disconnect() won the race; the resources are already gone
                if let Ok(link) = opened {
                    let _ = link.sender.close();
                }
                return Err(SessionError::Aborted);
            }

            let TransportLink { sender, events } = match opened {
                Ok(link) => link,
                Err(e) => {
                    let error = SessionError::ConnectionFailed(e);
                    return self.fail_setup(core, error);
                }
            };
            core.outbound = Some(sender);
            (events, std::mem::take(&mut core.guard))
        };

        let (frame_tx, frame_rx) = mpsc::channel(self.limits.outbound_queue_frames.max(1));
        let handoff_drops = self.handoff_drops.clone();
        let on_frame = move |frame: AudioFrame| match frame_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                handoff_drops.fetch_add(1, Ordering::Relaxed);
            }
        };

        let capture_config = self.settings.capture;
        let started = run_blocking(move || {
            match start_capture(&mut guard, capture_config, on_frame) {
                Ok(pipeline) => Ok((guard, pipeline)),
                Err(error) => {
                    guard.release();
                    Err(error)
                }
            }
        })
        .await;

        let outcome = {
            let mut core = self.core.lock();
            if core.state != SessionState::Connecting {
                Err(started.ok())
            } else {
                match started {
                    Ok((guard, pipeline)) => {
                        core.guard = guard;
                        core.capture = Some(pipeline);
                    }
                    Err(error) => return self.fail_setup(core, error),
                }
                let shutdown = Arc::new(Notify::new());
                core.shutdown = Some(shutdown.clone());
                core.opened_at = Some(Instant::now());
                core.state = SessionState::Open;
                Ok(shutdown)
            }
        };
        let shutdown = match outcome {
            Ok(shutdown) => shutdown,
            Err(late) => {
                if let Some((guard, pipeline)) = late {
                    discard(guard, Some(pipeline)).await;
                }
                return Err(SessionError::Aborted);
            }
        };

        tracing::info!(session_id = %self.id, "Session open");

        tokio::spawn(run_dispatcher(
            self.core.clone(),
            events,
            frame_rx,
            completion_rx,
            shutdown,
        ));
        Ok(())
    }

    fn fail_setup(
        &self,
        mut core: parking_lot::MutexGuard<'_, SessionCore>,
        error: SessionError,
    ) -> Result<(), SessionError> {
        tracing::error!(session_id = %self.id, "Session setup failed: {}", error);
        let callbacks =
            core.teardown(SessionState::Failed, EndReason::Failed(error.to_string()), true);
        drop(core);
        if let Some(callbacks) = callbacks {
            (callbacks.on_error)(error.clone());
        }
        Err(error)
    }

    /// Hang up. Idempotent; complete when it returns.
    ///
    /// No callbacks fire for a local hang-up.
    pub fn disconnect(&self) {
        let mut core = self.core.lock();
        if !core.state.is_active() || core.state == SessionState::Closing {
            tracing::debug!(session_id = %self.id, state = ?core.state, "Disconnect ignored");
            return;
        }
        // Local hang-up: the callbacks are dropped unfired
        let _ = core.teardown(SessionState::Closed, EndReason::LocalHangup, true);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Current playback watermark in seconds
    pub fn watermark(&self) -> f64 {
        self.core.lock().scheduler.watermark()
    }

    /// Chunks committed to playback that have not finished
    pub fn live_chunks(&self) -> usize {
        self.core.lock().scheduler.live_count()
    }

    /// Most recent inbound chunk that failed to decode
    pub fn last_decode_error(&self) -> Option<CodecError> {
        self.core.lock().last_decode_error.clone()
    }

    pub fn stats(&self) -> SessionStats {
        let core = self.core.lock();
        let scheduler = core.scheduler.stats();
        let mut stats = core.stats;
        stats.frames_dropped += self.handoff_drops.load(Ordering::Relaxed);
        stats.chunks_scheduled = scheduler.scheduled;
        stats.chunks_completed = scheduler.completed;
        stats.interruptions = scheduler.interruptions;
        stats
    }

    /// Call result for the call log
    pub fn summary(&self) -> CallSummary {
        let core = self.core.lock();
        let duration = match (core.call_duration, core.opened_at) {
            (Some(duration), _) => duration,
            (None, Some(opened)) => opened.elapsed(),
            (None, None) => Duration::ZERO,
        };
        CallSummary {
            session_id: self.id,
            started_at: core.started_at,
            duration,
            end_reason: core.end_reason.clone(),
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Input device, capture context, playback context, in that order
fn acquire_resources(
    backend: &dyn AudioBackend,
    settings: &AudioSettings,
    completions: CompletionSender,
) -> Result<ResourceGuard, SessionError> {
    let mut guard = ResourceGuard::new();
    guard
        .acquire_input(backend)
        .map_err(SessionError::CaptureUnavailable)?;
    guard
        .open_capture_context(&settings.capture)
        .map_err(SessionError::CaptureUnavailable)?;
    guard
        .open_playback(backend, &settings.playback, completions)
        .map_err(SessionError::Playback)?;
    Ok(guard)
}

fn start_capture<F>(
    guard: &mut ResourceGuard,
    config: CaptureConfig,
    on_frame: F,
) -> Result<CapturePipeline, SessionError>
where
    F: FnMut(AudioFrame) + Send + 'static,
{
    let context = guard
        .capture_context()
        .ok_or(SessionError::CaptureUnavailable(AudioError::ContextClosed))?;
    let device = guard
        .input_mut()
        .ok_or(SessionError::CaptureUnavailable(AudioError::ContextClosed))?;
    CapturePipeline::start(device, context, config, on_frame)
        .map_err(SessionError::CaptureUnavailable)
}

/// Run device work on the blocking pool
async fn run_blocking<T, F>(work: F) -> Result<T, SessionError>
where
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.unwrap_or_else(|e| {
        Err(SessionError::CaptureUnavailable(AudioError::StreamError(
            format!("device setup task failed: {}", e),
        )))
    })
}

/// Release resources that arrived after the session was torn down
async fn discard(mut guard: ResourceGuard, pipeline: Option<CapturePipeline>) {
    let released = tokio::task::spawn_blocking(move || {
        if let Some(mut pipeline) = pipeline {
            pipeline.stop();
        }
        guard.release();
    })
    .await;
    if let Err(e) = released {
        tracing::warn!("Releasing late resources failed: {}", e);
    }
}

/// The session's event loop
async fn run_dispatcher(
    core: Arc<Mutex<SessionCore>>,
    mut events: UnboundedReceiver<TransportEvent>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut completions: UnboundedReceiver<ChunkId>,
    shutdown: Arc<Notify>,
) {
    loop {
        let step = tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            event = events.recv() => Dispatch::Transport(event),
            Some(id) = completions.recv() => Dispatch::Completed(id),
            Some(frame) = frames.recv() => Dispatch::Captured(frame),
        };

        let (keep_going, notification) = core.lock().handle(step);
        if let Some(notification) = notification {
            notification.fire();
        }
        if !keep_going {
            break;
        }
    }
    tracing::debug!("Session dispatcher stopped");
}
