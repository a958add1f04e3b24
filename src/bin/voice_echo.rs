//! Voice Echo
//!
//! Opens a streaming session against an in-process remote that speaks the
//! caller's own voice back, exercising capture, framing, and gapless
//! playback end to end on real audio devices.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duplex_voice::{
    audio::{device::list_devices, resample::resample, CpalBackend},
    codec::{decode, encode, WireFrame},
    config::AppConfig,
    constants::CAPTURE_CHANNELS,
    network::{LoopbackTransport, RemoteEnd},
    StreamingSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voice echo");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(std::path::Path::new(&path))?,
        None => AppConfig::load_or_default(),
    };

    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();

    let backend = Arc::new(CpalBackend::new(config.audio.clone()));
    let transport = Arc::new(LoopbackTransport::new(config.limits.outbound_queue_frames));
    let session = StreamingSession::from_config(&config, backend, transport.clone());

    let (ended_tx, mut ended_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let on_close_tx = ended_tx.clone();
    session
        .connect(
            config.session.clone(),
            move || {
                let _ = on_close_tx.send("remote closed".to_string());
            },
            move |e| {
                let _ = ended_tx.send(format!("error: {}", e));
            },
        )
        .await?;

    let remote = transport
        .remote()
        .ok_or_else(|| anyhow::anyhow!("loopback link missing after connect"))?;
    let capture_rate = config.audio.capture.sample_rate;
    let playback_rate = config.audio.playback.sample_rate;
    let echo = tokio::spawn(echo_loop(remote, capture_rate, playback_rate));

    tracing::info!("Speak into the microphone - press Ctrl+C to stop");

    let mut stats_tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Hanging up");
                session.disconnect();
                break;
            }
            reason = ended_rx.recv() => {
                tracing::warn!("Session ended: {}", reason.unwrap_or_default());
                break;
            }
            _ = stats_tick.tick() => {
                let stats = session.stats();
                tracing::info!(
                    "Stats: {} frames sent, {} dropped, {} chunks scheduled, watermark {:.2}s",
                    stats.frames_sent,
                    stats.frames_dropped,
                    stats.chunks_scheduled,
                    session.watermark()
                );
            }
        }
    }

    echo.abort();
    let summary = session.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Play every captured frame back as synthesized audio
async fn echo_loop(remote: RemoteEnd, capture_rate: u32, playback_rate: u32) {
    let mut poll = tokio::time::interval(Duration::from_millis(20));
    loop {
        poll.tick().await;
        while let Some(frame) = remote.try_recv_frame() {
            let reply = match echo_frame(&frame, capture_rate, playback_rate) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("Echo skipped a frame: {}", e);
                    continue;
                }
            };
            if !remote.send_audio(reply.payload) {
                return;
            }
        }
    }
}

/// Re-encode one captured frame at the playback rate
fn echo_frame(
    frame: &WireFrame,
    capture_rate: u32,
    playback_rate: u32,
) -> duplex_voice::Result<WireFrame> {
    let decoded = decode(&frame.payload, capture_rate, CAPTURE_CHANNELS)?;
    let samples = resample(decoded.samples(), capture_rate, playback_rate)?;
    Ok(encode(&samples, playback_rate))
}
