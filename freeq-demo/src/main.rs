//! freeq live demo.
//!
//! Runs a full duplex session against the system default output device: a
//! 440 Hz sine source is pushed through the input ring, the worker passes
//! it through (with a gentle gain) in large batches, and the render
//! callback pulls the processed frames back out to the speakers.
//!
//! Stop with Ctrl-C; the final diagnostics snapshot is printed on exit.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use freeq_core::{
    AudioBridge, DuplexSession, PassthroughProcessor, ProcessorHandle, SessionConfig, SineSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SessionConfig::default();
    let quantum_frames = config.quantum_frames;
    let session = DuplexSession::new(
        config,
        ProcessorHandle::new(PassthroughProcessor::with_gain(0.5)),
    );

    session.warm_up().context("processor warm-up failed")?;
    let realtime = session.start().context("session start failed")?;

    // Tuned against the configured nominal rate; if the device runs at a
    // different rate the tone shifts pitch but the transport is unaffected.
    let source = SineSource::new(440.0, session.config().sample_rate, 0.4);
    let running = Arc::new(AtomicBool::new(true));

    // The bridge must be created and dropped on this thread (cpal::Stream
    // is !Send), which block_on guarantees.
    let bridge = AudioBridge::open_default(
        realtime,
        source,
        Arc::clone(&running),
        quantum_frames,
    )
    .context("failed to open output device")?;

    info!(
        sample_rate = bridge.sample_rate,
        "playing — press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    bridge.stop();
    running.store(false, Ordering::SeqCst);
    session.stop().context("session stop failed")?;

    let snap = session.diagnostics_snapshot();
    println!(
        "batches={} wakeups={} timeouts={} missed_signals={} frames_out={} errors={}",
        snap.batches_processed,
        snap.wakeups,
        snap.timeouts,
        snap.missed_signals,
        snap.frames_out,
        snap.processor_errors,
    );

    Ok(())
}
