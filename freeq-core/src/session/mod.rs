//! `DuplexSession` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! DuplexSession::new()
//!     └─► warm_up()          → processor ready, status = WarmingUp → Idle
//!         └─► start()        → rings allocated, worker spawned, status = Running
//!             │                 (returns the RealtimeEnd for the render callback)
//!             └─► stop()     → running=false, signal closed, worker joined,
//!                              status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state returns
//! an error rather than panicking.
//!
//! ## Threading
//!
//! The worker runs on a named OS thread owned by the session; no async
//! runtime is required. `stop()` closes the wake signal before joining, so
//! a worker blocked in its wait is released immediately rather than leaking.

pub mod worker;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    duplex::{create_duplex, ProcessorHandle, RealtimeEnd},
    error::{FreeqError, Result},
    events::{OccupancyEvent, SessionStatus, SessionStatusEvent},
    wake::WakeSignal,
};

/// Broadcast channel capacity: 256 events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `DuplexSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Usable ring capacity in frames, per direction. Default: 8192
    /// (a little over three batches of headroom at the default batch size).
    pub capacity_frames: usize,
    /// Channels per frame. Default: 2.
    pub channel_count: usize,
    /// Frames the render callback moves per invocation. Default: 128.
    pub quantum_frames: usize,
    /// Render quanta per worker batch. Larger batches amortize per-call
    /// overhead; smaller batches cut latency. Default: 20 (2560 frames).
    pub batch_quanta: usize,
    /// Upper bound on one blocking wait. Also bounds how late the liveness
    /// watchdog can notice a missed signal. Default: 100 ms.
    pub wait_timeout: Duration,
    /// Pre-fill the output ring with half a capacity of silence so the
    /// renderer's first pulls do not underrun. Default: true.
    pub prime_output: bool,
    /// Nominal sample rate in Hz, for diagnostics and hosts. Default: 48000.
    pub sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity_frames: 8192,
            channel_count: 2,
            quantum_frames: 128,
            batch_quanta: 20,
            wait_timeout: Duration::from_millis(100),
            prime_output: true,
            sample_rate: 48_000,
        }
    }
}

impl SessionConfig {
    /// Frames the worker drains per wakeup.
    pub fn batch_frames(&self) -> usize {
        self.quantum_frames * self.batch_quanta
    }
}

/// Joinable worker state held between `start()` and `stop()`.
struct WorkerHandle {
    thread: thread::JoinHandle<()>,
    signal: Arc<WakeSignal>,
}

/// The top-level session handle.
///
/// `DuplexSession` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<DuplexSession>` to share between the host's control surface
/// and event-forwarding tasks.
pub struct DuplexSession {
    config: SessionConfig,
    processor: ProcessorHandle,
    /// `true` while the worker is active.
    running: Arc<AtomicBool>,
    /// Canonical status (written via Mutex, read from host commands).
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    occupancy_tx: broadcast::Sender<OccupancyEvent>,
    /// Monotonically increasing occupancy-event sequence counter.
    seq: Arc<AtomicU64>,
    /// Shared worker diagnostics counters.
    diagnostics: Arc<worker::WorkerDiagnostics>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl DuplexSession {
    /// Create a new session. Does not spawn anything — call `warm_up()` then
    /// `start()`.
    pub fn new(config: SessionConfig, processor: ProcessorHandle) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (occupancy_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            processor,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            occupancy_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(worker::WorkerDiagnostics::default()),
            worker: Mutex::new(None),
        }
    }

    /// Warm up the processor (allocate scratch, prime caches).
    ///
    /// Call once at host startup, before `start()`.
    pub fn warm_up(&self) -> Result<()> {
        self.set_status(SessionStatus::WarmingUp, None);
        info!("warming up processor");
        self.processor.0.lock().warm_up()?;
        self.set_status(SessionStatus::Idle, None);
        info!("processor ready");
        Ok(())
    }

    /// Allocate the duplex channel, spawn the worker, and hand back the
    /// `RealtimeEnd` for the host's render callback.
    ///
    /// Blocks until the worker thread has confirmed startup, then returns.
    ///
    /// # Errors
    /// - `FreeqError::AlreadyRunning` if already started.
    /// - `FreeqError::Io` if the worker thread cannot be spawned.
    pub fn start(&self) -> Result<RealtimeEnd> {
        if self.running.load(Ordering::SeqCst) {
            return Err(FreeqError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.seq.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::SeqCst);

        let (realtime_end, worker_end) = create_duplex(
            self.config.capacity_frames,
            self.config.channel_count,
            self.config.batch_frames(),
            self.config.prime_output,
        );
        let signal = worker_end.wake_signal();

        let ctx = worker::WorkerContext {
            config: self.config.clone(),
            processor: self.processor.clone(),
            end: worker_end,
            running: Arc::clone(&self.running),
            status_tx: self.status_tx.clone(),
            occupancy_tx: self.occupancy_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        // Bounded handshake: the worker confirms it is actually executing
        // before start() declares the session running.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(1);

        let spawn_result = thread::Builder::new()
            .name("freeq-worker".into())
            .spawn(move || {
                let _ = ready_tx.send(());
                worker::run(ctx);
            });

        let handle = match spawn_result {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                return Err(FreeqError::Io(e));
            }
        };

        if ready_rx.recv().is_err() {
            self.running.store(false, Ordering::SeqCst);
            self.set_status(SessionStatus::Error, Some("worker died at startup".into()));
            return Err(FreeqError::WorkerStartup);
        }

        *self.worker.lock() = Some(WorkerHandle {
            thread: handle,
            signal,
        });
        self.set_status(SessionStatus::Running, None);
        info!(
            capacity = self.config.capacity_frames,
            channels = self.config.channel_count,
            batch_frames = self.config.batch_frames(),
            "session started"
        );
        Ok(realtime_end)
    }

    /// Stop the worker and release the channel.
    ///
    /// Closes the wake signal so a worker blocked in its wait exits
    /// immediately, then joins the thread.
    ///
    /// # Errors
    /// - `FreeqError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FreeqError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.signal.close();
            if handle.thread.join().is_err() {
                self.set_status(SessionStatus::Error, Some("worker thread panicked".into()));
                return Err(FreeqError::Other(anyhow::anyhow!(
                    "worker thread panicked during shutdown"
                )));
            }
        }

        self.processor.0.lock().reset();
        self.set_status(SessionStatus::Stopped, None);
        info!("session stopped");
        Ok(())
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to lifecycle/status events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to per-batch occupancy events.
    pub fn subscribe_occupancy(&self) -> broadcast::Receiver<OccupancyEvent> {
        self.occupancy_tx.subscribe()
    }

    /// Snapshot of worker counters for observability.
    pub fn diagnostics_snapshot(&self) -> worker::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}
