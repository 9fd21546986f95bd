//! Blocking worker loop.
//!
//! ## Loop stages (per iteration)
//!
//! ```text
//! 1. Wait on the wake signal (bounded timeout)
//! 2. Drain one batch from the input ring → FrameBlock
//! 3. BatchProcessor::process → output FrameBlock (silence on error)
//! 4. Submit the output batch to the output ring
//! 5. Broadcast an OccupancyEvent
//! 6. Clear the wake flag and go back to waiting
//! ```
//!
//! One batch per wakeup, exactly the WAITING → DRAINING → WAITING machine;
//! backlog beyond one batch is recovered by the producer re-signaling every
//! quantum and by the timeout watchdog below.
//!
//! A wait timeout while a full batch is pending means a signal was missed
//! (or the producer stopped signaling with data still buffered); the loop
//! logs it, counts it, and drains anyway so occupancy cannot grow without
//! bound unobserved.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    duplex::{ProcessorHandle, WorkerEnd},
    events::{OccupancyEvent, SessionStatus, SessionStatusEvent},
    ring::frames::FrameBlock,
    session::SessionConfig,
    wake::WaitOutcome,
};

pub struct WorkerDiagnostics {
    pub wakeups: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub missed_signals: AtomicUsize,
    pub batches_processed: AtomicUsize,
    pub frames_in: AtomicUsize,
    pub frames_out: AtomicUsize,
    pub processor_errors: AtomicUsize,
    pub output_overruns: AtomicUsize,
}

impl Default for WorkerDiagnostics {
    fn default() -> Self {
        Self {
            wakeups: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
            missed_signals: AtomicUsize::new(0),
            batches_processed: AtomicUsize::new(0),
            frames_in: AtomicUsize::new(0),
            frames_out: AtomicUsize::new(0),
            processor_errors: AtomicUsize::new(0),
            output_overruns: AtomicUsize::new(0),
        }
    }
}

impl WorkerDiagnostics {
    pub fn reset(&self) {
        self.wakeups.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.missed_signals.store(0, Ordering::Relaxed);
        self.batches_processed.store(0, Ordering::Relaxed);
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_out.store(0, Ordering::Relaxed);
        self.processor_errors.store(0, Ordering::Relaxed);
        self.output_overruns.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            wakeups: self.wakeups.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            missed_signals: self.missed_signals.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            processor_errors: self.processor_errors.load(Ordering::Relaxed),
            output_overruns: self.output_overruns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub wakeups: usize,
    pub timeouts: usize,
    pub missed_signals: usize,
    pub batches_processed: usize,
    pub frames_in: usize,
    pub frames_out: usize,
    pub processor_errors: usize,
    pub output_overruns: usize,
}

/// All context the worker needs, passed as one struct so the spawn closure
/// stays tidy.
pub struct WorkerContext {
    pub config: SessionConfig,
    pub processor: ProcessorHandle,
    pub end: WorkerEnd,
    pub running: Arc<AtomicBool>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub occupancy_tx: broadcast::Sender<OccupancyEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<WorkerDiagnostics>,
}

/// Run the blocking loop until `ctx.running` clears or the signal closes.
pub fn run(mut ctx: WorkerContext) {
    let batch_frames = ctx.end.batch_frames();
    let channel_count = ctx.end.channel_count();
    info!(batch_frames, channel_count, "worker started");

    // Both scratch blocks are allocated once and reused for every batch.
    let mut input_block = FrameBlock::new(channel_count, batch_frames);
    let mut output_block = FrameBlock::new(channel_count, batch_frames);
    let mut batches = 0u64;
    let mut degraded = false;

    loop {
        // ── 0. Check running flag ─────────────────────────────────────────
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Wait for the producer's signal ─────────────────────────────
        match ctx.end.wait(ctx.config.wait_timeout) {
            WaitOutcome::Closed => {
                debug!("wake signal closed");
                break;
            }
            WaitOutcome::TimedOut => {
                ctx.diagnostics.timeouts.fetch_add(1, Ordering::Relaxed);
                if !ctx.end.input_ready() {
                    continue;
                }
                // Full batch buffered with no signal observed.
                ctx.diagnostics.missed_signals.fetch_add(1, Ordering::Relaxed);
                warn!(
                    pending = ctx.end.input_frames(),
                    "full batch pending without a signal — draining anyway"
                );
            }
            WaitOutcome::Changed => {
                ctx.diagnostics.wakeups.fetch_add(1, Ordering::Relaxed);
            }
        }

        // ── 2. Drain one batch ────────────────────────────────────────────
        if ctx.end.drain_batch(&mut input_block) {
            ctx.diagnostics
                .frames_in
                .fetch_add(batch_frames, Ordering::Relaxed);

            // ── 3. Process (may run arbitrarily long) ─────────────────────
            let result = {
                let mut processor = ctx.processor.0.lock();
                processor.process(&input_block, &mut output_block)
            };
            match result {
                Ok(()) => {
                    if degraded {
                        degraded = false;
                        let _ = ctx.status_tx.send(SessionStatusEvent {
                            status: SessionStatus::Running,
                            detail: None,
                        });
                    }
                }
                Err(e) => {
                    ctx.diagnostics
                        .processor_errors
                        .fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "processor failed — substituting silence");
                    output_block.fill_silence();
                    if !degraded {
                        degraded = true;
                        let _ = ctx.status_tx.send(SessionStatusEvent {
                            status: SessionStatus::Running,
                            detail: Some(
                                "processing degraded: batch failed, emitting silence".into(),
                            ),
                        });
                    }
                }
            }

            // ── 4. Submit the processed batch ─────────────────────────────
            if ctx.end.submit_batch(&output_block) {
                ctx.diagnostics
                    .frames_out
                    .fetch_add(batch_frames, Ordering::Relaxed);
            } else {
                ctx.diagnostics
                    .output_overruns
                    .fetch_add(1, Ordering::Relaxed);
                warn!("output ring full — dropping processed batch");
            }

            batches += 1;
            ctx.diagnostics
                .batches_processed
                .fetch_add(1, Ordering::Relaxed);

            // ── 5. Occupancy event ────────────────────────────────────────
            let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
            let _ = ctx.occupancy_tx.send(OccupancyEvent {
                seq,
                input_frames: ctx.end.input_frames(),
                output_frames: ctx.end.output_frames(),
                batches,
            });
        }

        // ── 6. Back to WAITING ────────────────────────────────────────────
        ctx.end.clear_signal();
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        wakeups = snap.wakeups,
        timeouts = snap.timeouts,
        missed_signals = snap.missed_signals,
        batches_processed = snap.batches_processed,
        frames_in = snap.frames_in,
        frames_out = snap.frames_out,
        processor_errors = snap.processor_errors,
        output_overruns = snap.output_overruns,
        "worker stopped — diagnostics"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::{Duration, Instant};

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::duplex::{create_duplex, BatchProcessor, RealtimeEnd};
    use crate::error::{FreeqError, Result};
    use crate::wake::SIGNALED;

    struct CountingProcessor {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl BatchProcessor for CountingProcessor {
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }

        fn process(&mut self, input: &FrameBlock, output: &mut FrameBlock) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(FreeqError::Processor("intentional test failure".into()));
            }
            for ch in 0..input.channel_count() {
                output.channel_mut(ch).copy_from_slice(input.channel(ch));
            }
            Ok(())
        }

        fn reset(&mut self) {}
    }

    fn recv_occupancy_with_timeout(
        rx: &mut broadcast::Receiver<OccupancyEvent>,
        timeout: Duration,
    ) -> OccupancyEvent {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for occupancy event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("occupancy channel closed unexpectedly"),
            }
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            capacity_frames: 64,
            channel_count: 1,
            quantum_frames: 4,
            batch_quanta: 2,
            wait_timeout: Duration::from_millis(25),
            prime_output: false,
            sample_rate: 48_000,
        }
    }

    struct Harness {
        rt: RealtimeEnd,
        running: Arc<AtomicBool>,
        occupancy_rx: broadcast::Receiver<OccupancyEvent>,
        status_rx: broadcast::Receiver<SessionStatusEvent>,
        diagnostics: Arc<WorkerDiagnostics>,
        calls: Arc<AtomicUsize>,
        handle: thread::JoinHandle<()>,
    }

    fn spawn_worker(fail: bool) -> Harness {
        let config = test_config();
        let (rt, end) = create_duplex(
            config.capacity_frames,
            config.channel_count,
            config.batch_frames(),
            config.prime_output,
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = ProcessorHandle::new(CountingProcessor {
            calls: Arc::clone(&calls),
            fail,
        });
        let running = Arc::new(AtomicBool::new(true));
        let (status_tx, status_rx) = broadcast::channel(16);
        let (occupancy_tx, occupancy_rx) = broadcast::channel(16);
        let diagnostics = Arc::new(WorkerDiagnostics::default());

        let ctx = WorkerContext {
            config,
            processor,
            end,
            running: Arc::clone(&running),
            status_tx,
            occupancy_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::clone(&diagnostics),
        };
        let handle = thread::spawn(move || run(ctx));

        Harness {
            rt,
            running,
            occupancy_rx,
            status_rx,
            diagnostics,
            calls,
            handle,
        }
    }

    fn stop(harness: Harness) {
        harness.running.store(false, Ordering::SeqCst);
        harness.rt.wake_signal().close();
        harness.handle.join().expect("worker thread panicked");
    }

    #[test]
    fn processes_one_batch_per_signal() {
        let mut harness = spawn_worker(false);
        let batch = test_config().batch_frames();

        let data: Vec<f32> = (0..batch).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; batch];
        let report =
            harness
                .rt
                .process_quantum(&[&data], &mut [&mut out[..]], batch);
        assert!(report.pushed);
        assert!(report.signaled);

        let event =
            recv_occupancy_with_timeout(&mut harness.occupancy_rx, Duration::from_secs(2));
        assert_eq!(event.seq, 0);
        assert_eq!(event.batches, 1);
        assert_eq!(event.input_frames, 0);
        assert_eq!(harness.calls.load(Ordering::Relaxed), 1);

        // The processed batch comes back out unchanged (unless the quantum's
        // own pull already raced it out of the ring).
        if !report.pulled {
            let deadline = Instant::now() + Duration::from_secs(1);
            while harness.rt.output_ready() < batch {
                assert!(Instant::now() < deadline, "output never arrived");
                thread::sleep(Duration::from_millis(2));
            }
            assert!(harness.rt.pull_output(&mut [&mut out[..]], batch));
        }
        assert_eq!(out, data);

        stop(harness);
    }

    #[test]
    fn exits_when_signal_closes() {
        let harness = spawn_worker(false);
        harness.rt.wake_signal().close();
        harness.handle.join().expect("worker thread panicked");
    }

    #[test]
    fn drains_pending_batch_after_missed_signal() {
        let mut harness = spawn_worker(false);
        let batch = test_config().batch_frames();

        // Push a full batch but never raise the signal.
        let data = vec![0.5f32; batch];
        assert!(harness.rt.push_input(&[&data], batch));

        let event =
            recv_occupancy_with_timeout(&mut harness.occupancy_rx, Duration::from_secs(2));
        assert_eq!(event.batches, 1);
        assert!(harness.diagnostics.snapshot().missed_signals >= 1);
        assert!(harness.diagnostics.snapshot().timeouts >= 1);

        stop(harness);
    }

    #[test]
    fn substitutes_silence_when_processor_fails() {
        let mut harness = spawn_worker(true);
        let batch = test_config().batch_frames();

        let data = vec![0.7f32; batch];
        let mut out = vec![1.0f32; batch];
        let report = harness
            .rt
            .process_quantum(&[&data], &mut [&mut out[..]], batch);

        let event =
            recv_occupancy_with_timeout(&mut harness.occupancy_rx, Duration::from_secs(2));
        assert_eq!(event.batches, 1);

        // Degraded status is announced once.
        let status_deadline = Instant::now() + Duration::from_secs(2);
        let status = loop {
            match harness.status_rx.try_recv() {
                Ok(ev) => break ev,
                Err(TryRecvError::Empty) => {
                    assert!(Instant::now() < status_deadline, "no status event");
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("status channel error: {e:?}"),
            }
        };
        assert_eq!(status.status, SessionStatus::Running);
        assert!(status.detail.expect("detail").contains("degraded"));

        // The substituted batch is silence.
        if !report.pulled {
            let deadline = Instant::now() + Duration::from_secs(1);
            while harness.rt.output_ready() < batch {
                assert!(Instant::now() < deadline, "output never arrived");
                thread::sleep(Duration::from_millis(2));
            }
            assert!(harness.rt.pull_output(&mut [&mut out[..]], batch));
        }
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(harness.diagnostics.snapshot().processor_errors, 1);

        stop(harness);
    }

    #[test]
    fn occupancy_sequence_increases_across_batches() {
        let mut harness = spawn_worker(false);
        let batch = test_config().batch_frames();
        let data = vec![0.1f32; batch];
        let mut out = vec![0.0f32; batch];
        let signal = harness.rt.wake_signal();

        for expected_seq in 0..3u64 {
            assert!(harness.rt.push_input(&[&data], batch));
            signal.store(SIGNALED);
            signal.notify(1);

            let event =
                recv_occupancy_with_timeout(&mut harness.occupancy_rx, Duration::from_secs(2));
            assert_eq!(event.seq, expected_seq);
            assert_eq!(event.batches, expected_seq + 1);

            // Keep the output ring drained so submits never overrun.
            let deadline = Instant::now() + Duration::from_secs(1);
            while harness.rt.output_ready() < batch {
                assert!(Instant::now() < deadline, "output never arrived");
                thread::sleep(Duration::from_millis(2));
            }
            assert!(harness.rt.pull_output(&mut [&mut out[..]], batch));
        }

        assert_eq!(harness.diagnostics.snapshot().batches_processed, 3);
        stop(harness);
    }

    #[test]
    fn raw_signal_without_data_is_harmless() {
        let harness = spawn_worker(false);
        let signal = harness.rt.wake_signal();
        signal.store(SIGNALED);
        signal.notify(1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(harness.diagnostics.snapshot().batches_processed, 0);
        stop(harness);
    }
}
