//! Full-duplex channel: two SPSC rings plus one wake signal.
//!
//! ## Roles
//!
//! ```text
//! RealtimeEnd (render callback)          WorkerEnd (blocking thread)
//!   push_input ──► input ring ──────────► drain_batch
//!                                             │ BatchProcessor::process
//!   pull_output ◄── output ring ◄──────── submit_batch
//!   wake-check ──► WakeSignal ──────────► wait / clear_signal
//! ```
//!
//! The realtime end performs only O(quantum) bounded work per call and never
//! blocks or allocates. The worker end drains one large batch per wakeup so
//! per-call overhead (locks, dispatch round-trips) is amortized over many
//! quanta. Batch size is fixed at construction; both ends must agree on it.

pub mod passthrough;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::ring::{create_frame_ring, frames::FrameBlock, RingConsumer, RingProducer};
use crate::wake::{WaitOutcome, WakeSignal, IDLE, SIGNALED};

/// Contract for the worker's processing stage.
///
/// `&mut self` on `process` intentionally expresses that processors are
/// stateful — filter memories, codec contexts, GPU staging buffers. All
/// mutation is serialised through `ProcessorHandle`'s `parking_lot::Mutex`.
pub trait BatchProcessor: Send + 'static {
    /// One-time warm-up: allocate scratch, prime caches, open device
    /// contexts. Called once at session startup, never on the audio thread.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be prepared.
    fn warm_up(&mut self) -> Result<()>;

    /// Transform one drained input batch into an equal-length output batch.
    ///
    /// `output` arrives pre-sized to the same shape as `input`; partial
    /// output is not part of the contract. May run arbitrarily long — the
    /// rings absorb the jitter.
    fn process(&mut self, input: &FrameBlock, output: &mut FrameBlock) -> Result<()>;

    /// Reset all internal state (e.g. between sessions).
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `BatchProcessor` implementor.
#[derive(Clone)]
pub struct ProcessorHandle(pub Arc<Mutex<dyn BatchProcessor>>);

impl ProcessorHandle {
    /// Wrap any `BatchProcessor` in a `ProcessorHandle`.
    pub fn new<P: BatchProcessor>(processor: P) -> Self {
        Self(Arc::new(Mutex::new(processor)))
    }
}

impl std::fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHandle").finish_non_exhaustive()
    }
}

/// What happened during one realtime quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantumReport {
    /// Input accepted by the ring (`false` = overrun, quantum dropped).
    pub pushed: bool,
    /// Output available for the renderer (`false` = underrun).
    pub pulled: bool,
    /// A full batch was pending and the worker was signaled.
    pub signaled: bool,
}

/// Create one full-duplex channel.
///
/// Both rings get `capacity_frames` usable frames per channel. When
/// `prime_output` is set, half a capacity of silence is pushed onto the
/// output ring so the renderer's first pulls do not underrun while the
/// worker spins up.
///
/// # Panics
/// If `batch_frames` is zero or exceeds `capacity_frames` (the worker could
/// never drain), or on zero capacity/channels.
pub fn create_duplex(
    capacity_frames: usize,
    channel_count: usize,
    batch_frames: usize,
    prime_output: bool,
) -> (RealtimeEnd, WorkerEnd) {
    assert!(batch_frames > 0, "batch must cover at least one frame");
    assert!(
        batch_frames <= capacity_frames,
        "batch of {batch_frames} frames can never fit a {capacity_frames}-frame ring",
    );

    let (input_producer, input_consumer) = create_frame_ring(capacity_frames, channel_count);
    let (mut output_producer, output_consumer) = create_frame_ring(capacity_frames, channel_count);
    let signal = Arc::new(WakeSignal::new());

    if prime_output {
        let cushion = capacity_frames / 2;
        if cushion > 0 {
            let silence = vec![0.0f32; cushion];
            let block: Vec<&[f32]> = (0..channel_count).map(|_| silence.as_slice()).collect();
            let accepted = output_producer.push(&block, cushion);
            debug_assert!(accepted, "fresh ring must accept the priming cushion");
        }
    }

    (
        RealtimeEnd {
            input: input_producer,
            output: output_consumer,
            signal: Arc::clone(&signal),
            batch_frames,
        },
        WorkerEnd {
            input: input_consumer,
            output: output_producer,
            signal,
            batch_frames,
        },
    )
}

/// Producer-role end, owned by the real-time render callback.
///
/// Every method is non-blocking, allocation-free, and bounded by the block
/// length passed in.
pub struct RealtimeEnd {
    input: RingProducer,
    output: RingConsumer,
    signal: Arc<WakeSignal>,
    batch_frames: usize,
}

impl RealtimeEnd {
    /// Hand freshly rendered/captured frames to the worker.
    pub fn push_input(&mut self, channels: &[&[f32]], block_len: usize) -> bool {
        self.input.push(channels, block_len)
    }

    /// Fetch processed frames for the renderer.
    pub fn pull_output(&mut self, channels: &mut [&mut [f32]], block_len: usize) -> bool {
        self.output.pull(channels, block_len)
    }

    /// One render quantum: push input, pull output, then signal the worker
    /// if a full batch is now pending. Re-signals every quantum while the
    /// backlog lasts, which also repairs any raced wakeup.
    pub fn process_quantum(
        &mut self,
        input: &[&[f32]],
        output: &mut [&mut [f32]],
        block_len: usize,
    ) -> QuantumReport {
        let pushed = self.push_input(input, block_len);
        let pulled = self.pull_output(output, block_len);
        let signaled = self.input.has_enough_frames_for(self.batch_frames);
        if signaled {
            self.signal.store(SIGNALED);
            self.signal.notify(1);
        }
        QuantumReport {
            pushed,
            pulled,
            signaled,
        }
    }

    /// `push_input` from a channel-interleaved buffer.
    pub fn push_input_interleaved(&mut self, input: &[f32], block_len: usize) -> bool {
        self.input.push_interleaved(input, block_len)
    }

    /// `pull_output` into a channel-interleaved buffer.
    pub fn pull_output_interleaved(&mut self, output: &mut [f32], block_len: usize) -> bool {
        self.output.pull_interleaved(output, block_len)
    }

    /// `process_quantum` over channel-interleaved buffers — the shape a
    /// platform render callback hands out. On underrun (`pulled == false`)
    /// the output buffer is untouched; the caller decides between silence
    /// and held-over content.
    pub fn process_quantum_interleaved(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        block_len: usize,
    ) -> QuantumReport {
        let pushed = self.input.push_interleaved(input, block_len);
        let pulled = self.output.pull_interleaved(output, block_len);
        let signaled = self.input.has_enough_frames_for(self.batch_frames);
        if signaled {
            self.signal.store(SIGNALED);
            self.signal.notify(1);
        }
        QuantumReport {
            pushed,
            pulled,
            signaled,
        }
    }

    /// Frames of input the worker has not yet drained.
    pub fn input_backlog(&self) -> usize {
        self.input.available_frames()
    }

    /// Frames of processed output ready to pull.
    pub fn output_ready(&self) -> usize {
        self.output.available_frames()
    }

    pub fn batch_frames(&self) -> usize {
        self.batch_frames
    }

    pub fn channel_count(&self) -> usize {
        self.input.channel_count()
    }

    /// Shared wake signal (for session-owned shutdown).
    pub fn wake_signal(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.signal)
    }
}

/// Consumer-role end, owned by the worker thread. The only end that blocks.
pub struct WorkerEnd {
    input: RingConsumer,
    output: RingProducer,
    signal: Arc<WakeSignal>,
    batch_frames: usize,
}

impl WorkerEnd {
    /// Block until signaled, closed, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        self.signal.wait_if_equal(IDLE, timeout)
    }

    /// Reset the wake flag after a batch — the WAITING transition.
    pub fn clear_signal(&self) {
        self.signal.store(IDLE);
    }

    /// Whether a full batch is readable right now.
    pub fn input_ready(&self) -> bool {
        self.input.has_enough_frames_for(self.batch_frames)
    }

    /// Pull one full batch into `block`. Returns `false` (block untouched)
    /// when less than a batch is buffered.
    ///
    /// # Panics
    /// If `block` is not shaped `channel_count × batch_frames`.
    pub fn drain_batch(&mut self, block: &mut FrameBlock) -> bool {
        assert_eq!(
            block.block_len(),
            self.batch_frames,
            "drain block length does not match the agreed batch size",
        );
        let mut views = block.as_mut_slices();
        self.input.pull(&mut views, self.batch_frames)
    }

    /// Push one processed batch. Returns `false` when the renderer has not
    /// pulled enough output yet (overrun — the batch is dropped by the
    /// caller's policy, not retried here).
    ///
    /// # Panics
    /// If `block` is not shaped `channel_count × batch_frames`.
    pub fn submit_batch(&mut self, block: &FrameBlock) -> bool {
        assert_eq!(
            block.block_len(),
            self.batch_frames,
            "submit block length does not match the agreed batch size",
        );
        let views = block.as_slices();
        self.output.push(&views, self.batch_frames)
    }

    /// Frames still readable on the input ring.
    pub fn input_frames(&self) -> usize {
        self.input.available_frames()
    }

    /// Frames readable on the output ring.
    pub fn output_frames(&self) -> usize {
        self.output.available_frames()
    }

    pub fn batch_frames(&self) -> usize {
        self.batch_frames
    }

    pub fn channel_count(&self) -> usize {
        self.input.channel_count()
    }

    /// Shared wake signal (for session-owned shutdown).
    pub fn wake_signal(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.signal)
    }
}
