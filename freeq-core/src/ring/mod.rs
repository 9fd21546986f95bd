//! Lock-free SPSC ring buffer for planar multi-channel audio frames.
//!
//! # Design constraints
//!
//! The producer side runs inside a real-time render callback. `push`,
//! `pull` and every query here **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Panic on backpressure (a full or empty ring returns `false`)
//!
//! # Layout
//!
//! Each channel owns `capacity + 1` sample slots; the extra sentinel slot
//! makes `read == write` mean "empty" without ever colliding with "full".
//! Two `u32` indices complete the shared state: the read index is mutated
//! only by the consumer, the write index only by the producer. That
//! single-writer-per-index property is the whole synchronization story —
//! no CAS, no mutex, one Release store per completed operation.
//!
//! Sample slots are `atomic_float::AtomicF32` accessed with `Relaxed`
//! ordering; the Release store of the advanced index is the publish point
//! and the peer's Acquire load of that index is the observe point.
//!
//! # Handles
//!
//! `create_frame_ring` allocates the shared region once and returns a bound
//! `RingProducer`/`RingConsumer` pair. Handles are `Send` but not `Clone`,
//! and mutation requires `&mut self`, so "push only from the producer side,
//! pull only from the consumer side" is a compile-time property rather than
//! caller discipline. Moving a handle to its thread is the attach step; the
//! region is never reallocated.

pub mod frames;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;

/// Shared region backing one ring: channel slots plus the index register.
struct RingState {
    /// Per-channel sample slots, each `capacity + 1` long.
    channels: Vec<Box<[AtomicF32]>>,
    /// Usable capacity in frames (allocated length minus the sentinel slot).
    capacity: u32,
    /// Mutated only by the consumer.
    read_index: AtomicU32,
    /// Mutated only by the producer.
    write_index: AtomicU32,
}

impl RingState {
    fn slots(&self) -> u32 {
        self.capacity + 1
    }

    /// Frames readable given a snapshot of both indices.
    fn readable(&self, read: u32, write: u32) -> u32 {
        (write + self.slots() - read) % self.slots()
    }

    /// Frames writable given a snapshot of both indices.
    fn writable(&self, read: u32, write: u32) -> u32 {
        self.capacity - self.readable(read, write)
    }

    /// Atomic-load-only occupancy query, callable from either thread.
    /// May under- or over-report by one in-flight operation, never corrupt.
    fn available_frames(&self) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        self.readable(read, write) as usize
    }

    fn available_space(&self) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        self.writable(read, write) as usize
    }

    fn assert_channel_count(&self, channel_count: usize) {
        assert_eq!(
            channel_count,
            self.channels.len(),
            "caller passed {} channels to a {}-channel ring",
            channel_count,
            self.channels.len(),
        );
    }
}

/// Create a matched producer/consumer handle pair over one shared ring.
///
/// `capacity` is the usable capacity in frames; `capacity + 1` slots are
/// allocated per channel. Storage is zero-initialized and never resized.
///
/// # Panics
/// If `capacity` or `channel_count` is zero (programmer error — the two
/// sides of the channel must agree on the shared layout up front).
pub fn create_frame_ring(capacity: usize, channel_count: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity > 0, "ring capacity must be at least one frame");
    assert!(channel_count > 0, "ring needs at least one channel");
    // Half the u32 range keeps index + slot-count sums overflow-free.
    assert!(
        capacity < (u32::MAX / 2) as usize,
        "ring capacity {capacity} does not fit the u32 index register",
    );

    let slots = capacity + 1;
    let channels = (0..channel_count)
        .map(|_| {
            (0..slots)
                .map(|_| AtomicF32::new(0.0))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        })
        .collect();

    let state = Arc::new(RingState {
        channels,
        capacity: capacity as u32,
        read_index: AtomicU32::new(0),
        write_index: AtomicU32::new(0),
    });

    (
        RingProducer {
            state: Arc::clone(&state),
        },
        RingConsumer { state },
    )
}

/// Producer handle — held by the real-time thread. Exposes `push` only.
pub struct RingProducer {
    state: Arc<RingState>,
}

impl RingProducer {
    /// Append `block_len` frames from planar caller slices.
    ///
    /// Returns `false` without touching any state when fewer than
    /// `block_len` frames of space are free. On success the sample copy
    /// completes before the write index is published.
    ///
    /// # Panics
    /// If the slice count does not match the ring's channel count, or any
    /// slice is shorter than `block_len`.
    pub fn push(&mut self, input: &[&[f32]], block_len: usize) -> bool {
        let state = &self.state;
        state.assert_channel_count(input.len());
        for src in input {
            assert!(
                src.len() >= block_len,
                "push source slice holds {} frames, block length is {}",
                src.len(),
                block_len,
            );
        }
        if block_len == 0 {
            return true;
        }

        // The producer is the only writer of write_index; Relaxed reloads
        // its own last store.
        let write = state.write_index.load(Ordering::Relaxed);
        let read = state.read_index.load(Ordering::Acquire);
        if (state.writable(read, write) as usize) < block_len {
            return false;
        }

        let slots = state.slots() as usize;
        let start = write as usize;
        let head = block_len.min(slots - start);
        for (channel, src) in state.channels.iter().zip(input) {
            for (slot, &sample) in channel[start..start + head].iter().zip(&src[..head]) {
                slot.store(sample, Ordering::Relaxed);
            }
            for (slot, &sample) in channel[..block_len - head].iter().zip(&src[head..block_len]) {
                slot.store(sample, Ordering::Relaxed);
            }
        }

        // Publish point: every sample store above is ordered before this.
        let next = (write + block_len as u32) % state.slots();
        state.write_index.store(next, Ordering::Release);
        true
    }

    /// `push` from a channel-interleaved buffer (frame-major, the layout
    /// platform render callbacks hand out). Storage stays planar; only the
    /// caller view differs. Same failure contract as `push`, and likewise
    /// free of allocation.
    ///
    /// # Panics
    /// If `input` holds fewer than `block_len × channel_count` samples.
    pub fn push_interleaved(&mut self, input: &[f32], block_len: usize) -> bool {
        let state = &self.state;
        let channel_count = state.channels.len();
        assert!(
            input.len() >= block_len * channel_count,
            "interleaved push buffer holds {} samples, {} frames × {} channels needed",
            input.len(),
            block_len,
            channel_count,
        );
        if block_len == 0 {
            return true;
        }

        let write = state.write_index.load(Ordering::Relaxed);
        let read = state.read_index.load(Ordering::Acquire);
        if (state.writable(read, write) as usize) < block_len {
            return false;
        }

        let slots = state.slots() as usize;
        let start = write as usize;
        let head = block_len.min(slots - start);
        for (ch, channel) in state.channels.iter().enumerate() {
            for frame in 0..head {
                channel[start + frame].store(input[frame * channel_count + ch], Ordering::Relaxed);
            }
            for frame in head..block_len {
                channel[frame - head].store(input[frame * channel_count + ch], Ordering::Relaxed);
            }
        }

        let next = (write + block_len as u32) % state.slots();
        state.write_index.store(next, Ordering::Release);
        true
    }

    /// Frames currently readable by the peer.
    pub fn available_frames(&self) -> usize {
        self.state.available_frames()
    }

    /// Frames currently writable.
    pub fn available_space(&self) -> usize {
        self.state.available_space()
    }

    /// Whether at least `n` frames are readable — the wake-check query.
    pub fn has_enough_frames_for(&self, n: usize) -> bool {
        self.state.available_frames() >= n
    }

    /// Usable capacity in frames.
    pub fn capacity(&self) -> usize {
        self.state.capacity as usize
    }

    pub fn channel_count(&self) -> usize {
        self.state.channels.len()
    }
}

/// Consumer handle — held by the worker thread. Exposes `pull` only.
pub struct RingConsumer {
    state: Arc<RingState>,
}

impl RingConsumer {
    /// Remove `block_len` frames into planar caller slices.
    ///
    /// Returns `false` leaving the caller slices untouched when fewer than
    /// `block_len` frames are readable — callers on the real-time side must
    /// pre-zero their output or tolerate stale content on underrun.
    ///
    /// # Panics
    /// If the slice count does not match the ring's channel count, or any
    /// slice is shorter than `block_len`.
    pub fn pull(&mut self, output: &mut [&mut [f32]], block_len: usize) -> bool {
        let state = &self.state;
        state.assert_channel_count(output.len());
        for dst in output.iter() {
            assert!(
                dst.len() >= block_len,
                "pull destination slice holds {} frames, block length is {}",
                dst.len(),
                block_len,
            );
        }
        if block_len == 0 {
            return true;
        }

        // The consumer is the only writer of read_index.
        let read = state.read_index.load(Ordering::Relaxed);
        let write = state.write_index.load(Ordering::Acquire);
        if (state.readable(read, write) as usize) < block_len {
            return false;
        }

        let slots = state.slots() as usize;
        let start = read as usize;
        let head = block_len.min(slots - start);
        for (channel, dst) in state.channels.iter().zip(output.iter_mut()) {
            for (slot, sample) in channel[start..start + head].iter().zip(dst[..head].iter_mut()) {
                *sample = slot.load(Ordering::Relaxed);
            }
            for (slot, sample) in channel[..block_len - head]
                .iter()
                .zip(dst[head..block_len].iter_mut())
            {
                *sample = slot.load(Ordering::Relaxed);
            }
        }

        // Frees the slots for reuse; orders the loads above before the
        // producer's next overwrite.
        let next = (read + block_len as u32) % state.slots();
        state.read_index.store(next, Ordering::Release);
        true
    }

    /// `pull` into a channel-interleaved buffer (frame-major). Same failure
    /// contract as `pull`: on refusal the buffer is untouched.
    ///
    /// # Panics
    /// If `output` holds fewer than `block_len × channel_count` samples.
    pub fn pull_interleaved(&mut self, output: &mut [f32], block_len: usize) -> bool {
        let state = &self.state;
        let channel_count = state.channels.len();
        assert!(
            output.len() >= block_len * channel_count,
            "interleaved pull buffer holds {} samples, {} frames × {} channels needed",
            output.len(),
            block_len,
            channel_count,
        );
        if block_len == 0 {
            return true;
        }

        let read = state.read_index.load(Ordering::Relaxed);
        let write = state.write_index.load(Ordering::Acquire);
        if (state.readable(read, write) as usize) < block_len {
            return false;
        }

        let slots = state.slots() as usize;
        let start = read as usize;
        let head = block_len.min(slots - start);
        for (ch, channel) in state.channels.iter().enumerate() {
            for frame in 0..head {
                output[frame * channel_count + ch] = channel[start + frame].load(Ordering::Relaxed);
            }
            for frame in head..block_len {
                output[frame * channel_count + ch] = channel[frame - head].load(Ordering::Relaxed);
            }
        }

        let next = (read + block_len as u32) % state.slots();
        state.read_index.store(next, Ordering::Release);
        true
    }

    /// Frames currently readable.
    pub fn available_frames(&self) -> usize {
        self.state.available_frames()
    }

    /// Frames currently writable by the peer.
    pub fn available_space(&self) -> usize {
        self.state.available_space()
    }

    /// Whether at least `n` frames are readable.
    pub fn has_enough_frames_for(&self, n: usize) -> bool {
        self.state.available_frames() >= n
    }

    /// Usable capacity in frames.
    pub fn capacity(&self) -> usize {
        self.state.capacity as usize
    }

    pub fn channel_count(&self) -> usize {
        self.state.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn push1(producer: &mut RingProducer, samples: &[f32]) -> bool {
        producer.push(&[samples], samples.len())
    }

    fn pull1(consumer: &mut RingConsumer, len: usize) -> Option<Vec<f32>> {
        let mut out = vec![0.0f32; len];
        consumer.pull(&mut [out.as_mut_slice()], len).then_some(out)
    }

    #[test]
    fn push_pull_single_channel() {
        let (mut producer, mut consumer) = create_frame_ring(4, 1);

        assert!(push1(&mut producer, &[1.0, 2.0, 3.0]));
        assert_eq!(consumer.available_frames(), 3);

        assert_eq!(pull1(&mut consumer, 3), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(pull1(&mut consumer, 1), None);
    }

    #[test]
    fn rejected_push_mutates_nothing() {
        let (mut producer, mut consumer) = create_frame_ring(4, 1);
        assert!(push1(&mut producer, &[1.0, 2.0, 3.0]));

        // Only one free frame left — a 4-frame push must be refused whole.
        assert!(!push1(&mut producer, &[9.0, 9.0, 9.0, 9.0]));
        assert_eq!(producer.available_space(), 1);
        assert_eq!(consumer.available_frames(), 3);

        assert_eq!(pull1(&mut consumer, 3), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(consumer.available_frames(), 0);
    }

    #[test]
    fn rejected_pull_leaves_output_untouched() {
        let (mut producer, mut consumer) = create_frame_ring(4, 1);
        assert!(push1(&mut producer, &[5.0]));

        let mut out = vec![42.0f32; 3];
        assert!(!consumer.pull(&mut [out.as_mut_slice()], 3));
        assert_eq!(out, vec![42.0; 3]);
        assert_eq!(consumer.available_frames(), 1);
    }

    #[test]
    fn full_and_empty_are_unambiguous() {
        let (mut producer, mut consumer) = create_frame_ring(4, 1);

        assert!(push1(&mut producer, &[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(producer.available_space(), 0);
        assert_eq!(producer.available_frames(), 4);
        assert!(!push1(&mut producer, &[5.0]));

        assert_eq!(pull1(&mut consumer, 4), Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(consumer.available_frames(), 0);
        assert_eq!(consumer.available_space(), 4);
    }

    #[test]
    fn capacity_invariant_holds_after_every_operation() {
        let (mut producer, mut consumer) = create_frame_ring(5, 1);
        let check = |p: &RingProducer| {
            assert_eq!(p.available_frames() + p.available_space(), p.capacity());
        };

        check(&producer);
        for round in 0..7 {
            assert!(push1(&mut producer, &[round as f32; 3]));
            check(&producer);
            assert!(pull1(&mut consumer, 2).is_some());
            check(&producer);
            assert!(pull1(&mut consumer, 1).is_some());
            check(&producer);
        }
    }

    #[test]
    fn wraparound_preserves_order() {
        // capacity 5: fill, drain partially, then force the next block to
        // straddle the end of the slot array.
        let (mut producer, mut consumer) = create_frame_ring(5, 1);

        assert!(push1(&mut producer, &[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(pull1(&mut consumer, 3), Some(vec![1.0, 2.0, 3.0]));

        assert!(push1(&mut producer, &[5.0, 6.0, 7.0]));
        assert_eq!(pull1(&mut consumer, 4), Some(vec![4.0, 5.0, 6.0, 7.0]));
    }

    #[test]
    fn wraparound_roundtrips_all_block_lengths() {
        for capacity in 1..=8usize {
            for block in 1..=capacity {
                let (mut producer, mut consumer) = create_frame_ring(capacity, 1);
                let mut next = 0.0f32;
                let mut expect = 0.0f32;
                // Enough rounds to sweep the write index across the
                // sentinel slot several times.
                for _ in 0..(3 * (capacity + 1)) {
                    let data: Vec<f32> = (0..block)
                        .map(|i| next + i as f32)
                        .collect();
                    assert!(producer.push(&[&data], block));
                    next += block as f32;

                    let out = pull1(&mut consumer, block).expect("block readable");
                    for sample in out {
                        assert_eq!(sample, expect, "capacity={capacity} block={block}");
                        expect += 1.0;
                    }
                }
            }
        }
    }

    #[test]
    fn channels_stay_planar() {
        let (mut producer, mut consumer) = create_frame_ring(4, 2);
        let left = [1.0f32, 2.0, 3.0];
        let right = [-1.0f32, -2.0, -3.0];
        assert!(producer.push(&[&left, &right], 3));

        let mut out_l = vec![0.0f32; 3];
        let mut out_r = vec![0.0f32; 3];
        assert!(consumer.pull(&mut [out_l.as_mut_slice(), out_r.as_mut_slice()], 3));
        assert_eq!(out_l, left);
        assert_eq!(out_r, right);
    }

    #[test]
    fn fifo_order_across_separate_pushes() {
        let (mut producer, mut consumer) = create_frame_ring(8, 1);
        assert!(push1(&mut producer, &[1.0, 2.0]));
        assert!(push1(&mut producer, &[3.0]));
        assert!(push1(&mut producer, &[4.0, 5.0, 6.0]));

        assert_eq!(
            pull1(&mut consumer, 6),
            Some(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        );
    }

    #[test]
    fn queries_are_idempotent() {
        let (mut producer, consumer) = create_frame_ring(8, 1);
        assert!(push1(&mut producer, &[1.0, 2.0, 3.0]));

        for _ in 0..3 {
            assert_eq!(consumer.available_frames(), 3);
            assert_eq!(consumer.available_space(), 5);
            assert!(consumer.has_enough_frames_for(3));
            assert!(!consumer.has_enough_frames_for(4));
        }
    }

    #[test]
    fn zero_length_block_is_a_no_op() {
        let (mut producer, mut consumer) = create_frame_ring(4, 1);
        let mut scratch: [f32; 0] = [];
        assert!(producer.push(&[scratch.as_slice()], 0));
        assert_eq!(consumer.available_frames(), 0);
        assert!(consumer.pull(&mut [scratch.as_mut_slice()], 0));
    }

    #[test]
    fn interleaved_and_planar_views_agree() {
        let (mut producer, mut consumer) = create_frame_ring(6, 2);

        // Planar in, interleaved out.
        let left = [1.0f32, 2.0, 3.0];
        let right = [10.0f32, 20.0, 30.0];
        assert!(producer.push(&[&left, &right], 3));
        let mut interleaved = vec![0.0f32; 6];
        assert!(consumer.pull_interleaved(&mut interleaved, 3));
        assert_eq!(interleaved, vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);

        // Interleaved in (straddling the wraparound), planar out.
        let frames = [4.0f32, 40.0, 5.0, 50.0, 6.0, 60.0, 7.0, 70.0];
        assert!(producer.push_interleaved(&frames, 4));
        let mut out_l = vec![0.0f32; 4];
        let mut out_r = vec![0.0f32; 4];
        assert!(consumer.pull(&mut [out_l.as_mut_slice(), out_r.as_mut_slice()], 4));
        assert_eq!(out_l, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(out_r, vec![40.0, 50.0, 60.0, 70.0]);
    }

    #[test]
    fn rejected_interleaved_pull_leaves_buffer_untouched() {
        let (mut producer, mut consumer) = create_frame_ring(4, 2);
        let frames = [1.0f32, 2.0];
        assert!(producer.push_interleaved(&frames, 1));

        let mut out = vec![9.0f32; 4];
        assert!(!consumer.pull_interleaved(&mut out, 2));
        assert_eq!(out, vec![9.0; 4]);
    }

    #[test]
    fn block_longer_than_capacity_is_refused() {
        let (mut producer, consumer) = create_frame_ring(4, 1);
        assert!(!push1(&mut producer, &[0.0; 5]));
        assert_eq!(consumer.available_frames(), 0);
    }

    #[test]
    #[should_panic(expected = "channels")]
    fn channel_count_mismatch_is_fatal() {
        let (mut producer, _consumer) = create_frame_ring(4, 2);
        let mono = [0.0f32; 2];
        let _ = producer.push(&[&mono], 2);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn zero_capacity_is_fatal() {
        let _ = create_frame_ring(0, 1);
    }

    #[test]
    fn concurrent_spsc_transfers_without_loss() {
        const TOTAL: usize = 20_000;
        let (mut producer, mut consumer) = create_frame_ring(256, 1);

        let producer_thread = thread::spawn(move || {
            let mut next = 0usize;
            while next < TOTAL {
                let block = 17.min(TOTAL - next);
                let data: Vec<f32> = (next..next + block).map(|i| i as f32).collect();
                if producer.push(&[&data], block) {
                    next += block;
                } else {
                    thread::yield_now();
                }
            }
        });

        let consumer_thread = thread::spawn(move || {
            let mut expect = 0usize;
            let mut out = vec![0.0f32; 13];
            while expect < TOTAL {
                let block = 13.min(TOTAL - expect);
                if consumer.pull(&mut [&mut out[..block]], block) {
                    for &sample in &out[..block] {
                        assert_eq!(sample, expect as f32);
                        expect += 1;
                    }
                } else {
                    thread::yield_now();
                }
            }
        });

        producer_thread.join().expect("producer panicked");
        consumer_thread.join().expect("consumer panicked");
    }
}
