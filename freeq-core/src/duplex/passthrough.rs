//! `PassthroughProcessor` — placeholder backend that copies input to output.
//!
//! Used by tests, the benchmark and the demo to exercise the full duplex
//! path end-to-end before a real DSP/codec/GPU payload is plugged in.

use tracing::debug;

use crate::duplex::BatchProcessor;
use crate::error::Result;
use crate::ring::frames::FrameBlock;

/// Copies every batch through unchanged, optionally scaled by a linear gain.
pub struct PassthroughProcessor {
    gain: f32,
    batches: u64,
}

impl PassthroughProcessor {
    pub fn new() -> Self {
        Self::with_gain(1.0)
    }

    pub fn with_gain(gain: f32) -> Self {
        Self { gain, batches: 0 }
    }
}

impl Default for PassthroughProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProcessor for PassthroughProcessor {
    fn warm_up(&mut self) -> Result<()> {
        debug!("PassthroughProcessor::warm_up — no-op");
        Ok(())
    }

    fn process(&mut self, input: &FrameBlock, output: &mut FrameBlock) -> Result<()> {
        assert_eq!(
            input.channel_count(),
            output.channel_count(),
            "processor batches must agree on channel count",
        );
        assert_eq!(
            input.block_len(),
            output.block_len(),
            "processor batches must agree on block length",
        );

        for ch in 0..input.channel_count() {
            let src = input.channel(ch);
            let dst = output.channel_mut(ch);
            if self.gain == 1.0 {
                dst.copy_from_slice(src);
            } else {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = s * self.gain;
                }
            }
        }

        self.batches += 1;
        Ok(())
    }

    fn reset(&mut self) {
        debug!(batches = self.batches, "PassthroughProcessor::reset");
        self.batches = 0;
    }
}
