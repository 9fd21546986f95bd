//! Owned planar frame batch passed between the worker loop and the processor.
//!
//! Allocated once at worker startup (on the non-RT thread) and reused for
//! every batch; the rings themselves never retain it.

/// A fixed-size block of planar f32 frames: one `Vec` per channel, all of the
/// same length.
#[derive(Debug, Clone)]
pub struct FrameBlock {
    channels: Vec<Vec<f32>>,
    block_len: usize,
}

impl FrameBlock {
    /// Allocate a zero-filled block of `channel_count` channels ×
    /// `block_len` frames.
    ///
    /// # Panics
    /// If `channel_count` or `block_len` is zero.
    pub fn new(channel_count: usize, block_len: usize) -> Self {
        assert!(channel_count > 0, "FrameBlock needs at least one channel");
        assert!(block_len > 0, "FrameBlock needs a non-zero block length");
        Self {
            channels: vec![vec![0.0; block_len]; channel_count],
            block_len,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Mutable samples of one channel.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    /// Per-channel read views, in channel order — the shape `push` expects.
    pub fn as_slices(&self) -> Vec<&[f32]> {
        self.channels.iter().map(Vec::as_slice).collect()
    }

    /// Per-channel write views, in channel order — the shape `pull` expects.
    pub fn as_mut_slices(&mut self) -> Vec<&mut [f32]> {
        self.channels.iter_mut().map(Vec::as_mut_slice).collect()
    }

    /// Overwrite every channel with silence.
    pub fn fill_silence(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    /// Duration of the block at `sample_rate` Hz.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.block_len as f64 / f64::from(sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_is_silent() {
        let block = FrameBlock::new(2, 128);
        assert_eq!(block.channel_count(), 2);
        assert_eq!(block.block_len(), 128);
        assert!(block.channel(0).iter().all(|&s| s == 0.0));
        assert!(block.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn fill_silence_clears_written_samples() {
        let mut block = FrameBlock::new(1, 4);
        block.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        block.fill_silence();
        assert_eq!(block.channel(0), &[0.0; 4]);
    }

    #[test]
    fn slice_views_cover_all_channels() {
        let mut block = FrameBlock::new(3, 8);
        assert_eq!(block.as_slices().len(), 3);
        assert_eq!(block.as_mut_slices().len(), 3);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let block = FrameBlock::new(1, 2560);
        approx::assert_abs_diff_eq!(block.duration_secs(48_000), 2560.0 / 48_000.0);
    }

    #[test]
    #[should_panic(expected = "at least one channel")]
    fn zero_channels_is_fatal() {
        let _ = FrameBlock::new(0, 128);
    }
}
