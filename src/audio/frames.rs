//! Fixed-duration frame assembly from arbitrarily-sized capture blocks.
//!
//! The capture device delivers blocks on its own timing; the voice activity
//! detector needs exact 30ms frames. `FrameAccumulator` repacks one into the
//! other without dropping, duplicating, or reordering samples.

use std::collections::VecDeque;

/// An immutable block of mono float samples in [-1.0, 1.0].
///
/// Frames emitted by `FrameAccumulator` always hold exactly one
/// classification window; frames captured into a recording session keep
/// whatever length the device delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    pub(crate) fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Copy a capture block into an owned frame.
    pub fn from_block(block: &[f32]) -> Self {
        Self {
            samples: block.to_vec(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Repacks incoming sample blocks into fixed-length frames.
///
/// Blocks are queued as-is; `next_frame` dequeues chunks, concatenates
/// exactly `frame_len` samples, and pushes any surplus back to the queue
/// front for the next pass. After draining, fewer than `frame_len` samples
/// remain buffered.
#[derive(Debug)]
pub struct FrameAccumulator {
    chunks: VecDeque<Vec<f32>>,
    buffered: usize,
    frame_len: usize,
}

impl FrameAccumulator {
    pub fn new(frame_len: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            buffered: 0,
            frame_len,
        }
    }

    /// Queue one capture block. Never blocks; empty blocks are ignored.
    pub fn push(&mut self, block: &[f32]) {
        if block.is_empty() {
            return;
        }
        self.buffered += block.len();
        self.chunks.push_back(block.to_vec());
    }

    /// Assemble the next complete frame, if enough samples are buffered.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.frame_len == 0 || self.buffered < self.frame_len {
            return None;
        }

        let mut frame = Vec::with_capacity(self.frame_len);
        while frame.len() < self.frame_len {
            let mut chunk = self.chunks.pop_front()?;
            let need = self.frame_len - frame.len();
            if chunk.len() <= need {
                frame.extend_from_slice(&chunk);
            } else {
                frame.extend_from_slice(&chunk[..need]);
                // Surplus goes back to the queue front for the next frame.
                let rest = chunk.split_off(need);
                self.chunks.push_front(rest);
            }
        }
        self.buffered -= self.frame_len;
        Some(AudioFrame::new(frame))
    }

    /// Drop any buffered samples, e.g. when a new playback session starts.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered = 0;
    }

    /// Samples currently buffered but not yet emitted as a frame.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

/// Mean absolute amplitude of a block, clamped to [0.0, 1.0].
///
/// A cheap level-meter metric, deliberately not RMS.
pub fn mean_abs_level(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|s| s.abs()).sum();
    (sum / block.len() as f32).clamp(0.0, 1.0)
}

/// Re-quantize float samples to signed 16-bit PCM.
///
/// Clips to [-1.0, 1.0] and scales by 32767, no dithering — the format the
/// voice activity detector and the WAV artifact both expect.
pub fn quantize_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Concatenate captured frames into one contiguous sample buffer.
pub fn concat_frames(frames: &[AudioFrame]) -> Vec<f32> {
    let total: usize = frames.iter().map(AudioFrame::len).sum();
    let mut out = Vec::with_capacity(total);
    for frame in frames {
        out.extend_from_slice(frame.samples());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| i as f32).collect()
    }

    #[test]
    fn emits_nothing_below_one_frame() {
        let mut acc = FrameAccumulator::new(480);
        acc.push(&indexed(0, 479));
        assert!(acc.next_frame().is_none());
        assert_eq!(acc.buffered(), 479);
    }

    #[test]
    fn emits_exact_frame_from_single_block() {
        let mut acc = FrameAccumulator::new(480);
        acc.push(&indexed(0, 480));
        let frame = acc.next_frame().unwrap();
        assert_eq!(frame.len(), 480);
        assert_eq!(frame.samples(), indexed(0, 480).as_slice());
        assert!(acc.next_frame().is_none());
        assert_eq!(acc.buffered(), 0);
    }

    #[test]
    fn surplus_samples_carry_into_next_frame() {
        let mut acc = FrameAccumulator::new(480);
        acc.push(&indexed(0, 700));
        let first = acc.next_frame().unwrap();
        assert_eq!(first.samples(), indexed(0, 480).as_slice());
        assert_eq!(acc.buffered(), 220);

        acc.push(&indexed(700, 300));
        let second = acc.next_frame().unwrap();
        assert_eq!(second.samples(), indexed(480, 480).as_slice());
        assert_eq!(acc.buffered(), 40);
    }

    #[test]
    fn irregular_block_sizes_preserve_order_without_loss() {
        // Property check: arbitrary splits must reproduce the input stream
        // exactly, frame by frame.
        let frame_len = 480;
        let block_sizes = [7usize, 480, 100, 933, 1, 479, 960, 13, 2000, 480];
        let total: usize = block_sizes.iter().sum();

        let mut acc = FrameAccumulator::new(frame_len);
        let mut emitted = Vec::new();
        let mut cursor = 0;
        for &size in &block_sizes {
            acc.push(&indexed(cursor, size));
            cursor += size;
            while let Some(frame) = acc.next_frame() {
                assert_eq!(frame.len(), frame_len);
                emitted.extend_from_slice(frame.samples());
            }
            // Invariant: less than one frame buffered after draining.
            assert!(acc.buffered() < frame_len);
        }

        assert_eq!(emitted.len(), (total / frame_len) * frame_len);
        let expected: Vec<f32> = (0..emitted.len()).map(|i| i as f32).collect();
        assert_eq!(emitted, expected);
        assert_eq!(acc.buffered(), total - emitted.len());
    }

    #[test]
    fn many_tiny_blocks_assemble_one_frame() {
        let mut acc = FrameAccumulator::new(480);
        for i in 0..480 {
            acc.push(&[i as f32]);
        }
        let frame = acc.next_frame().unwrap();
        assert_eq!(frame.samples(), indexed(0, 480).as_slice());
    }

    #[test]
    fn clear_discards_buffered_samples() {
        let mut acc = FrameAccumulator::new(480);
        acc.push(&indexed(0, 300));
        acc.clear();
        assert_eq!(acc.buffered(), 0);
        acc.push(&indexed(0, 480));
        let frame = acc.next_frame().unwrap();
        assert_eq!(frame.samples(), indexed(0, 480).as_slice());
    }

    #[test]
    fn empty_blocks_are_ignored() {
        let mut acc = FrameAccumulator::new(480);
        acc.push(&[]);
        assert_eq!(acc.buffered(), 0);
    }

    #[test]
    fn zero_frame_len_never_emits() {
        let mut acc = FrameAccumulator::new(0);
        acc.push(&indexed(0, 100));
        assert!(acc.next_frame().is_none());
    }

    #[test]
    fn level_of_silence_is_zero() {
        assert_eq!(mean_abs_level(&[0.0; 480]), 0.0);
        assert_eq!(mean_abs_level(&[]), 0.0);
    }

    #[test]
    fn level_of_full_scale_input_is_one() {
        let block = vec![1.0f32; 100];
        assert!((mean_abs_level(&block) - 1.0).abs() < f32::EPSILON);
        let block = vec![-1.0f32; 100];
        assert!((mean_abs_level(&block) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn level_clamps_out_of_range_input() {
        // Synthetic values far outside [-1, 1] must not push the level
        // metric past 1.0.
        let block = vec![25.0f32, -40.0, 3.5];
        assert_eq!(mean_abs_level(&block), 1.0);
    }

    #[test]
    fn level_of_mixed_signal() {
        let block = vec![0.5f32, -0.5, 0.5, -0.5];
        assert!((mean_abs_level(&block) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn quantize_scales_and_clips() {
        let samples = vec![0.0f32, 1.0, -1.0, 0.5, 2.0, -2.0];
        let pcm = quantize_i16(&samples);
        assert_eq!(pcm[0], 0);
        assert_eq!(pcm[1], 32767);
        assert_eq!(pcm[2], -32767);
        assert_eq!(pcm[3], 16383);
        // Out-of-range input clips instead of wrapping.
        assert_eq!(pcm[4], 32767);
        assert_eq!(pcm[5], -32767);
    }

    #[test]
    fn concat_preserves_frame_order() {
        let frames = vec![
            AudioFrame::from_block(&[1.0, 2.0]),
            AudioFrame::from_block(&[]),
            AudioFrame::from_block(&[3.0]),
        ];
        assert_eq!(concat_frames(&frames), vec![1.0, 2.0, 3.0]);
        assert!(concat_frames(&[]).is_empty());
    }
}
