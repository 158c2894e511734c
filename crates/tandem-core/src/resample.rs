//! Sample-rate conversion primitive.
//!
//! [`Resample`] is the narrow contract the resampling adapter drives: feed a
//! block of planar input frames, get as many output frames as the ratio
//! yields. Implementations are streaming; state carried between calls keeps
//! block boundaries inaudible.
//!
//! [`LinearResampler`] is the built-in implementation. It interpolates
//! linearly between consecutive input frames, which is cheap and adequate for
//! small rate differences (44.1 kHz vs 48 kHz device mismatches). A
//! higher-quality converter can be plugged in through the trait.

use thiserror::Error;

/// Largest accepted ratio in either direction (`1 / MAX_RATIO ..= MAX_RATIO`).
pub const MAX_RATIO: f64 = 256.0;

/// Numeric failure reported by a [`Resample`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ResampleError {
    /// Ratio is zero, negative, not finite, or outside the supported range.
    #[error("unusable resampling ratio {0}")]
    InvalidRatio(f64),

    /// Fewer buffers were passed than the resampler was built for.
    #[error("resampler built for {expected} channels, got {actual}")]
    ChannelMismatch {
        /// Channels the resampler was built for.
        expected: usize,
        /// Buffers actually passed.
        actual: usize,
    },
}

/// A streaming multi-channel rate converter.
pub trait Resample: Send {
    /// Build a converter for `channels` channels with empty history.
    fn for_channels(channels: usize) -> Self
    where
        Self: Sized;

    /// Channel count this converter was built for.
    fn channels(&self) -> usize;

    /// Convert `in_frames` frames of `input` at `ratio` (output rate / input rate).
    ///
    /// Output is written to `output[c][out_start..out_start + out_frames]` and
    /// never beyond. Returns the number of frames produced, which is roughly
    /// `in_frames * ratio` and at most `out_frames`.
    ///
    /// # Errors
    ///
    /// [`ResampleError::InvalidRatio`] for ratios the converter cannot honour,
    /// [`ResampleError::ChannelMismatch`] if `input` or `output` hold fewer
    /// buffers than [`channels`](Self::channels).
    fn resample(
        &mut self,
        input: &[Vec<f32>],
        in_frames: usize,
        output: &mut [Vec<f32>],
        out_start: usize,
        out_frames: usize,
        ratio: f64,
    ) -> Result<usize, ResampleError>;

    /// Forget all history, as if freshly built.
    fn reset(&mut self);
}

/// Check a ratio against the range every built-in converter accepts.
pub fn validate_ratio(ratio: f64) -> Result<(), ResampleError> {
    if ratio.is_finite() && (1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio) {
        Ok(())
    } else {
        Err(ResampleError::InvalidRatio(ratio))
    }
}

/// Streaming linear-interpolation converter.
///
/// Each output frame sits at a fractional read position between the previous
/// input frame and the current one. The last frame of every block is kept so
/// the first output of the next block interpolates across the boundary.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    position: f64,
    last: Vec<f32>,
}

impl LinearResampler {
    /// Build a converter for `channels` channels.
    pub fn new(channels: usize) -> Self {
        Self {
            position: 0.0,
            last: vec![0.0; channels],
        }
    }
}

impl Resample for LinearResampler {
    fn for_channels(channels: usize) -> Self {
        Self::new(channels)
    }

    fn channels(&self) -> usize {
        self.last.len()
    }

    fn resample(
        &mut self,
        input: &[Vec<f32>],
        in_frames: usize,
        output: &mut [Vec<f32>],
        out_start: usize,
        out_frames: usize,
        ratio: f64,
    ) -> Result<usize, ResampleError> {
        validate_ratio(ratio)?;
        let channels = self.channels();
        for actual in [input.len(), output.len()] {
            if actual < channels {
                return Err(ResampleError::ChannelMismatch {
                    expected: channels,
                    actual,
                });
            }
        }

        let step = 1.0 / ratio;
        let end = in_frames as f64;
        let mut produced = 0;

        while self.position < end && produced < out_frames {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            for c in 0..channels {
                let previous = if index == 0 {
                    self.last[c]
                } else {
                    input[c][index - 1]
                };
                let current = input[c][index];
                output[c][out_start + produced] = previous + (current - previous) * frac;
            }
            self.position += step;
            produced += 1;
        }

        // Output space ran out: drop the unconsumed input rather than stall.
        self.position = (self.position - end).max(0.0);

        if in_frames > 0 {
            for (c, last) in self.last.iter_mut().enumerate() {
                *last = input[c][in_frames - 1];
            }
        }

        Ok(produced)
    }

    fn reset(&mut self) {
        self.position = 0.0;
        self.last.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(resampler: &mut LinearResampler, input: &[Vec<f32>], ratio: f64) -> Vec<Vec<f32>> {
        let frames = input[0].len();
        let capacity = (frames as f64 * ratio).ceil() as usize + 2;
        let mut output = vec![vec![0.0; capacity]; input.len()];
        let produced = resampler
            .resample(input, frames, &mut output, 0, capacity, ratio)
            .unwrap();
        for channel in &mut output {
            channel.truncate(produced);
        }
        output
    }

    #[test]
    fn unity_ratio_is_one_frame_delay() {
        let mut r = LinearResampler::new(1);
        let out = run(&mut r, &[vec![1.0, 2.0, 3.0, 4.0]], 1.0);
        assert_eq!(out[0], vec![0.0, 1.0, 2.0, 3.0]);

        let out = run(&mut r, &[vec![5.0, 6.0]], 1.0);
        assert_eq!(out[0], vec![4.0, 5.0]);
    }

    #[test]
    fn upsampling_by_two_interpolates_midpoints() {
        let mut r = LinearResampler::new(1);
        let out = run(&mut r, &[vec![2.0, 4.0, 6.0]], 2.0);
        assert_eq!(out[0], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn downsampling_by_two_halves_count() {
        let mut r = LinearResampler::new(2);
        let input = vec![(0..100).map(|i| i as f32).collect(), vec![0.5; 100]];
        let out = run(&mut r, &input, 0.5);
        assert_eq!(out[0].len(), 50);
        assert_eq!(out[1].len(), 50);
    }

    #[test]
    fn output_count_tracks_ratio_across_blocks() {
        let mut r = LinearResampler::new(1);
        let ratio = 48000.0 / 44100.0;
        let mut total_out = 0;
        for _ in 0..100 {
            total_out += run(&mut r, &[vec![0.25; 441]], ratio)[0].len();
        }
        let expected = (44100.0 * ratio) as i64;
        assert!((total_out as i64 - expected).abs() <= 2, "{total_out} vs {expected}");
    }

    #[test]
    fn dc_survives_conversion() {
        let mut r = LinearResampler::new(1);
        run(&mut r, &[vec![0.5; 64]], 1.3);
        let out = run(&mut r, &[vec![0.5; 64]], 1.3);
        assert!(out[0].iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn writes_at_offset_only() {
        let mut r = LinearResampler::new(1);
        let mut output = vec![vec![9.0; 8]];
        let produced = r
            .resample(&[vec![1.0, 1.0]], 2, &mut output, 4, 4, 1.0)
            .unwrap();
        assert_eq!(produced, 2);
        assert_eq!(output[0][..4], [9.0; 4]);
        assert_eq!(output[0][6..], [9.0; 2]);
    }

    #[test]
    fn respects_output_limit() {
        let mut r = LinearResampler::new(1);
        let mut output = vec![vec![0.0; 4]];
        let produced = r
            .resample(&[vec![1.0; 16]], 16, &mut output, 0, 4, 2.0)
            .unwrap();
        assert_eq!(produced, 4);
    }

    #[test]
    fn rejects_bad_ratios() {
        let mut r = LinearResampler::new(1);
        let mut output = vec![vec![0.0; 4]];
        for ratio in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e6, 1e-6] {
            let err = r.resample(&[vec![0.0; 4]], 4, &mut output, 0, 4, ratio);
            assert!(matches!(err, Err(ResampleError::InvalidRatio(_))), "{ratio}");
        }
    }

    #[test]
    fn rejects_too_few_buffers() {
        let mut r = LinearResampler::new(2);
        let mut output = vec![vec![0.0; 4]; 2];
        let err = r.resample(&[vec![0.0; 4]], 4, &mut output, 0, 4, 1.0);
        assert_eq!(
            err,
            Err(ResampleError::ChannelMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn reset_clears_history() {
        let mut r = LinearResampler::new(1);
        run(&mut r, &[vec![1.0; 8]], 1.5);
        r.reset();
        let out = run(&mut r, &[vec![1.0; 4]], 1.0);
        assert_eq!(out[0][0], 0.0);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            ResampleError::InvalidRatio(0.0).to_string(),
            "unusable resampling ratio 0"
        );
        let err = ResampleError::ChannelMismatch {
            expected: 2,
            actual: 1,
        };
        assert_eq!(err.to_string(), "resampler built for 2 channels, got 1");
    }
}
