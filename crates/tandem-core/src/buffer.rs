//! Planar channel buffers and the format conversions around them.
//!
//! Native drivers hand over interleaved samples (`[L0, R0, L1, R1, ...]`);
//! producers and consumers work on planar buffers, one `Vec<f32>` per channel.
//! This module owns the conversion in both directions, the reconciliation of
//! mismatched channel counts, and peak metering.
//!
//! None of the functions here fail. Channel and frame counts outside the
//! buffers passed in are caller bugs and panic on slice indexing.
//!
//! # Example
//!
//! ```rust
//! use tandem_core::buffer::{ChannelBuffers, deinterleave, interleave, reconcile_channels};
//!
//! let native = [0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
//! let mut planar = ChannelBuffers::new();
//! planar.ensure_capacity(2, 3);
//!
//! deinterleave(planar.as_mut_slice(), &native, 2, 3);
//! assert_eq!(planar.channel(1)[..3], [-0.1, -0.2, -0.3]);
//!
//! let mut out = [0.0; 6];
//! interleave(&mut out, planar.as_slice(), 2, 3);
//! assert_eq!(out, native);
//!
//! // A mono producer feeding a stereo device: channel 0 is duplicated.
//! reconcile_channels(planar.as_mut_slice(), 1, 2, 3);
//! assert_eq!(planar.channel(1)[..3], [0.1, 0.2, 0.3]);
//! ```

/// Growable set of planar sample buffers, indexed by channel then frame.
///
/// Capacity only ever grows. Regrowth keeps every previously valid sample in
/// place and zero-fills the new region, so a block-size fluctuation in the
/// middle of a session never reallocates twice or exposes garbage.
#[derive(Debug, Clone, Default)]
pub struct ChannelBuffers {
    data: Vec<Vec<f32>>,
    frames: usize,
}

impl ChannelBuffers {
    /// Create an empty buffer set. No memory is allocated until
    /// [`ensure_capacity`](Self::ensure_capacity) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zeroed buffer set holding `channels` × `frames` samples.
    pub fn with_capacity(channels: usize, frames: usize) -> Self {
        let mut buffers = Self::new();
        buffers.ensure_capacity(channels, frames);
        buffers
    }

    /// Grow to at least `channels` × `frames`. Returns `true` if anything grew.
    ///
    /// This may allocate. On the audio path it is only expected to do work
    /// when the negotiated block size or channel count increases.
    pub fn ensure_capacity(&mut self, channels: usize, frames: usize) -> bool {
        let mut grew = false;
        if frames > self.frames {
            for channel in &mut self.data {
                channel.resize(frames, 0.0);
            }
            self.frames = frames;
            grew = true;
        }
        while self.data.len() < channels {
            self.data.push(vec![0.0; self.frames]);
            grew = true;
        }
        grew
    }

    /// Number of channels currently allocated.
    pub fn channel_capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of frames allocated per channel.
    pub fn frame_capacity(&self) -> usize {
        self.frames
    }

    /// All allocated channels.
    pub fn as_slice(&self) -> &[Vec<f32>] {
        &self.data
    }

    /// All allocated channels, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [Vec<f32>] {
        &mut self.data
    }

    /// The first `channels` channels.
    pub fn channels(&self, channels: usize) -> &[Vec<f32>] {
        &self.data[..channels]
    }

    /// The first `channels` channels, mutably.
    pub fn channels_mut(&mut self, channels: usize) -> &mut [Vec<f32>] {
        &mut self.data[..channels]
    }

    /// One channel's full allocation.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data[index]
    }

    /// Zero the first `frames` samples of the first `channels` channels.
    pub fn zero(&mut self, channels: usize, frames: usize) {
        for channel in &mut self.data[..channels] {
            channel[..frames].fill(0.0);
        }
    }
}

/// Split interleaved `src` into the first `channels` planar buffers of `dst`.
pub fn deinterleave(dst: &mut [Vec<f32>], src: &[f32], channels: usize, frames: usize) {
    if channels == 0 {
        return;
    }
    for (f, frame) in src[..frames * channels].chunks_exact(channels).enumerate() {
        for (c, &sample) in frame.iter().enumerate() {
            dst[c][f] = sample;
        }
    }
}

/// Weave the first `channels` planar buffers of `src` into interleaved `dst`.
pub fn interleave(dst: &mut [f32], src: &[Vec<f32>], channels: usize, frames: usize) {
    if channels == 0 {
        return;
    }
    for (f, frame) in dst[..frames * channels].chunks_exact_mut(channels).enumerate() {
        for (c, sample) in frame.iter_mut().enumerate() {
            *sample = src[c][f];
        }
    }
}

/// Make `want` valid channels out of `have` valid channels, in place.
///
/// - `want <= have`: the excess channels are simply ignored by the reader.
/// - `have == 0`: all `want` channels are silenced.
/// - `have == 1`: channel 0 is duplicated into channel 1 (mono to stereo);
///   channels beyond 1 are silenced.
/// - otherwise: channels `have..want` are silenced.
///
/// `buffers` must hold at least `want` channels of at least `frames` samples.
pub fn reconcile_channels(buffers: &mut [Vec<f32>], have: usize, want: usize, frames: usize) {
    if want <= have {
        return;
    }
    if have == 0 {
        for channel in &mut buffers[..want] {
            channel[..frames].fill(0.0);
        }
        return;
    }
    for c in have..want {
        if have == 1 && c == 1 {
            let (first, rest) = buffers.split_at_mut(1);
            rest[0][..frames].copy_from_slice(&first[0][..frames]);
        } else {
            buffers[c][..frames].fill(0.0);
        }
    }
}

/// Silence frames `from..frames` of every channel in `buffers`.
///
/// Used after a producer delivers fewer frames than requested.
pub fn pad_silence(buffers: &mut [Vec<f32>], from: usize, frames: usize) {
    if from >= frames {
        return;
    }
    for channel in buffers {
        channel[from..frames].fill(0.0);
    }
}

/// Absolute peak of channels 0 and 1 over the first `frames` samples.
///
/// A single channel is reported on both sides; no channels reports silence.
pub fn peak_levels(buffers: &[Vec<f32>], frames: usize) -> (f32, f32) {
    let peak = |channel: &[f32]| channel[..frames].iter().fold(0.0f32, |p, s| p.max(s.abs()));
    match buffers {
        [] => (0.0, 0.0),
        [mono] => {
            let p = peak(mono);
            (p, p)
        }
        [left, right, ..] => (peak(left), peak(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_capacity_grows_and_zero_fills() {
        let mut buffers = ChannelBuffers::new();
        assert!(buffers.ensure_capacity(2, 4));
        assert_eq!(buffers.channel_capacity(), 2);
        assert_eq!(buffers.frame_capacity(), 4);
        assert!(buffers.as_slice().iter().all(|c| c.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn ensure_capacity_never_shrinks() {
        let mut buffers = ChannelBuffers::with_capacity(4, 512);
        assert!(!buffers.ensure_capacity(2, 128));
        assert_eq!(buffers.channel_capacity(), 4);
        assert_eq!(buffers.frame_capacity(), 512);
    }

    #[test]
    fn regrowth_preserves_old_content() {
        let mut buffers = ChannelBuffers::with_capacity(1, 3);
        buffers.as_mut_slice()[0].copy_from_slice(&[1.0, 2.0, 3.0]);
        buffers.ensure_capacity(2, 5);
        assert_eq!(buffers.channel(0), &[1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(buffers.channel(1), &[0.0; 5]);
    }

    #[test]
    fn deinterleave_splits_frames() {
        let mut dst = vec![vec![0.0; 3]; 3];
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        deinterleave(&mut dst, &src, 3, 3);
        assert_eq!(dst[0], vec![1.0, 4.0, 7.0]);
        assert_eq!(dst[1], vec![2.0, 5.0, 8.0]);
        assert_eq!(dst[2], vec![3.0, 6.0, 9.0]);
    }

    #[test]
    fn interleave_weaves_frames() {
        let src = vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]];
        let mut dst = [0.0; 6];
        interleave(&mut dst, &src, 2, 3);
        assert_eq!(dst, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn interleave_leaves_tail_alone() {
        let src = vec![vec![1.0, 1.0]];
        let mut dst = [9.0; 4];
        interleave(&mut dst, &src, 1, 2);
        assert_eq!(dst, [1.0, 1.0, 9.0, 9.0]);
    }

    #[test]
    fn zero_channels_is_a_no_op() {
        let mut dst: Vec<Vec<f32>> = Vec::new();
        deinterleave(&mut dst, &[], 0, 16);
        let mut out: [f32; 0] = [];
        interleave(&mut out, &dst, 0, 16);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let mut buffers = vec![vec![0.5, -0.5], vec![9.0, 9.0]];
        reconcile_channels(&mut buffers, 1, 2, 2);
        assert_eq!(buffers[1], vec![0.5, -0.5]);
    }

    #[test]
    fn stereo_to_mono_drops_second_channel() {
        let mut buffers = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        reconcile_channels(&mut buffers, 2, 1, 2);
        assert_eq!(buffers[0], vec![0.1, 0.2]);
        assert_eq!(buffers[1], vec![0.3, 0.4]);
    }

    #[test]
    fn widening_past_stereo_zero_fills() {
        let mut buffers = vec![vec![1.0; 2], vec![1.0; 2], vec![7.0; 2], vec![7.0; 2]];
        reconcile_channels(&mut buffers, 2, 4, 2);
        assert_eq!(buffers[2], vec![0.0; 2]);
        assert_eq!(buffers[3], vec![0.0; 2]);
        assert_eq!(buffers[1], vec![1.0; 2]);
    }

    #[test]
    fn mono_to_quad_duplicates_then_silences() {
        let mut buffers = vec![vec![0.25; 2], vec![7.0; 2], vec![7.0; 2], vec![7.0; 2]];
        reconcile_channels(&mut buffers, 1, 4, 2);
        assert_eq!(buffers[1], vec![0.25; 2]);
        assert_eq!(buffers[2], vec![0.0; 2]);
        assert_eq!(buffers[3], vec![0.0; 2]);
    }

    #[test]
    fn nothing_to_stereo_is_silence() {
        let mut buffers = vec![vec![3.0; 2], vec![3.0; 2]];
        reconcile_channels(&mut buffers, 0, 2, 2);
        assert_eq!(buffers, vec![vec![0.0; 2], vec![0.0; 2]]);
    }

    #[test]
    fn pad_silence_clears_tail() {
        let mut buffers = vec![vec![1.0; 4]];
        pad_silence(&mut buffers, 1, 3);
        assert_eq!(buffers[0], vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn peaks_use_absolute_value() {
        let buffers = vec![vec![0.1, -0.8, 0.3], vec![-0.2, 0.4, 0.0]];
        assert_eq!(peak_levels(&buffers, 3), (0.8, 0.4));
    }

    #[test]
    fn mono_peak_reported_on_both_sides() {
        let buffers = vec![vec![-0.6, 0.2]];
        assert_eq!(peak_levels(&buffers, 2), (0.6, 0.6));
    }

    #[test]
    fn no_channels_peak_is_zero() {
        assert_eq!(peak_levels(&[], 128), (0.0, 0.0));
    }

    #[test]
    fn peaks_respect_frame_count() {
        let buffers = vec![vec![0.1, 0.9], vec![0.1, 0.9]];
        assert_eq!(peak_levels(&buffers, 1), (0.1, 0.1));
    }
}
