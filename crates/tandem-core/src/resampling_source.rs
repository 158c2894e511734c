//! Resampling adapter for playback sources with a fixed internal rate.
//!
//! [`ResamplingSource`] wraps a [`PlaybackSource`] that renders at its own
//! rate and presents it to a session as a source at whatever rate the device
//! was opened with. Sessions cannot tell the difference: the wrapper is itself
//! a `PlaybackSource`.
//!
//! ```text
//!   device pull (target rate)
//!          │
//!          ▼
//!   ┌────────────────────┐   req frames   ┌───────────────┐
//!   │ ResamplingSource   │ ─────────────► │ wrapped source│
//!   │  resampled buffer  │ ◄───────────── │ (source rate) │
//!   │  + carried fill    │                └───────────────┘
//!   └────────────────────┘
//! ```
//!
//! Every pull returns exactly the requested frame count. Frames the converter
//! produced beyond the request are carried to the next pull; any shortfall is
//! filled with silence, never with stale samples.
//!
//! While the source rate is unknown (the wrapped source reports 0 and no rate
//! has been announced) the adapter emits silence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::{ChannelBuffers, pad_silence};
use crate::resample::{LinearResampler, Resample, ResampleError, validate_ratio};
use crate::role::PlaybackSource;

/// Target rate assumed until the device reports one.
pub const DEFAULT_TARGET_RATE: u32 = 44100;

/// Block size the buffers are sized for up front.
const INITIAL_BLOCK: usize = 10240;

/// Extra resampled frames allowed beyond one block.
const SLACK: usize = 100;

const NO_CHANGE: u64 = u64::MAX;

/// Cloneable handle for announcing a new source rate from any thread.
///
/// The change is picked up at the start of the adapter's next pull, with the
/// same effect as [`ResamplingSource::change_application_sample_rate`].
#[derive(Debug, Clone)]
pub struct SourceRateHandle {
    pending: Arc<AtomicU64>,
}

impl SourceRateHandle {
    fn new() -> Self {
        Self {
            pending: Arc::new(AtomicU64::new(NO_CHANGE)),
        }
    }

    /// Announce that the wrapped source now renders at `rate`.
    ///
    /// Later requests overwrite earlier ones not yet applied.
    pub fn request(&self, rate: u32) {
        self.pending.store(u64::from(rate), Ordering::Release);
    }

    fn take(&self) -> Option<u32> {
        match self.pending.swap(NO_CHANGE, Ordering::Acquire) {
            NO_CHANGE => None,
            rate => Some(rate as u32),
        }
    }
}

/// A [`PlaybackSource`] that converts a wrapped source to the device rate.
///
/// `R` is the conversion primitive; [`LinearResampler`] by default.
pub struct ResamplingSource<S, R = LinearResampler> {
    source: S,
    resampler: R,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    input: ChannelBuffers,
    resampled: ChannelBuffers,
    fill: usize,
    rate_requests: SourceRateHandle,
    channels_changed: bool,
    warned: bool,
}

impl<S: PlaybackSource> ResamplingSource<S> {
    /// Wrap `source` using the built-in linear converter.
    pub fn new(source: S) -> Self {
        let channels = source.application_channel_count();
        Self::with_resampler(source, LinearResampler::new(channels))
    }
}

impl<S: PlaybackSource, R: Resample> ResamplingSource<S, R> {
    /// Wrap `source` using the given converter.
    ///
    /// The converter is rebuilt if it was made for a different channel count
    /// than the source renders.
    pub fn with_resampler(source: S, resampler: R) -> Self {
        let channels = source.application_channel_count();
        let source_rate = source.application_sample_rate();
        let resampler = if resampler.channels() == channels {
            resampler
        } else {
            R::for_channels(channels)
        };
        let mut adapter = Self {
            source,
            resampler,
            channels,
            source_rate,
            target_rate: DEFAULT_TARGET_RATE,
            input: ChannelBuffers::new(),
            resampled: ChannelBuffers::new(),
            fill: 0,
            rate_requests: SourceRateHandle::new(),
            channels_changed: false,
            warned: false,
        };
        adapter.setup_buffers_for(INITIAL_BLOCK);
        adapter
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The wrapped source, mutably.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Unwrap, discarding any buffered frames.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Rate the wrapped source is currently taken to render at (0 = unknown).
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Rate the device was opened with, or [`DEFAULT_TARGET_RATE`] until known.
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Resampled frames held over for the next pull.
    pub fn buffered_frames(&self) -> usize {
        self.fill
    }

    /// A handle for announcing source-rate changes from other threads.
    pub fn rate_handle(&self) -> SourceRateHandle {
        self.rate_requests.clone()
    }

    /// The wrapped source now renders at `rate`.
    ///
    /// Frames already converted at the old ratio are discarded.
    pub fn change_application_sample_rate(&mut self, rate: u32) {
        #[cfg(feature = "tracing")]
        tracing::debug!(from = self.source_rate, to = rate, "source rate changed");
        self.source_rate = rate;
        self.fill = 0;
        self.resampler.reset();
        self.setup_buffers_for(INITIAL_BLOCK);
    }

    /// Drop converter history and buffered frames.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.fill = 0;
    }

    fn apply_pending(&mut self) {
        if let Some(rate) = self.rate_requests.take() {
            self.change_application_sample_rate(rate);
        }
        if self.channels_changed {
            self.channels_changed = false;
            self.rebuild(self.source.application_channel_count());
        }
    }

    fn rebuild(&mut self, channels: usize) {
        #[cfg(feature = "tracing")]
        tracing::debug!(from = self.channels, to = channels, "rebuilding resampler");
        self.channels = channels;
        self.resampler = R::for_channels(channels);
        self.input = ChannelBuffers::new();
        self.resampled = ChannelBuffers::new();
        self.fill = 0;
        self.setup_buffers_for(INITIAL_BLOCK);
    }

    fn ratio(&self) -> f64 {
        f64::from(self.target_rate) / f64::from(self.source_rate)
    }

    fn setup_buffers_for(&mut self, frames: usize) {
        if self.source_rate == 0 || self.source_rate == self.target_rate {
            return;
        }
        let ratio = self.ratio();
        if validate_ratio(ratio).is_err() {
            return;
        }
        let resampled_size = frames + SLACK;
        let input_size = (resampled_size as f64 / ratio) as usize;
        self.resampled.ensure_capacity(self.channels, resampled_size);
        self.input.ensure_capacity(self.channels, input_size);
    }

    fn warn_once(&mut self, _err: &ResampleError) {
        if self.warned {
            return;
        }
        self.warned = true;
        #[cfg(feature = "tracing")]
        tracing::warn!(
            error = %_err,
            source_rate = self.source_rate,
            target_rate = self.target_rate,
            "resampling failed, emitting silence"
        );
    }

    /// Deliver whatever is still carried, then silence, and drop the carry.
    fn drain_carried(&mut self, buffers: &mut [Vec<f32>], frames: usize) {
        let carried = self.fill.min(frames);
        if carried > 0 {
            for (dst, src) in buffers.iter_mut().zip(self.resampled.channels(self.channels)) {
                dst[..carried].copy_from_slice(&src[..carried]);
            }
        }
        pad_silence(buffers, carried, frames);
        self.fill = 0;
    }

    fn pull_resampled(&mut self, buffers: &mut [Vec<f32>], frames: usize) {
        let channels = self.channels;
        let ratio = self.ratio();
        if let Err(err) = validate_ratio(ratio) {
            self.warn_once(&err);
            self.drain_carried(buffers, frames);
            return;
        }
        self.setup_buffers_for(frames);

        let needed = frames.saturating_sub(self.fill) + 1;
        let request = ((needed as f64 / ratio).round() as usize).min(self.input.frame_capacity());

        let input = self.input.channels_mut(channels);
        let received = self.source.get_source_samples(input, request).min(request);
        pad_silence(input, received, request);

        let room = self.resampled.frame_capacity() - self.fill;
        match self.resampler.resample(
            self.input.channels(channels),
            request,
            self.resampled.channels_mut(channels),
            self.fill,
            room,
            ratio,
        ) {
            Ok(produced) => self.fill += produced,
            Err(err) => self.warn_once(&err),
        }

        let resampled = self.resampled.channels_mut(channels);
        if self.fill < frames {
            pad_silence(resampled, self.fill, frames);
            self.fill = frames;
        }

        for (dst, src) in buffers.iter_mut().zip(resampled.iter()) {
            dst[..frames].copy_from_slice(&src[..frames]);
        }

        if self.fill > frames {
            for channel in resampled.iter_mut() {
                channel.copy_within(frames..self.fill, 0);
            }
        }
        self.fill -= frames;
    }
}

impl<S: PlaybackSource, R: Resample> PlaybackSource for ResamplingSource<S, R> {
    fn client_name(&self) -> &str {
        self.source.client_name()
    }

    /// The wrapped source's own rate, so the device opens where it wants.
    fn application_sample_rate(&self) -> u32 {
        self.source.application_sample_rate()
    }

    fn application_channel_count(&self) -> usize {
        self.source.application_channel_count()
    }

    fn set_system_playback_block_size(&mut self, frames: usize) {
        self.setup_buffers_for(frames.max(INITIAL_BLOCK));
    }

    fn set_system_playback_sample_rate(&mut self, rate: u32) {
        self.target_rate = rate;
        self.setup_buffers_for(INITIAL_BLOCK);
        self.source.set_system_playback_sample_rate(rate);
    }

    fn set_system_playback_channel_count(&mut self, channels: usize) {
        self.channels_changed = true;
        self.source.set_system_playback_channel_count(channels);
    }

    fn set_system_playback_latency(&mut self, frames: usize) {
        self.source.set_system_playback_latency(frames);
    }

    /// Always reports `frames` except when passing straight through.
    ///
    /// # Panics
    ///
    /// If `buffers.len()` differs from the adapter's channel count.
    fn get_source_samples(&mut self, buffers: &mut [Vec<f32>], frames: usize) -> usize {
        self.apply_pending();
        assert_eq!(
            buffers.len(),
            self.channels,
            "resampling source pulled with the wrong channel count"
        );

        if self.source_rate == 0 {
            for channel in buffers.iter_mut() {
                channel[..frames].fill(0.0);
            }
            return frames;
        }

        if self.source_rate == self.target_rate {
            return self.source.get_source_samples(buffers, frames);
        }

        self.pull_resampled(buffers, frames);
        frames
    }

    fn set_output_levels(&mut self, left: f32, right: f32) {
        self.source.set_output_levels(left, right);
    }

    fn audio_processing_overload(&mut self) {
        self.source.audio_processing_overload();
    }
}
