//! Tandem Core - driver-independent pieces of a duplex audio I/O layer
//!
//! This crate holds everything about moving audio between an application and
//! a device that does not depend on any particular native driver. The
//! `tandem-io` crate builds sessions on top of it.
//!
//! # Roles
//!
//! - [`PlaybackSource`] - supplies playback frames on demand
//! - [`RecordTarget`] - accepts captured frames as they arrive
//!
//! # Per-block adaptation
//!
//! - [`ChannelBuffers`] - growable planar buffers owned by each session
//! - [`buffer`] - interleave/deinterleave, channel reconciliation, peak metering
//! - [`gains`] - output gain and stereo balance
//!
//! # Sample-rate reconciliation
//!
//! - [`ResamplingSource`] - presents a fixed-rate source at the device rate
//! - [`Resample`] - converter contract, with [`LinearResampler`] built in
//!
//! # Example
//!
//! ```rust
//! use tandem_core::{PlaybackSource, ResamplingSource};
//!
//! struct Tone {
//!     phase: f32,
//! }
//!
//! impl PlaybackSource for Tone {
//!     fn client_name(&self) -> &str {
//!         "tone"
//!     }
//!
//!     fn application_sample_rate(&self) -> u32 {
//!         48000
//!     }
//!
//!     fn application_channel_count(&self) -> usize {
//!         1
//!     }
//!
//!     fn get_source_samples(&mut self, buffers: &mut [Vec<f32>], frames: usize) -> usize {
//!         for sample in &mut buffers[0][..frames] {
//!             *sample = (self.phase * std::f32::consts::TAU).sin() * 0.5;
//!             self.phase = (self.phase + 440.0 / 48000.0).fract();
//!         }
//!         frames
//!     }
//! }
//!
//! // The device came up at 44.1 kHz; the tone still renders at 48 kHz.
//! let mut source = ResamplingSource::new(Tone { phase: 0.0 });
//! source.set_system_playback_sample_rate(44100);
//!
//! let mut block = vec![vec![0.0; 512]];
//! assert_eq!(source.get_source_samples(&mut block, 512), 512);
//! ```
//!
//! # Features
//!
//! - `tracing` - log rate changes and converter failures through `tracing`

pub mod buffer;
pub mod gains;
pub mod resample;
pub mod resampling_source;
pub mod role;

pub use buffer::ChannelBuffers;
pub use gains::{apply_gains, gain_for_channel, gains_for};
pub use resample::{LinearResampler, Resample, ResampleError};
pub use resampling_source::{ResamplingSource, SourceRateHandle};
pub use role::{PlaybackSource, RecordTarget};
