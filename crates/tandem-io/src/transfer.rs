//! Per-block transfer between native interleaved buffers and bound roles.
//!
//! Shared by both session styles. Holds the roles and the planar scratch
//! they are served from; callers own the locking.

use tandem_core::buffer::{
    deinterleave, interleave, pad_silence, peak_levels, reconcile_channels,
};
use tandem_core::{ChannelBuffers, PlaybackSource, RecordTarget, apply_gains};

use crate::session::{NegotiatedConfig, Roles};

pub(crate) struct RoleIo {
    source: Option<Box<dyn PlaybackSource>>,
    target: Option<Box<dyn RecordTarget>>,
    playback: ChannelBuffers,
    record: ChannelBuffers,
}

impl RoleIo {
    pub(crate) fn new(roles: Roles) -> Self {
        let (source, target) = roles.into_parts();
        Self {
            source,
            target,
            playback: ChannelBuffers::new(),
            record: ChannelBuffers::new(),
        }
    }

    /// Hand the roles back. Only meaningful once.
    pub(crate) fn take_roles(&mut self) -> Roles {
        Roles::from_parts(self.source.take(), self.target.take())
    }

    pub(crate) fn notify_playback(&mut self, config: &NegotiatedConfig) {
        if let Some(source) = self.source.as_mut() {
            source.set_system_playback_sample_rate(config.sample_rate);
            source.set_system_playback_channel_count(config.output_channels);
            if config.block_size > 0 {
                source.set_system_playback_block_size(config.block_size);
            }
            source.set_system_playback_latency(config.output_latency);
        }
    }

    pub(crate) fn notify_record(&mut self, config: &NegotiatedConfig) {
        if let Some(target) = self.target.as_mut() {
            target.set_system_record_sample_rate(config.sample_rate);
            target.set_system_record_channel_count(config.input_channels);
            if config.block_size > 0 {
                target.set_system_record_block_size(config.block_size);
            }
            target.set_system_record_latency(config.input_latency);
        }
    }

    pub(crate) fn notify_latency(&mut self, input: usize, output: usize) {
        if let Some(source) = self.source.as_mut() {
            source.set_system_playback_latency(output);
        }
        if let Some(target) = self.target.as_mut() {
            target.set_system_record_latency(input);
        }
    }

    /// Overloads are reported to both roles whichever direction glitched.
    pub(crate) fn notify_overload(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.audio_processing_overload();
        }
        if let Some(target) = self.target.as_mut() {
            target.audio_processing_overload();
        }
    }

    /// Fill `output` (interleaved, `device_channels` wide) from the source.
    ///
    /// Anything in `output` past `frames` frames is silenced.
    pub(crate) fn render(
        &mut self,
        output: &mut [f32],
        device_channels: usize,
        frames: usize,
        gain: f32,
        balance: f32,
    ) {
        let Some(source) = self.source.as_mut() else {
            output.fill(0.0);
            return;
        };

        let source_channels = source.application_channel_count();
        self.playback
            .ensure_capacity(source_channels.max(device_channels), frames);

        let got = source.get_source_samples(self.playback.channels_mut(source_channels), frames);
        pad_silence(self.playback.channels_mut(source_channels), got, frames);
        reconcile_channels(
            self.playback.as_mut_slice(),
            source_channels,
            device_channels,
            frames,
        );

        let block = self.playback.channels_mut(device_channels);
        apply_gains(block, gain, balance, frames);
        let (left, right) = peak_levels(block, frames);
        interleave(output, block, device_channels, frames);
        output[frames * device_channels..].fill(0.0);

        source.set_output_levels(left, right);
    }

    /// Push `frames` interleaved input frames to the target.
    pub(crate) fn capture(&mut self, input: &[f32], device_channels: usize, frames: usize) {
        let Some(target) = self.target.as_mut() else {
            return;
        };

        let target_channels = target.application_channel_count();
        self.record
            .ensure_capacity(target_channels.max(device_channels), frames);

        deinterleave(self.record.as_mut_slice(), input, device_channels, frames);
        let (left, right) = peak_levels(self.record.channels(device_channels), frames);
        reconcile_channels(
            self.record.as_mut_slice(),
            device_channels,
            target_channels,
            frames,
        );

        target.put_samples(self.record.channels(target_channels), frames);
        target.set_input_levels(left, right);
    }
}
