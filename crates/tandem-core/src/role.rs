//! Application-side roles: the sample producer and the sample consumer.
//!
//! A session binds at most one [`PlaybackSource`] and at most one
//! [`RecordTarget`]. Both are called from the audio thread, so implementations
//! must not block for long; every callback other than the sample transfer
//! itself has a no-op default.
//!
//! Sample buffers are planar: one `Vec<f32>` per channel, and `buffers.len()`
//! is the channel count of the call. Only the first `frames` samples of each
//! channel are meaningful.

/// Supplies playback audio on demand.
pub trait PlaybackSource: Send {
    /// Name the application wants the native client or stream to carry.
    fn client_name(&self) -> &str;

    /// Fixed rate the producer renders at, or 0 if it will follow the device.
    fn application_sample_rate(&self) -> u32 {
        0
    }

    /// Channel count the producer renders.
    fn application_channel_count(&self) -> usize;

    /// Block size negotiated with the device, in frames.
    fn set_system_playback_block_size(&mut self, _frames: usize) {}

    /// Rate negotiated with the device.
    fn set_system_playback_sample_rate(&mut self, _rate: u32) {}

    /// Channel count the device was opened with.
    fn set_system_playback_channel_count(&mut self, _channels: usize) {}

    /// Output latency reported by the device, in frames.
    fn set_system_playback_latency(&mut self, _frames: usize) {}

    /// Fill up to `frames` samples in each of `buffers`.
    ///
    /// Returns the number of frames actually written. Fewer than `frames` is
    /// allowed (typically at the very start of a session); the caller pads
    /// the remainder with silence.
    fn get_source_samples(&mut self, buffers: &mut [Vec<f32>], frames: usize) -> usize;

    /// Peak output levels of the block just rendered, after gain and balance.
    fn set_output_levels(&mut self, _left: f32, _right: f32) {}

    /// The device missed a deadline or ran out of data.
    fn audio_processing_overload(&mut self) {}
}

/// Accepts captured audio as it arrives.
pub trait RecordTarget: Send {
    /// Name the application wants the native client or stream to carry.
    fn client_name(&self) -> &str;

    /// Fixed rate the consumer expects, or 0 if it will follow the device.
    fn application_sample_rate(&self) -> u32 {
        0
    }

    /// Channel count the consumer wants delivered.
    fn application_channel_count(&self) -> usize;

    /// Block size negotiated with the device, in frames.
    fn set_system_record_block_size(&mut self, _frames: usize) {}

    /// Rate negotiated with the device.
    fn set_system_record_sample_rate(&mut self, _rate: u32) {}

    /// Channel count the device was opened with.
    fn set_system_record_channel_count(&mut self, _channels: usize) {}

    /// Input latency reported by the device, in frames.
    fn set_system_record_latency(&mut self, _frames: usize) {}

    /// Receive `frames` captured samples in each of `buffers`.
    fn put_samples(&mut self, buffers: &[Vec<f32>], frames: usize);

    /// Peak input levels of the block just captured.
    fn set_input_levels(&mut self, _left: f32, _right: f32) {}

    /// The device overran or a deadline was missed on the capture side.
    fn audio_processing_overload(&mut self) {}
}

impl<T: PlaybackSource + ?Sized> PlaybackSource for Box<T> {
    fn client_name(&self) -> &str {
        (**self).client_name()
    }

    fn application_sample_rate(&self) -> u32 {
        (**self).application_sample_rate()
    }

    fn application_channel_count(&self) -> usize {
        (**self).application_channel_count()
    }

    fn set_system_playback_block_size(&mut self, frames: usize) {
        (**self).set_system_playback_block_size(frames);
    }

    fn set_system_playback_sample_rate(&mut self, rate: u32) {
        (**self).set_system_playback_sample_rate(rate);
    }

    fn set_system_playback_channel_count(&mut self, channels: usize) {
        (**self).set_system_playback_channel_count(channels);
    }

    fn set_system_playback_latency(&mut self, frames: usize) {
        (**self).set_system_playback_latency(frames);
    }

    fn get_source_samples(&mut self, buffers: &mut [Vec<f32>], frames: usize) -> usize {
        (**self).get_source_samples(buffers, frames)
    }

    fn set_output_levels(&mut self, left: f32, right: f32) {
        (**self).set_output_levels(left, right);
    }

    fn audio_processing_overload(&mut self) {
        (**self).audio_processing_overload();
    }
}

impl<T: RecordTarget + ?Sized> RecordTarget for Box<T> {
    fn client_name(&self) -> &str {
        (**self).client_name()
    }

    fn application_sample_rate(&self) -> u32 {
        (**self).application_sample_rate()
    }

    fn application_channel_count(&self) -> usize {
        (**self).application_channel_count()
    }

    fn set_system_record_block_size(&mut self, frames: usize) {
        (**self).set_system_record_block_size(frames);
    }

    fn set_system_record_sample_rate(&mut self, rate: u32) {
        (**self).set_system_record_sample_rate(rate);
    }

    fn set_system_record_channel_count(&mut self, channels: usize) {
        (**self).set_system_record_channel_count(channels);
    }

    fn set_system_record_latency(&mut self, frames: usize) {
        (**self).set_system_record_latency(frames);
    }

    fn put_samples(&mut self, buffers: &[Vec<f32>], frames: usize) {
        (**self).put_samples(buffers, frames);
    }

    fn set_input_levels(&mut self, left: f32, right: f32) {
        (**self).set_input_levels(left, right);
    }

    fn audio_processing_overload(&mut self) {
        (**self).audio_processing_overload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl PlaybackSource for Counter {
        fn client_name(&self) -> &str {
            "counter"
        }

        fn application_channel_count(&self) -> usize {
            1
        }

        fn get_source_samples(&mut self, buffers: &mut [Vec<f32>], frames: usize) -> usize {
            for channel in buffers {
                channel[..frames].fill(1.0);
            }
            frames
        }
    }

    struct Sink;

    impl RecordTarget for Sink {
        fn client_name(&self) -> &str {
            "sink"
        }

        fn application_channel_count(&self) -> usize {
            2
        }

        fn put_samples(&mut self, buffers: &[Vec<f32>], frames: usize) {
            assert!(buffers.iter().all(|c| c.len() >= frames));
        }
    }

    #[test]
    fn boxed_source_forwards() {
        let mut boxed: Box<dyn PlaybackSource> = Box::new(Counter);
        assert_eq!(boxed.client_name(), "counter");
        assert_eq!(boxed.application_sample_rate(), 0);
        boxed.set_system_playback_sample_rate(48000);

        let mut buffers = vec![vec![0.0; 8]];
        assert_eq!(boxed.get_source_samples(&mut buffers, 4), 4);
        assert_eq!(buffers[0], vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn boxed_target_forwards() {
        let mut boxed: Box<dyn RecordTarget> = Box::new(Sink);
        assert_eq!(boxed.application_channel_count(), 2);
        boxed.put_samples(&[vec![0.0; 4], vec![0.0; 4]], 4);
        boxed.audio_processing_overload();
        assert_eq!(boxed.client_name(), "sink");
    }

    #[test]
    fn double_box_still_forwards() {
        let inner: Box<dyn PlaybackSource> = Box::new(Counter);
        let mut outer: Box<dyn PlaybackSource> = Box::new(inner);
        let mut buffers = vec![vec![0.0; 2]];
        assert_eq!(outer.get_source_samples(&mut buffers, 2), 2);
        assert_eq!(outer.application_channel_count(), 1);
    }
}
