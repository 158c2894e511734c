//! Property-based tests for tandem-core adaptation primitives.
//!
//! Gain law invariants, interleave/deinterleave inversion, channel
//! reconciliation, and the frame accounting of the resampling adapter under
//! randomized rates and block sizes.

use proptest::prelude::*;
use tandem_core::buffer::{deinterleave, interleave, peak_levels, reconcile_channels};
use tandem_core::{ChannelBuffers, PlaybackSource, ResamplingSource, gains_for};

/// Constant-value source that counts what it is asked for and what it gives.
struct Counting {
    rate: u32,
    channels: usize,
    requested: usize,
    short_by: usize,
}

impl PlaybackSource for Counting {
    fn client_name(&self) -> &str {
        "counting"
    }

    fn application_sample_rate(&self) -> u32 {
        self.rate
    }

    fn application_channel_count(&self) -> usize {
        self.channels
    }

    fn get_source_samples(&mut self, buffers: &mut [Vec<f32>], frames: usize) -> usize {
        self.requested += frames;
        let supplied = frames.saturating_sub(self.short_by);
        for channel in buffers.iter_mut() {
            channel[..supplied].fill(0.25);
        }
        supplied
    }
}

const RATES: &[u32] = &[8000, 11025, 22050, 32000, 44100, 48000, 88200, 96000];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Centred balance yields the plain gain on every channel.
    #[test]
    fn centred_gains_are_uniform(gain in 0.0f32..4.0, channels in 1usize..16) {
        let gains = gains_for(gain, 0.0, channels);
        prop_assert_eq!(gains.len(), channels);
        prop_assert!(gains.iter().all(|&g| g == gain));
    }

    /// A mono output ignores balance entirely.
    #[test]
    fn mono_gain_ignores_balance(gain in 0.0f32..4.0, balance in -3.0f32..3.0) {
        prop_assert_eq!(gains_for(gain, balance, 1), vec![gain]);
    }

    /// Balance never amplifies: every factor stays within 0..=gain.
    #[test]
    fn balance_only_attenuates(
        gain in 0.0f32..4.0,
        balance in -1.0f32..=1.0,
        channels in 2usize..8,
    ) {
        for g in gains_for(gain, balance, channels) {
            prop_assert!((0.0..=gain).contains(&g), "factor {} for gain {}", g, gain);
        }
    }

    /// Interleaving after deinterleaving reproduces the native block.
    #[test]
    fn interleave_inverts_deinterleave(
        channels in 1usize..8,
        frames in 1usize..256,
        seed in any::<u32>(),
    ) {
        let native: Vec<f32> = (0..channels * frames)
            .map(|i| ((i as u32).wrapping_mul(seed) % 2000) as f32 / 1000.0 - 1.0)
            .collect();
        let mut planar = ChannelBuffers::with_capacity(channels, frames);
        deinterleave(planar.as_mut_slice(), &native, channels, frames);

        let mut back = vec![0.0; channels * frames];
        interleave(&mut back, planar.as_slice(), channels, frames);
        prop_assert_eq!(back, native);
    }

    /// Growing never loses samples that were already there.
    #[test]
    fn growth_preserves_content(
        channels in 1usize..6,
        frames in 1usize..128,
        extra_channels in 0usize..4,
        extra_frames in 0usize..256,
    ) {
        let mut buffers = ChannelBuffers::with_capacity(channels, frames);
        for (c, channel) in buffers.as_mut_slice().iter_mut().enumerate() {
            for (f, s) in channel.iter_mut().enumerate() {
                *s = (c * 1000 + f) as f32;
            }
        }
        buffers.ensure_capacity(channels + extra_channels, frames + extra_frames);
        for c in 0..channels {
            for f in 0..frames {
                prop_assert_eq!(buffers.channel(c)[f], (c * 1000 + f) as f32);
            }
            prop_assert!(buffers.channel(c)[frames..].iter().all(|&s| s == 0.0));
        }
        for c in channels..channels + extra_channels {
            prop_assert!(buffers.channel(c).iter().all(|&s| s == 0.0));
        }
    }

    /// Widening leaves the valid channels alone and silences everything past stereo.
    #[test]
    fn widening_keeps_valid_channels(have in 1usize..4, extra in 1usize..4, frames in 1usize..64) {
        let want = have + extra;
        let mut buffers: Vec<Vec<f32>> = (0..want).map(|c| vec![c as f32 + 1.0; frames]).collect();
        reconcile_channels(&mut buffers, have, want, frames);
        for c in 0..have {
            prop_assert!(buffers[c].iter().all(|&s| s == c as f32 + 1.0));
        }
        for c in have.max(2)..want {
            prop_assert!(buffers[c].iter().all(|&s| s == 0.0));
        }
    }

    /// Peaks are never negative and never exceed the largest magnitude present.
    #[test]
    fn peaks_bound_the_signal(samples in prop::collection::vec(-2.0f32..2.0, 1..128)) {
        let frames = samples.len();
        let buffers = vec![samples.clone(), samples.iter().map(|s| -s).collect()];
        let (left, right) = peak_levels(&buffers, frames);
        let max = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        prop_assert_eq!(left, max);
        prop_assert_eq!(right, max);
    }

    /// Every pull is satisfied in full, whatever the rates and block sizes.
    #[test]
    fn resampling_pull_is_always_complete(
        source in 0usize..RATES.len(),
        target in 0usize..RATES.len(),
        blocks in prop::collection::vec(16usize..2048, 1..12),
        short_by in 0usize..8,
    ) {
        let mut adapter = ResamplingSource::new(Counting {
            rate: RATES[source],
            channels: 2,
            requested: 0,
            short_by,
        });
        adapter.set_system_playback_sample_rate(RATES[target]);
        let resampling = RATES[source] != RATES[target];

        for frames in blocks {
            let mut out = vec![vec![1.0; frames]; 2];
            let n = adapter.get_source_samples(&mut out, frames);
            if resampling {
                prop_assert_eq!(n, frames);
            } else {
                prop_assert_eq!(n, frames.saturating_sub(short_by));
            }
            prop_assert!(out.iter().all(|c| c.iter().all(|&s| s.is_finite() && s.abs() <= 0.25 + 1e-6 || s == 1.0)));
            prop_assert!(adapter.buffered_frames() < frames + 100);
        }
    }

    /// Over many pulls the adapter consumes source frames at the rate ratio.
    #[test]
    fn resampling_consumes_at_ratio(
        source in 0usize..RATES.len(),
        target in 0usize..RATES.len(),
        frames in 64usize..1024,
    ) {
        prop_assume!(RATES[source] != RATES[target]);
        let mut adapter = ResamplingSource::new(Counting {
            rate: RATES[source],
            channels: 1,
            requested: 0,
            short_by: 0,
        });
        adapter.set_system_playback_sample_rate(RATES[target]);

        let pulls = 40;
        for _ in 0..pulls {
            let mut out = vec![vec![0.0; frames]];
            adapter.get_source_samples(&mut out, frames);
        }
        let delivered = (pulls * frames) as f64;
        let expected = delivered * f64::from(RATES[source]) / f64::from(RATES[target]);
        let requested = adapter.source().requested as f64;
        // One block of look-ahead plus rounding per pull.
        let tolerance = frames as f64 * f64::from(RATES[source]) / f64::from(RATES[target]) + 2.0 * pulls as f64;
        prop_assert!(
            (requested - expected).abs() <= tolerance,
            "requested {} expected {} (tolerance {})", requested, expected, tolerance
        );
    }
}
