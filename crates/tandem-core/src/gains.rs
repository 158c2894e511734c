//! Output gain and stereo balance.
//!
//! Converts a master gain and a balance position into one scale factor per
//! output channel. Balance only touches the stereo pair (channels 0 and 1);
//! any further channels receive the plain gain.
//!
//! # Usage
//!
//! ```rust
//! use tandem_core::gains::gains_for;
//!
//! // Full gain, panned halfway right: left is attenuated, right untouched.
//! let gains = gains_for(1.0, 0.5, 2);
//! assert_eq!(gains, vec![0.5, 1.0]);
//!
//! // Balance has no meaning for a mono output.
//! assert_eq!(gains_for(0.8, -1.0, 1), vec![0.8]);
//! ```
//!
//! # Balance law
//!
//! Balance is linear and one-sided: moving right attenuates the left channel
//! by `1 - balance`, moving left attenuates the right channel by `1 + balance`.
//! The centre position leaves both channels at unity, so a centred session
//! never loses level compared to a balance-free one.

/// Minimum balance (hard left).
pub const BALANCE_MIN: f32 = -1.0;

/// Maximum balance (hard right).
pub const BALANCE_MAX: f32 = 1.0;

/// Scale factor for a single output channel.
///
/// This is the allocation-free form of [`gains_for`] used on the audio
/// thread. `balance` is clamped to [`BALANCE_MIN`]..=[`BALANCE_MAX`].
#[inline]
pub fn gain_for_channel(gain: f32, balance: f32, channel: usize, channel_count: usize) -> f32 {
    if channel_count < 2 || channel > 1 {
        return gain;
    }
    let balance = balance.clamp(BALANCE_MIN, BALANCE_MAX);
    match channel {
        0 if balance > 0.0 => gain * (1.0 - balance),
        1 if balance < 0.0 => gain * (1.0 + balance),
        _ => gain,
    }
}

/// Per-channel scale factors for `channel_count` output channels.
pub fn gains_for(gain: f32, balance: f32, channel_count: usize) -> Vec<f32> {
    (0..channel_count)
        .map(|c| gain_for_channel(gain, balance, c, channel_count))
        .collect()
}

/// Scale the first `frames` samples of each channel by its balance-adjusted gain.
///
/// `buffers.len()` is taken as the output channel count.
pub fn apply_gains(buffers: &mut [Vec<f32>], gain: f32, balance: f32, frames: usize) {
    let channel_count = buffers.len();
    for (c, channel) in buffers.iter_mut().enumerate() {
        let g = gain_for_channel(gain, balance, c, channel_count);
        if g == 1.0 {
            continue;
        }
        for sample in &mut channel[..frames] {
            *sample *= g;
        }
    }
}
