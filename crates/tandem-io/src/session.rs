//! Backend-agnostic duplex session abstraction.
//!
//! An [`AudioSession`] binds at most one [`PlaybackSource`] and at most one
//! [`RecordTarget`] (together, [`Roles`]) to exactly one native backend
//! instance. Whatever the backend, a session moves through the same states:
//!
//! ```text
//!              open ok                suspend()
//!   ┌──────────┐ ──────► ┌────────┐ ───────────► ┌───────────┐
//!   │ Unopened │         │ Active │              │ Suspended │
//!   └──────────┘         └────────┘ ◄─────────── └───────────┘
//!        │                   │        resume()         │
//!        │                   ▼                         │
//!        └─────────────► ┌────────┐ ◄──────────────────┘
//!            close()     │ Closed │
//!                        └────────┘
//! ```
//!
//! `suspend()` on a session that is not Active, and `resume()` on one that is
//! not Suspended, do nothing. Both may be called from any thread.
//!
//! Sessions report OK as soon as the native resource is acquired, but some
//! backends only become *ready* after an asynchronous handshake; see
//! [`AudioSession::is_ready`].

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use tandem_core::{PlaybackSource, RecordTarget};

use crate::config::Preference;

/// Channel count every bound direction is opened with at minimum.
///
/// Output balance needs a stereo pair, so mono roles are widened at the
/// buffer-adapter boundary rather than opening mono devices.
pub const MIN_DEVICE_CHANNELS: usize = 2;

/// Rate requested when neither role nor preference names one and the driver
/// has no default of its own.
pub const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Which directions a session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Output only.
    Playback,
    /// Input only.
    Record,
    /// Input and output on one backend instance.
    Duplex,
}

impl Mode {
    /// Whether the session renders output.
    pub fn plays(self) -> bool {
        matches!(self, Mode::Playback | Mode::Duplex)
    }

    /// Whether the session captures input.
    pub fn records(self) -> bool {
        matches!(self, Mode::Record | Mode::Duplex)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The native resource could not be acquired.
    Unopened,
    /// Open and transferring data.
    Active,
    /// Open, native data flow paused, buffers retained.
    Suspended,
    /// Terminal: native resource released.
    Closed,
}

impl SessionState {
    fn to_u8(self) -> u8 {
        match self {
            SessionState::Unopened => 0,
            SessionState::Active => 1,
            SessionState::Suspended => 2,
            SessionState::Closed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Active,
            2 => SessionState::Suspended,
            3 => SessionState::Closed,
            _ => SessionState::Unopened,
        }
    }
}

/// The application objects bound to a session.
///
/// Always holds at least one role; the constructors make an empty binding
/// unrepresentable.
pub struct Roles {
    source: Option<Box<dyn PlaybackSource>>,
    target: Option<Box<dyn RecordTarget>>,
}

impl Roles {
    /// A playback-only binding.
    pub fn playback(source: Box<dyn PlaybackSource>) -> Self {
        Self {
            source: Some(source),
            target: None,
        }
    }

    /// A record-only binding.
    pub fn record(target: Box<dyn RecordTarget>) -> Self {
        Self {
            source: None,
            target: Some(target),
        }
    }

    /// A full-duplex binding.
    pub fn duplex(target: Box<dyn RecordTarget>, source: Box<dyn PlaybackSource>) -> Self {
        Self {
            source: Some(source),
            target: Some(target),
        }
    }

    /// Which directions these roles need.
    pub fn mode(&self) -> Mode {
        match (&self.source, &self.target) {
            (Some(_), Some(_)) => Mode::Duplex,
            (None, Some(_)) => Mode::Record,
            _ => Mode::Playback,
        }
    }

    /// The bound playback source, if any.
    pub fn source(&self) -> Option<&dyn PlaybackSource> {
        self.source.as_deref()
    }

    /// The bound record target, if any.
    pub fn target(&self) -> Option<&dyn RecordTarget> {
        self.target.as_deref()
    }

    /// Client name to give native streams: the source's, else the target's.
    pub fn client_name(&self) -> String {
        self.source
            .as_ref()
            .map(|s| s.client_name().to_string())
            .or_else(|| self.target.as_ref().map(|t| t.client_name().to_string()))
            .unwrap_or_else(|| "tandem".to_string())
    }

    /// Split into the source and target halves.
    pub fn into_parts(
        self,
    ) -> (
        Option<Box<dyn PlaybackSource>>,
        Option<Box<dyn RecordTarget>>,
    ) {
        (self.source, self.target)
    }

    pub(crate) fn from_parts(
        source: Option<Box<dyn PlaybackSource>>,
        target: Option<Box<dyn RecordTarget>>,
    ) -> Self {
        Self { source, target }
    }

    /// Rate to open the device at.
    ///
    /// The source's application rate wins, then the target's; `hint` applies
    /// only when neither role cares. `None` means "driver default".
    pub fn negotiate_rate(&self, hint: Option<u32>) -> Option<u32> {
        let source_rate = self
            .source
            .as_ref()
            .map_or(0, |s| s.application_sample_rate());
        let target_rate = self
            .target
            .as_ref()
            .map_or(0, |t| t.application_sample_rate());

        if source_rate != 0 {
            if target_rate != 0 && target_rate != source_rate {
                tracing::warn!(
                    source_rate,
                    target_rate,
                    "source and target want different rates, using source rate"
                );
            }
            return Some(source_rate);
        }
        if target_rate != 0 {
            return Some(target_rate);
        }
        hint.filter(|&rate| rate != 0)
    }

    /// Output channels to request: the source's count, at least stereo.
    pub fn output_channels(&self) -> usize {
        self.source.as_ref().map_or(0, |s| {
            s.application_channel_count().max(MIN_DEVICE_CHANNELS)
        })
    }

    /// Input channels to request: the target's count, at least stereo.
    pub fn input_channels(&self) -> usize {
        self.target.as_ref().map_or(0, |t| {
            t.application_channel_count().max(MIN_DEVICE_CHANNELS)
        })
    }
}

impl fmt::Debug for Roles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Roles")
            .field("source", &self.source.as_ref().map(|s| s.client_name()))
            .field("target", &self.target.as_ref().map(|t| t.client_name()))
            .finish()
    }
}

/// Device and format wishes passed from the factory to a backend.
///
/// Every field is optional; `None` means "pick automatically".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Capture device name, index, or partial name.
    pub record_device: Option<String>,
    /// Playback device name, index, or partial name.
    pub playback_device: Option<String>,
    /// Rate to use when neither role names one.
    pub sample_rate: Option<u32>,
    /// Preferred block size in frames.
    pub block_size: Option<usize>,
}

impl From<&Preference> for SessionRequest {
    fn from(pref: &Preference) -> Self {
        Self {
            record_device: pref.record_device().map(str::to_string),
            playback_device: pref.playback_device().map(str::to_string),
            sample_rate: pref.sample_rate,
            block_size: pref.block_size,
        }
    }
}

/// What a session asks a native driver to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Directions to open.
    pub mode: Mode,
    /// Name for the native client or streams.
    pub client_name: String,
    /// Requested rate; `None` lets the driver choose.
    pub sample_rate: Option<u32>,
    /// Requested block size in frames; `None` lets the driver choose.
    pub block_size: Option<usize>,
    /// Capture channels (0 when not recording).
    pub input_channels: usize,
    /// Playback channels (0 when not playing).
    pub output_channels: usize,
    /// Capture device name, index, or partial name.
    pub input_device: Option<String>,
    /// Playback device name, index, or partial name.
    pub output_device: Option<String>,
}

impl DriverConfig {
    /// Build the first-attempt configuration for `roles`.
    pub fn for_roles(roles: &Roles, request: &SessionRequest) -> Self {
        let mode = roles.mode();
        Self {
            mode,
            client_name: roles.client_name(),
            sample_rate: roles.negotiate_rate(request.sample_rate),
            block_size: request.block_size,
            input_channels: roles.input_channels(),
            output_channels: roles.output_channels(),
            input_device: request.record_device.clone().filter(|_| mode.records()),
            output_device: request.playback_device.clone().filter(|_| mode.plays()),
        }
    }

    /// The same request with every bound direction set to stereo.
    pub fn stereo(&self) -> Self {
        let mut config = self.clone();
        if config.mode.records() {
            config.input_channels = MIN_DEVICE_CHANNELS;
        }
        if config.mode.plays() {
            config.output_channels = MIN_DEVICE_CHANNELS;
        }
        config
    }
}

/// Stream parameters a driver actually opened with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiatedConfig {
    /// Device sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per transfer (0 if the driver does not fix one).
    pub block_size: usize,
    /// Capture channels.
    pub input_channels: usize,
    /// Playback channels.
    pub output_channels: usize,
    /// Capture latency in frames.
    pub input_latency: usize,
    /// Playback latency in frames.
    pub output_latency: usize,
}

/// Backend-agnostic handle to an open (or failed) duplex session.
///
/// Object-safe so the factory can hand out `Box<dyn AudioSession>` whatever
/// backend won. All methods take `&self` except teardown, and every
/// implementation is safe to share between threads.
pub trait AudioSession: Send + Sync {
    /// Name of the backend family driving this session.
    fn backend_name(&self) -> &str;

    /// Which directions this session carries.
    fn mode(&self) -> Mode;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Whether the native resource was acquired.
    fn is_ok(&self) -> bool {
        matches!(self.state(), SessionState::Active | SessionState::Suspended)
    }

    /// Whether negotiation with the hardware has completed for every bound
    /// direction.
    fn is_ready(&self) -> bool;

    /// Pause native data flow. No-op unless Active.
    fn suspend(&self);

    /// Restart native data flow. No-op unless Suspended.
    fn resume(&self);

    /// Linear output gain.
    fn output_gain(&self) -> f32;

    /// Set the linear output gain (negative values clamp to 0).
    fn set_output_gain(&self, gain: f32);

    /// Output balance, -1.0 (left) ..= 1.0 (right).
    fn output_balance(&self) -> f32;

    /// Set the output balance (clamped to -1.0 ..= 1.0).
    fn set_output_balance(&self, balance: f32);

    /// Device sample rate in Hz (0 if unknown).
    fn sample_rate(&self) -> u32;

    /// Frames per transfer (0 if unknown or variable).
    fn block_size(&self) -> usize;

    /// Capture latency in frames.
    fn input_latency(&self) -> usize;

    /// Playback latency in frames.
    fn output_latency(&self) -> usize;

    /// Stream clock in seconds (0.0 when not running or unknown).
    fn current_time(&self) -> f64;

    /// Stop native data flow, release native handles, and enter Closed.
    ///
    /// Idempotent. Also performed on drop.
    fn close(&mut self);

    /// Close, then hand the bound roles back.
    fn into_roles(self: Box<Self>) -> Roles;
}

impl fmt::Debug for dyn AudioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSession")
            .field("backend", &self.backend_name())
            .field("mode", &self.mode())
            .field("state", &self.state())
            .finish()
    }
}

/// An `f32` stored as bits in an `AtomicU32`, clamped on write.
///
/// Control threads write, the audio thread reads. No locks, no allocations.
#[derive(Debug)]
pub(crate) struct AtomicParam {
    value: AtomicU32,
    min: f32,
    max: f32,
}

impl AtomicParam {
    pub(crate) fn new(default: f32, min: f32, max: f32) -> Self {
        Self {
            value: AtomicU32::new(default.to_bits()),
            min,
            max,
        }
    }

    #[inline]
    pub(crate) fn set(&self, v: f32) {
        if v.is_nan() {
            return;
        }
        let clamped = v.clamp(self.min, self.max);
        self.value.store(clamped.to_bits(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Acquire))
    }
}

/// State shared by every session implementation: lifecycle, output
/// controls, and the negotiated stream parameters.
#[derive(Debug)]
pub(crate) struct SessionCore {
    state: AtomicU8,
    gain: AtomicParam,
    balance: AtomicParam,
    sample_rate: AtomicU32,
    block_size: AtomicUsize,
    input_channels: AtomicUsize,
    output_channels: AtomicUsize,
    input_latency: AtomicUsize,
    output_latency: AtomicUsize,
    time: AtomicU64,
}

impl SessionCore {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Unopened.to_u8()),
            gain: AtomicParam::new(1.0, 0.0, f32::MAX),
            balance: AtomicParam::new(0.0, -1.0, 1.0),
            sample_rate: AtomicU32::new(0),
            block_size: AtomicUsize::new(0),
            input_channels: AtomicUsize::new(0),
            output_channels: AtomicUsize::new(0),
            input_latency: AtomicUsize::new(0),
            output_latency: AtomicUsize::new(0),
            time: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub(crate) fn gain(&self) -> f32 {
        self.gain.get()
    }

    pub(crate) fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    pub(crate) fn balance(&self) -> f32 {
        self.balance.get()
    }

    pub(crate) fn set_balance(&self, balance: f32) {
        self.balance.set(balance);
    }

    pub(crate) fn store_negotiated(&self, config: &NegotiatedConfig) {
        self.sample_rate.store(config.sample_rate, Ordering::Release);
        self.block_size.store(config.block_size, Ordering::Release);
        self.input_channels
            .store(config.input_channels, Ordering::Release);
        self.output_channels
            .store(config.output_channels, Ordering::Release);
        self.input_latency
            .store(config.input_latency, Ordering::Release);
        self.output_latency
            .store(config.output_latency, Ordering::Release);
    }

    pub(crate) fn negotiated(&self) -> NegotiatedConfig {
        NegotiatedConfig {
            sample_rate: self.sample_rate.load(Ordering::Acquire),
            block_size: self.block_size.load(Ordering::Acquire),
            input_channels: self.input_channels.load(Ordering::Acquire),
            output_channels: self.output_channels.load(Ordering::Acquire),
            input_latency: self.input_latency.load(Ordering::Acquire),
            output_latency: self.output_latency.load(Ordering::Acquire),
        }
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block_size.load(Ordering::Acquire)
    }

    pub(crate) fn input_channels(&self) -> usize {
        self.input_channels.load(Ordering::Acquire)
    }

    pub(crate) fn output_channels(&self) -> usize {
        self.output_channels.load(Ordering::Acquire)
    }

    pub(crate) fn input_latency(&self) -> usize {
        self.input_latency.load(Ordering::Acquire)
    }

    pub(crate) fn output_latency(&self) -> usize {
        self.output_latency.load(Ordering::Acquire)
    }

    pub(crate) fn set_input_latency(&self, frames: usize) {
        self.input_latency.store(frames, Ordering::Release);
    }

    pub(crate) fn set_output_latency(&self, frames: usize) {
        self.output_latency.store(frames, Ordering::Release);
    }

    pub(crate) fn time(&self) -> f64 {
        f64::from_bits(self.time.load(Ordering::Acquire))
    }

    pub(crate) fn set_time(&self, seconds: f64) {
        self.time.store(seconds.to_bits(), Ordering::Release);
    }
}
