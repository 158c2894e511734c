//! Sessions for drivers that call back on their own real-time thread.
//!
//! A [`CallbackDriver`] owns the native stream and invokes a [`ProcessFn`]
//! once per hardware block. [`CallbackSession`] supplies that function: on
//! each call it pulls from the bound [`PlaybackSource`], shapes and
//! interleaves the block, and pushes captured input to the bound
//! [`RecordTarget`].
//!
//! The transfer step never blocks. It only `try_lock`s the session's I/O
//! state; when a control thread holds it (suspend, resume, teardown) the
//! block is rendered as silence instead.
//!
//! Driver notifications ([`DriverEvent`]) arrive on whatever thread the
//! driver likes. They only flip atomics; the next transfer step forwards
//! them to the roles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::Result;
use crate::session::{
    AudioSession, DriverConfig, Mode, NegotiatedConfig, Roles, SessionCore, SessionRequest,
    SessionState,
};
use crate::transfer::RoleIo;

/// Block size tried when the driver rejects its own default.
pub const RETRY_BLOCK_SIZE: usize = 1024;

/// Per-block transfer function handed to a driver.
///
/// Called as `process(input, output, frames)` with interleaved buffers. A
/// driver that runs input and output on separate streams passes an empty
/// slice for the direction it is not delivering.
pub type ProcessFn = Arc<dyn Fn(&[f32], &mut [f32], usize) + Send + Sync>;

/// Notification sink handed to a driver.
pub type EventFn = Arc<dyn Fn(DriverEvent) + Send + Sync>;

/// Asynchronous notifications from a callback driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// A deadline was missed or a buffer over/underran.
    Overload,
    /// The device reported new latencies, in frames.
    LatencyChanged {
        /// New capture latency, if it changed.
        input: Option<usize>,
        /// New playback latency, if it changed.
        output: Option<usize>,
    },
    /// The device was reopened with new parameters.
    Renegotiated(NegotiatedConfig),
    /// A non-fatal stream error.
    Error(String),
}

/// A native backend that drives transfers from its own thread.
pub trait CallbackDriver: Send + 'static {
    /// Backend family name.
    fn name(&self) -> &str;

    /// Acquire the native device(s) and install the callbacks.
    ///
    /// Must not start data flow. May be called again after a failed attempt.
    fn open(
        &mut self,
        config: &DriverConfig,
        process: ProcessFn,
        events: EventFn,
    ) -> Result<NegotiatedConfig>;

    /// Start (or restart) data flow.
    fn start(&mut self) -> Result<()>;

    /// Pause data flow, keeping the device open.
    fn stop(&mut self) -> Result<()>;

    /// Release native handles and drop the callbacks. Idempotent.
    fn close(&mut self);

    /// Stream clock in seconds.
    fn current_time(&self) -> f64;
}

/// State reachable from the driver's threads.
struct Shared {
    core: SessionCore,
    io: Mutex<RoleIo>,
    overload: AtomicBool,
    latency_changed: AtomicBool,
    renegotiated: AtomicBool,
}

impl Shared {
    fn process(&self, input: &[f32], output: &mut [f32], frames: usize) {
        let Some(mut io) = self.io.try_lock() else {
            output.fill(0.0);
            return;
        };
        if self.core.state() != SessionState::Active {
            output.fill(0.0);
            return;
        }

        if self.renegotiated.swap(false, Ordering::AcqRel) {
            let config = self.core.negotiated();
            io.notify_playback(&config);
            io.notify_record(&config);
        }
        if self.latency_changed.swap(false, Ordering::AcqRel) {
            io.notify_latency(self.core.input_latency(), self.core.output_latency());
        }
        if self.overload.swap(false, Ordering::AcqRel) {
            io.notify_overload();
        }

        let out_channels = self.core.output_channels();
        if !output.is_empty() && out_channels > 0 {
            let frames = frames.min(output.len() / out_channels);
            io.render(
                output,
                out_channels,
                frames,
                self.core.gain(),
                self.core.balance(),
            );
        }

        let in_channels = self.core.input_channels();
        if !input.is_empty() && in_channels > 0 {
            let frames = frames.min(input.len() / in_channels);
            io.capture(input, in_channels, frames);
        }
    }

    fn handle_event(&self, event: DriverEvent) {
        match event {
            DriverEvent::Overload => {
                tracing::debug!("driver reported overload");
                self.overload.store(true, Ordering::Release);
            }
            DriverEvent::LatencyChanged { input, output } => {
                if let Some(frames) = input {
                    self.core.set_input_latency(frames);
                }
                if let Some(frames) = output {
                    self.core.set_output_latency(frames);
                }
                self.latency_changed.store(true, Ordering::Release);
            }
            DriverEvent::Renegotiated(config) => {
                tracing::info!(
                    sample_rate = config.sample_rate,
                    block_size = config.block_size,
                    "device renegotiated"
                );
                self.core.store_negotiated(&config);
                self.renegotiated.store(true, Ordering::Release);
            }
            DriverEvent::Error(message) => {
                tracing::error!(%message, "audio stream error");
            }
        }
    }
}

/// An [`AudioSession`] over any [`CallbackDriver`].
///
/// # Example
///
/// ```rust,ignore
/// use tandem_io::{AudioSession, CallbackSession, CpalDriver, Roles, SessionRequest};
///
/// let session = CallbackSession::open(
///     CpalDriver::new(),
///     Roles::playback(Box::new(my_source)),
///     &SessionRequest::default(),
/// );
/// assert!(session.is_ok());
/// ```
pub struct CallbackSession<D: CallbackDriver> {
    name: String,
    mode: Mode,
    driver: Mutex<D>,
    shared: Arc<Shared>,
}

impl<D: CallbackDriver> CallbackSession<D> {
    /// Open `driver` for `roles` and start it.
    ///
    /// Never fails outright: check [`AudioSession::is_ok`] on the result.
    pub fn open(mut driver: D, roles: Roles, request: &SessionRequest) -> Self {
        let mode = roles.mode();
        let first = DriverConfig::for_roles(&roles, request);

        let shared = Arc::new(Shared {
            core: SessionCore::new(),
            io: Mutex::new(RoleIo::new(roles)),
            overload: AtomicBool::new(false),
            latency_changed: AtomicBool::new(false),
            renegotiated: AtomicBool::new(false),
        });

        let process: ProcessFn = {
            let shared = Arc::clone(&shared);
            Arc::new(move |input: &[f32], output: &mut [f32], frames: usize| {
                shared.process(input, output, frames);
            })
        };
        let events: EventFn = {
            let shared = Arc::clone(&shared);
            Arc::new(move |event| shared.handle_event(event))
        };

        let name = driver.name().to_string();
        let negotiated = open_with_retries(&mut driver, &first, &process, &events);

        if let Some(config) = negotiated {
            shared.core.store_negotiated(&config);
            {
                let mut io = shared.io.lock();
                io.notify_playback(&config);
                io.notify_record(&config);
            }
            shared.core.set_state(SessionState::Active);

            match driver.start() {
                Ok(()) => {
                    tracing::info!(
                        backend = %name,
                        sample_rate = config.sample_rate,
                        block_size = config.block_size,
                        input_channels = config.input_channels,
                        output_channels = config.output_channels,
                        "callback session started"
                    );
                }
                Err(err) => {
                    tracing::warn!(backend = %name, error = %err, "failed to start driver");
                    shared.core.set_state(SessionState::Unopened);
                    driver.close();
                }
            }
        }

        Self {
            name,
            mode,
            driver: Mutex::new(driver),
            shared,
        }
    }

    fn teardown(&mut self) {
        let previous = self.shared.core.state();
        if previous == SessionState::Closed {
            return;
        }
        {
            let _io = self.shared.io.lock();
            self.shared.core.set_state(SessionState::Closed);
        }

        let driver = self.driver.get_mut();
        if previous == SessionState::Active
            && let Err(err) = driver.stop()
        {
            tracing::warn!(backend = %self.name, error = %err, "failed to stop driver");
        }
        driver.close();
        tracing::debug!(backend = %self.name, "callback session closed");
    }
}

fn open_with_retries<D: CallbackDriver>(
    driver: &mut D,
    first: &DriverConfig,
    process: &ProcessFn,
    events: &EventFn,
) -> Option<NegotiatedConfig> {
    let mut attempts = vec![first.clone()];
    if first.block_size != Some(RETRY_BLOCK_SIZE) {
        attempts.push(DriverConfig {
            block_size: Some(RETRY_BLOCK_SIZE),
            ..first.clone()
        });
    }
    let stereo = first.stereo();
    if stereo != *first {
        attempts.push(stereo);
    }

    for config in &attempts {
        match driver.open(config, Arc::clone(process), Arc::clone(events)) {
            Ok(negotiated) => return Some(negotiated),
            Err(err) => {
                tracing::warn!(
                    backend = driver.name(),
                    block_size = ?config.block_size,
                    input_channels = config.input_channels,
                    output_channels = config.output_channels,
                    error = %err,
                    "driver open attempt failed"
                );
                driver.close();
            }
        }
    }
    None
}

impl<D: CallbackDriver> AudioSession for CallbackSession<D> {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn state(&self) -> SessionState {
        self.shared.core.state()
    }

    /// Opening is synchronous, so an open session is a ready one.
    fn is_ready(&self) -> bool {
        self.is_ok()
    }

    fn suspend(&self) {
        let mut driver = self.driver.lock();
        if self.shared.core.state() != SessionState::Active {
            return;
        }
        let _io = self.shared.io.lock();
        self.shared.core.set_state(SessionState::Suspended);
        if let Err(err) = driver.stop() {
            tracing::warn!(backend = %self.name, error = %err, "failed to stop driver");
        }
    }

    fn resume(&self) {
        let mut driver = self.driver.lock();
        if self.shared.core.state() != SessionState::Suspended {
            return;
        }
        self.shared.core.set_state(SessionState::Active);
        if let Err(err) = driver.start() {
            tracing::warn!(backend = %self.name, error = %err, "failed to restart driver");
            self.shared.core.set_state(SessionState::Suspended);
        }
    }

    fn output_gain(&self) -> f32 {
        self.shared.core.gain()
    }

    fn set_output_gain(&self, gain: f32) {
        self.shared.core.set_gain(gain);
    }

    fn output_balance(&self) -> f32 {
        self.shared.core.balance()
    }

    fn set_output_balance(&self, balance: f32) {
        self.shared.core.set_balance(balance);
    }

    fn sample_rate(&self) -> u32 {
        self.shared.core.sample_rate()
    }

    fn block_size(&self) -> usize {
        self.shared.core.block_size()
    }

    fn input_latency(&self) -> usize {
        self.shared.core.input_latency()
    }

    fn output_latency(&self) -> usize {
        self.shared.core.output_latency()
    }

    fn current_time(&self) -> f64 {
        if self.is_ok() {
            self.driver.lock().current_time()
        } else {
            0.0
        }
    }

    fn close(&mut self) {
        self.teardown();
    }

    fn into_roles(mut self: Box<Self>) -> Roles {
        self.teardown();
        self.shared.io.lock().take_roles()
    }
}

impl<D: CallbackDriver> Drop for CallbackSession<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
