//! Sessions for drivers serviced by a main loop.
//!
//! Some native APIs do no work on their own: a client connects a context,
//! creates streams, and then repeatedly *iterates* a main loop that
//! dispatches state changes and I/O requests as callbacks. An
//! [`EventLoopDriver`] exposes that model, and [`EventLoopSession`] owns the
//! loop thread that iterates it.
//!
//! ```text
//!   control thread                     loop thread ("tandem-loop")
//!   ──────────────                     ───────────────────────────
//!   wake()  ──────────────────────►    iterate() returns early
//!   lock driver ◄── unlock_fair ────   lock driver, iterate, dispatch
//!   lock io                            (events lock io, check `done`)
//!   cork / flush / quit
//! ```
//!
//! Lock order is always driver, then io. The loop thread releases the
//! driver lock fairly after every iteration so a waiting control thread gets
//! in before the next one, and does not start another iteration while a
//! control thread has announced itself but not yet taken the lock.
//!
//! Context and stream readiness arrive asynchronously, so a session is OK
//! as soon as the context connect has been issued but only *ready* once
//! every bound direction's stream has reported ready. State notifications
//! can race with teardown and are handled idempotently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::Result;
use crate::session::{
    AudioSession, DriverConfig, FALLBACK_SAMPLE_RATE, Mode, NegotiatedConfig, Roles, SessionCore,
    SessionRequest, SessionState,
};
use crate::transfer::RoleIo;

/// Longest a single loop iteration may block.
pub const LOOP_TIMEOUT: Duration = Duration::from_millis(1000);

/// A stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Input stream.
    Capture,
    /// Output stream.
    Playback,
}

/// Lifecycle of the connection to the audio server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextState {
    /// Handshake in progress.
    Connecting,
    /// Streams may be created.
    Ready,
    /// The connection failed or was lost.
    Failed(String),
    /// The connection was closed cleanly.
    Terminated,
}

/// Lifecycle of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Being set up by the server.
    Creating,
    /// Transferring (or corked and able to).
    Ready,
    /// Setup failed or the stream was killed.
    Failed(String),
    /// Closed cleanly.
    Terminated,
}

/// What a loop iteration dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// The context changed state.
    Context(ContextState),
    /// A stream changed state.
    Stream(Direction, StreamState),
    /// The playback stream wants this many frames.
    WriteRequested {
        /// Frames the server can accept.
        frames: usize,
    },
    /// The capture stream has this many frames ready.
    ReadAvailable {
        /// Frames ready to read.
        frames: usize,
    },
    /// Capture data was lost.
    Overflow(Direction),
    /// Playback ran dry.
    Underflow(Direction),
}

/// Wakes a blocked [`EventLoopDriver::iterate`] from another thread.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// A native backend built around a context, streams, and a main loop.
pub trait EventLoopDriver: Send + 'static {
    /// Backend family name.
    fn name(&self) -> &str;

    /// Start connecting the context. Readiness is reported by `iterate`.
    fn connect(&mut self, client_name: &str) -> Result<()>;

    /// Run one loop iteration, blocking at most `timeout`, and append what
    /// it dispatched to `events`.
    fn iterate(&mut self, timeout: Duration, events: &mut Vec<LoopEvent>) -> Result<()>;

    /// A handle that makes a blocked `iterate` return promptly.
    fn waker(&self) -> Waker;

    /// Create the streams `config` asks for. Readiness is reported by
    /// `iterate`; the returned config carries the agreed rate and channels.
    fn connect_streams(
        &mut self,
        config: &DriverConfig,
        start_corked: bool,
    ) -> Result<NegotiatedConfig>;

    /// Queue interleaved playback samples.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Read interleaved capture samples; returns how many samples were read.
    fn read(&mut self, samples: &mut [f32]) -> Result<usize>;

    /// Pause (`true`) or unpause a stream.
    fn cork(&mut self, direction: Direction, corked: bool) -> Result<()>;

    /// Drop whatever the stream has buffered.
    fn flush(&mut self, direction: Direction) -> Result<()>;

    /// Current stream latency in frames, if known.
    fn latency_frames(&self, direction: Direction) -> Option<usize>;

    /// Stream clock in seconds.
    fn stream_time(&self) -> f64;

    /// Ask the loop to stop; the next `iterate` returns immediately.
    fn quit(&mut self);

    /// Release streams and the context. Idempotent.
    fn disconnect(&mut self);
}

struct LoopIo {
    roles: RoleIo,
    native: Vec<f32>,
    streams_connected: bool,
}

/// The first `samples` of `native`, growing it if needed.
fn scratch(native: &mut Vec<f32>, samples: usize) -> &mut [f32] {
    if native.len() < samples {
        native.resize(samples, 0.0);
    }
    &mut native[..samples]
}

struct Shared<D> {
    core: SessionCore,
    driver: Mutex<D>,
    io: Mutex<LoopIo>,
    done: AtomicBool,
    /// Control threads between waking the loop and taking the driver lock.
    controllers: AtomicUsize,
    capture_ready: AtomicBool,
    playback_ready: AtomicBool,
    config: DriverConfig,
    waker: Waker,
}

impl<D: EventLoopDriver> Shared<D> {
    fn ready_flag(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Capture => &self.capture_ready,
            Direction::Playback => &self.playback_ready,
        }
    }

    fn directions(&self) -> impl Iterator<Item = Direction> + use<D> {
        let mode = self.config.mode;
        [
            mode.records().then_some(Direction::Capture),
            mode.plays().then_some(Direction::Playback),
        ]
        .into_iter()
        .flatten()
    }

    fn clear_ready(&self) {
        self.capture_ready.store(false, Ordering::Release);
        self.playback_ready.store(false, Ordering::Release);
    }

    /// Take the driver lock from a control thread without waiting out an
    /// iteration.
    fn lock_driver(&self) -> MutexGuard<'_, D> {
        self.controllers.fetch_add(1, Ordering::SeqCst);
        (self.waker)();
        let driver = self.driver.lock();
        self.controllers.fetch_sub(1, Ordering::SeqCst);
        driver
    }

    fn run(&self) {
        let mut events = Vec::new();
        loop {
            let mut driver = self.driver.lock();
            if self.done.load(Ordering::Acquire) {
                break;
            }
            if self.controllers.load(Ordering::SeqCst) > 0 {
                MutexGuard::unlock_fair(driver);
                std::thread::yield_now();
                continue;
            }

            if let Err(err) = driver.iterate(LOOP_TIMEOUT, &mut events) {
                tracing::error!(backend = driver.name(), error = %err, "event loop failed");
                self.clear_ready();
                break;
            }
            for event in events.drain(..) {
                self.dispatch(&mut driver, event);
            }
            self.core.set_time(driver.stream_time());

            MutexGuard::unlock_fair(driver);
        }
        tracing::debug!("event loop thread exiting");
    }

    fn dispatch(&self, driver: &mut D, event: LoopEvent) {
        match event {
            LoopEvent::Context(state) => self.on_context(driver, state),
            LoopEvent::Stream(direction, state) => self.on_stream(driver, direction, state),
            LoopEvent::WriteRequested { frames } => self.on_write(driver, frames),
            LoopEvent::ReadAvailable { frames } => self.on_read(driver, frames),
            LoopEvent::Overflow(direction) | LoopEvent::Underflow(direction) => {
                tracing::debug!(?direction, "stream over/underrun");
                let mut io = self.io.lock();
                if self.done.load(Ordering::Acquire) {
                    return;
                }
                io.roles.notify_overload();
            }
        }
    }

    fn on_context(&self, driver: &mut D, state: ContextState) {
        match state {
            ContextState::Connecting => tracing::debug!("context connecting"),
            ContextState::Ready => {
                let mut io = self.io.lock();
                if self.done.load(Ordering::Acquire) || io.streams_connected {
                    return;
                }
                let corked = self.core.state() == SessionState::Suspended;
                match driver.connect_streams(&self.config, corked) {
                    Ok(negotiated) => {
                        self.core.store_negotiated(&negotiated);
                        io.streams_connected = true;
                        tracing::debug!(
                            sample_rate = negotiated.sample_rate,
                            corked,
                            "context ready, streams connecting"
                        );
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to create streams");
                    }
                }
            }
            ContextState::Failed(message) => {
                tracing::error!(%message, "context failed");
                self.clear_ready();
            }
            ContextState::Terminated => {
                tracing::debug!("context terminated");
                self.clear_ready();
            }
        }
    }

    fn on_stream(&self, driver: &mut D, direction: Direction, state: StreamState) {
        match state {
            StreamState::Creating => tracing::debug!(?direction, "stream creating"),
            StreamState::Ready => {
                let mut io = self.io.lock();
                if self.done.load(Ordering::Acquire)
                    || self.ready_flag(direction).swap(true, Ordering::AcqRel)
                {
                    return;
                }

                let latency = driver.latency_frames(direction).unwrap_or(0);
                match direction {
                    Direction::Capture => self.core.set_input_latency(latency),
                    Direction::Playback => self.core.set_output_latency(latency),
                }
                let config = self.core.negotiated();
                match direction {
                    Direction::Capture => io.roles.notify_record(&config),
                    Direction::Playback => io.roles.notify_playback(&config),
                }
                tracing::info!(
                    ?direction,
                    sample_rate = config.sample_rate,
                    latency,
                    "stream ready"
                );
            }
            StreamState::Failed(message) => {
                tracing::error!(?direction, %message, "stream failed");
                self.ready_flag(direction).store(false, Ordering::Release);
            }
            StreamState::Terminated => {
                self.ready_flag(direction).store(false, Ordering::Release);
            }
        }
    }

    fn on_write(&self, driver: &mut D, frames: usize) {
        let mut io = self.io.lock();
        if self.done.load(Ordering::Acquire) || self.core.state() != SessionState::Active {
            return;
        }
        let channels = self.core.output_channels();
        if channels == 0 || frames == 0 {
            return;
        }

        let LoopIo { roles, native, .. } = &mut *io;
        let block = scratch(native, frames * channels);
        roles.render(
            block,
            channels,
            frames,
            self.core.gain(),
            self.core.balance(),
        );
        if let Err(err) = driver.write(block) {
            tracing::warn!(error = %err, "playback write failed");
        }
    }

    fn on_read(&self, driver: &mut D, frames: usize) {
        let mut io = self.io.lock();
        if self.done.load(Ordering::Acquire) || self.core.state() != SessionState::Active {
            return;
        }
        let channels = self.core.input_channels();
        if channels == 0 || frames == 0 {
            return;
        }

        let read = match driver.read(scratch(&mut io.native, frames * channels)) {
            Ok(samples) => samples / channels,
            Err(err) => {
                tracing::warn!(error = %err, "capture read failed");
                return;
            }
        };
        let LoopIo { roles, native, .. } = &mut *io;
        roles.capture(&native[..read * channels], channels, read);
    }
}

/// An [`AudioSession`] over any [`EventLoopDriver`].
pub struct EventLoopSession<D: EventLoopDriver> {
    name: String,
    shared: Arc<Shared<D>>,
    thread: Option<JoinHandle<()>>,
}

impl<D: EventLoopDriver> EventLoopSession<D> {
    /// Connect `driver` for `roles` and start the loop thread.
    ///
    /// Streams are created once the context reports ready, so the session
    /// may be OK before it is [ready](AudioSession::is_ready).
    pub fn open(mut driver: D, roles: Roles, request: &SessionRequest) -> Self {
        let mut config = DriverConfig::for_roles(&roles, request);
        config.sample_rate = Some(config.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE));

        let name = driver.name().to_string();
        let connected = match driver.connect(&config.client_name) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(backend = %name, error = %err, "failed to connect context");
                false
            }
        };

        let shared = Arc::new(Shared {
            core: SessionCore::new(),
            waker: driver.waker(),
            driver: Mutex::new(driver),
            io: Mutex::new(LoopIo {
                roles: RoleIo::new(roles),
                native: Vec::new(),
                streams_connected: false,
            }),
            done: AtomicBool::new(false),
            controllers: AtomicUsize::new(0),
            capture_ready: AtomicBool::new(false),
            playback_ready: AtomicBool::new(false),
            config,
        });

        let mut session = Self {
            name,
            shared,
            thread: None,
        };
        if !connected {
            return session;
        }

        session.shared.core.set_state(SessionState::Active);
        let loop_shared = Arc::clone(&session.shared);
        match std::thread::Builder::new()
            .name("tandem-loop".to_string())
            .spawn(move || loop_shared.run())
        {
            Ok(handle) => {
                session.thread = Some(handle);
                tracing::info!(backend = %session.name, "event loop session connecting");
            }
            Err(err) => {
                tracing::warn!(backend = %session.name, error = %err, "failed to spawn loop thread");
                session.shared.core.set_state(SessionState::Unopened);
                session.shared.driver.lock().disconnect();
            }
        }
        session
    }

    fn teardown(&mut self) {
        if self.shared.core.state() == SessionState::Closed {
            return;
        }

        if let Some(handle) = self.thread.take() {
            {
                let mut driver = self.shared.lock_driver();
                let _io = self.shared.io.lock();
                self.shared.done.store(true, Ordering::Release);
                driver.quit();
            }
            if handle.join().is_err() {
                tracing::error!(backend = %self.name, "event loop thread panicked");
            }
        }

        self.shared.driver.lock().disconnect();
        self.shared.clear_ready();
        self.shared.core.set_state(SessionState::Closed);
        tracing::debug!(backend = %self.name, "event loop session closed");
    }
}

impl<D: EventLoopDriver> AudioSession for EventLoopSession<D> {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> Mode {
        self.shared.config.mode
    }

    fn state(&self) -> SessionState {
        self.shared.core.state()
    }

    fn is_ready(&self) -> bool {
        self.is_ok()
            && self
                .shared
                .directions()
                .all(|direction| self.shared.ready_flag(direction).load(Ordering::Acquire))
    }

    fn suspend(&self) {
        let mut driver = self.shared.lock_driver();
        let io = self.shared.io.lock();
        if self.shared.core.state() != SessionState::Active {
            return;
        }
        self.shared.core.set_state(SessionState::Suspended);
        if !io.streams_connected {
            return;
        }
        for direction in self.shared.directions() {
            if let Err(err) = driver.cork(direction, true) {
                tracing::warn!(?direction, error = %err, "failed to cork stream");
            }
            if let Err(err) = driver.flush(direction) {
                tracing::warn!(?direction, error = %err, "failed to flush stream");
            }
        }
    }

    fn resume(&self) {
        let mut driver = self.shared.lock_driver();
        let io = self.shared.io.lock();
        if self.shared.core.state() != SessionState::Suspended {
            return;
        }
        self.shared.core.set_state(SessionState::Active);
        if !io.streams_connected {
            return;
        }
        // Stale capture data would arrive as a burst of old input.
        if self.shared.config.mode.records()
            && let Err(err) = driver.flush(Direction::Capture)
        {
            tracing::warn!(error = %err, "failed to flush capture stream");
        }
        for direction in self.shared.directions() {
            if let Err(err) = driver.cork(direction, false) {
                tracing::warn!(?direction, error = %err, "failed to uncork stream");
            }
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
            self.shared.core.time()
        } else {
            0.0
        }
    }

    fn close(&mut self) {
        self.teardown();
    }

    fn into_roles(mut self: Box<Self>) -> Roles {
        self.teardown();
        self.shared.io.lock().roles.take_roles()
    }
}

impl<D: EventLoopDriver> Drop for EventLoopSession<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tandem_core::PlaybackSource;

    /// Driver whose loop dispatches whatever the test feeds it.
    struct Fed {
        feed: Receiver<LoopEvent>,
        wake_tx: Sender<()>,
        wake_rx: Receiver<()>,
        fail_connect: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Fed {
        fn new() -> (Self, Sender<LoopEvent>, Arc<Mutex<Vec<String>>>) {
            let (tx, feed) = unbounded();
            let (wake_tx, wake_rx) = bounded(1);
            let log = Arc::new(Mutex::new(Vec::new()));
            let driver = Self {
                feed,
                wake_tx,
                wake_rx,
                fail_connect: false,
                log: Arc::clone(&log),
            };
            (driver, tx, log)
        }
    }

    impl EventLoopDriver for Fed {
        fn name(&self) -> &str {
            "fed"
        }

        fn connect(&mut self, _client_name: &str) -> Result<()> {
            if self.fail_connect {
                return Err(Error::Stream("refused".into()));
            }
            Ok(())
        }

        fn iterate(&mut self, timeout: Duration, events: &mut Vec<LoopEvent>) -> Result<()> {
            crossbeam_channel::select! {
                recv(self.feed) -> event => {
                    if let Ok(event) = event {
                        events.push(event);
                    }
                }
                recv(self.wake_rx) -> _ => {}
                default(timeout) => {}
            }
            Ok(())
        }

        fn waker(&self) -> Waker {
            let tx = self.wake_tx.clone();
            Arc::new(move || {
                let _ = tx.try_send(());
            })
        }

        fn connect_streams(
            &mut self,
            config: &DriverConfig,
            start_corked: bool,
        ) -> Result<NegotiatedConfig> {
            self.log.lock().push(format!("connect_streams corked={start_corked}"));
            Ok(NegotiatedConfig {
                sample_rate: config.sample_rate.unwrap_or(0),
                block_size: 256,
                input_channels: config.input_channels,
                output_channels: config.output_channels,
                input_latency: 0,
                output_latency: 0,
            })
        }

        fn write(&mut self, samples: &[f32]) -> Result<()> {
            self.log.lock().push(format!("write {}", samples.len()));
            Ok(())
        }

        fn read(&mut self, samples: &mut [f32]) -> Result<usize> {
            samples.fill(0.0);
            Ok(samples.len())
        }

        fn cork(&mut self, direction: Direction, corked: bool) -> Result<()> {
            self.log.lock().push(format!("cork {direction:?} {corked}"));
            Ok(())
        }

        fn flush(&mut self, direction: Direction) -> Result<()> {
            self.log.lock().push(format!("flush {direction:?}"));
            Ok(())
        }

        fn latency_frames(&self, _direction: Direction) -> Option<usize> {
            Some(512)
        }

        fn stream_time(&self) -> f64 {
            0.25
        }

        fn quit(&mut self) {
            self.log.lock().push("quit".to_string());
        }

        fn disconnect(&mut self) {
            self.log.lock().push("disconnect".to_string());
        }
    }

    struct Counting {
        pulled: Arc<AtomicUsize>,
        rate_notes: Arc<AtomicUsize>,
    }

    impl PlaybackSource for Counting {
        fn client_name(&self) -> &str {
            "counting"
        }

        fn application_channel_count(&self) -> usize {
            2
        }

        fn set_system_playback_sample_rate(&mut self, _rate: u32) {
            self.rate_notes.fetch_add(1, Ordering::SeqCst);
        }

        fn get_source_samples(&mut self, buffers: &mut [Vec<f32>], frames: usize) -> usize {
            self.pulled.fetch_add(frames, Ordering::SeqCst);
            for channel in buffers.iter_mut() {
                channel[..frames].fill(0.1);
            }
            frames
        }
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn counting() -> (Box<dyn PlaybackSource>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let pulled = Arc::new(AtomicUsize::new(0));
        let rate_notes = Arc::new(AtomicUsize::new(0));
        let source = Box::new(Counting {
            pulled: Arc::clone(&pulled),
            rate_notes: Arc::clone(&rate_notes),
        });
        (source, pulled, rate_notes)
    }

    fn ready_playback(feed: &Sender<LoopEvent>) {
        feed.send(LoopEvent::Context(ContextState::Connecting)).unwrap();
        feed.send(LoopEvent::Context(ContextState::Ready)).unwrap();
        feed.send(LoopEvent::Stream(Direction::Playback, StreamState::Ready))
            .unwrap();
    }

    #[test]
    fn ok_before_ready_then_ready_after_handshake() {
        let (driver, feed, log) = Fed::new();
        let (source, _, _) = counting();
        let session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());

        assert!(session.is_ok());
        assert!(!session.is_ready());

        ready_playback(&feed);
        wait_for(|| session.is_ready());
        assert_eq!(session.sample_rate(), FALLBACK_SAMPLE_RATE);
        assert_eq!(session.output_latency(), 512);
        assert!(log.lock().contains(&"connect_streams corked=false".to_string()));
    }

    #[test]
    fn duplicate_ready_notifications_notify_once() {
        let (driver, feed, _log) = Fed::new();
        let (source, _, rate_notes) = counting();
        let session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());

        ready_playback(&feed);
        feed.send(LoopEvent::Stream(Direction::Playback, StreamState::Ready))
            .unwrap();
        feed.send(LoopEvent::WriteRequested { frames: 8 }).unwrap();
        wait_for(|| session.is_ready());
        wait_for(|| feed.is_empty());
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(rate_notes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_requests_pull_from_source() {
        let (driver, feed, log) = Fed::new();
        let (source, pulled, _) = counting();
        let _session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());

        ready_playback(&feed);
        feed.send(LoopEvent::WriteRequested { frames: 100 }).unwrap();
        wait_for(|| pulled.load(Ordering::SeqCst) == 100);
        wait_for(|| log.lock().contains(&"write 200".to_string()));
    }

    #[test]
    fn stream_failure_clears_readiness() {
        let (driver, feed, _log) = Fed::new();
        let (source, _, _) = counting();
        let session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());

        ready_playback(&feed);
        wait_for(|| session.is_ready());
        feed.send(LoopEvent::Stream(
            Direction::Playback,
            StreamState::Failed("killed".into()),
        ))
        .unwrap();
        wait_for(|| !session.is_ready());
        assert!(session.is_ok());
    }

    #[test]
    fn suspend_corks_and_flushes_once() {
        let (driver, feed, log) = Fed::new();
        let (source, _, _) = counting();
        let session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());
        ready_playback(&feed);
        wait_for(|| session.is_ready());

        session.suspend();
        session.suspend();
        assert_eq!(session.state(), SessionState::Suspended);
        session.resume();
        session.resume();
        assert_eq!(session.state(), SessionState::Active);

        let log = log.lock();
        let corks: Vec<_> = log.iter().filter(|l| l.starts_with("cork")).collect();
        assert_eq!(corks, ["cork Playback true", "cork Playback false"]);
        assert_eq!(log.iter().filter(|l| l.starts_with("flush")).count(), 1);
    }

    #[test]
    fn control_calls_never_wait_out_an_iteration() {
        let (driver, feed, _log) = Fed::new();
        let (source, _, _) = counting();
        let session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());
        ready_playback(&feed);
        wait_for(|| session.is_ready());

        // Each missed wake-up would cost a full LOOP_TIMEOUT.
        let started = Instant::now();
        for _ in 0..200 {
            session.suspend();
            session.resume();
        }
        assert!(started.elapsed() < LOOP_TIMEOUT);
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn suspended_before_context_ready_connects_corked() {
        let (driver, feed, log) = Fed::new();
        let (source, _, _) = counting();
        let session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());

        session.suspend();
        feed.send(LoopEvent::Context(ContextState::Ready)).unwrap();
        wait_for(|| log.lock().iter().any(|l| l.starts_with("connect_streams")));
        assert!(log.lock().contains(&"connect_streams corked=true".to_string()));
        assert!(!log.lock().iter().any(|l| l.starts_with("cork")));
    }

    #[test]
    fn teardown_quits_joins_then_disconnects() {
        let (driver, feed, log) = Fed::new();
        let (source, _, _) = counting();
        let mut session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());
        ready_playback(&feed);
        wait_for(|| session.is_ready());

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_ready());

        let log = log.lock();
        let tail: Vec<_> = log.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, ["quit", "disconnect"]);
        assert_eq!(log.iter().filter(|l| *l == "disconnect").count(), 1);
    }

    #[test]
    fn connect_failure_is_unopened() {
        let (mut driver, _feed, _log) = Fed::new();
        driver.fail_connect = true;
        let (source, _, _) = counting();
        let session = Box::new(EventLoopSession::open(
            driver,
            Roles::playback(source),
            &SessionRequest::default(),
        ));
        assert_eq!(session.state(), SessionState::Unopened);
        assert!(!session.is_ok());

        let roles = session.into_roles();
        assert_eq!(roles.mode(), Mode::Playback);
    }

    #[test]
    fn loop_publishes_stream_time() {
        let (driver, feed, _log) = Fed::new();
        let (source, _, _) = counting();
        let session = EventLoopSession::open(driver, Roles::playback(source), &SessionRequest::default());
        ready_playback(&feed);
        wait_for(|| session.current_time() > 0.0);
        assert_eq!(session.current_time(), 0.25);
    }
}
