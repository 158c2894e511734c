//! Software-timed null device.
//!
//! [`ClockedDriver`] is an [`EventLoopDriver`] with no hardware behind it.
//! Its loop paces block-sized write and read requests in real time, throws
//! written audio away and reads silence. It is useful headless (servers,
//! CI) and as the reference event-loop backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::Result;
use crate::event_loop::{
    ContextState, Direction, EventLoopDriver, LoopEvent, StreamState, Waker,
};
use crate::session::{DriverConfig, FALLBACK_SAMPLE_RATE, NegotiatedConfig};

/// Block size used when the request does not name one.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// How far the clock may fall behind before it stops catching up.
const MAX_LAG_BLOCKS: u32 = 4;

/// Real-time paced null device.
///
/// # Example
///
/// ```rust,ignore
/// use tandem_io::{ClockedDriver, EventLoopSession, Roles, SessionRequest};
///
/// let session = EventLoopSession::open(
///     ClockedDriver::new(),
///     Roles::playback(Box::new(my_source)),
///     &SessionRequest::default(),
/// );
/// ```
#[derive(Debug)]
pub struct ClockedDriver {
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    pending: VecDeque<LoopEvent>,
    quitting: bool,
    stream: Option<ClockedStream>,
}

#[derive(Debug)]
struct ClockedStream {
    config: NegotiatedConfig,
    period: Duration,
    capture_corked: Option<bool>,
    playback_corked: Option<bool>,
    next_tick: Instant,
    position: u64,
}

impl ClockedStream {
    fn running(&self) -> bool {
        self.capture_corked == Some(false) || self.playback_corked == Some(false)
    }

    fn corked_mut(&mut self, direction: Direction) -> &mut Option<bool> {
        match direction {
            Direction::Capture => &mut self.capture_corked,
            Direction::Playback => &mut self.playback_corked,
        }
    }
}

impl Default for ClockedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockedDriver {
    /// A disconnected driver.
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            wake_tx,
            wake_rx,
            pending: VecDeque::new(),
            quitting: false,
            stream: None,
        }
    }

    /// Names the factory lists for this family.
    pub fn device_names() -> Vec<String> {
        vec!["null".to_string()]
    }
}

impl EventLoopDriver for ClockedDriver {
    fn name(&self) -> &str {
        "clocked"
    }

    fn connect(&mut self, client_name: &str) -> Result<()> {
        tracing::debug!(client_name, "clocked context connecting");
        self.quitting = false;
        self.pending
            .push_back(LoopEvent::Context(ContextState::Connecting));
        self.pending.push_back(LoopEvent::Context(ContextState::Ready));
        Ok(())
    }

    fn iterate(&mut self, timeout: Duration, events: &mut Vec<LoopEvent>) -> Result<()> {
        if !self.pending.is_empty() {
            events.extend(self.pending.drain(..));
            return Ok(());
        }
        if self.quitting {
            return Ok(());
        }

        let now = Instant::now();
        let wait = match &self.stream {
            Some(stream) if stream.running() => {
                stream.next_tick.saturating_duration_since(now).min(timeout)
            }
            _ => timeout,
        };

        match self.wake_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
        }

        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        let now = Instant::now();
        if !stream.running() || now < stream.next_tick {
            return Ok(());
        }

        let block = stream.config.block_size;
        if stream.playback_corked == Some(false) {
            events.push(LoopEvent::WriteRequested { frames: block });
        }
        if stream.capture_corked == Some(false) {
            events.push(LoopEvent::ReadAvailable { frames: block });
        }
        stream.position += block as u64;
        stream.next_tick += stream.period;

        let max_lag = stream.period * MAX_LAG_BLOCKS;
        if now.saturating_duration_since(stream.next_tick) > max_lag {
            tracing::debug!("clocked device fell behind, resynchronising");
            stream.next_tick = now + stream.period;
        }
        Ok(())
    }

    fn waker(&self) -> Waker {
        let tx = self.wake_tx.clone();
        Arc::new(move || {
            // A full channel already holds a pending wake-up.
            let _ = tx.try_send(());
        })
    }

    fn connect_streams(
        &mut self,
        config: &DriverConfig,
        start_corked: bool,
    ) -> Result<NegotiatedConfig> {
        let sample_rate = config.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE);
        let block_size = config.block_size.unwrap_or(DEFAULT_BLOCK_SIZE).max(1);
        let records = config.mode.records();
        let plays = config.mode.plays();

        let negotiated = NegotiatedConfig {
            sample_rate,
            block_size,
            input_channels: if records { config.input_channels } else { 0 },
            output_channels: if plays { config.output_channels } else { 0 },
            input_latency: if records { block_size } else { 0 },
            output_latency: if plays { block_size } else { 0 },
        };

        for (direction, used) in [(Direction::Capture, records), (Direction::Playback, plays)] {
            if used {
                self.pending
                    .push_back(LoopEvent::Stream(direction, StreamState::Creating));
                self.pending
                    .push_back(LoopEvent::Stream(direction, StreamState::Ready));
            }
        }

        self.stream = Some(ClockedStream {
            config: negotiated,
            period: Duration::from_secs_f64(block_size as f64 / f64::from(sample_rate.max(1))),
            capture_corked: records.then_some(start_corked),
            playback_corked: plays.then_some(start_corked),
            next_tick: Instant::now(),
            position: 0,
        });

        tracing::info!(
            sample_rate,
            block_size,
            corked = start_corked,
            "clocked streams created"
        );
        Ok(negotiated)
    }

    fn write(&mut self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, samples: &mut [f32]) -> Result<usize> {
        samples.fill(0.0);
        Ok(samples.len())
    }

    fn cork(&mut self, direction: Direction, corked: bool) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            let was_running = stream.running();
            if let Some(state) = stream.corked_mut(direction).as_mut() {
                *state = corked;
            }
            if !was_running && stream.running() {
                stream.next_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn flush(&mut self, _direction: Direction) -> Result<()> {
        Ok(())
    }

    fn latency_frames(&self, direction: Direction) -> Option<usize> {
        let stream = self.stream.as_ref()?;
        match direction {
            Direction::Capture if stream.capture_corked.is_some() => {
                Some(stream.config.input_latency)
            }
            Direction::Playback if stream.playback_corked.is_some() => {
                Some(stream.config.output_latency)
            }
            _ => None,
        }
    }

    fn stream_time(&self) -> f64 {
        self.stream.as_ref().map_or(0.0, |stream| {
            stream.position as f64 / f64::from(stream.config.sample_rate.max(1))
        })
    }

    fn quit(&mut self) {
        self.quitting = true;
        let _ = self.wake_tx.try_send(());
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("clocked streams released");
        }
        self.pending.clear();
    }
}
