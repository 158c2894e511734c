//! cpal-based callback driver.
//!
//! [`CpalDriver`] opens the platform's default audio host through
//! [cpal](https://crates.io/crates/cpal) (ALSA on Linux, CoreAudio on macOS,
//! WASAPI on Windows) and hands every hardware block to the session's
//! [`ProcessFn`]. Duplex sessions get two streams, one per direction, each
//! calling the process function with an empty slice for the other side.
//!
//! ## Device selection
//!
//! A requested device may be given as:
//! - a numeric index into the host's device list (`"0"`, `"1"`)
//! - an exact device name
//! - a case-insensitive partial name (`"usb"`)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host};
use crossbeam_channel::{Sender, bounded, unbounded};

use crate::callback::{CallbackDriver, DriverEvent, EventFn, ProcessFn};
use crate::session::{DriverConfig, FALLBACK_SAMPLE_RATE, NegotiatedConfig};
use crate::{Error, Result};

/// Latency changes smaller than this many frames are not reported.
const LATENCY_JITTER_FRAMES: usize = 32;

/// Extract device name via `description()` (cpal 0.17+).
fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// Requests to the thread that owns the native streams.
enum Command {
    Play(Sender<Result<()>>),
    Pause(Sender<Result<()>>),
}

/// Handle to the stream owner thread.
///
/// cpal streams may not leave the thread that built them on every platform,
/// so they are built, driven and dropped on one dedicated thread. Dropping
/// the command sender ends that thread, which releases the streams.
struct StreamThread {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn request(&self, command: fn(Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply, replied) = bounded(1);
        self.commands
            .send(command(reply))
            .map_err(|_| Error::Stream("cpal stream thread exited".into()))?;
        replied
            .recv()
            .map_err(|_| Error::Stream("cpal stream thread exited".into()))?
    }

    fn shutdown(self) {
        drop(self.commands);
        if self.handle.join().is_err() {
            tracing::error!("cpal stream thread panicked");
        }
    }
}

/// The native streams of one open session. Lives on the owner thread.
struct Streams {
    output: Option<cpal::Stream>,
    input: Option<cpal::Stream>,
}

impl Streams {
    fn open(
        config: &DriverConfig,
        process: ProcessFn,
        events: EventFn,
        frames: &Arc<AtomicU64>,
    ) -> Result<(Self, NegotiatedConfig)> {
        let buffer_size = buffer_size_for(config.block_size)?;
        let output_channels = channel_count(config.output_channels)?;
        let input_channels = channel_count(config.input_channels)?;
        let host = cpal::default_host();

        let output_device = if config.mode.plays() {
            Some(find_output_device(&host, config.output_device.as_deref())?)
        } else {
            None
        };
        let input_device = if config.mode.records() {
            Some(find_input_device(&host, config.input_device.as_deref())?)
        } else {
            None
        };

        let sample_rate = config
            .sample_rate
            .unwrap_or_else(|| default_rate(output_device.as_ref(), input_device.as_ref()));
        let mut streams = Self {
            output: None,
            input: None,
        };
        if let Some(device) = &output_device {
            let stream_config = cpal::StreamConfig {
                channels: output_channels,
                sample_rate,
                buffer_size: buffer_size.clone(),
            };
            streams.output = Some(build_output(
                device,
                &stream_config,
                Arc::clone(&process),
                Arc::clone(&events),
                Arc::clone(frames),
            )?);
        }
        if let Some(device) = &input_device {
            let stream_config = cpal::StreamConfig {
                channels: input_channels,
                sample_rate,
                buffer_size,
            };
            let counts_frames = streams.output.is_none();
            streams.input = Some(build_input(
                device,
                &stream_config,
                process,
                events,
                Arc::clone(frames),
                counts_frames,
            )?);
        }

        let block_size = config.block_size.unwrap_or(0);
        tracing::info!(
            output = ?output_device.as_ref().and_then(|d| device_name(d).ok()),
            input = ?input_device.as_ref().and_then(|d| device_name(d).ok()),
            sample_rate,
            block_size,
            "cpal streams built"
        );

        let negotiated = NegotiatedConfig {
            sample_rate,
            block_size,
            input_channels: if input_device.is_some() {
                config.input_channels
            } else {
                0
            },
            output_channels: if output_device.is_some() {
                config.output_channels
            } else {
                0
            },
            input_latency: 0,
            output_latency: 0,
        };
        Ok((streams, negotiated))
    }

    fn play(&self) -> Result<()> {
        for stream in self.input.iter().chain(self.output.iter()) {
            stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        for stream in self.output.iter().chain(self.input.iter()) {
            stream.pause().map_err(|e| Error::Stream(e.to_string()))?;
        }
        Ok(())
    }

    /// Serve commands until the driver hangs up.
    fn serve(self, commands: &crossbeam_channel::Receiver<Command>) {
        for command in commands {
            // A dropped reply receiver just means nobody is waiting.
            let _ = match command {
                Command::Play(reply) => reply.send(self.play()),
                Command::Pause(reply) => reply.send(self.pause()),
            };
        }
    }
}

fn buffer_size_for(block_size: Option<usize>) -> Result<cpal::BufferSize> {
    match block_size {
        None => Ok(cpal::BufferSize::Default),
        Some(frames) => u32::try_from(frames)
            .map(cpal::BufferSize::Fixed)
            .map_err(|_| Error::UnsupportedConfig(format!("block size of {frames} frames"))),
    }
}

fn channel_count(channels: usize) -> Result<u16> {
    u16::try_from(channels)
        .map_err(|_| Error::UnsupportedConfig(format!("{channels} channels")))
}

fn default_rate(output: Option<&Device>, input: Option<&Device>) -> u32 {
    output
        .and_then(|d| d.default_output_config().ok())
        .or_else(|| input.and_then(|d| d.default_input_config().ok()))
        .map_or(FALLBACK_SAMPLE_RATE, |c| c.sample_rate())
}

fn build_output(
    device: &Device,
    stream_config: &cpal::StreamConfig,
    process: ProcessFn,
    events: EventFn,
    frames: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let channels = usize::from(stream_config.channels).max(1);
    let sample_rate = stream_config.sample_rate;
    let mut reported = usize::MAX;
    let error_events = Arc::clone(&events);

    device
        .build_output_stream(
            stream_config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                let block = data.len() / channels;
                process(&[], data, block);
                frames.fetch_add(block as u64, Ordering::Relaxed);

                let stamp = info.timestamp();
                if let Some(delay) = stamp.playback.duration_since(&stamp.callback) {
                    let latency = frames_for(delay, sample_rate);
                    if latency_moved(reported, latency) {
                        reported = latency;
                        events(DriverEvent::LatencyChanged {
                            input: None,
                            output: Some(latency),
                        });
                    }
                }
            },
            move |err| error_events(DriverEvent::Error(err.to_string())),
            None,
        )
        .map_err(|e| Error::Stream(e.to_string()))
}

fn build_input(
    device: &Device,
    stream_config: &cpal::StreamConfig,
    process: ProcessFn,
    events: EventFn,
    frames: Arc<AtomicU64>,
    counts_frames: bool,
) -> Result<cpal::Stream> {
    let channels = usize::from(stream_config.channels).max(1);
    let sample_rate = stream_config.sample_rate;
    let mut reported = usize::MAX;
    let error_events = Arc::clone(&events);

    device
        .build_input_stream(
            stream_config,
            move |data: &[f32], info: &cpal::InputCallbackInfo| {
                let block = data.len() / channels;
                process(data, &mut [], block);
                if counts_frames {
                    frames.fetch_add(block as u64, Ordering::Relaxed);
                }

                let stamp = info.timestamp();
                if let Some(delay) = stamp.callback.duration_since(&stamp.capture) {
                    let latency = frames_for(delay, sample_rate);
                    if latency_moved(reported, latency) {
                        reported = latency;
                        events(DriverEvent::LatencyChanged {
                            input: Some(latency),
                            output: None,
                        });
                    }
                }
            },
            move |err| error_events(DriverEvent::Error(err.to_string())),
            None,
        )
        .map_err(|e| Error::Stream(e.to_string()))
}

/// Callback driver over cpal's default host.
pub struct CpalDriver {
    streams: Option<StreamThread>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDriver {
    /// A driver with no streams open yet.
    pub fn new() -> Self {
        Self {
            streams: None,
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: 0,
        }
    }

    /// Names of the host's output devices.
    pub fn output_device_names() -> Vec<String> {
        let host = cpal::default_host();
        match host.output_devices() {
            Ok(devices) => devices.filter_map(|d| device_name(&d).ok()).collect(),
            Err(err) => {
                tracing::debug!(error = %err, "cannot enumerate output devices");
                Vec::new()
            }
        }
    }

    /// Names of the host's input devices.
    pub fn input_device_names() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| device_name(&d).ok()).collect(),
            Err(err) => {
                tracing::debug!(error = %err, "cannot enumerate input devices");
                Vec::new()
            }
        }
    }

    fn stream_thread(&self) -> Result<&StreamThread> {
        self.streams
            .as_ref()
            .ok_or_else(|| Error::Stream("cpal streams are not open".into()))
    }
}

impl CallbackDriver for CpalDriver {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(
        &mut self,
        config: &DriverConfig,
        process: ProcessFn,
        events: EventFn,
    ) -> Result<NegotiatedConfig> {
        self.close();
        self.frames.store(0, Ordering::Relaxed);

        let (opened_tx, opened) = bounded(1);
        let (commands, command_rx) = unbounded();
        let frames = Arc::clone(&self.frames);
        let config = config.clone();

        let handle = std::thread::Builder::new()
            .name("tandem-cpal".to_string())
            .spawn(move || match Streams::open(&config, process, events, &frames) {
                Ok((streams, negotiated)) => {
                    let _ = opened_tx.send(Ok(negotiated));
                    streams.serve(&command_rx);
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                }
            })
            .map_err(|e| Error::Stream(e.to_string()))?;

        let thread = StreamThread { commands, handle };
        match opened.recv() {
            Ok(Ok(negotiated)) => {
                self.sample_rate = negotiated.sample_rate;
                self.streams = Some(thread);
                Ok(negotiated)
            }
            Ok(Err(err)) => {
                thread.shutdown();
                Err(err)
            }
            Err(_) => {
                thread.shutdown();
                Err(Error::Stream("cpal stream thread exited".into()))
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        self.stream_thread()?.request(Command::Play)?;
        tracing::info!(sample_rate = self.sample_rate, "cpal streams started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stream_thread()?.request(Command::Pause)
    }

    fn close(&mut self) {
        if let Some(thread) = self.streams.take() {
            thread.shutdown();
            tracing::debug!("cpal streams released");
        }
    }

    fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames.load(Ordering::Relaxed) as f64 / f64::from(self.sample_rate)
    }
}

fn frames_for(delay: Duration, sample_rate: u32) -> usize {
    (delay.as_secs_f64() * f64::from(sample_rate)).round() as usize
}

fn latency_moved(reported: usize, latency: usize) -> bool {
    reported == usize::MAX || reported.abs_diff(latency) > LATENCY_JITTER_FRAMES
}

fn find_output_device(host: &Host, name_or_index: Option<&str>) -> Result<Device> {
    match name_or_index {
        Some(search) => {
            let devices: Vec<_> = host
                .output_devices()
                .map_err(|e| Error::Stream(e.to_string()))?
                .collect();
            find_device_from_list(&devices, search, "output")
        }
        None => host.default_output_device().ok_or(Error::NoDevice),
    }
}

fn find_input_device(host: &Host, name_or_index: Option<&str>) -> Result<Device> {
    match name_or_index {
        Some(search) => {
            let devices: Vec<_> = host
                .input_devices()
                .map_err(|e| Error::Stream(e.to_string()))?
                .collect();
            find_device_from_list(&devices, search, "input")
        }
        None => host.default_input_device().ok_or(Error::NoDevice),
    }
}

/// Find a device from a list by index, exact name, or fuzzy match.
fn find_device_from_list(devices: &[Device], name_or_index: &str, kind: &str) -> Result<Device> {
    if let Ok(index) = name_or_index.parse::<usize>() {
        return devices.get(index).cloned().ok_or_else(|| {
            Error::DeviceNotFound(format!(
                "{kind} device index {index} (only {} devices available)",
                devices.len()
            ))
        });
    }

    for device in devices {
        if device_name(device).is_ok_and(|n| n == name_or_index) {
            return Ok(device.clone());
        }
    }

    let search_lower = name_or_index.to_lowercase();
    let mut matches: Vec<_> = devices
        .iter()
        .filter_map(|d| {
            device_name(d)
                .ok()
                .filter(|name| name.to_lowercase().contains(&search_lower))
                .map(|name| (d.clone(), name))
        })
        .collect();

    match matches.len() {
        0 => Err(Error::DeviceNotFound(format!(
            "no {kind} device matching '{name_or_index}'"
        ))),
        1 => Ok(matches.remove(0).0),
        _ => {
            let names: Vec<_> = matches.iter().map(|(_, n)| n.as_str()).collect();
            tracing::warn!(
                search = name_or_index,
                kind,
                ?names,
                "device name is ambiguous, using first match"
            );
            Ok(matches.remove(0).0)
        }
    }
}
