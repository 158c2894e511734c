//! Duplex audio sessions for tandem.
//!
//! This crate binds the application roles from `tandem-core` to whatever
//! native audio backend the host offers:
//!
//! - **Sessions**: [`AudioSession`] is the backend-agnostic handle, with a
//!   suspend/resume state machine, output gain and balance, and the rate and
//!   latency the device negotiated
//! - **Callback backends**: [`CallbackSession`] drives any [`CallbackDriver`]
//!   (a driver that calls back on its own high-priority thread)
//! - **Event-loop backends**: [`EventLoopSession`] drives any
//!   [`EventLoopDriver`] from a dedicated loop thread
//! - **Selection**: [`AudioFactory`] tries backend families in order and
//!   returns the first that opens
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tandem_io::{AudioFactory, Preference};
//!
//! let factory = AudioFactory::new();
//! let session = match factory.create_playback_target(Box::new(my_source), &Preference::default()) {
//!     Ok(session) => session,
//!     Err(unavailable) => {
//!         eprintln!("{unavailable}");
//!         return;
//!     }
//! };
//!
//! session.set_output_gain(0.8);
//! session.suspend();
//! session.resume();
//! ```
//!
//! ## Features
//!
//! - `cpal` (default): the cross-platform [`CpalDriver`] family

pub mod callback;
pub mod clocked;
pub mod config;
#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod event_loop;
pub mod factory;
pub mod session;
mod transfer;

pub use callback::{CallbackDriver, CallbackSession, DriverEvent, EventFn, ProcessFn};
pub use clocked::ClockedDriver;
pub use config::{ConfigError, Preference};
#[cfg(feature = "cpal")]
pub use cpal_backend::CpalDriver;
pub use event_loop::{
    ContextState, Direction, EventLoopDriver, EventLoopSession, LoopEvent, StreamState, Waker,
};
pub use factory::{AudioFactory, BackendFamily, DeviceListFn, OpenFn, Unavailable};
pub use session::{
    AudioSession, DriverConfig, Mode, NegotiatedConfig, Roles, SessionRequest, SessionState,
};

/// Error types for native driver operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream or context open, start, stop or close failed.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device cannot run the requested rate, block size or channel layout.
    #[error("Unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    /// No backend family is registered under this name.
    #[error("Unknown audio backend: {0}")]
    UnknownBackend(String),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
