//! Backend selection.
//!
//! An [`AudioFactory`] holds an ordered list of [`BackendFamily`] entries.
//! Creating a session walks the list, opens a candidate, and keeps the first
//! one that reports OK; failed candidates are closed and their roles passed
//! on to the next family. When nothing opens, the caller gets its roles back
//! inside [`Unavailable`]. No audio is an expected outcome, not a panic.
//!
//! ```rust,ignore
//! use tandem_io::{AudioFactory, Preference};
//!
//! let factory = AudioFactory::new();
//! for name in factory.implementation_names() {
//!     println!("{name}: {:?}", factory.playback_device_names(name));
//! }
//!
//! let pref = Preference::for_implementation("clocked");
//! let session = factory.create_playback_target(Box::new(my_source), &pref)?;
//! ```

use tandem_core::{PlaybackSource, RecordTarget};

use crate::callback::{CallbackDriver, CallbackSession};
use crate::clocked::ClockedDriver;
use crate::config::Preference;
#[cfg(feature = "cpal")]
use crate::cpal_backend::CpalDriver;
use crate::event_loop::{EventLoopDriver, EventLoopSession};
use crate::session::{AudioSession, Roles, SessionRequest};
use crate::{Error, Result};

/// Opens a session of one family for the given roles.
pub type OpenFn = Box<dyn Fn(Roles, &SessionRequest) -> Box<dyn AudioSession> + Send + Sync>;

/// Lists device names of one family.
pub type DeviceListFn = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// One selectable backend.
pub struct BackendFamily {
    name: String,
    description: String,
    auto_select: bool,
    open: OpenFn,
    playback_devices: Option<DeviceListFn>,
    record_devices: Option<DeviceListFn>,
}

impl BackendFamily {
    /// A family opened by an arbitrary function.
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, open: F) -> Self
    where
        F: Fn(Roles, &SessionRequest) -> Box<dyn AudioSession> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            auto_select: true,
            open: Box::new(open),
            playback_devices: None,
            record_devices: None,
        }
    }

    /// A family backed by a [`CallbackDriver`], built fresh for each session.
    pub fn callback<D, F>(name: impl Into<String>, description: impl Into<String>, make: F) -> Self
    where
        D: CallbackDriver,
        F: Fn() -> D + Send + Sync + 'static,
    {
        Self::new(name, description, move |roles, request| {
            Box::new(CallbackSession::open(make(), roles, request))
        })
    }

    /// A family backed by an [`EventLoopDriver`], built fresh for each session.
    pub fn event_loop<D, F>(name: impl Into<String>, description: impl Into<String>, make: F) -> Self
    where
        D: EventLoopDriver,
        F: Fn() -> D + Send + Sync + 'static,
    {
        Self::new(name, description, move |roles, request| {
            Box::new(EventLoopSession::open(make(), roles, request))
        })
    }

    /// Only use this family when asked for by name.
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.auto_select = false;
        self
    }

    /// Attach device enumeration.
    #[must_use]
    pub fn with_devices<P, R>(mut self, playback: P, record: R) -> Self
    where
        P: Fn() -> Vec<String> + Send + Sync + 'static,
        R: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        self.playback_devices = Some(Box::new(playback));
        self.record_devices = Some(Box::new(record));
        self
    }

    /// Family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether automatic selection may pick this family.
    pub fn is_auto_selected(&self) -> bool {
        self.auto_select
    }
}

impl std::fmt::Debug for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFamily")
            .field("name", &self.name)
            .field("auto_select", &self.auto_select)
            .finish_non_exhaustive()
    }
}

/// No backend family produced a usable session.
///
/// Carries the caller's roles back so they can be retried or dropped.
#[derive(Debug, thiserror::Error)]
#[error("no usable audio backend (tried: [{}])", .tried.join(", "))]
pub struct Unavailable {
    /// The roles that were offered.
    pub roles: Roles,
    /// Families attempted, in order.
    pub tried: Vec<String>,
}

/// Ordered registry of backend families.
#[derive(Debug)]
pub struct AudioFactory {
    families: Vec<BackendFamily>,
}

impl Default for AudioFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioFactory {
    /// The built-in families: `cpal` (with the `cpal` feature) first, then
    /// the `clocked` null device, which is only used when named.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        #[cfg(feature = "cpal")]
        factory.register(
            BackendFamily::callback("cpal", "Native audio through cpal", CpalDriver::new)
                .with_devices(CpalDriver::output_device_names, CpalDriver::input_device_names),
        );
        factory.register(
            BackendFamily::event_loop("clocked", "Software-timed null device", ClockedDriver::new)
                .manual()
                .with_devices(ClockedDriver::device_names, ClockedDriver::device_names),
        );
        factory
    }

    /// A factory with no families.
    pub fn empty() -> Self {
        Self {
            families: Vec::new(),
        }
    }

    /// Append a family, or replace the one with the same name in place.
    pub fn register(&mut self, family: BackendFamily) -> &mut Self {
        match self.families.iter_mut().find(|f| f.name == family.name) {
            Some(existing) => *existing = family,
            None => self.families.push(family),
        }
        self
    }

    fn family(&self, name: &str) -> Option<&BackendFamily> {
        self.families
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Registered family names, in selection order.
    pub fn implementation_names(&self) -> Vec<&str> {
        self.families.iter().map(|f| f.name.as_str()).collect()
    }

    /// Description of a family.
    pub fn implementation_description(&self, name: &str) -> Option<&str> {
        self.family(name).map(BackendFamily::description)
    }

    /// Output devices a family can open.
    pub fn playback_device_names(&self, name: &str) -> Result<Vec<String>> {
        let family = self
            .family(name)
            .ok_or_else(|| Error::UnknownBackend(name.to_string()))?;
        Ok(family.playback_devices.as_ref().map_or_else(Vec::new, |list| list()))
    }

    /// Input devices a family can open.
    pub fn record_device_names(&self, name: &str) -> Result<Vec<String>> {
        let family = self
            .family(name)
            .ok_or_else(|| Error::UnknownBackend(name.to_string()))?;
        Ok(family.record_devices.as_ref().map_or_else(Vec::new, |list| list()))
    }

    /// Open an output-only session for `source`.
    pub fn create_playback_target(
        &self,
        source: Box<dyn PlaybackSource>,
        pref: &Preference,
    ) -> std::result::Result<Box<dyn AudioSession>, Unavailable> {
        self.create(Roles::playback(source), pref)
    }

    /// Open an input-only session for `target`.
    pub fn create_record_source(
        &self,
        target: Box<dyn RecordTarget>,
        pref: &Preference,
    ) -> std::result::Result<Box<dyn AudioSession>, Unavailable> {
        self.create(Roles::record(target), pref)
    }

    /// Open a full-duplex session on a single backend.
    pub fn create_duplex_io(
        &self,
        target: Box<dyn RecordTarget>,
        source: Box<dyn PlaybackSource>,
        pref: &Preference,
    ) -> std::result::Result<Box<dyn AudioSession>, Unavailable> {
        self.create(Roles::duplex(target, source), pref)
    }

    fn create(
        &self,
        mut roles: Roles,
        pref: &Preference,
    ) -> std::result::Result<Box<dyn AudioSession>, Unavailable> {
        let request = SessionRequest::from(pref);
        let candidates: Vec<&BackendFamily> = match pref.implementation() {
            Some(name) => {
                let named: Vec<_> = self.family(name).into_iter().collect();
                if named.is_empty() {
                    tracing::warn!(backend = name, "requested audio backend is not registered");
                }
                named
            }
            None => self.families.iter().filter(|f| f.auto_select).collect(),
        };

        let mut tried = Vec::with_capacity(candidates.len());
        for family in candidates {
            tried.push(family.name.clone());
            let session = (family.open)(roles, &request);
            if session.is_ok() {
                tracing::info!(backend = %family.name, mode = ?session.mode(), "audio session opened");
                return Ok(session);
            }
            tracing::warn!(backend = %family.name, "audio backend unavailable, trying next");
            roles = session.into_roles();
        }

        Err(Unavailable { roles, tried })
    }
}
