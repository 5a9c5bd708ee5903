use crate::acquisition::{AcquisitionLoop, AcquisitionReport};
use crate::config::{ConfigError, MemtapConfig};
use crate::locator::{BufferLocation, BufferLocator, DiscoveryStats, LocateError};
use crate::process::ForeignProcess;
use crate::sink::FrameSink;
use crate::util::{Clock, SystemClock};
use indicatif::MultiProgress;
use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use thiserror::Error;

/// Main orchestrator of a memtap session.
///
/// The `Memtap` struct combines a [`ForeignProcess`], a [`FrameSink`] and a
/// [`Clock`] and runs the two phases of a session strictly one after the other:
///
/// 1. Discovery: sweep the address space with [`BufferLocator`] until a region
///    carries the buffer signature
/// 2. Acquisition: poll that region with [`AcquisitionLoop`] and forward every
///    snapshot to the sink
///
/// # Type Parameters
///
/// * `P` - Foreign process backend (implements [`ForeignProcess`])
/// * `S` - Frame sink (implements [`FrameSink`])
/// * `C` - Time source (implements [`Clock`])
///
/// # Examples
///
/// Use [`Memtap::builder()`] to construct a `Memtap` instance with the required components.
pub struct Memtap<P, S, C> {
    process: P,
    sink: S,
    clock: C,
    progress: Option<MultiProgress>,
    config: MemtapConfig,
}

/// Results of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// RFC 3339 timestamp of when the session ended
    pub date: String,
    /// Where the buffer was found
    pub location: BufferLocation,
    /// Discovery counters
    pub discovery: DiscoveryStats,
    /// Acquisition counters
    pub acquisition: AcquisitionReport,
}

impl SessionReport {
    fn new(
        location: BufferLocation,
        discovery: DiscoveryStats,
        acquisition: AcquisitionReport,
    ) -> Self {
        SessionReport {
            date: chrono::Local::now().to_rfc3339(),
            location,
            discovery,
            acquisition,
        }
    }
}

/// Errors that end a session before acquisition.
#[derive(Debug, Error)]
pub enum MemtapError<PE: std::error::Error> {
    /// The target process could not be inspected at all.
    #[error("Failed to attach to target process: {0}")]
    Attach(PE),
    /// No buffer was found before the discovery deadline.
    #[error(transparent)]
    DiscoveryTimeout(#[from] LocateError),
}

impl<P: ForeignProcess, S: FrameSink> Memtap<P, S, SystemClock> {
    /// Creates a new Memtap builder.
    ///
    /// # Returns
    ///
    /// A builder for configuring and constructing a Memtap instance. Uses the
    /// [`SystemClock`] unless another clock is set.
    pub fn builder() -> MemtapBuilder<P, S, SystemClock> {
        MemtapBuilder::default()
    }
}

impl<P: ForeignProcess, S: FrameSink, C: Clock> Memtap<P, S, C> {
    /// Runs discovery and then acquisition until the session deadline passes or
    /// `running` is cleared.
    ///
    /// # Errors
    ///
    /// * [`MemtapError::Attach`] if the address space of the process cannot be determined
    /// * [`MemtapError::DiscoveryTimeout`] if no buffer was found in time
    pub fn run(&mut self, running: &AtomicBool) -> Result<SessionReport, MemtapError<P::Error>> {
        let range = match self.process.address_space() {
            Ok(range) => range,
            Err(e) => {
                warn!("Failed to determine address space: {}", e);
                return Err(MemtapError::Attach(e));
            }
        };
        info!("Address space: {:#x}..{:#x}", range.min, range.max);

        let mut locator = BufferLocator::new(&self.process, &self.clock, &self.config);
        if let Some(p) = &self.progress {
            locator = locator.with_progress(p);
        }
        let location = locator.locate(range)?;
        let discovery = locator.stats();
        info!("Buffer located: {:?}", location);

        let mut acquisition = AcquisitionLoop::new(
            &self.process,
            &mut self.sink,
            &self.clock,
            location,
            &self.config,
        );
        if let Some(p) = &self.progress {
            acquisition = acquisition.with_progress(p);
        }
        let report = acquisition.run(running);
        Ok(SessionReport::new(location, discovery, report))
    }
}

impl<P, S, C> Memtap<P, S, C> {
    /// The foreign process.
    pub fn process(&self) -> &P {
        &self.process
    }

    /// The configuration in use.
    pub fn config(&self) -> &MemtapConfig {
        &self.config
    }

    /// Consumes the orchestrator and returns its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Builder for [`Memtap`].
pub struct MemtapBuilder<P, S, C> {
    process: Option<P>,
    sink: Option<S>,
    clock: C,
    progress: Option<MultiProgress>,
    config: MemtapConfig,
}

impl<P, S> Default for MemtapBuilder<P, S, SystemClock> {
    fn default() -> Self {
        MemtapBuilder {
            process: None,
            sink: None,
            clock: SystemClock::new(),
            progress: None,
            config: MemtapConfig::default(),
        }
    }
}

impl<P, S, C> MemtapBuilder<P, S, C> {
    /// Sets the target process.
    pub fn process(mut self, process: P) -> Self {
        self.process = Some(process);
        self
    }

    /// Sets the sink receiving sample frames.
    pub fn sink(mut self, sink: S) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replaces the time source.
    pub fn clock<C1: Clock>(self, clock: C1) -> MemtapBuilder<P, S, C1> {
        MemtapBuilder {
            process: self.process,
            sink: self.sink,
            clock,
            progress: self.progress,
            config: self.config,
        }
    }

    /// Shows progress bars for the discovery and session deadlines.
    pub fn progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: MemtapConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if no process or sink was set, or the configuration is invalid.
    pub fn build(self) -> Result<Memtap<P, S, C>, BuildError> {
        self.config.validate()?;
        Ok(Memtap {
            process: self.process.ok_or(BuildError::Process)?,
            sink: self.sink.ok_or(BuildError::Sink)?,
            clock: self.clock,
            progress: self.progress,
            config: self.config,
        })
    }
}

/// Errors raised by [`MemtapBuilder::build`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// [`MemtapBuilder::process`] was not called.
    #[error("No process specified")]
    Process,
    /// [`MemtapBuilder::sink`] was not called.
    #[error("No sink specified")]
    Sink,
    /// The configuration failed validation.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}
