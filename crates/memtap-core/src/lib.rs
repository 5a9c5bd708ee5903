//! # memtap Core
//!
//! `memtap-core` is the foundational library of memtap. It locates an undocumented
//! 16-bit write buffer inside a foreign process by the statistical shape of its
//! contents and then samples that buffer at a fixed cadence.
//!
//! ## Architecture Overview
//!
//! The engine is built around three traits that define its boundaries:
//!
//! - [`process::ForeignProcess`] - Region queries and reads against the target process.
//!   Implemented by `memtap-procfs` (Linux), `memtap-win32` (Windows) and
//!   `memtap-synthetic` (in-memory image).
//!
//! - [`sink::FrameSink`] - Receiver of the widened sample frames.
//!
//! - [`util::Clock`] - Monotonic time source for deadlines and pauses.
//!
//! ## Main Components
//!
//! - [`enumerator::RegionEnumerator`] - Lazy walk over the regions of an address range.
//!
//! - [`pattern::PatternDetector`] - The zero-count signature test over a sample block.
//!
//! - [`locator::BufferLocator`] - Repeated sweeps until a region matches or the
//!   discovery deadline passes.
//!
//! - [`acquisition::AcquisitionLoop`] - Per-tick re-query, read and forward of the
//!   located buffer.
//!
//! - [`Memtap`] - The orchestrator running discovery and acquisition in sequence.

#![warn(missing_docs)]

pub mod acquisition;
pub mod config;
pub mod enumerator;
pub mod locator;
mod memtap;
pub mod pattern;
pub mod process;
pub mod sample;
pub mod sink;
pub mod util;

pub use crate::acquisition::{AcquisitionLoop, AcquisitionOutcome, AcquisitionReport};
pub use crate::config::{ConfigError, MemtapConfig};
pub use crate::locator::{BufferLocation, BufferLocator, DiscoveryStats, LocateError};
pub use crate::memtap::{BuildError, Memtap, MemtapBuilder, MemtapError, SessionReport};
pub use crate::pattern::{PatternDetector, SignatureConfig};
pub use crate::process::{AddressRange, ForeignProcess, MemoryRegion, Protection, RegionState};
pub use crate::sample::{SampleBlock, SampleFrame};
pub use crate::sink::FrameSink;
