//! Linux backend for memtap.
//!
//! Implements [`memtap_core::ForeignProcess`] for live Linux processes using
//! `/proc/<pid>/maps` for the region layout and `process_vm_readv` for reads.
//!
//! # Platform Requirements
//!
//! - Linux with procfs mounted at `/proc`
//! - ptrace access to the target process (see [`ProcfsProcess`])

#![warn(missing_docs)]

#[cfg(target_os = "linux")]
pub mod maps;
#[cfg(target_os = "linux")]
mod process;

#[cfg(target_os = "linux")]
pub use process::{ProcfsError, ProcfsProcess};
