//! Windows backend for memtap.
//!
//! Implements [`memtap_core::ForeignProcess`] for live Windows processes using
//! `VirtualQueryEx` for the region layout and `ReadProcessMemory` for reads.
//! Only committed regions with plain `PAGE_READWRITE` protection are reported as
//! read-write.
//!
//! # Platform Requirements
//!
//! - Windows
//! - `PROCESS_QUERY_INFORMATION` and `PROCESS_VM_READ` access to the target

#![warn(missing_docs)]

#[cfg(windows)]
mod process;

#[cfg(windows)]
pub use process::{Win32Error, Win32Process};
