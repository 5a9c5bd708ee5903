//! Synthetic backend for memtap.
//!
//! Implements [`memtap_core::ForeignProcess`] over an in-memory image, for tests
//! and for dry runs of the `memtap` binary. The image can be changed while a
//! session runs, which makes buffer resizes and failing reads reproducible.
//!
//! - [`SyntheticProcess`] - the image itself
//! - [`signal`] - sample patterns that do or do not carry the buffer signature
//! - [`demo_process`] - a complete image with one buffer to find

#![warn(missing_docs)]

mod demo;
mod process;
mod rng;
pub mod signal;

pub use demo::{DEMO_BUFFER, demo_process};
pub use process::{SyntheticError, SyntheticProcess};
pub use rng::Rng;
