//! Utility functions and types used throughout memtap.
//!
//! This module provides:
//! - [`Clock`] and its implementations, the monotonic time source of the control loops
//! - [`Deadline`] for polled time budgets and [`stamp`] for log milestones
//! - Constants for memory operations ([`PAGE_SIZE`])
//! - Cancelable worker threads ([`spawn_cancelable`])
//! - Progress bars over time budgets ([`deadline_bar`])

mod cancelable_thread;
mod clock;
mod constants;
mod named_progress;

pub use self::cancelable_thread::*;
pub use self::clock::*;
pub use self::constants::*;
pub use self::named_progress::{NamedProgress, deadline_bar};
