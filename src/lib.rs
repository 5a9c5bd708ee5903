//! # memtap
//!
//! memtap finds an undocumented 16-bit write buffer inside a foreign process by
//! the statistical shape of its contents, then polls that buffer at a fixed
//! cadence and forwards every snapshot to a numeric sink.
//!
//! This crate bundles [`memtap_core`] with the optional backend crates:
//!
//! - `procfs`: Linux process access through `/proc/<pid>/maps` and `process_vm_readv`.
//! - `win32`: Windows process access through `VirtualQueryEx` and `ReadProcessMemory`.
//! - `synthetic` (default): an in-memory process image for tests and dry runs.
//! - `jsonl` (default): a sink writing one JSON line per sample frame.
//!
//! ## Quickstart
//!
//! ```sh
//! cargo build --release
//! # dry run against a generated image
//! target/release/memtap --synthetic
//! # attach to a live process
//! sudo target/release/memtap --pid 4242 --output frames.jsonl
//! ```

pub use memtap_core::*;

#[cfg(feature = "jsonl")]
pub use memtap_jsonl as jsonl;
#[cfg(feature = "procfs")]
pub use memtap_procfs as procfs;
#[cfg(feature = "synthetic")]
pub use memtap_synthetic as synthetic;
#[cfg(feature = "win32")]
pub use memtap_win32 as win32;
