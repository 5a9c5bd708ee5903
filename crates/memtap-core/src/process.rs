//! Foreign process access.
//!
//! This module defines the [`ForeignProcess`] trait, the only seam through which the
//! engine touches another process. Everything above it (enumeration, detection,
//! discovery, acquisition) works against this trait, so the whole pipeline can run
//! against a synthetic in-memory image as well as a live process.

use serde::Serialize;
use std::sync::Arc;

/// Commit state of a region of virtual address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegionState {
    /// Nothing is mapped here.
    Free,
    /// Backed by memory and accessible according to its protection.
    Committed,
    /// Address space is reserved but not backed.
    Reserved,
}

/// Access protection of a region, reduced to what the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protection {
    /// Plain read-write data, the only protection a write buffer can live in.
    ReadWrite,
    /// Anything else (read-only, executable, guard pages, no access).
    Other,
}

/// Snapshot of one region of a foreign address space.
///
/// Only valid at the time it was queried; the foreign process may remap the
/// region at any moment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryRegion {
    /// First address of the region
    pub base: usize,
    /// Size of the region in bytes
    pub size: usize,
    /// Commit state
    pub state: RegionState,
    /// Access protection
    pub protection: Protection,
}

impl MemoryRegion {
    /// Constructor for MemoryRegion
    pub fn new(base: usize, size: usize, state: RegionState, protection: Protection) -> Self {
        MemoryRegion {
            base,
            size,
            state,
            protection,
        }
    }

    /// End address of the region (exclusive), saturating at `usize::MAX`.
    #[inline]
    pub fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }

    /// Check if an address is within this region
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Whether this region is committed read-write memory and thus a buffer candidate.
    #[inline]
    pub fn is_readwrite_committed(&self) -> bool {
        self.state == RegionState::Committed && self.protection == Protection::ReadWrite
    }
}

impl core::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("state", &self.state)
            .field("protection", &self.protection)
            .finish()
    }
}

/// Half-open range `[min, max)` of user-space addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressRange {
    /// Lowest address (inclusive)
    pub min: usize,
    /// Highest address (exclusive)
    pub max: usize,
}

impl AddressRange {
    /// Creates a new address range.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn new(min: usize, max: usize) -> Self {
        assert!(min <= max, "Invalid address range {:#x}..{:#x}", min, max);
        AddressRange { min, max }
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> usize {
        self.max - self.min
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.min == self.max
    }
}

/// Trait for read-only access to another process's address space.
///
/// Implementors wrap an already attached handle; locating and opening the process
/// happens in their constructors.
///
/// # Associated Types
///
/// * `Error` - The error type returned by queries and reads. Must implement [`std::error::Error`].
///
/// # Required Methods
///
/// * [`address_space()`](ForeignProcess::address_space) - Bounds of the user address space
/// * [`query_region()`](ForeignProcess::query_region) - Describe the region containing an address
/// * [`read_into()`](ForeignProcess::read_into) - Copy bytes out of the foreign process
///
/// # Examples
///
/// See `memtap-procfs`, `memtap-win32` and `memtap-synthetic` for concrete implementations.
pub trait ForeignProcess {
    /// The error type returned by process operations.
    type Error: std::error::Error;

    /// Returns the bounds of the address space worth scanning.
    ///
    /// # Errors
    ///
    /// An error here means the handle is unusable; the run aborts before discovery.
    fn address_space(&self) -> Result<AddressRange, Self::Error>;

    /// Describes the region containing `addr`.
    ///
    /// The returned region's `base` may be lower than `addr` if `addr` lies inside it.
    /// Gaps between mappings are reported as [`RegionState::Free`] regions.
    ///
    /// # Errors
    ///
    /// Returns an error if the query itself fails. Callers treat this as transient.
    fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error>;

    /// Reads up to `buf.len()` bytes starting at `addr` into `buf`.
    ///
    /// # Returns
    ///
    /// The number of bytes actually read, which may be less than `buf.len()`.
    /// Bytes past that count are unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing could be read.
    fn read_into(&self, addr: usize, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

impl<P: ForeignProcess + ?Sized> ForeignProcess for &P {
    type Error = P::Error;

    fn address_space(&self) -> Result<AddressRange, Self::Error> {
        (**self).address_space()
    }

    fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error> {
        (**self).query_region(addr)
    }

    fn read_into(&self, addr: usize, buf: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read_into(addr, buf)
    }
}

impl<P: ForeignProcess + ?Sized> ForeignProcess for Arc<P> {
    type Error = P::Error;

    fn address_space(&self) -> Result<AddressRange, Self::Error> {
        (**self).address_space()
    }

    fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error> {
        (**self).query_region(addr)
    }

    fn read_into(&self, addr: usize, buf: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read_into(addr, buf)
    }
}
