use log::debug;
use memtap_core::{AddressRange, ForeignProcess, MemoryRegion, Protection, RegionState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors of the synthetic process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntheticError {
    /// The process was marked as detached.
    #[error("Process is detached")]
    Detached,
    /// The queried address lies outside the address space.
    #[error("Address {0:#x} outside of the address space")]
    OutOfRange(usize),
    /// Nothing readable is mapped at this address.
    #[error("Nothing readable at {0:#x}")]
    Unreadable(usize),
    /// A read failure was injected for the region at this base.
    #[error("Injected read failure at {0:#x}")]
    Injected(usize),
    /// A query failure was injected at this address.
    #[error("Injected query failure at {0:#x}")]
    InjectedQuery(usize),
    /// The new mapping would overlap an existing one or leave the address space.
    #[error("Mapping {base:#x}+{size:#x} overlaps existing memory")]
    Overlap {
        /// Requested base
        base: usize,
        /// Requested size
        size: usize,
    },
    /// No region starts at this base.
    #[error("No region at {0:#x}")]
    NoRegion(usize),
}

#[derive(Debug, Clone)]
struct Region {
    base: usize,
    state: RegionState,
    protection: Protection,
    data: Vec<u8>,
    fail_reads: bool,
}

impl Region {
    fn end(&self) -> usize {
        self.base + self.data.len()
    }

    fn describe(&self) -> MemoryRegion {
        MemoryRegion::new(self.base, self.data.len(), self.state, self.protection)
    }
}

#[derive(Debug, Default)]
struct Image {
    regions: Vec<Region>,
    failing_queries: Vec<usize>,
}

impl Image {
    fn index_of(&self, base: usize) -> Result<usize, SyntheticError> {
        self.regions
            .binary_search_by_key(&base, |r| r.base)
            .map_err(|_| SyntheticError::NoRegion(base))
    }

    fn containing(&self, addr: usize) -> Result<&Region, usize> {
        let idx = self.regions.partition_point(|r| r.end() <= addr);
        match self.regions.get(idx) {
            Some(r) if r.base <= addr => Ok(r),
            _ => Err(idx),
        }
    }

    fn fits(&self, range: AddressRange, base: usize, size: usize, skip: Option<usize>) -> bool {
        let Some(end) = base.checked_add(size) else {
            return false;
        };
        base >= range.min
            && end <= range.max
            && self
                .regions
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != skip)
                .all(|(_, r)| end <= r.base || r.end() <= base)
    }
}

/// A fake foreign process backed by byte vectors.
///
/// Regions are placed explicitly; every address between them reads as free
/// memory. All mutators take `&self`, so the image can be changed while a
/// session holds the process (wrap it in an [`Arc`](std::sync::Arc) to share it).
/// Reads and queries are counted, and failures can be injected per region or per
/// query address.
#[derive(Debug)]
pub struct SyntheticProcess {
    range: AddressRange,
    image: Mutex<Image>,
    detached: AtomicBool,
    reads: AtomicUsize,
    queries: AtomicUsize,
}

impl SyntheticProcess {
    /// Creates an empty image spanning `range`.
    pub fn new(range: AddressRange) -> Self {
        SyntheticProcess {
            range,
            image: Mutex::new(Image::default()),
            detached: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    fn image(&self) -> MutexGuard<'_, Image> {
        self.image.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Maps a zero-filled region of `size` bytes at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`SyntheticError::Overlap`] if the region overlaps another one or
    /// leaves the address space.
    pub fn map(
        &self,
        base: usize,
        size: usize,
        state: RegionState,
        protection: Protection,
    ) -> Result<(), SyntheticError> {
        self.map_bytes(base, vec![0; size], state, protection)
    }

    /// Maps a committed read-write region holding `samples`.
    pub fn map_samples(&self, base: usize, samples: &[i16]) -> Result<(), SyntheticError> {
        self.map_bytes(
            base,
            to_bytes(samples),
            RegionState::Committed,
            Protection::ReadWrite,
        )
    }

    fn map_bytes(
        &self,
        base: usize,
        data: Vec<u8>,
        state: RegionState,
        protection: Protection,
    ) -> Result<(), SyntheticError> {
        let mut image = self.image();
        if !image.fits(self.range, base, data.len(), None) {
            return Err(SyntheticError::Overlap {
                base,
                size: data.len(),
            });
        }
        debug!("Mapping {:#x}+{:#x} ({:?})", base, data.len(), state);
        let idx = image.regions.partition_point(|r| r.base < base);
        image.regions.insert(
            idx,
            Region {
                base,
                state,
                protection,
                data,
                fail_reads: false,
            },
        );
        Ok(())
    }

    /// Replaces the contents of the region at `base` with `samples`, growing or
    /// shrinking it to fit.
    pub fn replace_samples(&self, base: usize, samples: &[i16]) -> Result<(), SyntheticError> {
        let data = to_bytes(samples);
        let mut image = self.image();
        let idx = image.index_of(base)?;
        if !image.fits(self.range, base, data.len(), Some(idx)) {
            return Err(SyntheticError::Overlap {
                base,
                size: data.len(),
            });
        }
        image.regions[idx].data = data;
        Ok(())
    }

    /// Overwrites samples of the region at `base`, starting at sample `offset`.
    /// Samples past the end of the region are dropped.
    pub fn write_samples(
        &self,
        base: usize,
        offset: usize,
        samples: &[i16],
    ) -> Result<(), SyntheticError> {
        let bytes = to_bytes(samples);
        let mut image = self.image();
        let idx = image.index_of(base)?;
        let data = &mut image.regions[idx].data;
        let start = (offset * 2).min(data.len());
        let len = bytes.len().min(data.len() - start);
        data[start..start + len].copy_from_slice(&bytes[..len]);
        Ok(())
    }

    /// Removes the region at `base`.
    pub fn unmap(&self, base: usize) -> Result<(), SyntheticError> {
        let mut image = self.image();
        let idx = image.index_of(base)?;
        image.regions.remove(idx);
        Ok(())
    }

    /// Makes every read of the region at `base` fail (or succeed again).
    pub fn fail_reads(&self, base: usize, fail: bool) -> Result<(), SyntheticError> {
        let mut image = self.image();
        let idx = image.index_of(base)?;
        image.regions[idx].fail_reads = fail;
        Ok(())
    }

    /// Makes every query of exactly `addr` fail.
    pub fn fail_query(&self, addr: usize) {
        self.image().failing_queries.push(addr);
    }

    /// Marks the process as gone. Every call then fails with [`SyntheticError::Detached`].
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Relaxed);
    }

    /// Number of [`read_into`](ForeignProcess::read_into) calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of [`query_region`](ForeignProcess::query_region) calls so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// All mapped regions, in address order.
    pub fn regions(&self) -> Vec<MemoryRegion> {
        self.image().regions.iter().map(Region::describe).collect()
    }

    fn check_attached(&self) -> Result<(), SyntheticError> {
        if self.detached.load(Ordering::Relaxed) {
            Err(SyntheticError::Detached)
        } else {
            Ok(())
        }
    }
}

fn to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

impl ForeignProcess for SyntheticProcess {
    type Error = SyntheticError;

    fn address_space(&self) -> Result<AddressRange, Self::Error> {
        self.check_attached()?;
        Ok(self.range)
    }

    fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.check_attached()?;
        if addr < self.range.min || addr >= self.range.max {
            return Err(SyntheticError::OutOfRange(addr));
        }
        let image = self.image();
        if image.failing_queries.contains(&addr) {
            return Err(SyntheticError::InjectedQuery(addr));
        }
        match image.containing(addr) {
            Ok(region) => Ok(region.describe()),
            Err(next) => {
                let start = next
                    .checked_sub(1)
                    .map_or(self.range.min, |prev| image.regions[prev].end());
                let end = image.regions.get(next).map_or(self.range.max, |r| r.base);
                Ok(MemoryRegion::new(
                    start,
                    end - start,
                    RegionState::Free,
                    Protection::Other,
                ))
            }
        }
    }

    fn read_into(&self, addr: usize, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_attached()?;
        let image = self.image();
        let region = image
            .containing(addr)
            .map_err(|_| SyntheticError::Unreadable(addr))?;
        if region.state != RegionState::Committed {
            return Err(SyntheticError::Unreadable(addr));
        }
        if region.fail_reads {
            return Err(SyntheticError::Injected(region.base));
        }
        let src = &region.data[addr - region.base..];
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        Ok(n)
    }
}
