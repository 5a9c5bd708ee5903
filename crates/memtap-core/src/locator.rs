//! One-shot discovery of the write buffer.

use crate::config::MemtapConfig;
use crate::enumerator::RegionEnumerator;
use crate::pattern::PatternDetector;
use crate::process::{AddressRange, ForeignProcess};
use crate::sample::{SAMPLE_SIZE, read_samples};
use crate::util::{Clock, Deadline, deadline_bar, stamp};
use indicatif::{MultiProgress, ProgressBar};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Where the write buffer was found.
///
/// Established once per run and assumed stable afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferLocation {
    /// Base address of the region holding the buffer
    pub page: usize,
    /// Sample offset of the matching super-block within the region
    pub offset: usize,
    /// Region size in bytes at discovery time
    pub size: usize,
}

impl core::fmt::Debug for BufferLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferLocation")
            .field("page", &format_args!("{:#x}", self.page))
            .field("offset", &self.offset)
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// Discovery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorState {
    /// Sweeps are running (or have not started).
    Searching,
    /// The buffer was found; no further reads are issued.
    Found(BufferLocation),
    /// The discovery deadline passed without a match.
    TimedOut,
}

/// Errors that end discovery.
#[derive(Debug, Error)]
pub enum LocateError {
    /// No region matched before the discovery deadline.
    #[error("No buffer found after {sweeps} sweep(s) in {elapsed:?}")]
    Timeout {
        /// Time spent searching
        elapsed: Duration,
        /// Number of completed sweeps
        sweeps: u64,
    },
}

/// Counters of a discovery run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    /// Full sweeps started
    pub sweeps: u64,
    /// Committed read-write regions that were read
    pub regions_scanned: u64,
    /// Bytes decoded into samples
    pub bytes_read: u64,
    /// Region reads that failed and were skipped
    pub failed_reads: u64,
    /// Region queries that failed and were skipped
    pub skipped_queries: u64,
    /// Candidate regions skipped for exceeding the read cap
    pub oversized_regions: u64,
    /// Time spent searching, in milliseconds
    pub elapsed_ms: u64,
}

/// Drives [`RegionEnumerator`] and [`PatternDetector`] until the buffer is found or
/// the discovery deadline passes.
///
/// Every sweep walks the whole address range and reads each committed read-write
/// region in full, unless it is larger than the configured cap. The first region
/// whose samples match the signature wins and discovery stops immediately. Between
/// unsuccessful sweeps the locator pauses for the configured sweep delay.
pub struct BufferLocator<'a, P: ForeignProcess + ?Sized, C: Clock + ?Sized> {
    process: &'a P,
    clock: &'a C,
    detector: PatternDetector,
    discovery_timeout: Duration,
    sweep_delay: Duration,
    free_region_threshold: usize,
    max_region_size: usize,
    state: LocatorState,
    stats: DiscoveryStats,
    progress: Option<ProgressBar>,
}

impl<'a, P: ForeignProcess + ?Sized, C: Clock + ?Sized> BufferLocator<'a, P, C> {
    /// Creates a new locator.
    ///
    /// # Arguments
    ///
    /// * `process` - The foreign process to search
    /// * `clock` - Time source for the deadline and sweep pauses
    /// * `config` - Deadline, sweep delay, region limits and signature
    pub fn new(process: &'a P, clock: &'a C, config: &MemtapConfig) -> Self {
        BufferLocator {
            process,
            clock,
            detector: PatternDetector::new(config.signature),
            discovery_timeout: config.discovery_timeout,
            sweep_delay: config.sweep_delay,
            free_region_threshold: config.free_region_threshold,
            max_region_size: config.max_region_size,
            state: LocatorState::Searching,
            stats: DiscoveryStats::default(),
            progress: None,
        }
    }

    /// Shows a progress bar over the discovery deadline.
    pub fn with_progress(mut self, progress: &MultiProgress) -> Self {
        self.progress = Some(deadline_bar(
            progress,
            "Discovery timeout",
            self.discovery_timeout,
        ));
        self
    }

    /// Current state.
    pub fn state(&self) -> LocatorState {
        self.state
    }

    /// Counters collected so far.
    pub fn stats(&self) -> DiscoveryStats {
        self.stats
    }

    /// Searches `range` until the buffer is found or the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::Timeout`] if no region matched in time.
    pub fn locate(&mut self, range: AddressRange) -> Result<BufferLocation, LocateError> {
        let deadline = Deadline::start(self.clock, self.discovery_timeout);
        self.state = LocatorState::Searching;
        info!(
            "Searching for buffer in {:#x}..{:#x} for up to {:?}",
            range.min, range.max, self.discovery_timeout
        );
        loop {
            let elapsed = deadline.elapsed(self.clock);
            self.stats.elapsed_ms = elapsed.as_millis() as u64;
            if let Some(p) = &self.progress {
                p.set_position(elapsed.as_secs());
            }
            if deadline.expired(self.clock) {
                warn!(
                    "{}: buffer not found after {} sweep(s)",
                    stamp(elapsed),
                    self.stats.sweeps
                );
                self.state = LocatorState::TimedOut;
                self.finish_progress();
                return Err(LocateError::Timeout {
                    elapsed,
                    sweeps: self.stats.sweeps,
                });
            }
            if let Some(location) = self.sweep(range) {
                let elapsed = deadline.elapsed(self.clock);
                self.stats.elapsed_ms = elapsed.as_millis() as u64;
                info!("{}: found buffer at page {:#x}", stamp(elapsed), location.page);
                self.state = LocatorState::Found(location);
                self.finish_progress();
                return Ok(location);
            }
            self.clock.sleep(self.sweep_delay);
        }
    }

    fn sweep(&mut self, range: AddressRange) -> Option<BufferLocation> {
        self.stats.sweeps += 1;
        debug!("Discovery sweep {}", self.stats.sweeps);
        let mut regions = RegionEnumerator::new(self.process, range, self.free_region_threshold);
        let mut found = None;
        for region in regions.by_ref() {
            if !region.is_readwrite_committed() {
                continue;
            }
            if region.size > self.max_region_size {
                debug!("Skipping oversized {:?}", region);
                self.stats.oversized_regions += 1;
                continue;
            }
            self.stats.regions_scanned += 1;
            let block = match read_samples(self.process, &region) {
                Ok(block) => block,
                Err(e) => {
                    debug!("Reading {:?} failed: {}", region, e);
                    self.stats.failed_reads += 1;
                    continue;
                }
            };
            self.stats.bytes_read += (block.len() * SAMPLE_SIZE) as u64;
            if let Some(offset) = self.detector.detect(block.samples()) {
                debug!("Signature at sample offset {} of {:?}", offset, region);
                found = Some(BufferLocation {
                    page: region.base,
                    offset,
                    size: region.size,
                });
                break;
            }
        }
        self.stats.skipped_queries += regions.skipped() as u64;
        found
    }

    fn finish_progress(&self) {
        if let Some(p) = &self.progress {
            p.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{MemoryRegion, Protection, RegionState};
    use crate::util::ManualClock;
    use std::cell::{Cell, RefCell};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("unreadable")]
    struct Unreadable;

    /// Back-to-back regions with fixed contents.
    struct Image {
        regions: Vec<(MemoryRegion, Vec<u8>)>,
        reads: RefCell<Vec<usize>>,
        fail_reads_at: Vec<usize>,
        queries: Cell<usize>,
    }

    impl Image {
        fn new(regions: Vec<(MemoryRegion, Vec<i16>)>) -> Self {
            Image {
                regions: regions
                    .into_iter()
                    .map(|(r, s)| (r, s.iter().flat_map(|v| v.to_ne_bytes()).collect()))
                    .collect(),
                reads: RefCell::new(vec![]),
                fail_reads_at: vec![],
                queries: Cell::new(0),
            }
        }

        fn range(&self) -> AddressRange {
            AddressRange::new(self.regions[0].0.base, self.regions.last().unwrap().0.end())
        }
    }

    impl ForeignProcess for Image {
        type Error = Unreadable;

        fn address_space(&self) -> Result<AddressRange, Self::Error> {
            Ok(self.range())
        }

        fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error> {
            self.queries.set(self.queries.get() + 1);
            self.regions
                .iter()
                .map(|(r, _)| *r)
                .find(|r| r.contains(addr))
                .ok_or(Unreadable)
        }

        fn read_into(&self, addr: usize, buf: &mut [u8]) -> Result<usize, Self::Error> {
            self.reads.borrow_mut().push(addr);
            if self.fail_reads_at.contains(&addr) {
                return Err(Unreadable);
            }
            let (region, data) = self
                .regions
                .iter()
                .find(|(r, _)| r.base == addr)
                .ok_or(Unreadable)?;
            let n = buf.len().min(data.len()).min(region.size);
            buf[..n].copy_from_slice(&data[..n]);
            Ok(n)
        }
    }

    const SUPER: usize = 512;

    fn signature_block(zeros: usize) -> Vec<i16> {
        let mut block = Vec::with_capacity(SUPER);
        for _ in 0..5 {
            block.extend(std::iter::repeat_n(9, 65 - zeros));
            block.extend(std::iter::repeat_n(0, zeros));
        }
        block.resize(SUPER, 9);
        block
    }

    fn noise(n: usize) -> Vec<i16> {
        (0..n).map(|i| (i as i16).wrapping_mul(7) | 1).collect()
    }

    fn mapped(
        base: usize,
        samples: &[i16],
        state: RegionState,
        protection: Protection,
    ) -> (MemoryRegion, Vec<i16>) {
        let size = samples.len() * SAMPLE_SIZE;
        (MemoryRegion::new(base, size, state, protection), samples.to_vec())
    }

    fn config() -> MemtapConfig {
        MemtapConfig {
            discovery_timeout: Duration::from_secs(1),
            sweep_delay: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_stops_at_first_match() {
        let plain = noise(4 * SUPER);
        let mut target = noise(SUPER);
        target.extend(signature_block(30));
        target.extend(noise(SUPER));
        let image = Image::new(vec![
            mapped(0x10000, &plain, RegionState::Committed, Protection::ReadWrite),
            mapped(0x11000, &plain, RegionState::Committed, Protection::Other),
            mapped(0x12000, &target, RegionState::Committed, Protection::ReadWrite),
            mapped(0x12c00, &target, RegionState::Committed, Protection::ReadWrite),
            mapped(0x13800, &plain, RegionState::Committed, Protection::ReadWrite),
        ]);
        let clock = ManualClock::new();
        let config = config();
        let mut locator = BufferLocator::new(&image, &clock, &config);
        let location = locator.locate(image.range()).expect("buffer not found");

        assert_eq!(location.page, 0x12000);
        assert_eq!(location.offset, SUPER);
        assert_eq!(locator.state(), LocatorState::Found(location));
        assert_eq!(*image.reads.borrow(), vec![0x10000, 0x12000]);
        assert_eq!(locator.stats().regions_scanned, 2);
        assert_eq!(locator.stats().sweeps, 1);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_times_out_at_deadline() {
        let plain = noise(2 * SUPER);
        let image = Image::new(vec![mapped(
            0x10000,
            &plain,
            RegionState::Committed,
            Protection::ReadWrite,
        )]);
        let clock = ManualClock::new();
        let config = config();
        let mut locator = BufferLocator::new(&image, &clock, &config);
        let result = locator.locate(image.range());

        match result {
            Err(LocateError::Timeout { elapsed, sweeps }) => {
                assert_eq!(elapsed, Duration::from_secs(1));
                assert_eq!(sweeps, 10);
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert_eq!(locator.state(), LocatorState::TimedOut);
        assert_eq!(clock.now(), Duration::from_secs(1));
        assert_eq!(image.reads.borrow().len(), 10);
    }

    #[test]
    fn test_unreadable_region_is_skipped() {
        let mut target = signature_block(25);
        target.extend(noise(SUPER));
        let image = {
            let mut image = Image::new(vec![
                mapped(0x10000, &target, RegionState::Committed, Protection::ReadWrite),
                mapped(0x10800, &target, RegionState::Committed, Protection::ReadWrite),
            ]);
            image.fail_reads_at = vec![0x10000];
            image
        };
        let clock = ManualClock::new();
        let config = config();
        let mut locator = BufferLocator::new(&image, &clock, &config);
        let location = locator.locate(image.range()).expect("buffer not found");
        assert_eq!(location.page, 0x10800);
        assert_eq!(locator.stats().failed_reads, 1);
    }

    #[test]
    fn test_reserved_and_free_regions_are_not_read() {
        let target = {
            let mut t = signature_block(40);
            t.extend(noise(SUPER));
            t
        };
        let image = Image::new(vec![
            mapped(0x10000, &target, RegionState::Reserved, Protection::ReadWrite),
            mapped(0x10800, &target, RegionState::Free, Protection::ReadWrite),
        ]);
        let clock = ManualClock::new();
        let config = config();
        let mut locator = BufferLocator::new(&image, &clock, &config);
        assert!(locator.locate(image.range()).is_err());
        assert!(image.reads.borrow().is_empty());
    }

    #[test]
    fn test_oversized_region_is_not_read() {
        let mut target = signature_block(30);
        target.extend(noise(SUPER));
        let image = Image::new(vec![
            mapped(0x10000, &target, RegionState::Committed, Protection::ReadWrite),
            mapped(0x10800, &noise(SUPER), RegionState::Committed, Protection::ReadWrite),
        ]);
        let clock = ManualClock::new();
        let config = MemtapConfig {
            max_region_size: 0x400,
            ..config()
        };
        let mut locator = BufferLocator::new(&image, &clock, &config);
        assert!(locator.locate(image.range()).is_err());
        assert_eq!(*image.reads.borrow(), vec![0x10800; 10]);
        assert_eq!(locator.stats().oversized_regions, 10);
    }
}
