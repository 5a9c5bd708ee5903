//! Region-by-region walk over a foreign address space.

use crate::process::{AddressRange, ForeignProcess, MemoryRegion, RegionState};
use crate::util::PAGE_SIZE;
use log::{debug, trace};

/// Lazy walk over the regions of a foreign address range, in ascending address order.
///
/// Each step queries the region at the cursor and advances the cursor by the
/// reported size. A failed query does not abort the walk: the cursor skips forward
/// by the last size that was reported successfully (one page if none was), and no
/// region is yielded for that step.
///
/// The walk ends when
/// * the cursor reaches or passes the end of the range,
/// * a [`RegionState::Free`] region larger than the configured threshold is seen
///   (the first large free gap means no interesting regions follow), or
/// * the cursor stops advancing (zero-sized or wrapping regions).
///
/// The iterator is not restartable; create a new one for every sweep.
pub struct RegionEnumerator<'a, P: ForeignProcess + ?Sized> {
    process: &'a P,
    cursor: usize,
    max: usize,
    free_region_threshold: usize,
    last_size: usize,
    skipped: usize,
    done: bool,
}

impl<'a, P: ForeignProcess + ?Sized> RegionEnumerator<'a, P> {
    /// Creates a new enumerator over `range`.
    ///
    /// # Arguments
    ///
    /// * `process` - The foreign process to query
    /// * `range` - Address range to walk
    /// * `free_region_threshold` - Size in bytes above which a free region ends the walk
    pub fn new(process: &'a P, range: AddressRange, free_region_threshold: usize) -> Self {
        RegionEnumerator {
            process,
            cursor: range.min,
            max: range.max,
            free_region_threshold,
            last_size: PAGE_SIZE,
            skipped: 0,
            done: range.is_empty(),
        }
    }

    /// Number of region queries that failed and were skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn advance_to(&mut self, next: usize) {
        if next <= self.cursor {
            debug!(
                "Region walk stalled at {:#x} (next {:#x}), stopping",
                self.cursor, next
            );
            self.done = true;
        } else {
            self.cursor = next;
        }
    }
}

impl<P: ForeignProcess + ?Sized> Iterator for RegionEnumerator<'_, P> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.cursor >= self.max {
                self.done = true;
                break;
            }
            let region = match self.process.query_region(self.cursor) {
                Ok(region) => region,
                Err(e) => {
                    debug!(
                        "Region query at {:#x} failed: {}. Skipping {:#x} bytes",
                        self.cursor, e, self.last_size
                    );
                    self.skipped += 1;
                    let next = self.cursor.saturating_add(self.last_size);
                    self.advance_to(next);
                    continue;
                }
            };
            trace!("Region at {:#x}: {:?}", self.cursor, region);
            if region.state == RegionState::Free && region.size > self.free_region_threshold {
                debug!(
                    "Large free gap of {:#x} bytes at {:#x}, ending walk",
                    region.size, region.base
                );
                self.done = true;
                break;
            }
            if region.end() <= self.cursor {
                debug!(
                    "Region walk stalled at {:#x} ({:?}), stopping",
                    self.cursor, region
                );
                self.done = true;
                break;
            }
            self.last_size = region.size;
            self.cursor = region.end();
            return Some(region);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Protection;
    use std::cell::Cell;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("query failed at {0:#x}")]
    struct QueryFailed(usize);

    /// Regions laid out back to back; queries at `fail_at` fail.
    struct Layout {
        regions: Vec<MemoryRegion>,
        fail_at: Vec<usize>,
        queries: Cell<usize>,
    }

    impl Layout {
        fn new(regions: Vec<MemoryRegion>) -> Self {
            Layout {
                regions,
                fail_at: vec![],
                queries: Cell::new(0),
            }
        }
    }

    impl ForeignProcess for Layout {
        type Error = QueryFailed;

        fn address_space(&self) -> Result<AddressRange, Self::Error> {
            let min = self.regions.first().map_or(0, |r| r.base);
            let max = self.regions.last().map_or(0, |r| r.end());
            Ok(AddressRange::new(min, max))
        }

        fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error> {
            self.queries.set(self.queries.get() + 1);
            if self.fail_at.contains(&addr) {
                return Err(QueryFailed(addr));
            }
            self.regions
                .iter()
                .find(|r| r.contains(addr) || r.base == addr)
                .copied()
                .ok_or(QueryFailed(addr))
        }

        fn read_into(&self, _addr: usize, _buf: &mut [u8]) -> Result<usize, Self::Error> {
            unreachable!("enumeration never reads")
        }
    }

    fn rw(base: usize, size: usize) -> MemoryRegion {
        MemoryRegion::new(base, size, RegionState::Committed, Protection::ReadWrite)
    }

    fn free(base: usize, size: usize) -> MemoryRegion {
        MemoryRegion::new(base, size, RegionState::Free, Protection::Other)
    }

    #[test]
    fn test_exact_cover_yields_each_region_once() {
        let regions = vec![
            rw(0x10000, 0x1000),
            free(0x11000, 0x3000),
            MemoryRegion::new(0x14000, 0x2000, RegionState::Reserved, Protection::Other),
            rw(0x16000, 0x8000),
        ];
        let layout = Layout::new(regions.clone());
        let range = layout.address_space().unwrap();
        assert_eq!(range.len(), regions.iter().map(|r| r.size).sum::<usize>());

        let walked: Vec<_> = RegionEnumerator::new(&layout, range, usize::MAX).collect();
        assert_eq!(walked, regions);
        assert_eq!(layout.queries.get(), regions.len());
    }

    #[test]
    fn test_not_restartable() {
        let layout = Layout::new(vec![rw(0x1000, 0x1000)]);
        let range = layout.address_space().unwrap();
        let mut walk = RegionEnumerator::new(&layout, range, usize::MAX);
        assert!(walk.next().is_some());
        assert!(walk.next().is_none());
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_large_free_gap_ends_walk() {
        let layout = Layout::new(vec![
            rw(0x1000, 0x1000),
            free(0x2000, 0x100000),
            rw(0x102000, 0x1000),
        ]);
        let range = layout.address_space().unwrap();
        let walked: Vec<_> = RegionEnumerator::new(&layout, range, 0x10000).collect();
        assert_eq!(walked, vec![rw(0x1000, 0x1000)]);
    }

    #[test]
    fn test_small_free_gap_is_walked() {
        let layout = Layout::new(vec![
            rw(0x1000, 0x1000),
            free(0x2000, 0x1000),
            rw(0x3000, 0x1000),
        ]);
        let range = layout.address_space().unwrap();
        let walked: Vec<_> = RegionEnumerator::new(&layout, range, 0x10000).collect();
        assert_eq!(walked.len(), 3);
    }

    #[test]
    fn test_failed_query_skips_by_last_size() {
        let mut layout = Layout::new(vec![
            rw(0x1000, 0x1000),
            rw(0x2000, 0x1000),
            rw(0x3000, 0x1000),
        ]);
        layout.fail_at = vec![0x2000];
        let range = layout.address_space().unwrap();
        let mut walk = RegionEnumerator::new(&layout, range, usize::MAX);
        let walked: Vec<_> = walk.by_ref().collect();
        assert_eq!(walked, vec![rw(0x1000, 0x1000), rw(0x3000, 0x1000)]);
        assert_eq!(walk.skipped(), 1);
    }

    #[test]
    fn test_first_failed_query_skips_one_page() {
        let mut layout = Layout::new(vec![rw(0x1000, PAGE_SIZE), rw(0x1000 + PAGE_SIZE, 0x4000)]);
        layout.fail_at = vec![0x1000];
        let range = layout.address_space().unwrap();
        let walked: Vec<_> = RegionEnumerator::new(&layout, range, usize::MAX).collect();
        assert_eq!(walked, vec![rw(0x1000 + PAGE_SIZE, 0x4000)]);
    }

    #[test]
    fn test_zero_sized_region_stops_walk() {
        let layout = Layout::new(vec![rw(0x1000, 0x1000), rw(0x2000, 0)]);
        let walked: Vec<_> =
            RegionEnumerator::new(&layout, AddressRange::new(0x1000, 0x3000), usize::MAX).collect();
        assert_eq!(walked, vec![rw(0x1000, 0x1000)]);
    }

    #[test]
    fn test_empty_range() {
        let layout = Layout::new(vec![rw(0x1000, 0x1000)]);
        let walked: Vec<_> =
            RegionEnumerator::new(&layout, AddressRange::new(0x1000, 0x1000), usize::MAX).collect();
        assert!(walked.is_empty());
        assert_eq!(layout.queries.get(), 0);
    }
}
