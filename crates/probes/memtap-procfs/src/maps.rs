//! Parsing of `/proc/<pid>/maps`.
//!
//! ```text
//! address                   perms offset   dev   inode      pathname
//! 55d0c4a00000-55d0c4a21000 rw-p  00000000 00:00 0          [heap]
//! ```

use crate::ProcfsError;
use itertools::Itertools;
use memtap_core::{MemoryRegion, Protection, RegionState};

/// One line of a maps file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// First address
    pub start: usize,
    /// End address (exclusive)
    pub end: usize,
    /// Permission string, e.g. `rw-p`
    pub perms: String,
    /// Backing file or pseudo path such as `[heap]`
    pub path: Option<String>,
}

impl Mapping {
    /// Parses a single maps line.
    pub fn parse(line: &str) -> Result<Mapping, ProcfsError> {
        let invalid = || ProcfsError::Parse(line.to_owned());
        let mut fields = line.split_whitespace();
        let (range, perms) = fields.next_tuple().ok_or_else(invalid)?;
        let (start, end) = range.split('-').collect_tuple().ok_or_else(invalid)?;
        let start = usize::from_str_radix(start, 16).map_err(|_| invalid())?;
        let end = usize::from_str_radix(end, 16).map_err(|_| invalid())?;
        if end < start || perms.len() != 4 {
            return Err(invalid());
        }
        // offset, dev and inode precede the path
        let path = fields.skip(3).join(" ");
        Ok(Mapping {
            start,
            end,
            perms: perms.to_owned(),
            path: (!path.is_empty()).then_some(path),
        })
    }

    fn state(&self) -> RegionState {
        if self.perms.starts_with("---") {
            RegionState::Reserved
        } else {
            RegionState::Committed
        }
    }

    fn protection(&self) -> Protection {
        if self.perms.starts_with("rw-") {
            Protection::ReadWrite
        } else {
            Protection::Other
        }
    }

    /// The mapping as a memtap region.
    pub fn region(&self) -> MemoryRegion {
        MemoryRegion::new(
            self.start,
            self.end - self.start,
            self.state(),
            self.protection(),
        )
    }
}

/// Parsed contents of one maps file, ordered by address.
#[derive(Debug, Clone, Default)]
pub struct MapsSnapshot {
    mappings: Vec<Mapping>,
}

impl MapsSnapshot {
    /// Parses a whole maps file.
    pub fn parse(maps: &str) -> Result<MapsSnapshot, ProcfsError> {
        let mut mappings = maps
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(Mapping::parse)
            .collect::<Result<Vec<_>, _>>()?;
        mappings.sort_by_key(|m| m.start);
        Ok(MapsSnapshot { mappings })
    }

    /// All mappings.
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// End of the highest user mapping. The legacy `[vsyscall]` page is ignored.
    pub fn top(&self) -> Option<usize> {
        self.mappings
            .iter()
            .filter(|m| m.path.as_deref() != Some("[vsyscall]"))
            .map(|m| m.end)
            .max()
    }

    /// Describes the region containing `addr`.
    ///
    /// Unmapped addresses yield a free region from the page of `addr` up to the
    /// next mapping (or the end of the address space).
    pub fn region_at(&self, addr: usize, page_size: usize) -> MemoryRegion {
        let idx = self.mappings.partition_point(|m| m.end <= addr);
        match self.mappings.get(idx) {
            Some(m) if m.start <= addr => m.region(),
            next => {
                let base = addr & !(page_size - 1);
                let end = next.map_or(usize::MAX & !(page_size - 1), |m| m.start);
                MemoryRegion::new(base, end - base, RegionState::Free, Protection::Other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
5581c0000000-5581c0021000 r--p 00000000 08:02 1311        /usr/bin/target app
5581c0021000-5581c0023000 rw-p 00021000 08:02 1311        /usr/bin/target app
5581c1000000-5581c1200000 rw-p 00000000 00:00 0           [heap]
7f0000000000-7f0000001000 ---p 00000000 00:00 0
7f0000001000-7f0000081000 rw-p 00000000 00:00 0
7ffc00000000-7ffc00021000 rw-p 00000000 00:00 0           [stack]
ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0   [vsyscall]
";

    #[test]
    fn test_parse_line() -> anyhow::Result<()> {
        let m = Mapping::parse("5581c1000000-5581c1200000 rw-p 00000000 00:00 0   [heap]")?;
        assert_eq!(m.start, 0x5581c1000000);
        assert_eq!(m.end, 0x5581c1200000);
        assert_eq!(m.perms, "rw-p");
        assert_eq!(m.path.as_deref(), Some("[heap]"));
        Ok(())
    }

    #[test]
    fn test_path_with_spaces() -> anyhow::Result<()> {
        let snapshot = MapsSnapshot::parse(MAPS)?;
        assert_eq!(
            snapshot.mappings()[0].path.as_deref(),
            Some("/usr/bin/target app")
        );
        assert_eq!(snapshot.mappings()[3].path, None);
        Ok(())
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Mapping::parse("not a maps line").is_err());
        assert!(Mapping::parse("2000-1000 rw-p 0 0:0 0").is_err());
        assert!(Mapping::parse("1000-2000").is_err());
    }

    #[test]
    fn test_region_states() -> anyhow::Result<()> {
        let snapshot = MapsSnapshot::parse(MAPS)?;
        let code = snapshot.region_at(0x5581c0000010, 4096);
        assert_eq!(code.state, RegionState::Committed);
        assert_eq!(code.protection, Protection::Other);

        let heap = snapshot.region_at(0x5581c1000000, 4096);
        assert!(heap.is_readwrite_committed());
        assert_eq!(heap.size, 0x200000);

        let guard = snapshot.region_at(0x7f0000000000, 4096);
        assert_eq!(guard.state, RegionState::Reserved);
        Ok(())
    }

    #[test]
    fn test_gap_is_free_up_to_next_mapping() -> anyhow::Result<()> {
        let snapshot = MapsSnapshot::parse(MAPS)?;
        let gap = snapshot.region_at(0x5581c0023000 + 0x1234, 4096);
        assert_eq!(gap.state, RegionState::Free);
        assert_eq!(gap.base, 0x5581c0024000);
        assert_eq!(gap.end(), 0x5581c1000000);
        Ok(())
    }

    #[test]
    fn test_top_ignores_vsyscall() -> anyhow::Result<()> {
        let snapshot = MapsSnapshot::parse(MAPS)?;
        assert_eq!(snapshot.top(), Some(0x7ffc00021000));
        Ok(())
    }
}
