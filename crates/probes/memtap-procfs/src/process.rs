use crate::maps::MapsSnapshot;
use lazy_static::lazy_static;
use libc::{c_void, iovec, pid_t};
use log::{debug, info};
use memtap_core::{AddressRange, ForeignProcess, MemoryRegion, MemtapConfig};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    static ref PAGE_SIZE: usize = {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            memtap_core::util::PAGE_SIZE
        }
    };
}

/// Errors of the procfs backend.
#[derive(Debug, Error)]
pub enum ProcfsError {
    /// There is no process with this pid.
    #[error("No such process: {0}")]
    NoSuchProcess(pid_t),
    /// No process has this command name.
    #[error("No process named {0:?}")]
    NoSuchName(String),
    /// The caller may not inspect this process.
    #[error("Permission denied for process {0}")]
    PermissionDenied(pid_t),
    /// A maps line could not be parsed.
    #[error("Malformed maps line: {0:?}")]
    Parse(String),
    /// `process_vm_readv` failed.
    #[error("Reading {len} bytes at {addr:#x} failed: {source}")]
    Read {
        /// Requested address
        addr: usize,
        /// Requested length
        len: usize,
        /// OS error
        source: io::Error,
    },
    /// Any other I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProcfsError {
    fn from_io(pid: pid_t, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => ProcfsError::NoSuchProcess(pid),
            io::ErrorKind::PermissionDenied => ProcfsError::PermissionDenied(pid),
            _ => ProcfsError::Io(e),
        }
    }
}

/// A live Linux process, inspected through procfs.
///
/// Regions come from `/proc/<pid>/maps`; the gaps between mappings are reported
/// as free regions and `---p` mappings as reserved. A snapshot of the maps file is
/// reused while queries move upwards through the address space and re-read as soon
/// as a query does not, so each discovery sweep and each acquisition tick sees a
/// fresh layout.
///
/// Reads use `process_vm_readv`, which needs ptrace access to the target
/// (same user with `kernel.yama.ptrace_scope = 0`, or `CAP_SYS_PTRACE`).
///
/// Linux keeps large unmapped gaps between the heap and the mmap area. With the
/// default `free_region_threshold` a sweep ends at the first of them, so sessions
/// against a procfs process should run with [`ProcfsProcess::adapt_config`].
#[derive(Debug)]
pub struct ProcfsProcess {
    pid: pid_t,
    maps_path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

#[derive(Debug, Default)]
struct Snapshot {
    maps: MapsSnapshot,
    last_query: Option<usize>,
}

impl ProcfsProcess {
    /// Attaches to process `pid`.
    ///
    /// # Errors
    ///
    /// * [`ProcfsError::NoSuchProcess`] if the process does not exist
    /// * [`ProcfsError::PermissionDenied`] if its maps cannot be read
    pub fn attach(pid: pid_t) -> Result<Self, ProcfsError> {
        let process = ProcfsProcess {
            pid,
            maps_path: PathBuf::from(format!("/proc/{}/maps", pid)),
            snapshot: Mutex::new(Snapshot::default()),
        };
        let maps = process.read_maps()?;
        info!(
            "Attached to process {} with {} mappings",
            pid,
            maps.mappings().len()
        );
        Ok(process)
    }

    /// Attaches to the lowest pid whose `comm` equals `name`. The kernel truncates
    /// `comm` to 15 bytes, so longer names never match.
    ///
    /// # Errors
    ///
    /// Returns [`ProcfsError::NoSuchName`] if no process matches.
    pub fn attach_by_name(name: &str) -> Result<Self, ProcfsError> {
        let pid = fs::read_dir("/proc")?
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<pid_t>().ok())
            .filter(|pid| {
                fs::read_to_string(format!("/proc/{}/comm", pid))
                    .is_ok_and(|comm| comm.trim_end() == name)
            })
            .min()
            .ok_or_else(|| ProcfsError::NoSuchName(name.to_owned()))?;
        Self::attach(pid)
    }

    /// Attaches to the calling process.
    pub fn current() -> Result<Self, ProcfsError> {
        Self::attach(std::process::id() as pid_t)
    }

    /// The pid of the process.
    pub fn pid(&self) -> pid_t {
        self.pid
    }

    /// Lifts the free gap threshold of `config` so that sweeps cross the unmapped
    /// gaps of a Linux address space instead of ending at the first one.
    pub fn adapt_config(config: MemtapConfig) -> MemtapConfig {
        MemtapConfig {
            free_region_threshold: usize::MAX,
            ..config
        }
    }

    fn read_maps(&self) -> Result<MapsSnapshot, ProcfsError> {
        let contents =
            fs::read_to_string(&self.maps_path).map_err(|e| ProcfsError::from_io(self.pid, e))?;
        MapsSnapshot::parse(&contents)
    }
}

impl ForeignProcess for ProcfsProcess {
    type Error = ProcfsError;

    fn address_space(&self) -> Result<AddressRange, Self::Error> {
        let maps = self.read_maps()?;
        let page = *PAGE_SIZE;
        let top = maps.top().unwrap_or(page);
        let bottom = maps.mappings().first().map_or(page, |m| m.start);
        Ok(AddressRange::new(bottom.min(top), top))
    }

    fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if snapshot.last_query.is_none_or(|last| addr <= last) {
            debug!("Re-reading {}", self.maps_path.display());
            snapshot.maps = self.read_maps()?;
        }
        snapshot.last_query = Some(addr);
        Ok(snapshot.maps.region_at(addr, *PAGE_SIZE))
    }

    fn read_into(&self, addr: usize, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let local = iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let remote = iovec {
            iov_base: addr as *mut c_void,
            iov_len: buf.len(),
        };
        // SAFETY: `local` covers exactly `buf`; the remote side is only read by the kernel.
        let n = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };
        if n < 0 {
            return Err(ProcfsError::Read {
                addr,
                len: buf.len(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(n as usize)
    }
}
