use log::info;
use memtap_core::{AddressRange, ForeignProcess, MemoryRegion, Protection, RegionState};
use std::ffi::c_void;
use std::io;
use thiserror::Error;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
    TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::Memory::{
    MEM_COMMIT, MEM_FREE, MEMORY_BASIC_INFORMATION, PAGE_READWRITE, VirtualQueryEx,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows_sys::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

/// Errors of the Win32 backend.
#[derive(Debug, Error)]
pub enum Win32Error {
    /// `OpenProcess` failed for this pid.
    #[error("OpenProcess({pid}) failed: {source}")]
    OpenProcess {
        /// Target pid
        pid: u32,
        /// OS error
        source: io::Error,
    },
    /// No running process has this executable name.
    #[error("No process named {0:?}")]
    NoSuchProcess(String),
    /// `VirtualQueryEx` failed.
    #[error("VirtualQueryEx({addr:#x}) failed: {source}")]
    Query {
        /// Queried address
        addr: usize,
        /// OS error
        source: io::Error,
    },
    /// `ReadProcessMemory` failed.
    #[error("ReadProcessMemory({addr:#x}, {len}) failed: {source}")]
    Read {
        /// Requested address
        addr: usize,
        /// Requested length
        len: usize,
        /// OS error
        source: io::Error,
    },
    /// Any other OS error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// A live Windows process opened with query and read rights.
pub struct Win32Process {
    pid: u32,
    handle: OwnedHandle,
}

impl Win32Process {
    /// Opens process `pid` with `PROCESS_QUERY_INFORMATION | PROCESS_VM_READ`.
    ///
    /// # Errors
    ///
    /// Returns [`Win32Error::OpenProcess`] if the process does not exist or access is denied.
    pub fn attach(pid: u32) -> Result<Self, Win32Error> {
        let handle = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, pid) };
        if handle == 0 {
            return Err(Win32Error::OpenProcess {
                pid,
                source: io::Error::last_os_error(),
            });
        }
        info!("Opened process {}", pid);
        Ok(Win32Process {
            pid,
            handle: OwnedHandle(handle),
        })
    }

    /// Opens the first process whose executable name matches `name`, ignoring case
    /// and an optional `.exe` suffix.
    pub fn attach_by_name(name: &str) -> Result<Self, Win32Error> {
        let pid = find_pid(name)?.ok_or_else(|| Win32Error::NoSuchProcess(name.to_owned()))?;
        Self::attach(pid)
    }

    /// The pid of the process.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

fn find_pid(name: &str) -> Result<Option<u32>, Win32Error> {
    let wanted = name.trim_end_matches(".exe").to_lowercase();
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error().into());
    }
    let snapshot = OwnedHandle(snapshot);
    let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..unsafe { std::mem::zeroed() }
    };
    let mut ok = unsafe { Process32FirstW(snapshot.0, std::ptr::from_mut(&mut entry)) };
    while ok != 0 {
        let len = entry
            .szExeFile
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(entry.szExeFile.len());
        let exe = String::from_utf16_lossy(&entry.szExeFile[..len]).to_lowercase();
        if exe.trim_end_matches(".exe") == wanted {
            return Ok(Some(entry.th32ProcessID));
        }
        ok = unsafe { Process32NextW(snapshot.0, std::ptr::from_mut(&mut entry)) };
    }
    Ok(None)
}

/// Maps a `MEMORY_BASIC_INFORMATION` onto a memtap region.
pub(crate) fn region_from_info(info: &MEMORY_BASIC_INFORMATION) -> MemoryRegion {
    let state = match info.State {
        MEM_FREE => RegionState::Free,
        MEM_COMMIT => RegionState::Committed,
        _ => RegionState::Reserved,
    };
    let protection = if info.Protect == PAGE_READWRITE {
        Protection::ReadWrite
    } else {
        Protection::Other
    };
    MemoryRegion::new(info.BaseAddress as usize, info.RegionSize, state, protection)
}

impl ForeignProcess for Win32Process {
    type Error = Win32Error;

    fn address_space(&self) -> Result<AddressRange, Self::Error> {
        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        unsafe { GetSystemInfo(std::ptr::from_mut(&mut info)) };
        Ok(AddressRange::new(
            info.lpMinimumApplicationAddress as usize,
            info.lpMaximumApplicationAddress as usize,
        ))
    }

    fn query_region(&self, addr: usize) -> Result<MemoryRegion, Self::Error> {
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let queried = unsafe {
            VirtualQueryEx(
                self.handle.0,
                addr as *const c_void,
                std::ptr::from_mut(&mut info),
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if queried == 0 {
            return Err(Win32Error::Query {
                addr,
                source: io::Error::last_os_error(),
            });
        }
        Ok(region_from_info(&info))
    }

    fn read_into(&self, addr: usize, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut read: usize = 0;
        let ok = unsafe {
            ReadProcessMemory(
                self.handle.0,
                addr as *const c_void,
                buf.as_mut_ptr().cast(),
                buf.len(),
                std::ptr::from_mut(&mut read),
            )
        };
        // partial copies still report the bytes that made it
        if ok == 0 && read == 0 {
            return Err(Win32Error::Read {
                addr,
                len: buf.len(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(read)
    }
}
