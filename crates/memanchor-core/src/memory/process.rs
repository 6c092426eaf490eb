//! Live process access.
//!
//! On Windows this wraps `OpenProcess`/`ReadProcessMemory`/`VirtualQueryEx`
//! and the ToolHelp snapshots. Other platforms compile the same API but every
//! open fails with [`Error::ProcessUnavailable`].

use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::{ModuleInfo, ProcessMemory, ReadMemory, RegionInfo};

/// A running process as reported by the process snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// An open handle to a target process.
pub struct ProcessHandle {
    pub pid: u32,
    #[cfg(target_os = "windows")]
    handle: windows::Win32::Foundation::HANDLE,
}

// Kernel process handles may be used from any thread.
#[cfg(target_os = "windows")]
unsafe impl Send for ProcessHandle {}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

impl ProcessHandle {
    /// Open the process by id with query and read access.
    #[cfg(target_os = "windows")]
    pub fn open(pid: u32) -> Result<Self> {
        use windows::Win32::Foundation::BOOL;
        use windows::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
        };

        let handle = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
                BOOL::from(false),
                pid,
            )
        }
        .map_err(|e| Error::ProcessUnavailable(format!("OpenProcess({pid}) failed: {e}")))?;

        debug!("Opened process {}", pid);
        Ok(Self { pid, handle })
    }

    #[cfg(not(target_os = "windows"))]
    pub fn open(pid: u32) -> Result<Self> {
        debug!("Process access requested for pid {} on unsupported platform", pid);
        Err(Error::ProcessUnavailable(
            "process memory access is only supported on Windows".to_string(),
        ))
    }
}

#[cfg(target_os = "windows")]
impl Drop for ProcessHandle {
    fn drop(&mut self) {
        use windows::Win32::Foundation::CloseHandle;
        let _ = unsafe { CloseHandle(self.handle) };
    }
}

/// Every running process whose executable name matches, sorted by pid.
#[cfg(target_os = "windows")]
pub fn find_processes(name: &str) -> Result<Vec<ProcessInfo>> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };

    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|e| Error::ProcessUnavailable(format!("process snapshot failed: {e}")))?;

    let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };

    let mut found = Vec::new();
    let mut ok = unsafe { Process32FirstW(snapshot, &mut entry) }.is_ok();
    while ok {
        let exe = wide_to_string(&entry.szExeFile);
        if exe.eq_ignore_ascii_case(name) {
            found.push(ProcessInfo {
                pid: entry.th32ProcessID,
                name: exe,
            });
        }
        ok = unsafe { Process32NextW(snapshot, &mut entry) }.is_ok();
    }
    let _ = unsafe { CloseHandle(snapshot) };

    found.sort_by_key(|p| p.pid);
    debug!("Found {} process(es) named {}", found.len(), name);
    Ok(found)
}

#[cfg(not(target_os = "windows"))]
pub fn find_processes(_name: &str) -> Result<Vec<ProcessInfo>> {
    Ok(Vec::new())
}

#[cfg(target_os = "windows")]
fn wide_to_string(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

impl ReadMemory for ProcessHandle {
    #[cfg(target_os = "windows")]
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;

        let mut buffer = vec![0u8; size];
        let mut bytes_read = 0usize;
        unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const std::ffi::c_void,
                buffer.as_mut_ptr() as *mut std::ffi::c_void,
                size,
                Some(&mut bytes_read),
            )
        }
        .map_err(|e| Error::read_failed(address, e.to_string()))?;

        if bytes_read != size {
            return Err(Error::read_failed(
                address,
                format!("partial read: {bytes_read} of {size} bytes"),
            ));
        }
        Ok(buffer)
    }

    #[cfg(not(target_os = "windows"))]
    fn read_bytes(&self, address: u64, _size: usize) -> Result<Vec<u8>> {
        Err(Error::read_failed(address, "unsupported platform"))
    }
}

impl ProcessMemory for ProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(target_os = "windows")]
    fn query_region(&self, address: u64) -> Option<RegionInfo> {
        use windows::Win32::System::Memory::{MEMORY_BASIC_INFORMATION, VirtualQueryEx};

        let mut mbi = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQueryEx(
                self.handle,
                Some(address as *const std::ffi::c_void),
                &mut mbi,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if written == 0 {
            return None;
        }
        Some(RegionInfo {
            base: mbi.BaseAddress as u64,
            size: mbi.RegionSize as u64,
            state: mbi.State.0,
            protect: mbi.Protect.0,
        })
    }

    #[cfg(not(target_os = "windows"))]
    fn query_region(&self, _address: u64) -> Option<RegionInfo> {
        None
    }

    #[cfg(target_os = "windows")]
    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW,
            TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32,
        };

        let snapshot =
            unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, self.pid) }
                .map_err(|e| {
                    Error::ProcessUnavailable(format!("module snapshot for {} failed: {e}", self.pid))
                })?;

        let mut entry = MODULEENTRY32W {
            dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        let mut modules = Vec::new();
        let mut ok = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
        while ok {
            modules.push(ModuleInfo {
                name: wide_to_string(&entry.szModule),
                base: entry.modBaseAddr as u64,
                size: u64::from(entry.modBaseSize),
            });
            ok = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
        }
        let _ = unsafe { CloseHandle(snapshot) };

        debug!("Process {} has {} modules", self.pid, modules.len());
        Ok(modules)
    }

    #[cfg(not(target_os = "windows"))]
    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        Err(Error::ProcessUnavailable(
            "process memory access is only supported on Windows".to_string(),
        ))
    }
}
