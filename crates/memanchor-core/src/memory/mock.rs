//! In-memory target process for tests.
//!
//! `MockMemoryReader` behaves like a live process: it answers region queries
//! (including free gaps between regions), lists modules and serves reads. It is
//! cheaply cloneable and shares its state, so a test can keep one handle and
//! mutate memory while a session holds another.

use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::memory::region::{MEM_COMMIT, MEM_FREE, PAGE_NOACCESS, PAGE_READWRITE, USER_SPACE_END};
use crate::memory::{ModuleInfo, ProcessMemory, ReadMemory, RegionInfo};

#[derive(Debug, Clone)]
struct MockRegion {
    base: u64,
    data: Vec<u8>,
    protect: u32,
    readable: bool,
}

impl MockRegion {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    fn covers(&self, address: u64, size: usize) -> bool {
        address >= self.base && address + size as u64 <= self.end()
    }
}

#[derive(Debug, Default)]
struct MockState {
    regions: Vec<MockRegion>,
    modules: Vec<ModuleInfo>,
    offline: bool,
}

impl MockState {
    fn region_mut(&mut self, address: u64, size: usize) -> &mut MockRegion {
        match self.regions.iter_mut().find(|r| r.covers(address, size)) {
            Some(region) => region,
            None => panic!("mock write at 0x{address:X} is outside every region"),
        }
    }

    fn write(&mut self, address: u64, bytes: &[u8]) {
        let region = self.region_mut(address, bytes.len());
        let start = (address - region.base) as usize;
        region.data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

/// Builder for [`MockMemoryReader`].
///
/// Writes panic when they fall outside every declared region.
#[derive(Debug, Default)]
pub struct MockMemoryBuilder {
    pid: u32,
    state: MockState,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self {
            pid: 1,
            state: MockState::default(),
        }
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Add a committed read-write region.
    pub fn region(self, base: u64, data: Vec<u8>) -> Self {
        self.region_with_protect(base, data, PAGE_READWRITE)
    }

    pub fn region_with_protect(mut self, base: u64, data: Vec<u8>, protect: u32) -> Self {
        self.state.regions.push(MockRegion {
            base,
            data,
            protect,
            readable: true,
        });
        self.state.regions.sort_by_key(|r| r.base);
        self
    }

    /// Make reads of the region starting at `base` fail.
    pub fn unreadable(mut self, base: u64) -> Self {
        if let Some(region) = self.state.regions.iter_mut().find(|r| r.base == base) {
            region.readable = false;
        }
        self
    }

    pub fn module(mut self, name: &str, base: u64, size: u64) -> Self {
        self.state.modules.push(ModuleInfo {
            name: name.to_string(),
            base,
            size,
        });
        self
    }

    pub fn write_bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        self.state.write(address, bytes);
        self
    }

    pub fn write_i32(self, address: u64, value: i32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_u32(self, address: u64, value: u32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn build(self) -> MockMemoryReader {
        MockMemoryReader {
            pid: self.pid,
            state: Arc::new(RwLock::new(self.state)),
        }
    }
}

/// Shared-state mock process.
#[derive(Debug, Clone)]
pub struct MockMemoryReader {
    pid: u32,
    state: Arc<RwLock<MockState>>,
}

impl MockMemoryReader {
    pub fn set_bytes(&self, address: u64, bytes: &[u8]) {
        if let Ok(mut state) = self.state.write() {
            state.write(address, bytes);
        }
    }

    pub fn set_i32(&self, address: u64, value: i32) {
        self.set_bytes(address, &value.to_le_bytes());
    }

    pub fn set_u32(&self, address: u64, value: u32) {
        self.set_bytes(address, &value.to_le_bytes());
    }

    /// Simulate process exit (`true`) or recovery (`false`).
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.write() {
            state.offline = offline;
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&MockState) -> T) -> Option<T> {
        self.state.read().ok().map(|state| f(&state))
    }
}

impl ReadMemory for MockMemoryReader {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.with_state(|state| {
            if state.offline {
                return Err(Error::ProcessUnavailable(format!("pid {} exited", self.pid)));
            }
            let region = state
                .regions
                .iter()
                .find(|r| r.covers(address, size))
                .ok_or_else(|| Error::read_failed(address, "unmapped"))?;
            if !region.readable {
                return Err(Error::read_failed(address, "access denied"));
            }
            let start = (address - region.base) as usize;
            Ok(region.data[start..start + size].to_vec())
        })
        .unwrap_or_else(|| Err(Error::read_failed(address, "mock state poisoned")))
    }
}

impl ProcessMemory for MockMemoryReader {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn query_region(&self, address: u64) -> Option<RegionInfo> {
        self.with_state(|state| {
            if state.offline || address > USER_SPACE_END {
                return None;
            }
            for region in &state.regions {
                if address >= region.base && address < region.end() {
                    return Some(RegionInfo {
                        base: region.base,
                        size: region.data.len() as u64,
                        state: MEM_COMMIT,
                        protect: region.protect,
                    });
                }
                if region.base > address {
                    return Some(free_gap(address, region.base));
                }
            }
            Some(free_gap(address, USER_SPACE_END + 1))
        })
        .flatten()
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        self.with_state(|state| {
            if state.offline {
                Err(Error::ProcessUnavailable(format!("pid {} exited", self.pid)))
            } else {
                Ok(state.modules.clone())
            }
        })
        .unwrap_or_else(|| Err(Error::ProcessUnavailable("mock state poisoned".to_string())))
    }
}

fn free_gap(start: u64, end: u64) -> RegionInfo {
    RegionInfo {
        base: start,
        size: end - start,
        state: MEM_FREE,
        protect: PAGE_NOACCESS,
    }
}
