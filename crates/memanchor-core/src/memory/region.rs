//! Committed, readable region enumeration.

use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::{ProcessMemory, ReadMemory};

pub const MEM_COMMIT: u32 = 0x1000;
pub const MEM_FREE: u32 = 0x10000;

pub const PAGE_NOACCESS: u32 = 0x01;
pub const PAGE_READWRITE: u32 = 0x04;
pub const PAGE_WRITECOPY: u32 = 0x08;
pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
pub const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;

/// Highest user-mode address of a 32-bit target.
pub const USER_SPACE_END: u64 = 0x7FFF_FFFF;

/// One answer of the platform region query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub base: u64,
    pub size: u64,
    pub state: u32,
    pub protect: u32,
}

/// A committed, readable range of the target address space.
///
/// Regions are re-enumerated on every scan and carry no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: usize,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.base + self.size as u64
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// Which regions count as scannable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFilter {
    pub committed_state: u32,
    pub readable_protections: Vec<u32>,
    pub max_address: u64,
}

impl Default for RegionFilter {
    fn default() -> Self {
        Self {
            committed_state: MEM_COMMIT,
            readable_protections: vec![
                PAGE_READWRITE,
                PAGE_WRITECOPY,
                PAGE_EXECUTE_READWRITE,
                PAGE_EXECUTE_WRITECOPY,
            ],
            max_address: USER_SPACE_END,
        }
    }
}

impl RegionFilter {
    pub fn accepts(&self, info: &RegionInfo) -> bool {
        info.state == self.committed_state && self.readable_protections.contains(&info.protect)
    }
}

/// List every committed, readable region in address order.
///
/// Enumeration stops at `max_address`, at the first failed query, or when the
/// query reports an empty or non-advancing region. A partial list is a normal
/// result near the top of the address space.
pub fn enumerate_regions<P: ProcessMemory + ?Sized>(
    process: &P,
    filter: &RegionFilter,
) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();
    let mut address = 0u64;

    while address < filter.max_address {
        let Some(info) = process.query_region(address) else {
            debug!("Region query failed at 0x{:X}, stopping", address);
            break;
        };
        if info.size == 0 {
            break;
        }

        if filter.accepts(&info) {
            regions.push(MemoryRegion {
                base: info.base,
                size: info.size as usize,
            });
        }

        let next = info.base.saturating_add(info.size);
        if next <= address {
            debug!("Region query returned non-advancing base 0x{:X}", info.base);
            break;
        }
        address = next;
    }

    debug!(
        "Enumerated {} regions ({} bytes)",
        regions.len(),
        regions.iter().map(|r| r.size).sum::<usize>()
    );
    regions
}

/// Read a whole region in one call.
pub fn read_region<R: ReadMemory + ?Sized>(reader: &R, region: &MemoryRegion) -> Result<Vec<u8>> {
    reader
        .read_bytes(region.base, region.size)
        .map_err(|_| Error::RegionReadFailed {
            base: region.base,
            size: region.size,
        })
}
