use crate::error::{Error, Result};
use crate::memory::{ModuleInfo, RegionInfo};

/// Raw read access to a target address space.
///
/// Every read can fail: the region may be unmapped between enumeration and
/// read, or the process may have exited. Callers match on the result instead
/// of treating failures as exceptional.
pub trait ReadMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn read_i32(&self, address: u64) -> Result<i32> {
        let bytes = self.read_bytes(address, 4)?;
        let raw: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::read_failed(address, "short read"))?;
        Ok(i32::from_le_bytes(raw))
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        let raw: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::read_failed(address, "short read"))?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Read a pointer-sized value. Targets are 32-bit processes.
    fn read_pointer(&self, address: u64) -> Result<u64> {
        self.read_u32(address).map(u64::from)
    }
}

/// A live target process: raw reads plus the platform query primitives.
pub trait ProcessMemory: ReadMemory {
    fn pid(&self) -> u32;

    /// Describe the region containing (or following) `address`.
    ///
    /// Returns `None` when the platform query fails, which ends enumeration.
    fn query_region(&self, address: u64) -> Option<RegionInfo>;

    /// Loaded modules with their load base and mapped size.
    fn modules(&self) -> Result<Vec<ModuleInfo>>;
}

impl<T: ReadMemory + ?Sized> ReadMemory for &T {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, size)
    }
}

impl<T: ProcessMemory + ?Sized> ProcessMemory for &T {
    fn pid(&self) -> u32 {
        (**self).pid()
    }

    fn query_region(&self, address: u64) -> Option<RegionInfo> {
        (**self).query_region(address)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        (**self).modules()
    }
}
