use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::{PointerChain, format_notation};
use crate::error::{Error, Result};
use crate::memory::region::USER_SPACE_END;
use crate::memory::{ModuleMap, ReadMemory};

/// Plausible range of a value read through a fixed chain.
const FIXED_VALUE_MIN: i32 = 1;
const FIXED_VALUE_MAX: i32 = 500_000;

/// Dereference `links` starting at `base`.
///
/// A null or out-of-range pointer at any hop breaks the chain.
fn walk<R: ReadMemory + ?Sized>(reader: &R, base: u64, links: &[u64]) -> Result<u64> {
    let mut address = base;
    for (hop, &link) in links.iter().enumerate() {
        let pointer = reader.read_pointer(address)?;
        if pointer == 0 || pointer > USER_SPACE_END {
            return Err(Error::ChainBroken { hop, pointer });
        }
        address = pointer + link;
    }
    Ok(address)
}

/// Final address a module-relative chain points at in this process.
pub fn resolve_chain<R: ReadMemory + ?Sized>(
    reader: &R,
    modules: &ModuleMap,
    chain: &PointerChain,
) -> Result<u64> {
    let module = modules
        .by_name(&chain.module)
        .ok_or_else(|| Error::ModuleNotFound(chain.module.clone()))?;
    walk(reader, module.base + chain.module_offset, &chain.links)
}

/// A chain promoted to a persisted constant: absolute base plus offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedChain {
    pub base: u64,
    pub offsets: Vec<u64>,
}

impl FixedChain {
    pub fn new(base: u64, offsets: Vec<u64>) -> Self {
        Self { base, offsets }
    }

    pub fn notation(&self) -> String {
        format_notation(&format!("0x{:08X}", self.base), &self.offsets)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let chain: Self = serde_json::from_str(&content)?;
        debug!("Loaded fixed chain {}", chain.notation());
        Ok(chain)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        info!("Saved fixed chain to {}", path.as_ref().display());
        Ok(())
    }

    /// Read the value through the chain, rejecting implausible results.
    pub fn read_value<R: ReadMemory + ?Sized>(&self, reader: &R) -> Option<i32> {
        let address = resolve_fixed(reader, self).ok()?;
        let value = reader.read_i32(address).ok()?;
        (FIXED_VALUE_MIN..=FIXED_VALUE_MAX)
            .contains(&value)
            .then_some(value)
    }
}

pub fn resolve_fixed<R: ReadMemory + ?Sized>(reader: &R, chain: &FixedChain) -> Result<u64> {
    walk(reader, chain.base, &chain.offsets)
}

/// Fast path: read the tracked value without scanning.
pub fn read_via_chain<R: ReadMemory + ?Sized>(reader: &R, chain: &FixedChain) -> Option<i32> {
    chain.read_value(reader)
}
