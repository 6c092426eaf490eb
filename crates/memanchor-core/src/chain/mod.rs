//! Static pointer chains: reverse discovery, resolution and cross-process
//! intersection.

mod discover;
mod intersect;
mod resolve;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use discover::{ChainDiscoverer, DiscoveredChain};
pub use intersect::{
    ChainIntersector, ClassifiedChain, FieldLabel, InstanceCheck, InstanceScan, ProcessTarget,
    classify_neighbours,
};
pub use resolve::{FixedChain, read_via_chain, resolve_chain, resolve_fixed};

/// Distance between the current and maximum fields reached by a chain.
pub const FIELD_PAIR_DISTANCE: u64 = 0x10;

/// A path from a module-relative static address to a dynamic target.
///
/// `links` run outermost to innermost: dereference `module base + module_offset`,
/// add the first link, dereference again, and so on. Two chains with equal
/// fields are the same chain regardless of which process produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointerChain {
    pub module: String,
    pub module_offset: u64,
    pub links: Vec<u64>,
}

impl PointerChain {
    pub fn new(module: impl Into<String>, module_offset: u64, links: Vec<u64>) -> Self {
        Self {
            module: module.into(),
            module_offset,
            links,
        }
    }

    /// Links with the last one moved by `delta`; `None` if it would underflow.
    pub fn adjusted_links(&self, delta: i64) -> Option<Vec<u64>> {
        let mut links = self.links.clone();
        let last = links.last_mut()?;
        *last = last.checked_add_signed(delta)?;
        Some(links)
    }

    /// Cheat Engine style notation, e.g. `[[game.exe+0x3F6810]+0x128]+0x68`.
    pub fn notation(&self) -> String {
        format_notation(&format!("{}+0x{:X}", self.module, self.module_offset), &self.links)
    }
}

impl fmt::Display for PointerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.notation())
    }
}

pub(crate) fn format_notation(base: &str, links: &[u64]) -> String {
    links.iter().fold(base.to_string(), |inner, &link| {
        if link == 0 {
            format!("[{inner}]")
        } else {
            format!("[{inner}]+0x{link:X}")
        }
    })
}
