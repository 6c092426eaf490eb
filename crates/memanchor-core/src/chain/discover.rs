use std::collections::HashSet;

use tracing::{debug, info};

use crate::chain::PointerChain;
use crate::config::ChainConfig;
use crate::error::Result;
use crate::memory::{ModuleMap, ProcessMemory, RegionFilter, enumerate_regions, read_region};
use crate::scan::pattern::aligned_u32s;

/// A static chain and the start address it leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredChain {
    pub chain: PointerChain,
    pub origin: u64,
}

#[derive(Debug, Clone)]
struct FrontierEntry {
    target: u64,
    links: Vec<u64>,
    origin: u64,
}

/// Breadth-first reverse pointer search from many targets at once.
///
/// Every level reads each region once and checks every aligned value against
/// the whole frontier, so cost grows with levels, not with target count.
pub struct ChainDiscoverer<'a, P: ProcessMemory + ?Sized> {
    process: &'a P,
    filter: &'a RegionFilter,
    config: &'a ChainConfig,
}

impl<'a, P: ProcessMemory + ?Sized> ChainDiscoverer<'a, P> {
    pub fn new(process: &'a P, filter: &'a RegionFilter, config: &'a ChainConfig) -> Self {
        Self {
            process,
            filter,
            config,
        }
    }

    /// Every static chain ending at one of `targets`.
    pub fn discover(&self, targets: &[u64]) -> Result<Vec<DiscoveredChain>> {
        let modules = ModuleMap::new(self.process.modules()?);
        let regions = enumerate_regions(self.process, self.filter);
        let range = self.config.search_range;

        let mut frontier: Vec<FrontierEntry> = targets
            .iter()
            .map(|&target| FrontierEntry {
                target,
                links: Vec::new(),
                origin: target,
            })
            .collect();
        let mut visited: HashSet<u64> = targets.iter().copied().collect();
        let mut found = Vec::new();

        for level in 0..self.config.max_levels {
            if frontier.is_empty() {
                break;
            }
            debug!("Level {}: scanning {} targets", level + 1, frontier.len());

            frontier.sort_by_key(|e| e.target);
            let low = frontier[0].target.saturating_sub(range);
            let high = frontier[frontier.len() - 1].target;

            let mut next: Vec<FrontierEntry> = Vec::new();
            for region in &regions {
                let buffer = match read_region(self.process, region) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        debug!("Skipping region: {}", e);
                        continue;
                    }
                };

                for (pos, value) in aligned_u32s(&buffer) {
                    let value = u64::from(value);
                    if value < low || value > high {
                        continue;
                    }
                    let address = region.base + pos as u64;
                    let first = frontier.partition_point(|e| e.target < value);

                    for entry in &frontier[first..] {
                        let offset = entry.target - value;
                        if offset > range {
                            break;
                        }
                        let mut links = Vec::with_capacity(entry.links.len() + 1);
                        links.push(offset);
                        links.extend_from_slice(&entry.links);

                        match modules.find(address) {
                            Some(module) => found.push(DiscoveredChain {
                                chain: PointerChain::new(
                                    module.name.clone(),
                                    address - module.base,
                                    links,
                                ),
                                origin: entry.origin,
                            }),
                            None if !visited.contains(&address) => next.push(FrontierEntry {
                                target: address,
                                links,
                                origin: entry.origin,
                            }),
                            None => {}
                        }
                    }
                }
            }

            let mut seen = HashSet::new();
            next.retain(|e| seen.insert(e.target));
            next.truncate(self.config.max_targets_per_level);
            visited.extend(next.iter().map(|e| e.target));

            info!(
                "Level {}: {} dynamic, {} static chains found",
                level + 1,
                next.len(),
                found.len()
            );

            if next.is_empty() && found.is_empty() {
                debug!("No more pointers to trace");
                break;
            }
            frontier = next;
        }

        Ok(found)
    }
}
