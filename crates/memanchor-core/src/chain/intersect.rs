use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};

use crate::chain::{ChainDiscoverer, FIELD_PAIR_DISTANCE, PointerChain, resolve_chain};
use crate::config::ChainConfig;
use crate::error::Result;
use crate::memory::{ModuleMap, ProcessMemory, ReadMemory, RegionFilter};
use crate::scan::find_value_addresses;

/// Domain of a resource value when voting on field labels.
const RESOURCE_MIN: i32 = 1;
const RESOURCE_MAX: i32 = 999_999;

/// Which half of a current/maximum pair a chain reaches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldLabel {
    Current,
    Maximum,
    Unknown,
}

/// One process instance and the scalar it currently holds.
#[derive(Debug, Clone)]
pub struct ProcessTarget<P> {
    pub process: P,
    pub expected: i32,
}

/// Resolution of one chain in one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceCheck {
    pub pid: u32,
    pub expected: i32,
    pub resolved_address: Option<u64>,
    pub observed_value: Option<i32>,
    pub matches_expected: bool,
}

/// A chain valid in every instance, with its field label and both variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedChain {
    pub chain: PointerChain,
    pub label: FieldLabel,
    pub checks: Vec<InstanceCheck>,
    pub current_links: Vec<u64>,
    pub maximum_links: Vec<u64>,
}

/// What one instance's discovery pass produced.
#[derive(Debug, Clone)]
pub struct InstanceScan {
    pid: u32,
    modules: ModuleMap,
    found: HashSet<u64>,
    keys: BTreeSet<PointerChain>,
}

/// Vote on which field `here` is, given its ±0x10 neighbours.
///
/// Equal neighbours (a full resource) vote for the maximum field.
pub fn classify_neighbours(here: i32, plus: i32, minus: i32) -> FieldLabel {
    let in_domain = |v: i32| (RESOURCE_MIN..=RESOURCE_MAX).contains(&v);

    if in_domain(plus) && plus <= here {
        FieldLabel::Maximum
    } else if in_domain(minus) && minus >= here {
        FieldLabel::Current
    } else if plus == here && in_domain(here) {
        FieldLabel::Maximum
    } else if minus == here && in_domain(here) {
        FieldLabel::Current
    } else {
        FieldLabel::Unknown
    }
}

/// Keeps only the chains that resolve correctly in every process instance.
pub struct ChainIntersector<'a> {
    filter: &'a RegionFilter,
    config: &'a ChainConfig,
}

impl<'a> ChainIntersector<'a> {
    pub fn new(filter: &'a RegionFilter, config: &'a ChainConfig) -> Self {
        Self { filter, config }
    }

    /// Discover, intersect, verify, classify and deduplicate.
    pub fn run<P: ProcessMemory>(&self, targets: &[ProcessTarget<P>]) -> Result<Vec<ClassifiedChain>> {
        let scans = self.scan(targets)?;
        Ok(self.intersect(targets, &scans))
    }

    /// Discovery pass over every instance, one after another.
    pub fn scan<P: ProcessMemory>(&self, targets: &[ProcessTarget<P>]) -> Result<Vec<InstanceScan>> {
        if targets.len() < 2 {
            warn!(
                "Intersecting {} instance(s); at least two are needed to rule out unstable chains",
                targets.len()
            );
        }

        let mut scans = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            info!(
                "[{}/{}] Scanning pid {} for value {}",
                i + 1,
                targets.len(),
                target.process.pid(),
                target.expected
            );
            scans.push(self.scan_instance(target)?);
        }
        Ok(scans)
    }

    /// Keep the chains every scan found that still resolve in every instance.
    ///
    /// `scans` must be in `targets` order.
    pub fn intersect<P: ProcessMemory>(
        &self,
        targets: &[ProcessTarget<P>],
        scans: &[InstanceScan],
    ) -> Vec<ClassifiedChain> {
        let mut iter = scans.iter();
        let common: BTreeSet<PointerChain> = match iter.next() {
            Some(first) => iter.fold(first.keys.clone(), |acc, scan| {
                acc.intersection(&scan.keys).cloned().collect()
            }),
            None => BTreeSet::new(),
        };
        for scan in scans {
            debug!("  pid {}: {} unique chains", scan.pid, scan.keys.len());
        }
        info!("Intersection: {} chains survived", common.len());

        let mut verified = Vec::new();
        for chain in common {
            let checks: Vec<InstanceCheck> = targets
                .iter()
                .zip(scans)
                .map(|(target, scan)| check_instance(target, scan, &chain))
                .collect();
            if checks.iter().all(|c| c.matches_expected) {
                verified.push((chain, checks));
            } else {
                debug!("Chain {} failed verification", chain);
            }
        }
        info!("Verified: {} chains resolve in every instance", verified.len());

        let mut unique: BTreeMap<(String, u64, FieldLabel), ClassifiedChain> = BTreeMap::new();
        for (chain, checks) in verified {
            let label = self.vote(targets, &checks);
            let classified = with_variants(chain, label, checks);
            let key = (
                classified.chain.module.clone(),
                classified.chain.module_offset,
                label,
            );
            let keep = unique
                .get(&key)
                .is_none_or(|existing| classified.chain.links.len() < existing.chain.links.len());
            if keep {
                unique.insert(key, classified);
            }
        }

        let mut chains: Vec<ClassifiedChain> = unique.into_values().collect();
        chains.sort_by_key(|c| c.chain.links.len());
        info!("{} stable chains", chains.len());
        chains
    }

    fn scan_instance<P: ProcessMemory>(&self, target: &ProcessTarget<P>) -> Result<InstanceScan> {
        let process = &target.process;
        let modules = ModuleMap::new(process.modules()?);
        let found = find_value_addresses(process, self.filter, target.expected);
        info!("  Found {} addresses holding {}", found.len(), target.expected);

        let chains = if found.is_empty() {
            Vec::new()
        } else {
            ChainDiscoverer::new(process, self.filter, self.config).discover(&found)?
        };
        info!("  Found {} static chains", chains.len());

        Ok(InstanceScan {
            pid: process.pid(),
            modules,
            found: found.into_iter().collect(),
            keys: chains.into_iter().map(|c| c.chain).collect(),
        })
    }

    fn vote<P: ProcessMemory>(
        &self,
        targets: &[ProcessTarget<P>],
        checks: &[InstanceCheck],
    ) -> FieldLabel {
        let mut maximum = 0usize;
        let mut current = 0usize;
        for (target, check) in targets.iter().zip(checks) {
            match neighbour_vote(&target.process, check.resolved_address) {
                FieldLabel::Maximum => maximum += 1,
                FieldLabel::Current => current += 1,
                FieldLabel::Unknown => {}
            }
        }
        match maximum.cmp(&current) {
            std::cmp::Ordering::Greater => FieldLabel::Maximum,
            std::cmp::Ordering::Less => FieldLabel::Current,
            std::cmp::Ordering::Equal => FieldLabel::Unknown,
        }
    }
}

fn check_instance<P: ProcessMemory>(
    target: &ProcessTarget<P>,
    scan: &InstanceScan,
    chain: &PointerChain,
) -> InstanceCheck {
    let resolved_address = resolve_chain(&target.process, &scan.modules, chain).ok();
    let observed_value = resolved_address.and_then(|addr| target.process.read_i32(addr).ok());
    let matches_expected = observed_value == Some(target.expected)
        || resolved_address.is_some_and(|addr| scan.found.contains(&addr));

    InstanceCheck {
        pid: scan.pid,
        expected: target.expected,
        resolved_address,
        observed_value,
        matches_expected,
    }
}

fn neighbour_vote<R: ReadMemory + ?Sized>(reader: &R, resolved: Option<u64>) -> FieldLabel {
    let read = |addr: Option<u64>| addr.and_then(|a| reader.read_i32(a).ok());
    let Some(address) = resolved else {
        return FieldLabel::Unknown;
    };
    let here = read(Some(address));
    let plus = read(address.checked_add(FIELD_PAIR_DISTANCE));
    let minus = read(address.checked_sub(FIELD_PAIR_DISTANCE));
    match (here, plus, minus) {
        (Some(here), Some(plus), Some(minus)) => classify_neighbours(here, plus, minus),
        _ => FieldLabel::Unknown,
    }
}

/// Attach current/maximum link variants derived from the label.
fn with_variants(chain: PointerChain, label: FieldLabel, checks: Vec<InstanceCheck>) -> ClassifiedChain {
    let distance = FIELD_PAIR_DISTANCE as i64;
    let (current_links, maximum_links) = match label {
        FieldLabel::Maximum => (
            chain.adjusted_links(distance).unwrap_or_else(|| chain.links.clone()),
            chain.links.clone(),
        ),
        FieldLabel::Current => (
            chain.links.clone(),
            chain.adjusted_links(-distance).unwrap_or_else(|| chain.links.clone()),
        ),
        FieldLabel::Unknown => (chain.links.clone(), chain.links.clone()),
    };
    ClassifiedChain {
        chain,
        label,
        checks,
        current_links,
        maximum_links,
    }
}
