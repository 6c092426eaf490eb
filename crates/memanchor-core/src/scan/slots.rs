//! Fixed-stride slot arrays (inventory, warehouse).
//!
//! Each entry is `[item id: i32][quantity pointer: u32]` preceded by 8 zero
//! bytes and followed by 24 zero bytes. Quantities live behind the pointer.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::memory::{ProcessMemory, ReadMemory, RegionFilter, enumerate_regions, read_region};
use crate::scan::pattern::{i32_at, is_zero_run, u32_at};

pub const SLOT_STRIDE: usize = 0x8E0;

/// Structural signature of one slot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSignature {
    pub stride: usize,
    pub id_min: i32,
    pub id_max: i32,
    pub pointer_min: u32,
    pub pointer_max: u32,
    pub lead_zeros: usize,
    pub tail_zeros: usize,
}

impl Default for SlotSignature {
    fn default() -> Self {
        Self {
            stride: SLOT_STRIDE,
            id_min: 1000,
            id_max: 65535,
            pointer_min: 0x0100_0000,
            pointer_max: 0x7FFF_FFFF,
            lead_zeros: 8,
            tail_zeros: 24,
        }
    }
}

impl SlotSignature {
    pub fn valid_id(&self, id: i32) -> bool {
        (self.id_min..=self.id_max).contains(&id)
    }

    pub fn valid_pointer(&self, pointer: u32) -> bool {
        (self.pointer_min..=self.pointer_max).contains(&pointer)
    }

    /// Bytes an entry occupies after its start (id, pointer, zero tail).
    fn entry_span(&self) -> usize {
        8 + self.tail_zeros
    }

    fn entry_at(&self, buffer: &[u8], pos: usize) -> bool {
        let Some(lead_start) = pos.checked_sub(self.lead_zeros) else {
            return false;
        };
        is_zero_run(buffer, lead_start, self.lead_zeros)
            && i32_at(buffer, pos).is_some_and(|id| self.valid_id(id))
            && u32_at(buffer, pos + 4).is_some_and(|p| self.valid_pointer(p))
            && is_zero_run(buffer, pos + 8, self.tail_zeros)
    }

    /// Entry at `pos` and the next one at `pos + stride` both match.
    pub fn matches_at(&self, buffer: &[u8], pos: usize) -> bool {
        self.entry_at(buffer, pos) && self.entry_at(buffer, pos + self.stride)
    }

    /// Aligned positions worth checking in a buffer of `len` bytes.
    fn scan_positions(&self, len: usize) -> std::iter::StepBy<std::ops::Range<usize>> {
        let end = len.saturating_sub(self.stride + self.entry_span());
        (self.lead_zeros..end).step_by(4)
    }
}

/// Per-array read limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLimits {
    pub max_slots: usize,
    /// Reading stops once the empty streak exceeds this.
    pub empty_limit: usize,
}

impl ArrayLimits {
    pub const INVENTORY: Self = Self {
        max_slots: 60,
        empty_limit: 3,
    };
    pub const WAREHOUSE: Self = Self {
        max_slots: 80,
        empty_limit: 10,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub index: usize,
    pub item_id: i32,
    /// `-1` when the quantity pointer is bad or unreadable.
    pub quantity: i32,
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotArray {
    pub start: u64,
    pub entries: Vec<SlotEntry>,
}

impl SlotArray {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct SlotScanner<'a, P: ProcessMemory + ?Sized> {
    process: &'a P,
    filter: &'a RegionFilter,
    signature: SlotSignature,
}

impl<'a, P: ProcessMemory + ?Sized> SlotScanner<'a, P> {
    pub fn new(process: &'a P, filter: &'a RegionFilter) -> Self {
        Self {
            process,
            filter,
            signature: SlotSignature::default(),
        }
    }

    /// Visit every region large enough to hold two entries.
    fn for_each_buffer(&self, mut f: impl FnMut(u64, &[u8]) -> bool) {
        let min_size = self.signature.stride * 2;
        for region in enumerate_regions(self.process, self.filter) {
            if region.size < min_size {
                continue;
            }
            let buffer = match read_region(self.process, &region) {
                Ok(buffer) => buffer,
                Err(e) => {
                    debug!("Skipping region: {}", e);
                    continue;
                }
            };
            if !f(region.base, &buffer) {
                break;
            }
        }
    }

    /// First address matching the double-entry signature.
    pub fn find_first_entry(&self) -> Option<u64> {
        let mut found = None;
        self.for_each_buffer(|base, buffer| {
            found = self
                .signature
                .scan_positions(buffer.len())
                .find(|&pos| self.signature.matches_at(buffer, pos))
                .map(|pos| base + pos as u64);
            found.is_none()
        });
        found
    }

    /// First matching entry of every array, skipping the reserved span
    /// (`stride * 80` bytes) after each hit.
    pub fn find_all_arrays(&self) -> Vec<u64> {
        let reserve = (self.signature.stride * ArrayLimits::WAREHOUSE.max_slots) as u64;
        let mut hits: Vec<u64> = Vec::new();

        self.for_each_buffer(|base, buffer| {
            for pos in self.signature.scan_positions(buffer.len()) {
                let address = base + pos as u64;
                if hits
                    .iter()
                    .any(|&hit| address >= hit && address < hit + reserve)
                {
                    continue;
                }
                if self.signature.matches_at(buffer, pos) {
                    hits.push(address);
                }
            }
            true
        });

        debug!("Found {} slot arrays", hits.len());
        hits
    }

    /// Step backward from any entry to the earliest entry of its array.
    ///
    /// Empty predecessors are crossed only while the empty streak stays within
    /// `limits.empty_limit`, so the result is always a populated entry.
    pub fn walk_to_start(&self, entry: u64, limits: ArrayLimits) -> u64 {
        let stride = self.signature.stride as u64;
        let mut start = entry;
        let mut cursor = entry;
        let mut empties = 0usize;

        for _ in 0..limits.max_slots {
            let Some(prev) = cursor.checked_sub(stride) else {
                break;
            };
            let Ok(item_id) = self.process.read_i32(prev) else {
                break;
            };

            if item_id == 0 {
                empties += 1;
                if empties > limits.empty_limit {
                    break;
                }
                cursor = prev;
                continue;
            }

            let pointer_ok = self.signature.valid_id(item_id)
                && self
                    .process
                    .read_u32(prev + 4)
                    .is_ok_and(|p| p == 0 || self.signature.valid_pointer(p));
            if !pointer_ok {
                break;
            }
            cursor = prev;
            start = prev;
            empties = 0;
        }
        start
    }

    /// Read entries from `start` until the empty streak exceeds the limit,
    /// an identifier is out of range, or `max_slots` is reached.
    pub fn read_array(&self, start: u64, limits: ArrayLimits) -> SlotArray {
        let stride = self.signature.stride as u64;
        let mut entries = Vec::new();
        let mut empty_streak = 0usize;

        for index in 0..limits.max_slots {
            let address = start + index as u64 * stride;
            let Ok(item_id) = self.process.read_i32(address) else {
                break;
            };

            if item_id == 0 {
                empty_streak += 1;
                if empty_streak > limits.empty_limit {
                    break;
                }
                continue;
            }
            if !(0..=self.signature.id_max).contains(&item_id) {
                break;
            }
            empty_streak = 0;

            let quantity = self
                .process
                .read_u32(address + 4)
                .ok()
                .filter(|&p| self.signature.valid_pointer(p))
                .and_then(|p| self.process.read_i32(u64::from(p)).ok())
                .unwrap_or(-1);

            entries.push(SlotEntry {
                index,
                item_id,
                quantity,
                address,
            });
        }

        SlotArray { start, entries }
    }

    pub fn locate_inventory(&self) -> Option<SlotArray> {
        let first = self.find_first_entry()?;
        let start = self.walk_to_start(first, ArrayLimits::INVENTORY);
        let array = self.read_array(start, ArrayLimits::INVENTORY);
        info!(
            "Inventory at 0x{:08X} ({} items)",
            array.start,
            array.entries.len()
        );
        Some(array)
    }

    /// The largest slot array outside the inventory span.
    pub fn locate_warehouse(&self, inventory_start: Option<u64>) -> Option<SlotArray> {
        let inventory_span = inventory_start.map(|start| {
            start..start + (self.signature.stride * ArrayLimits::INVENTORY.max_slots) as u64
        });
        let in_inventory =
            |address: u64| inventory_span.as_ref().is_some_and(|s| s.contains(&address));

        let starts: BTreeSet<u64> = self
            .find_all_arrays()
            .into_iter()
            .filter(|&hit| !in_inventory(hit))
            .map(|hit| self.walk_to_start(hit, ArrayLimits::WAREHOUSE))
            .filter(|&start| !in_inventory(start))
            .collect();
        debug!("{} non-inventory slot arrays", starts.len());

        let mut best: Option<SlotArray> = None;
        for start in starts {
            let array = self.read_array(start, ArrayLimits::WAREHOUSE);
            if array.entries.len() < 2 {
                continue;
            }
            if best
                .as_ref()
                .is_none_or(|b| array.entries.len() > b.entries.len())
            {
                best = Some(array);
            }
        }

        if let Some(array) = &best {
            info!(
                "Warehouse at 0x{:08X} ({} items)",
                array.start,
                array.entries.len()
            );
        }
        best
    }
}
