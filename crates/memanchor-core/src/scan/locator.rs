use std::collections::{BTreeMap, HashSet};

use encoding_rs::BIG5;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::{
    MemoryRegion, ProcessMemory, ReadMemory, RegionFilter, enumerate_regions, read_region,
};
use crate::scan::offset_address;
use crate::scan::pattern::{find_aligned, find_i32, i32_at};
use crate::scan::verify::{LayoutVariant, RecordProfile, evaluate, verify};

/// Offset of the Big5 record name relative to the anchor.
pub const NAME_OFFSET: i64 = -228;
pub const NAME_MAX_BYTES: usize = 32;

/// Heap window holding the current map's name.
pub const MAP_NAME_MIN_BASE: u64 = 0x1000_0000;
pub const MAP_NAME_MAX_BASE: u64 = 0x4000_0000;
/// The map name object stores 40 right before the string.
const MAP_NAME_MARKER: [u8; 4] = 40i32.to_le_bytes();
const MAP_NAME_MAX_BYTES: usize = 16;
/// Debug-heap fill for uninitialised bytes.
const HEAP_FILL: [u8; 4] = [0xCD; 4];

/// Bytes a structure-only candidate needs before and after the anchor.
const STRUCTURE_LEAD: usize = 96;
const STRUCTURE_TAIL: usize = 100;

/// What to search for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateRequest {
    pub value: i32,
    /// Anchor-relative offset to exact expected value.
    pub filters: BTreeMap<i64, i32>,
    pub variant: LayoutVariant,
    /// Retry with the shifted layout when the primary finds nothing.
    pub compat: bool,
}

impl LocateRequest {
    pub fn new(value: i32) -> Self {
        Self {
            value,
            filters: BTreeMap::new(),
            variant: LayoutVariant::Primary,
            compat: false,
        }
    }

    pub fn with_filters(mut self, filters: BTreeMap<i64, i32>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_variant(mut self, variant: LayoutVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_compat(mut self, compat: bool) -> Self {
        self.compat = compat;
        self
    }
}

/// An accepted record candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub address: u64,
    pub score: f64,
    pub variant: LayoutVariant,
    pub sampled: BTreeMap<i64, i32>,
}

/// Serves reads from an already-read region buffer, falling back to the
/// process for anything outside it.
struct RegionView<'b, R: ?Sized> {
    base: u64,
    buffer: &'b [u8],
    fallback: &'b R,
}

impl<R: ReadMemory + ?Sized> ReadMemory for RegionView<'_, R> {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        if address >= self.base {
            let start = (address - self.base) as usize;
            if let Some(bytes) = start
                .checked_add(size)
                .and_then(|end| self.buffer.get(start..end))
            {
                return Ok(bytes.to_vec());
            }
        }
        self.fallback.read_bytes(address, size)
    }
}

/// Finds the live record from one known scalar value.
pub struct RecordLocator<'a, P: ProcessMemory + ?Sized> {
    process: &'a P,
    profile: &'a RecordProfile,
    filter: &'a RegionFilter,
}

impl<'a, P: ProcessMemory + ?Sized> RecordLocator<'a, P> {
    pub fn new(process: &'a P, profile: &'a RecordProfile, filter: &'a RegionFilter) -> Self {
        Self {
            process,
            profile,
            filter,
        }
    }

    /// Return the best-scoring accepted candidate.
    ///
    /// Ties keep the first candidate in address order.
    pub fn locate(&self, request: &LocateRequest) -> Result<Candidate> {
        let regions = enumerate_regions(self.process, self.filter);
        info!(
            "Locating value {} ({} variant) across {} regions",
            request.value,
            request.variant,
            regions.len()
        );

        let mut best = self.scan_variant(&regions, request, request.variant);

        if best.is_none() && request.compat && request.variant == LayoutVariant::Primary {
            debug!("No primary candidate, retrying with shifted layout");
            best = self.scan_variant(&regions, request, LayoutVariant::Shifted);
        }

        match best {
            Some(candidate) => {
                info!(
                    "Record located at 0x{:08X} (score {:.2}, {})",
                    candidate.address, candidate.score, candidate.variant
                );
                Ok(candidate)
            }
            None => Err(Error::NoCandidateFound(request.value)),
        }
    }

    fn scan_variant(
        &self,
        regions: &[MemoryRegion],
        request: &LocateRequest,
        variant: LayoutVariant,
    ) -> Option<Candidate> {
        let scalar_offset = self.profile.scalar_offset(variant);
        let mut best: Option<Candidate> = None;
        let mut matches = 0usize;
        let mut accepted = 0usize;

        for region in regions {
            let buffer = match read_region(self.process, region) {
                Ok(buffer) => buffer,
                Err(e) => {
                    debug!("Skipping region: {}", e);
                    continue;
                }
            };
            let view = RegionView {
                base: region.base,
                buffer: &buffer,
                fallback: self.process,
            };

            for pos in find_i32(&buffer, request.value) {
                matches += 1;
                if (pos as i64) < scalar_offset {
                    continue;
                }
                let Some(anchor) = offset_address(region.base + pos as u64, -scalar_offset)
                else {
                    continue;
                };

                let verification = verify(&view, anchor, self.profile, variant);
                if !self.profile.accepts(verification.score) {
                    continue;
                }
                if let Err(e) = check_filters(&view, anchor, &request.filters) {
                    debug!("Candidate 0x{:08X} filtered: {}", anchor, e);
                    continue;
                }

                accepted += 1;
                if best
                    .as_ref()
                    .is_none_or(|b| verification.score > b.score)
                {
                    best = Some(Candidate {
                        address: anchor,
                        score: verification.score,
                        variant,
                        sampled: verification.sampled,
                    });
                }
            }
        }

        debug!(
            "{} variant: {} matches, {} accepted candidates",
            variant, matches, accepted
        );
        best
    }

    /// Every aligned address currently holding `value`, unverified.
    pub fn find_all(&self, value: i32) -> Vec<u64> {
        find_value_addresses(self.process, self.filter, value)
    }

    /// Find records by shape alone, without a known value.
    ///
    /// Every aligned position goes through [`plausible_shape`] and then the
    /// primary verifier. Records sharing hp, max hp and level are reported
    /// once, at the lowest address.
    pub fn scan_by_structure(&self) -> Vec<Candidate> {
        let regions = enumerate_regions(self.process, self.filter);
        info!("Scanning {} regions for record structure", regions.len());

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for region in &regions {
            let buffer = match read_region(self.process, region) {
                Ok(buffer) => buffer,
                Err(e) => {
                    debug!("Skipping region: {}", e);
                    continue;
                }
            };
            let view = RegionView {
                base: region.base,
                buffer: &buffer,
                fallback: self.process,
            };

            let end = buffer.len().saturating_sub(STRUCTURE_TAIL);
            for pos in (STRUCTURE_LEAD..end).step_by(4) {
                // cheap reject before any per-field reads
                let (Some(hp), Some(hp_max)) = (i32_at(&buffer, pos), i32_at(&buffer, pos + 4))
                else {
                    continue;
                };
                if !(100..=999_999).contains(&hp) || hp > hp_max || hp_max > hp.saturating_mul(3) {
                    continue;
                }

                let anchor = region.base + pos as u64;
                let read = |offset: i64| {
                    offset_address(anchor, offset).and_then(|addr| view.read_i32(addr).ok())
                };
                if !plausible_shape(&read) {
                    continue;
                }
                let verification = evaluate(self.profile, LayoutVariant::Primary, &read);
                if !self.profile.accepts(verification.score) {
                    continue;
                }
                let Some(level) = read(self.profile.level_offset) else {
                    continue;
                };
                if !seen.insert((hp, hp_max, level)) {
                    continue;
                }
                found.push(Candidate {
                    address: anchor,
                    score: verification.score,
                    variant: LayoutVariant::Primary,
                    sampled: verification.sampled,
                });
            }
        }

        info!("Structure scan found {} distinct records", found.len());
        found
    }
}

/// Shape rules for a record found without a known value.
///
/// Stricter than the verifier: combat stats must be present and below hp,
/// hp and mp must differ, and the sampled values must not bunch together.
fn plausible_shape<F: Fn(i64) -> Option<i32>>(read: F) -> bool {
    let field = |offset: i64| read(offset).map(i64::from);
    let within = |v: i64, lo: i64, hi: i64| (lo..=hi).contains(&v);

    let (Some(hp), Some(hp_max), Some(mp), Some(mp_max)) = (field(0), field(4), field(8), field(12))
    else {
        return false;
    };
    if !within(hp, 100, 999_999) || !within(hp_max, 100, 999_999) || hp > hp_max || hp_max > hp * 3 {
        return false;
    }
    // incrementing junk: hp, hp_max, mp one apart
    if hp_max - hp <= 1 && hp > 100 && (mp - hp_max).abs() <= 2 {
        return false;
    }
    if !within(mp, 1, 999_999) || !within(mp_max, 1, 999_999) || mp > mp_max || mp_max > mp * 3 {
        return false;
    }

    let Some(level) = field(-36) else {
        return false;
    };
    if !within(level, 1, 999) || hp < level * 10 {
        return false;
    }

    let Some(stats) = [-96, -88, -80].map(field).into_iter().collect::<Option<Vec<_>>>() else {
        return false;
    };
    if !stats.iter().all(|&v| within(v, 1, 9999)) {
        return false;
    }

    let (Some(weight), Some(weight_max)) = (field(24), field(28)) else {
        return false;
    };
    if !within(weight, 0, 999_999) || !within(weight_max, 1, 999_999) || weight > weight_max {
        return false;
    }

    // attack, defense, hit, dodge
    let Some(combat) = [72, 84, 92, 96].map(field).into_iter().collect::<Option<Vec<_>>>() else {
        return false;
    };
    if !combat.iter().all(|&v| within(v, 1, 99_999) && v <= hp) {
        return false;
    }

    let ratio = hp as f64 / mp as f64;
    if ratio > 0.8 && ratio < 1.2 {
        return false;
    }

    let (attack, defense) = (combat[0], combat[1]);
    let Some(attack_base) = field(76) else {
        return false;
    };
    if attack_base <= 0 || ((attack - attack_base).abs() as f64) > attack as f64 * 0.5 {
        return false;
    }

    let mut sample = vec![hp, mp, level, stats[0], stats[1], attack, defense];
    sample.sort_unstable();
    sample.windows(2).map(|w| w[1] - w[0]).max().is_some_and(|gap| gap >= 10)
}

/// Scan the heap window for the current map's Big5 name.
///
/// The name is preceded by the marker `40`, is NUL-terminated, at most
/// eight characters long, and followed by debug-heap fill. Candidates whose
/// preceding eight bytes contain fill or guard bytes are skipped.
pub fn locate_map_name<P: ProcessMemory + ?Sized>(process: &P, filter: &RegionFilter) -> Option<String> {
    let regions: Vec<MemoryRegion> = enumerate_regions(process, filter)
        .into_iter()
        .filter(|r| (MAP_NAME_MIN_BASE..=MAP_NAME_MAX_BASE).contains(&r.base))
        .collect();
    debug!("Searching {} heap regions for the map name", regions.len());

    for region in &regions {
        let buffer = match read_region(process, region) {
            Ok(buffer) => buffer,
            Err(e) => {
                debug!("Skipping region: {}", e);
                continue;
            }
        };
        for marker in find_aligned(&buffer, &MAP_NAME_MARKER, 1) {
            if let Some(name) = map_name_at(&buffer, marker) {
                info!("Map name found at 0x{:08X}", region.base + marker as u64 + 4);
                return Some(name);
            }
        }
    }
    None
}

fn is_big5_pair(lead: u8, trail: u8) -> bool {
    (0xA1..=0xF9).contains(&lead) && (0x40..=0xFE).contains(&trail)
}

fn map_name_at(buffer: &[u8], marker: usize) -> Option<String> {
    let start = marker + 4;
    if start + 4 >= buffer.len() {
        return None;
    }
    if !is_big5_pair(buffer[start], buffer[start + 1]) {
        return None;
    }

    let window = &buffer[start..buffer.len().min(start + MAP_NAME_MAX_BYTES + 1)];
    let len = window.iter().position(|&b| b == 0)?;
    if len < 2 || len % 2 != 0 {
        return None;
    }
    let name = &window[..len];
    if !name.chunks_exact(2).all(|pair| is_big5_pair(pair[0], pair[1])) {
        return None;
    }

    let after = start + len + 1;
    if buffer.get(after..after + 4) != Some(&HEAP_FILL[..]) {
        return None;
    }
    if marker >= 8 {
        let before = &buffer[marker - 8..marker];
        if before.windows(2).any(|w| w == [0xCD, 0xCD] || w == [0xFD, 0xFD]) {
            return None;
        }
    }

    decode_big5(name, false)
}

/// Decode Big5 up to the first NUL; `lossy` replaces invalid sequences.
fn decode_big5(raw: &[u8], lossy: bool) -> Option<String> {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    if len == 0 {
        return None;
    }
    if lossy {
        let (decoded, _, _) = BIG5.decode(&raw[..len]);
        Some(decoded.into_owned())
    } else {
        BIG5.decode_without_bom_handling_and_without_replacement(&raw[..len])
            .map(|decoded| decoded.into_owned())
    }
}

/// Every aligned address holding `value` across all scannable regions.
pub fn find_value_addresses<P: ProcessMemory + ?Sized>(
    process: &P,
    filter: &RegionFilter,
    value: i32,
) -> Vec<u64> {
    let mut addresses = Vec::new();
    for region in &enumerate_regions(process, filter) {
        match read_region(process, region) {
            Ok(buffer) => addresses.extend(
                find_i32(&buffer, value)
                    .into_iter()
                    .map(|pos| region.base + pos as u64),
            ),
            Err(e) => debug!("Skipping region: {}", e),
        }
    }
    debug!("Found {} addresses holding {}", addresses.len(), value);
    addresses
}

/// Every filtered field must read back exactly; a read error is a mismatch.
fn check_filters<R: ReadMemory + ?Sized>(
    reader: &R,
    anchor: u64,
    filters: &BTreeMap<i64, i32>,
) -> Result<()> {
    for (&offset, &expected) in filters {
        let actual = offset_address(anchor, offset).and_then(|addr| reader.read_i32(addr).ok());
        if actual != Some(expected) {
            return Err(Error::FilterMismatch { offset, expected });
        }
    }
    Ok(())
}

/// NUL-terminated Big5 name stored before the anchor.
pub fn read_record_name<R: ReadMemory + ?Sized>(reader: &R, anchor: u64) -> Option<String> {
    let address = offset_address(anchor, NAME_OFFSET)?;
    let raw = reader.read_bytes(address, NAME_MAX_BYTES).ok()?;
    decode_big5(&raw, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MockMemoryBuilder, MockMemoryReader};

    const BASE: u64 = 0x0100_0000;

    fn record_process(at: usize) -> MockMemoryReader {
        let anchor = BASE + at as u64;
        MockMemoryBuilder::new()
            .region(BASE, vec![0u8; 1024])
            .write_i32(anchor, 287)
            .write_i32(anchor + 4, 287)
            .write_i32(anchor + 8, 100)
            .write_i32(anchor + 12, 100)
            .write_i32(anchor + 24, 0)
            .write_i32(anchor + 28, 1000)
            .write_i32(anchor - 36, 99)
            .build()
    }

    fn locate(process: &MockMemoryReader, request: &LocateRequest) -> Result<Candidate> {
        let profile = RecordProfile::default();
        let filter = RegionFilter::default();
        RecordLocator::new(process, &profile, &filter).locate(request)
    }

    #[test]
    fn test_locate_returns_record_anchor() {
        let process = record_process(228);
        let found = locate(&process, &LocateRequest::new(287)).unwrap();
        assert_eq!(found.address, BASE + 228);
        assert_eq!(found.score, 1.0);
        assert_eq!(found.variant, LayoutVariant::Primary);
    }

    #[test]
    fn test_filter_mismatch_is_not_found() {
        let process = record_process(228);
        let request = LocateRequest::new(287).with_filters(BTreeMap::from([(-36, 7)]));
        let err = locate(&process, &request).unwrap_err();
        assert!(matches!(err, Error::NoCandidateFound(287)));

        let request = LocateRequest::new(287).with_filters(BTreeMap::from([(-36, 99)]));
        assert_eq!(locate(&process, &request).unwrap().address, BASE + 228);
    }

    #[test]
    fn test_compat_falls_back_to_shifted() {
        let anchor = BASE + 256;
        let process = MockMemoryBuilder::new()
            .region(BASE, vec![0u8; 1024])
            .write_i32(anchor, 500)
            .write_i32(anchor + 4, 287)
            .write_i32(anchor + 8, 120)
            .write_i32(anchor + 12, 100)
            .write_i32(anchor + 28, 1000)
            .write_i32(anchor - 36, 10)
            .build();

        assert!(locate(&process, &LocateRequest::new(287)).is_err());

        let found = locate(&process, &LocateRequest::new(287).with_compat(true)).unwrap();
        assert_eq!(found.address, anchor);
        assert_eq!(found.variant, LayoutVariant::Shifted);

        let found = locate(
            &process,
            &LocateRequest::new(287).with_variant(LayoutVariant::Shifted),
        )
        .unwrap();
        assert_eq!(found.address, anchor);
    }

    #[test]
    fn test_higher_score_wins() {
        let process = record_process(228);
        // Earlier record with one soft violation (score 0.9)
        let earlier = BASE + 100;
        process.set_i32(earlier, 287);
        process.set_i32(earlier + 4, 300);
        process.set_i32(earlier + 12, 5);
        process.set_i32(earlier + 28, 50);
        process.set_i32(earlier - 36, 3);
        process.set_i32(earlier + 44, 9999);

        let found = locate(&process, &LocateRequest::new(287)).unwrap();
        assert_eq!(found.address, BASE + 228);
        assert_eq!(found.score, 1.0);
    }

    #[test]
    fn test_find_all_lists_every_aligned_hit() {
        let process = record_process(228);
        let profile = RecordProfile::default();
        let filter = RegionFilter::default();
        let locator = RecordLocator::new(&process, &profile, &filter);
        assert_eq!(locator.find_all(287), vec![BASE + 228, BASE + 232]);
    }

    #[test]
    fn test_read_record_name_big5() {
        let anchor = BASE + 512;
        // "中文" in Big5
        let process = MockMemoryBuilder::new()
            .region(BASE, vec![0u8; 1024])
            .write_bytes(anchor - 228, &[0xA4, 0xA4, 0xA4, 0xE5, 0x00, 0x41])
            .build();

        assert_eq!(read_record_name(&process, anchor).as_deref(), Some("中文"));
        assert_eq!(read_record_name(&process, BASE + 900), None);
    }

    fn write_character(process: &MockMemoryReader, anchor: u64, hp: i32, level: i32) {
        for (offset, value) in [
            (0, hp),
            (4, hp),
            (8, 3000),
            (12, 3000),
            (24, 10),
            (28, 1000),
            (-36, level),
            (-96, 150),
            (-88, 120),
            (-80, 130),
            (72, 800),
            (76, 780),
            (84, 600),
            (92, 400),
            (96, 300),
            (416, 100),
            (420, 100),
        ] {
            process.set_i32(offset_address(anchor, offset).unwrap(), value);
        }
    }

    #[test]
    fn test_scan_by_structure_finds_distinct_records() {
        let process = MockMemoryBuilder::new().region(BASE, vec![0u8; 4096]).build();
        write_character(&process, BASE + 512, 46277, 192);
        // same hp and level: reported once
        write_character(&process, BASE + 2048, 46277, 192);
        write_character(&process, BASE + 3000, 30000, 150);

        let profile = RecordProfile::default();
        let filter = RegionFilter::default();
        let found = RecordLocator::new(&process, &profile, &filter).scan_by_structure();

        let addresses: Vec<u64> = found.iter().map(|c| c.address).collect();
        assert_eq!(addresses, vec![BASE + 512, BASE + 3000]);
        assert!(found.iter().all(|c| c.score == 1.0));
        assert_eq!(found[1].sampled.get(&-36), Some(&150));
    }

    #[test]
    fn test_scan_by_structure_rejects_lookalikes() {
        let process = MockMemoryBuilder::new().region(BASE, vec![0u8; 2048]).build();
        // hp and mp almost equal
        write_character(&process, BASE + 256, 3100, 100);
        // attack far from its base value
        write_character(&process, BASE + 1024, 46277, 192);
        process.set_i32(BASE + 1024 + 76, 100);

        let profile = RecordProfile::default();
        let filter = RegionFilter::default();
        let locator = RecordLocator::new(&process, &profile, &filter);
        assert!(locator.scan_by_structure().is_empty());
    }

    const HEAP: u64 = 0x1000_0000;

    fn map_name_bytes(name: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; 8];
        bytes.extend_from_slice(&40i32.to_le_bytes());
        bytes.extend_from_slice(name);
        bytes.push(0);
        bytes.extend_from_slice(&[0xCD; 4]);
        bytes
    }

    #[test]
    fn test_locate_map_name() {
        // "中文" in Big5
        let name = [0xA4, 0xA4, 0xA4, 0xE5];
        let mut freed = vec![0xCDu8; 8];
        freed.extend_from_slice(&map_name_bytes(&name)[8..]);

        let process = MockMemoryBuilder::new()
            .region(BASE, vec![0u8; 256])
            .write_bytes(BASE + 16, &map_name_bytes(&[0xA4, 0xA4]))
            .region(HEAP, vec![0u8; 512])
            .write_bytes(HEAP + 32, &freed)
            .write_bytes(HEAP + 100, &map_name_bytes(&name[..3]))
            .write_bytes(HEAP + 200, &map_name_bytes(&name))
            .build();

        let filter = RegionFilter::default();
        assert_eq!(locate_map_name(&process, &filter).as_deref(), Some("中文"));
    }

    #[test]
    fn test_locate_map_name_requires_heap_fill() {
        let mut bytes = map_name_bytes(&[0xA4, 0xA4]);
        let len = bytes.len();
        bytes[len - 1] = 0;
        let process = MockMemoryBuilder::new()
            .region(HEAP, vec![0u8; 256])
            .write_bytes(HEAP + 64, &bytes)
            .build();

        assert_eq!(locate_map_name(&process, &RegionFilter::default()), None);
    }
}
