//! Structural verification of record candidates.
//!
//! Scoring runs in two passes over a declarative [`RecordProfile`]: a
//! short-circuiting hard-constraint pass that rejects with `0.0`, then a
//! penalty pass over soft fields and the sequential-value detector. The passes
//! only see a `read(offset) -> Option<i32>` function, so they can be tested
//! without any memory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::layout::FieldLayout;
use crate::memory::ReadMemory;
use crate::scan::offset_address;

/// Order of the current/maximum fields in the record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LayoutVariant {
    /// Current value at the anchor, maximum 4 bytes after.
    #[default]
    Primary,
    /// Maximum at the anchor, current 4 bytes after, for swappable pairs.
    Shifted,
}

/// A current/maximum pair checked as a hard constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardPair {
    pub current: i64,
    pub maximum: i64,
    pub min_current: i32,
    /// Whether the shifted layout swaps the two fields.
    pub swappable: bool,
}

impl HardPair {
    /// `(current_offset, maximum_offset)` under `variant`.
    pub fn offsets(&self, variant: LayoutVariant) -> (i64, i64) {
        match variant {
            LayoutVariant::Shifted if self.swappable => (self.maximum, self.current),
            _ => (self.current, self.maximum),
        }
    }
}

/// A field whose out-of-domain value costs one penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftField {
    pub offset: i64,
    pub min: i32,
    pub max: i32,
}

impl SoftField {
    pub const fn new(offset: i64, min: i32, max: i32) -> Self {
        Self { offset, min, max }
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Detector for runs of near-identical or incrementing values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCheck {
    pub offsets: Vec<i64>,
    pub max_diff: i64,
    pub min_hits: usize,
    pub penalty: u32,
    /// Shifted records skip the detector unless set.
    pub apply_to_shifted: bool,
}

/// The verifier's constants.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordProfile {
    pub hard_pairs: Vec<HardPair>,
    pub pair_ceiling: i32,
    pub level_offset: i64,
    pub level_min: i32,
    pub level_max: i32,
    pub soft_fields: Vec<SoftField>,
    pub sequence: SequenceCheck,
    pub penalty_step: f64,
    pub accept_threshold: f64,
}

impl Default for RecordProfile {
    fn default() -> Self {
        Self {
            hard_pairs: vec![
                HardPair { current: 0, maximum: 4, min_current: 1, swappable: true },
                HardPair { current: 8, maximum: 12, min_current: 0, swappable: true },
                HardPair { current: 24, maximum: 28, min_current: 0, swappable: false },
            ],
            pair_ceiling: 999_999,
            level_offset: -36,
            level_min: 1,
            level_max: 200,
            soft_fields: vec![
                SoftField::new(-96, 0, 500),
                SoftField::new(-88, 0, 500),
                SoftField::new(-80, 0, 500),
                SoftField::new(44, 0, 500),
                // coordinates
                SoftField::new(416, -1, 10_000),
                SoftField::new(420, -1, 10_000),
            ],
            sequence: SequenceCheck {
                offsets: vec![0, 4, 8, 12, 24, 28],
                max_diff: 10,
                min_hits: 4,
                penalty: 3,
                apply_to_shifted: false,
            },
            penalty_step: 0.1,
            accept_threshold: 0.8,
        }
    }
}

impl RecordProfile {
    /// Default profile with soft-field and level ranges taken from `layout`.
    ///
    /// A bound the layout leaves open keeps the built-in value.
    pub fn from_layout(layout: &FieldLayout) -> Self {
        let mut profile = Self::default();
        for field in &mut profile.soft_fields {
            if let Some(spec) = layout.get(field.offset) {
                field.min = spec.min.unwrap_or(field.min);
                field.max = spec.max.unwrap_or(field.max);
            }
        }
        if let Some(spec) = layout.get(profile.level_offset) {
            profile.level_min = spec.min.unwrap_or(profile.level_min);
            profile.level_max = spec.max.unwrap_or(profile.level_max);
        }
        profile
    }

    pub fn with_threshold(mut self, accept_threshold: f64) -> Self {
        self.accept_threshold = accept_threshold;
        self
    }

    pub fn accepts(&self, score: f64) -> bool {
        score >= self.accept_threshold
    }

    /// Offset of the scalar the locator searches for, relative to the anchor.
    pub fn scalar_offset(&self, variant: LayoutVariant) -> i64 {
        self.hard_pairs
            .first()
            .map(|pair| pair.offsets(variant).0)
            .unwrap_or(0)
    }
}

/// Outcome of scoring one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub score: f64,
    pub penalties: u32,
    /// Hard-constraint values, keyed by anchor-relative offset.
    pub sampled: BTreeMap<i64, i32>,
}

impl Verification {
    fn rejected(sampled: BTreeMap<i64, i32>) -> Self {
        Self {
            score: 0.0,
            penalties: 0,
            sampled,
        }
    }
}

/// Score a record given a field reader.
pub fn evaluate<F>(profile: &RecordProfile, variant: LayoutVariant, read: F) -> Verification
where
    F: Fn(i64) -> Option<i32>,
{
    let mut sampled = BTreeMap::new();

    // Hard pass
    for pair in &profile.hard_pairs {
        let (cur_off, max_off) = pair.offsets(variant);
        let (Some(current), Some(maximum)) = (read(cur_off), read(max_off)) else {
            return Verification::rejected(sampled);
        };
        sampled.insert(cur_off, current);
        sampled.insert(max_off, maximum);
        if !(pair.min_current <= current && current <= maximum && maximum <= profile.pair_ceiling)
        {
            return Verification::rejected(sampled);
        }
    }

    let Some(level) = read(profile.level_offset) else {
        return Verification::rejected(sampled);
    };
    sampled.insert(profile.level_offset, level);
    if !(profile.level_min..=profile.level_max).contains(&level) {
        return Verification::rejected(sampled);
    }

    // Soft pass
    let mut penalties = 0u32;
    for field in &profile.soft_fields {
        match read(field.offset) {
            Some(v) if field.contains(v) => {}
            _ => penalties += 1,
        }
    }

    let sequence = &profile.sequence;
    let values: Option<Vec<i64>> = match variant {
        LayoutVariant::Shifted if !sequence.apply_to_shifted => None,
        _ => sequence.offsets.iter().map(|&off| read(off).map(i64::from)).collect(),
    };
    if let Some(values) = values {
        let hits = values
            .windows(2)
            .filter(|w| (w[1] - w[0]).abs() < sequence.max_diff)
            .count();
        if hits >= sequence.min_hits {
            penalties += sequence.penalty;
        }
    }

    let score = (1.0 - f64::from(penalties) * profile.penalty_step).max(0.0);
    Verification {
        score,
        penalties,
        sampled,
    }
}

/// Score the record anchored at `anchor` in live memory.
pub fn verify<R: ReadMemory + ?Sized>(
    reader: &R,
    anchor: u64,
    profile: &RecordProfile,
    variant: LayoutVariant,
) -> Verification {
    evaluate(profile, variant, |offset| {
        offset_address(anchor, offset).and_then(|addr| reader.read_i32(addr).ok())
    })
}
