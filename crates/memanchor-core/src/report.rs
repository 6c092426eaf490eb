//! Operator-facing output for discovered chains and slot arrays.

use std::fmt::Write as _;

use serde::{Serialize, Serializer};

use crate::chain::{ClassifiedChain, FieldLabel, FixedChain, InstanceCheck};
use crate::error::Result;
use crate::scan::SlotArray;

fn hex<S: Serializer>(value: &u64, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format!("0x{value:X}"))
}

fn hex_list<S: Serializer>(values: &[u64], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(values.iter().map(|v| format!("0x{v:X}")))
}

/// Constants to paste into the fixed-chain fast path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedConstant {
    #[serde(serialize_with = "hex")]
    pub base: u64,
    #[serde(serialize_with = "hex_list")]
    pub current_offsets: Vec<u64>,
    #[serde(serialize_with = "hex_list")]
    pub maximum_offsets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub module: String,
    #[serde(serialize_with = "hex")]
    pub module_offset: u64,
    #[serde(serialize_with = "hex_list")]
    pub links: Vec<u64>,
    pub field: FieldLabel,
    pub notation: String,
    pub per_instance: Vec<InstanceCheck>,
    pub suggested: SuggestedConstant,
}

impl ChainReport {
    pub fn from_classified(chain: &ClassifiedChain, module_load_offset: u64) -> Self {
        Self {
            module: chain.chain.module.clone(),
            module_offset: chain.chain.module_offset,
            links: chain.chain.links.clone(),
            field: chain.label,
            notation: chain.chain.notation(),
            per_instance: chain.checks.clone(),
            suggested: SuggestedConstant {
                base: module_load_offset.saturating_add(chain.chain.module_offset),
                current_offsets: chain.current_links.clone(),
                maximum_offsets: chain.maximum_links.clone(),
            },
        }
    }

    /// The suggested constant for one half of the pair.
    pub fn to_fixed_chain(&self, field: FieldLabel) -> FixedChain {
        let offsets = match field {
            FieldLabel::Maximum => &self.suggested.maximum_offsets,
            FieldLabel::Current | FieldLabel::Unknown => &self.suggested.current_offsets,
        };
        FixedChain::new(self.suggested.base, offsets.clone())
    }
}

pub fn build_reports(chains: &[ClassifiedChain], module_load_offset: u64) -> Vec<ChainReport> {
    chains
        .iter()
        .map(|c| ChainReport::from_classified(c, module_load_offset))
        .collect()
}

pub fn reports_to_json(reports: &[ChainReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}

fn format_offsets(offsets: &[u64]) -> String {
    let parts: Vec<String> = offsets.iter().map(|o| format!("0x{o:X}")).collect();
    format!("[{}]", parts.join(", "))
}

/// One-line rendering of the suggested constant.
pub fn format_suggested(suggested: &SuggestedConstant) -> String {
    format!(
        "base = 0x{:X}, current = {}, maximum = {}",
        suggested.base,
        format_offsets(&suggested.current_offsets),
        format_offsets(&suggested.maximum_offsets)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRow {
    pub number: usize,
    pub item_id: i32,
    pub quantity: i32,
    #[serde(serialize_with = "hex")]
    pub address: u64,
}

pub fn slot_rows(array: &SlotArray) -> Vec<SlotRow> {
    array
        .entries
        .iter()
        .map(|e| SlotRow {
            number: e.index + 1,
            item_id: e.item_id,
            quantity: e.quantity,
            address: e.address,
        })
        .collect()
}

pub fn format_slot_table(title: &str, array: &SlotArray) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} at 0x{:08X} ({} items)",
        title,
        array.start,
        array.entries.len()
    );
    let _ = writeln!(out, "{:>4}  {:>8}  {:>8}  address", "#", "item id", "qty");
    for row in slot_rows(array) {
        let _ = writeln!(
            out,
            "{:>4}  {:>8}  {:>8}  0x{:08X}",
            row.number, row.item_id, row.quantity, row.address
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PointerChain;
    use crate::scan::SlotEntry;

    fn classified() -> ClassifiedChain {
        ClassifiedChain {
            chain: PointerChain::new("game.exe", 0x3F_6810, vec![0x128, 0x140]),
            label: FieldLabel::Maximum,
            checks: vec![InstanceCheck {
                pid: 42,
                expected: 287,
                resolved_address: Some(0x0ABC_0140),
                observed_value: Some(287),
                matches_expected: true,
            }],
            current_links: vec![0x128, 0x150],
            maximum_links: vec![0x128, 0x140],
        }
    }

    #[test]
    fn test_report_suggested_constant() {
        let report = ChainReport::from_classified(&classified(), 0x40_0000);
        assert_eq!(report.suggested.base, 0x7F_6810);
        assert_eq!(report.notation, "[[game.exe+0x3F6810]+0x128]+0x140");

        let fixed = report.to_fixed_chain(FieldLabel::Current);
        assert_eq!(fixed.base, 0x7F_6810);
        assert_eq!(fixed.offsets, vec![0x128, 0x150]);
        assert_eq!(report.to_fixed_chain(FieldLabel::Maximum).offsets, vec![0x128, 0x140]);

        assert_eq!(
            format_suggested(&report.suggested),
            "base = 0x7F6810, current = [0x128, 0x150], maximum = [0x128, 0x140]"
        );
    }

    #[test]
    fn test_report_json_uses_hex_strings() {
        let reports = build_reports(&[classified()], 0x40_0000);
        let json: serde_json::Value =
            serde_json::from_str(&reports_to_json(&reports).unwrap()).unwrap();
        let first = &json[0];
        assert_eq!(first["module_offset"], "0x3F6810");
        assert_eq!(first["field"], "maximum");
        assert_eq!(first["links"][1], "0x140");
        assert_eq!(first["suggested"]["base"], "0x7F6810");
        assert_eq!(first["per_instance"][0]["pid"], 42);
    }

    #[test]
    fn test_slot_table() {
        let array = SlotArray {
            start: 0x0200_0040,
            entries: vec![SlotEntry {
                index: 0,
                item_id: 1001,
                quantity: 5,
                address: 0x0200_0040,
            }],
        };
        let table = format_slot_table("Inventory", &array);
        assert!(table.starts_with("Inventory at 0x02000040 (1 items)"));
        assert!(table.contains("1001"));
        assert_eq!(slot_rows(&array)[0].number, 1);
    }
}
