//! Int32 table around a record anchor, for reverse engineering new fields.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::layout::FieldLayout;
use crate::memory::ReadMemory;

pub const DUMP_BEFORE: usize = 128;
pub const DUMP_AFTER: usize = 256;

/// Values in this range are flagged as possibly meaningful.
const PLAUSIBLE_MIN: i32 = 1;
const PLAUSIBLE_MAX: i32 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpRow {
    pub offset: i64,
    pub hex: String,
    pub value: i32,
    /// Layout field name (suffixed ` !` when outside its range), or `?` for
    /// an unnamed plausible value.
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordDump {
    pub anchor: String,
    pub rows: Vec<DumpRow>,
}

impl RecordDump {
    /// Read `before + after` bytes around `anchor` in one request.
    pub fn collect<R: ReadMemory + ?Sized>(
        reader: &R,
        anchor: u64,
        layout: &FieldLayout,
        before: usize,
        after: usize,
    ) -> Result<Self> {
        let start = anchor.saturating_sub(before as u64);
        let lead = (anchor - start) as i64;
        let bytes = reader.read_bytes(start, lead as usize + after)?;

        let rows = bytes
            .chunks_exact(4)
            .enumerate()
            .map(|(i, raw)| {
                let offset = (i * 4) as i64 - lead;
                let value = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let note = match layout.get(offset) {
                    Some(spec) if spec.is_known() && spec.in_domain(value) => spec.name.clone(),
                    Some(spec) if spec.is_known() => format!("{} !", spec.name),
                    _ if (PLAUSIBLE_MIN..=PLAUSIBLE_MAX).contains(&value) => "?".to_string(),
                    _ => String::new(),
                };
                DumpRow {
                    offset,
                    hex: raw.iter().map(|b| format!("{b:02x}")).collect(),
                    value,
                    note,
                }
            })
            .collect();

        Ok(Self {
            anchor: format!("0x{anchor:08X}"),
            rows,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Record (anchor: {}) ===", self.anchor);
        let _ = writeln!(out, "{:>8} | {:>10} | {:>12} | note", "offset", "hex", "int32");
        let _ = writeln!(out, "{}", "-".repeat(60));
        for row in &self.rows {
            let _ = writeln!(
                out,
                "  {:>+5}  | {:>10} | {:>12} | {}",
                row.offset, row.hex, row.value, row.note
            );
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
