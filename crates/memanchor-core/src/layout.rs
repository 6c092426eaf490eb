//! Field layout of the live record.
//!
//! The layout maps signed anchor-relative offsets to named fields. It is
//! loaded once, never mutated, and passed by reference to whatever needs it.
//!
//! On disk it is a JSON knowledge file:
//!
//! ```json
//! {"character_structure": {"fields": {"-36": {"name": "level", "min": 1, "max": 200}}}}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::ReadMemory;
use crate::scan::offset_address;

pub const DEFAULT_LAYOUT_FILE: &str = "knowledge.json";

/// Placeholder name used by knowledge files for unidentified fields.
pub const UNKNOWN_FIELD_NAME: &str = "未知";

fn default_known() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
    #[serde(default = "default_known")]
    pub known: bool,
}

impl FieldSpec {
    pub fn new(name: &str, min: i32, max: i32) -> Self {
        Self {
            name: name.to_string(),
            min: Some(min),
            max: Some(max),
            known: true,
        }
    }

    pub fn is_known(&self) -> bool {
        self.known && self.name != UNKNOWN_FIELD_NAME
    }

    /// Whether `value` lies in the declared domain (open bounds accept).
    pub fn in_domain(&self, value: i32) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KnowledgeFile {
    character_structure: StructureSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct StructureSection {
    fields: BTreeMap<String, FieldSpec>,
}

/// Immutable offset-to-field mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    fields: BTreeMap<i64, FieldSpec>,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FieldLayout {
    pub fn new(fields: BTreeMap<i64, FieldSpec>) -> Self {
        Self { fields }
    }

    /// Layout matching the default verifier profile.
    pub fn builtin() -> Self {
        let fields = [
            (-96, FieldSpec::new("power", 0, 500)),
            (-88, FieldSpec::new("vitality", 0, 500)),
            (-80, FieldSpec::new("technique", 0, 500)),
            (-36, FieldSpec::new("level", 1, 200)),
            (0, FieldSpec::new("hp", 1, 999_999)),
            (4, FieldSpec::new("hp_max", 1, 999_999)),
            (8, FieldSpec::new("mp", 0, 999_999)),
            (12, FieldSpec::new("mp_max", 0, 999_999)),
            (24, FieldSpec::new("weight", 0, 999_999)),
            (28, FieldSpec::new("weight_max", 0, 999_999)),
            (44, FieldSpec::new("charm", 0, 500)),
            (416, FieldSpec::new("pos_x", -1, 10_000)),
            (420, FieldSpec::new("pos_y", -1, 10_000)),
        ];
        Self::new(fields.into_iter().collect())
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: KnowledgeFile = serde_json::from_str(content)?;
        let mut fields = BTreeMap::new();
        for (key, spec) in file.character_structure.fields {
            let offset: i64 = key
                .trim()
                .parse()
                .map_err(|_| Error::InvalidLayout(format!("offset '{key}' is not an integer")))?;
            fields.insert(offset, spec);
        }
        Ok(Self::new(fields))
    }

    pub fn to_json(&self) -> Result<String> {
        let file = KnowledgeFile {
            character_structure: StructureSection {
                fields: self
                    .fields
                    .iter()
                    .map(|(off, spec)| (off.to_string(), spec.clone()))
                    .collect(),
            },
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load `path`, falling back to the built-in layout.
    pub fn load_or_builtin<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(layout) => {
                debug!("Loaded {} fields from {}", layout.len(), path.display());
                layout
            }
            Err(e) if e.is_not_found() => {
                debug!("No layout at {}, using built-in layout", path.display());
                Self::builtin()
            }
            Err(e) => {
                warn!("Failed to load layout {}: {}, using built-in layout", path.display(), e);
                Self::builtin()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, offset: i64) -> Option<&FieldSpec> {
        self.fields.get(&offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &FieldSpec)> {
        self.fields.iter().map(|(&off, spec)| (off, spec))
    }

    /// Known fields in offset order.
    pub fn display_fields(&self) -> Vec<(i64, &str)> {
        self.iter()
            .filter(|(_, spec)| spec.is_known())
            .map(|(off, spec)| (off, spec.name.as_str()))
            .collect()
    }

    pub fn offset_of(&self, name: &str) -> Option<i64> {
        self.iter()
            .find(|(_, spec)| spec.is_known() && spec.name == name)
            .map(|(off, _)| off)
    }

    fn known_names(&self) -> String {
        let mut names: Vec<&str> = self.display_fields().into_iter().map(|(_, n)| n).collect();
        names.sort_unstable();
        names.join(", ")
    }
}

/// Parse `name=value` arguments.
pub fn parse_filters<S: AsRef<str>>(args: &[S]) -> Result<Vec<(String, i32)>> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            let (name, raw) = arg
                .split_once('=')
                .ok_or_else(|| Error::InvalidFilter(arg.to_string()))?;
            if name.is_empty() {
                return Err(Error::InvalidFilter(arg.to_string()));
            }
            let value = raw
                .trim()
                .parse::<i32>()
                .map_err(|_| Error::InvalidFilter(arg.to_string()))?;
            Ok((name.to_string(), value))
        })
        .collect()
}

/// Map field names to anchor-relative offsets.
pub fn resolve_filters(filters: &[(String, i32)], layout: &FieldLayout) -> Result<BTreeMap<i64, i32>> {
    filters
        .iter()
        .map(|(name, value)| {
            let offset = layout.offset_of(name).ok_or_else(|| Error::UnknownField {
                name: name.clone(),
                known: layout.known_names(),
            })?;
            Ok((offset, *value))
        })
        .collect()
}

/// One decoded field; `None` when unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedField {
    pub name: String,
    pub offset: i64,
    pub value: Option<i32>,
}

/// Read every known field of the record at `anchor`.
pub fn read_fields<R: ReadMemory + ?Sized>(
    reader: &R,
    anchor: u64,
    layout: &FieldLayout,
) -> Vec<DecodedField> {
    layout
        .display_fields()
        .into_iter()
        .map(|(offset, name)| DecodedField {
            name: name.to_string(),
            offset,
            value: offset_address(anchor, offset).and_then(|addr| reader.read_i32(addr).ok()),
        })
        .collect()
}
