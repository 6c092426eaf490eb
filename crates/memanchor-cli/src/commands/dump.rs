//! Record dump command implementation.

use std::path::Path;

use anyhow::Result;
use memanchor_core::{DUMP_AFTER, DUMP_BEFORE, FieldLayout, RecordDump};

use super::hex_utils::parse_hex_address;
use super::open_target;
use crate::TargetArgs;

pub fn run(
    target: &TargetArgs,
    anchor: &str,
    output: Option<&Path>,
    layout: &FieldLayout,
) -> Result<()> {
    let anchor = parse_hex_address(anchor)?;
    let process = open_target(target)?;
    let dump = RecordDump::collect(&process, anchor, layout, DUMP_BEFORE, DUMP_AFTER)?;

    match output {
        Some(path) => {
            dump.save(path)?;
            println!("Dump saved to: {}", path.display());
        }
        None => print!("{}", dump.render()),
    }
    Ok(())
}
