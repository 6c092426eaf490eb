//! One-shot record location, structure detection and map name lookup.

use anyhow::{Result, bail};
use memanchor_core::{
    FieldLayout, ProcessHandle, RecordLocator, ScanConfig, locate_map_name, read_fields,
    read_record_name,
};

use super::{build_request, open_target};
use crate::{LocateArgs, TargetArgs};

pub fn run(
    target: &TargetArgs,
    args: &LocateArgs,
    all: bool,
    config: &ScanConfig,
    layout: &FieldLayout,
) -> Result<()> {
    let request = build_request(args, layout)?;
    let process = open_target(target)?;
    let profile = config.verify.profile(layout);
    let filter = config.memory.region_filter();
    let locator = RecordLocator::new(&process, &profile, &filter);

    if all {
        let addresses = locator.find_all(args.value);
        println!("{} addresses hold {}:", addresses.len(), args.value);
        for address in addresses {
            println!("  0x{:08X}", address);
        }
        return Ok(());
    }

    let candidate = locator.locate(&request)?;
    println!();
    println!("Record at 0x{:08X}", candidate.address);
    println!("  score:   {:.2}", candidate.score);
    println!("  layout:  {}", candidate.variant);
    print_record(&process, candidate.address, layout);
    Ok(())
}

/// Find records without a known value and print each one.
pub fn run_detect(target: &TargetArgs, config: &ScanConfig, layout: &FieldLayout) -> Result<()> {
    let process = open_target(target)?;
    let profile = config.verify.profile(layout);
    let filter = config.memory.region_filter();
    let found = RecordLocator::new(&process, &profile, &filter).scan_by_structure();

    if found.is_empty() {
        bail!("No record structure found");
    }
    println!("Found {} distinct records", found.len());
    for (i, candidate) in found.iter().enumerate() {
        println!();
        println!("--- Record {} at 0x{:08X} ---", i + 1, candidate.address);
        print_record(&process, candidate.address, layout);
    }
    Ok(())
}

pub fn run_map(target: &TargetArgs, config: &ScanConfig) -> Result<()> {
    let process = open_target(target)?;
    match locate_map_name(&process, &config.memory.region_filter()) {
        Some(name) => println!("Map: {}", name),
        None => bail!("Map name not found"),
    }
    Ok(())
}

fn print_record(process: &ProcessHandle, anchor: u64, layout: &FieldLayout) {
    if let Some(name) = read_record_name(process, anchor) {
        println!("  name:    {}", name);
    }
    println!();
    for field in read_fields(process, anchor, layout) {
        match field.value {
            Some(value) => println!("  {:>+5}  {:<12} {}", field.offset, field.name, value),
            None => println!("  {:>+5}  {:<12} (unreadable)", field.offset, field.name),
        }
    }
}
