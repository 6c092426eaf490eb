//! Inventory and warehouse listings.

use anyhow::{Result, bail};
use memanchor_core::{ScanConfig, SlotScanner, format_slot_table};

use super::open_target;
use crate::TargetArgs;

pub fn run_inventory(target: &TargetArgs, config: &ScanConfig) -> Result<()> {
    let process = open_target(target)?;
    let filter = config.memory.region_filter();
    let scanner = SlotScanner::new(&process, &filter);

    let Some(inventory) = scanner.locate_inventory() else {
        bail!("Inventory not found in memory");
    };
    print!("{}", format_slot_table("Inventory", &inventory));
    Ok(())
}

pub fn run_warehouse(target: &TargetArgs, config: &ScanConfig) -> Result<()> {
    let process = open_target(target)?;
    let filter = config.memory.region_filter();
    let scanner = SlotScanner::new(&process, &filter);

    let inventory = scanner.locate_inventory().map(|array| array.start);
    let Some(warehouse) = scanner.locate_warehouse(inventory) else {
        bail!("Warehouse not found in memory (open it in game first)");
    };
    print!("{}", format_slot_table("Warehouse", &warehouse));
    Ok(())
}
