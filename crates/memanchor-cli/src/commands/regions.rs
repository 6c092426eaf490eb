//! Scannable region summary.

use anyhow::Result;
use memanchor_core::{ScanConfig, enumerate_regions};

use super::open_target;
use crate::TargetArgs;

pub fn run(target: &TargetArgs, list: bool, config: &ScanConfig) -> Result<()> {
    let process = open_target(target)?;
    let regions = enumerate_regions(&process, &config.memory.region_filter());

    if list {
        for region in &regions {
            println!(
                "  0x{:08X} - 0x{:08X}  {:>10} bytes",
                region.base,
                region.end(),
                region.size
            );
        }
    }

    let total: usize = regions.iter().map(|r| r.size).sum();
    println!(
        "{} regions, {} bytes ({:.1} MiB)",
        regions.len(),
        total,
        total as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}
