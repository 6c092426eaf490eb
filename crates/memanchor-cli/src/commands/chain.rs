//! Cross-instance chain discovery and the fixed-chain fast path.

use std::path::Path;

use anyhow::{Result, bail};
use memanchor_core::chain::resolve_fixed;
use memanchor_core::report::reports_to_json;
use memanchor_core::{
    ChainIntersector, ChainReport, FieldLabel, FixedChain, ProcessHandle, ProcessTarget,
    ScanConfig, build_reports, format_suggested, read_via_chain,
};
use owo_colors::OwoColorize;

use super::hex_utils::parse_instance;
use super::open_target;
use crate::TargetArgs;

pub fn run(targets: &[String], json: bool, save: Option<&Path>, config: &ScanConfig) -> Result<()> {
    let mut instances = Vec::with_capacity(targets.len());
    for arg in targets {
        let (pid, expected) = parse_instance(arg)?;
        let process = ProcessHandle::open(pid)?;
        instances.push(ProcessTarget { process, expected });
    }

    let filter = config.memory.region_filter();
    let chains = ChainIntersector::new(&filter, &config.chain).run(&instances)?;
    let reports = build_reports(&chains, config.chain.module_load_offset);

    if json {
        println!("{}", reports_to_json(&reports)?);
    } else {
        print_reports(&reports);
    }

    if let Some(path) = save {
        let Some(first) = reports.first() else {
            bail!("No stable chain to save");
        };
        first.to_fixed_chain(FieldLabel::Current).save(path)?;
        println!("Saved {} to {}", first.notation, path.display());
    }
    Ok(())
}

fn print_reports(reports: &[ChainReport]) {
    if reports.is_empty() {
        println!("{}", "No chain survived every instance".red());
        return;
    }
    println!("{} stable chains:", reports.len());
    for (i, report) in reports.iter().enumerate() {
        println!();
        println!("[{}] {}  ({})", i + 1, report.notation.bold(), report.field);
        for check in &report.per_instance {
            let status = if check.matches_expected {
                "OK".green().to_string()
            } else {
                "FAIL".red().to_string()
            };
            let observed = check
                .observed_value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string());
            match check.resolved_address {
                Some(address) => println!(
                    "    pid {}: 0x{:08X} = {} (expected {}) {}",
                    check.pid, address, observed, check.expected, status
                ),
                None => println!("    pid {}: unresolved {}", check.pid, status),
            }
        }
        println!("    suggested: {}", format_suggested(&report.suggested));
    }
}

pub fn run_read(target: &TargetArgs, file: &Path) -> Result<()> {
    let chain = FixedChain::load(file)?;
    let process = open_target(target)?;

    let address = resolve_fixed(&process, &chain)?;
    match read_via_chain(&process, &chain) {
        Some(value) => println!("{} -> 0x{:08X} = {}", chain.notation(), address, value),
        None => println!(
            "{} -> 0x{:08X}: {}",
            chain.notation(),
            address,
            "value out of range".red()
        ),
    }
    Ok(())
}
