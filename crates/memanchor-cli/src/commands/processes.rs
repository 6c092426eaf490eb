//! Running instance listing.

use anyhow::Result;
use memanchor_core::find_processes;

pub fn run(name: &str) -> Result<()> {
    let found = find_processes(name)?;
    if found.is_empty() {
        println!("No running process named {}", name);
        return Ok(());
    }
    println!("{} running instance(s) of {}:", found.len(), name);
    for process in found {
        println!("  PID {:>6}  {}", process.pid, process.name);
    }
    Ok(())
}
