//! CLI command implementations.

pub mod chain;
pub mod dump;
pub mod hex_utils;
pub mod hexdump;
pub mod locate;
pub mod processes;
pub mod regions;
pub mod slots;
pub mod watch;

use anyhow::{Result, bail};
use memanchor_core::{
    FieldLayout, LayoutVariant, LocateRequest, ProcessHandle, find_processes, parse_filters,
    resolve_filters,
};
use tracing::warn;

use crate::{LocateArgs, TargetArgs};

/// Pid of the target, resolving the executable name when no pid was given.
pub fn target_pid(target: &TargetArgs) -> Result<u32> {
    if let Some(pid) = target.pid {
        return Ok(pid);
    }
    let found = find_processes(&target.process_name)?;
    let Some(first) = found.first() else {
        bail!("No running process named {}", target.process_name);
    };
    if found.len() > 1 {
        warn!(
            "{} processes named {}, using pid {} (pass --pid to choose)",
            found.len(),
            target.process_name,
            first.pid
        );
    }
    Ok(first.pid)
}

pub fn open_target(target: &TargetArgs) -> Result<ProcessHandle> {
    let process = ProcessHandle::open(target_pid(target)?)?;
    println!("Attached to process (PID: {})", process.pid);
    Ok(process)
}

pub fn build_request(args: &LocateArgs, layout: &FieldLayout) -> Result<LocateRequest> {
    let filters = resolve_filters(&parse_filters(&args.filters)?, layout)?;
    let variant = if args.shifted {
        LayoutVariant::Shifted
    } else {
        LayoutVariant::Primary
    };
    Ok(LocateRequest::new(args.value)
        .with_filters(filters)
        .with_variant(variant)
        .with_compat(args.compat))
}
