mod commands;
mod input;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use memanchor_core::config::ScanConfigBuilder;
use memanchor_core::{DEFAULT_CONFIG_FILE, DEFAULT_LAYOUT_FILE, FieldLayout, ScanConfig};
use tracing_subscriber::EnvFilter;

/// Executable name of the game client.
const DEFAULT_PROCESS: &str = "tthola.dat";

#[derive(Parser)]
#[command(name = "memanchor")]
#[command(about = "Locate a live game record and its static pointer chains")]
struct Cli {
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Field layout knowledge file
    #[arg(short, long, default_value = DEFAULT_LAYOUT_FILE)]
    layout: PathBuf,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Which process to attach to.
#[derive(Args, Clone)]
pub struct TargetArgs {
    /// Process ID (skips the name lookup)
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Executable name to search for
    #[arg(long = "process", default_value = DEFAULT_PROCESS)]
    pub process_name: String,
}

/// What record to look for.
#[derive(Args, Clone)]
pub struct LocateArgs {
    /// A value the record currently holds in its primary field
    pub value: i32,

    /// Extra exact-match filters, e.g. `level=7`
    pub filters: Vec<String>,

    /// Search the shifted layout (maximum before current)
    #[arg(long)]
    pub shifted: bool,

    /// Retry with the shifted layout when the primary finds nothing
    #[arg(long)]
    pub compat: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Locate the record once and print its fields
    Locate {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        locate: LocateArgs,
        /// List every address holding the value, without verification
        #[arg(long)]
        all: bool,
    },
    /// Find records by structure alone, without a known value
    Detect {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Print the current map name
    Map {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Locate the record and keep tracking it
    Watch {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        locate: LocateArgs,
    },
    /// List the inventory slot array
    Inventory {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List the warehouse slot array
    Warehouse {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Find pointer chains that hold across several running instances
    Chain {
        /// Instances as `pid:value`, one per running client
        #[arg(required = true)]
        targets: Vec<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Save the first chain's current-field constant to this file
        #[arg(long)]
        save: Option<PathBuf>,
        /// Override the configured pointer depth
        #[arg(long)]
        max_levels: Option<usize>,
        /// Override the configured per-hop offset range
        #[arg(long)]
        search_range: Option<u64>,
    },
    /// Read a value through a saved chain
    ReadChain {
        #[command(flatten)]
        target: TargetArgs,
        /// Saved chain file
        file: PathBuf,
    },
    /// List running processes matching the executable name
    Ps {
        #[arg(default_value = DEFAULT_PROCESS)]
        name: String,
    },
    /// Summarize scannable memory regions
    Regions {
        #[command(flatten)]
        target: TargetArgs,
        /// Print every region
        #[arg(long)]
        list: bool,
    },
    /// Dump raw memory bytes
    Hexdump {
        #[command(flatten)]
        target: TargetArgs,
        /// Address in hex
        address: String,
        #[arg(short, long, default_value_t = 256)]
        size: usize,
        /// Show ASCII column
        #[arg(long)]
        ascii: bool,
    },
    /// Int32 table around a record anchor
    Dump {
        #[command(flatten)]
        target: TargetArgs,
        /// Anchor address in hex
        anchor: String,
        /// Write the table as JSON instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "memanchor=debug"
    } else {
        "memanchor=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let config = ScanConfig::load_or_default(&cli.config);
    let layout = FieldLayout::load_or_builtin(&cli.layout);

    match cli.command {
        Command::Locate {
            target,
            locate,
            all,
        } => commands::locate::run(&target, &locate, all, &config, &layout),
        Command::Detect { target } => commands::locate::run_detect(&target, &config, &layout),
        Command::Map { target } => commands::locate::run_map(&target, &config),
        Command::Watch { target, locate } => commands::watch::run(&target, &locate, config, layout),
        Command::Inventory { target } => commands::slots::run_inventory(&target, &config),
        Command::Warehouse { target } => commands::slots::run_warehouse(&target, &config),
        Command::Chain {
            targets,
            json,
            save,
            max_levels,
            search_range,
        } => {
            let mut builder = ScanConfigBuilder::from_config(config);
            if let Some(levels) = max_levels {
                builder = builder.max_levels(levels);
            }
            if let Some(range) = search_range {
                builder = builder.search_range(range);
            }
            commands::chain::run(&targets, json, save.as_deref(), &builder.build())
        }
        Command::ReadChain { target, file } => commands::chain::run_read(&target, &file),
        Command::Ps { name } => commands::processes::run(&name),
        Command::Regions { target, list } => commands::regions::run(&target, list, &config),
        Command::Hexdump {
            target,
            address,
            size,
            ascii,
        } => commands::hexdump::run(&target, &address, size, ascii),
        Command::Dump {
            target,
            anchor,
            output,
        } => commands::dump::run(&target, &anchor, output.as_deref(), &layout),
    }
}
