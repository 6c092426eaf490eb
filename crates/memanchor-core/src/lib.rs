//! # memanchor-core
//!
//! Locates a live game record in a 32-bit process from one known value, and
//! finds static pointer chains that reach it across restarts.
//!
//! This crate provides:
//! - Region enumeration and raw reads through injected process capabilities
//! - Record location with structural scoring (primary and shifted layouts)
//! - Fixed-stride slot array scanning (inventory, warehouse)
//! - Reverse pointer-chain discovery and cross-process intersection
//! - A live tracking session with automatic relocation
//!
//! ## Feature Flags
//!
//! - `debug-tools`: Enables the record dump used when mapping new fields.

pub mod chain;
pub mod config;
#[cfg(feature = "debug-tools")]
pub mod dump;
pub mod error;
pub mod layout;
pub mod memory;
pub mod report;
pub mod scan;
pub mod session;

pub use chain::{
    ChainDiscoverer, ChainIntersector, ClassifiedChain, DiscoveredChain, FieldLabel, FixedChain,
    InstanceCheck, PointerChain, ProcessTarget, read_via_chain, resolve_chain,
};
pub use config::{DEFAULT_CONFIG_FILE, ScanConfig};
pub use error::{Error, Result};
pub use layout::{
    DEFAULT_LAYOUT_FILE, DecodedField, FieldLayout, FieldSpec, parse_filters, read_fields,
    resolve_filters,
};
pub use memory::{
    MemoryRegion, ModuleMap, ProcessHandle, ProcessInfo, ProcessMemory, ReadMemory,
    RegionFilter, enumerate_regions, find_processes,
};
pub use report::{ChainReport, build_reports, format_slot_table, format_suggested};
pub use scan::{
    ArrayLimits, Candidate, LayoutVariant, LocateRequest, RecordLocator, RecordProfile, SlotArray,
    SlotScanner, locate_map_name, read_record_name,
};
pub use session::{
    Connector, FnConnector, PidConnector, SessionCommand, SessionEnd, SessionEvent, SessionSink,
    SessionState, ShutdownSignal, SlotKind, TrackingSession, Wake,
};

// Debug utilities (requires debug-tools feature)
#[cfg(feature = "debug-tools")]
pub use dump::{DUMP_AFTER, DUMP_BEFORE, RecordDump};
