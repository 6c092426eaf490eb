//! Target-process memory access.
//!
//! Everything the scanners need from a foreign process is expressed as two
//! traits: [`ReadMemory`] for raw reads and [`ProcessMemory`] for the region
//! query primitive and the loaded-module list. The Windows implementation lives
//! in [`process`]; [`mock`] provides an in-memory process for tests.

mod module;
mod process;
mod reader;
pub mod region;

// Mock process for unit and integration tests
#[doc(hidden)]
pub mod mock;

pub use module::{ModuleInfo, ModuleMap};
pub use process::*;
pub use reader::{ProcessMemory, ReadMemory};
pub use region::{MemoryRegion, RegionFilter, RegionInfo, enumerate_regions, read_region};

#[doc(hidden)]
pub use mock::{MockMemoryBuilder, MockMemoryReader};
