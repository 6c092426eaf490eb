//! Record and slot-array scanning.

pub mod locator;
pub mod pattern;
pub mod slots;
pub mod verify;

pub use locator::{
    Candidate, LocateRequest, RecordLocator, find_value_addresses, locate_map_name,
    read_record_name,
};
pub use slots::{ArrayLimits, SlotArray, SlotEntry, SlotScanner, SlotSignature};
pub use verify::{LayoutVariant, RecordProfile, Verification};

/// `anchor + offset`, or `None` when it leaves the address space.
pub fn offset_address(anchor: u64, offset: i64) -> Option<u64> {
    anchor.checked_add_signed(offset)
}
