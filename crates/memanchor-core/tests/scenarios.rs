use std::collections::BTreeMap;

use memanchor_core::chain::{ChainIntersector, FieldLabel, PointerChain, ProcessTarget};
use memanchor_core::config::ChainConfig;
use memanchor_core::memory::{MockMemoryBuilder, MockMemoryReader, RegionFilter};
use memanchor_core::scan::slots::SLOT_STRIDE;
use memanchor_core::scan::{ArrayLimits, LocateRequest, RecordLocator, RecordProfile, SlotScanner};
use memanchor_core::{Error, FieldLayout, build_reports, parse_filters, resolve_filters};

const HEAP: u64 = 0x0100_0000;

fn scenario_process() -> MockMemoryReader {
    let anchor = HEAP + 228;
    MockMemoryBuilder::new()
        .region(HEAP, vec![0u8; 1024])
        .write_i32(anchor, 287)
        .write_i32(anchor + 4, 287)
        .write_i32(anchor + 8, 100)
        .write_i32(anchor + 12, 100)
        .write_i32(anchor + 24, 0)
        .write_i32(anchor + 28, 1000)
        .write_i32(anchor - 36, 99)
        .build()
}

#[test]
fn locate_scenario_with_and_without_filter() {
    let process = scenario_process();
    let profile = RecordProfile::default();
    let filter = RegionFilter::default();
    let locator = RecordLocator::new(&process, &profile, &filter);

    let found = locator.locate(&LocateRequest::new(287)).unwrap();
    assert_eq!(found.address - HEAP, 228);

    let layout = FieldLayout::builtin();
    let filters = resolve_filters(&parse_filters(&["level=7"]).unwrap(), &layout).unwrap();
    assert_eq!(filters, BTreeMap::from([(-36, 7)]));
    let err = locator
        .locate(&LocateRequest::new(287).with_filters(filters))
        .unwrap_err();
    assert!(matches!(err, Error::NoCandidateFound(287)));
}

#[test]
fn locate_is_idempotent() {
    let process = scenario_process();
    let profile = RecordProfile::default();
    let filter = RegionFilter::default();
    let locator = RecordLocator::new(&process, &profile, &filter);

    let first = locator.locate(&LocateRequest::new(287)).unwrap();
    let second = locator.locate(&LocateRequest::new(287)).unwrap();
    assert_eq!(first.address, second.address);
    assert_eq!(first.score, second.score);
}

#[test]
fn two_slot_arrays_are_found_and_read() {
    let qty = 0x0100_0000u64;
    let slots = 0x0200_0000u64;
    let stride = SLOT_STRIDE as u64;
    let process = MockMemoryBuilder::new()
        .region(qty, vec![0u8; 0x100])
        .region(slots, vec![0u8; SLOT_STRIDE * 200])
        .build();

    let mut next_qty = qty;
    let mut write_slot = |entry: u64, id: i32| {
        process.set_i32(entry, id);
        process.set_u32(entry + 4, next_qty as u32);
        process.set_i32(next_qty, id % 100);
        next_qty += 4;
    };

    let first = slots + 64;
    for (i, id) in [1001, 1002, 1003].into_iter().enumerate() {
        write_slot(first + i as u64 * stride, id);
    }
    // Stray item after a long empty streak is not part of the array
    write_slot(first + 8 * stride, 1004);

    let second = slots + 64 + 100 * stride;
    write_slot(second, 2001);
    write_slot(second + stride, 2002);
    process.set_i32(second + 2 * stride, 70_000);
    write_slot(second + 3 * stride, 2003);

    // Unrelated bytes between the arrays
    process.set_bytes(slots + 90 * stride, &[0xAB; 256]);

    let filter = RegionFilter::default();
    let scanner = SlotScanner::new(&process, &filter);
    assert_eq!(scanner.find_all_arrays(), vec![first, second]);

    let ids = |start: u64| -> Vec<i32> {
        scanner
            .read_array(start, ArrayLimits::INVENTORY)
            .entries
            .iter()
            .map(|e| e.item_id)
            .collect()
    };
    assert_eq!(ids(first), vec![1001, 1002, 1003]);
    assert_eq!(ids(second), vec![2001, 2002]);

    let array = scanner.read_array(first, ArrayLimits::INVENTORY);
    assert_eq!(array.entries[1].quantity, 2);
}

const MODULE: u64 = 0x0040_0000;

/// Module with two static slots: 0x810 always reaches the value, 0x900 only
/// when `stable_second` is set.
fn chain_process(pid: u32, heap: u64, value: i32, stable_second: bool) -> MockMemoryReader {
    let second = if stable_second { heap } else { heap + 0x800 };
    MockMemoryBuilder::new()
        .pid(pid)
        .region(MODULE, vec![0u8; 0x1000])
        .module("game.exe", MODULE, 0x1000)
        .region(heap, vec![0u8; 0x1000])
        .write_u32(MODULE + 0x810, heap as u32)
        .write_u32(MODULE + 0x900, second as u32)
        .write_i32(heap + 0x140, value)
        .write_i32(heap + 0x150, value)
        .build()
}

#[test]
fn intersection_keeps_only_chains_valid_everywhere() {
    let targets = vec![
        ProcessTarget {
            process: chain_process(100, 0x0100_0000, 287, true),
            expected: 287,
        },
        ProcessTarget {
            process: chain_process(200, 0x0300_0000, 500, false),
            expected: 500,
        },
    ];

    let filter = RegionFilter::default();
    let config = ChainConfig::default();
    let chains = ChainIntersector::new(&filter, &config).run(&targets).unwrap();

    let stable = PointerChain::new("game.exe", 0x810, vec![0x140]);
    let unstable = PointerChain::new("game.exe", 0x900, vec![0x140]);
    assert!(chains.iter().any(|c| c.chain == stable));
    assert!(chains.iter().all(|c| c.chain != unstable));

    let x = chains.iter().find(|c| c.chain == stable).unwrap();
    // Equal neighbour at +0x10 in both instances
    assert_eq!(x.label, FieldLabel::Maximum);
    assert_eq!(x.checks.len(), 2);
    assert!(x.checks.iter().all(|c| c.matches_expected));
    assert_eq!(x.checks[1].observed_value, Some(500));

    let reports = build_reports(&chains, config.module_load_offset);
    let report = reports
        .iter()
        .find(|r| r.module_offset == 0x810 && r.field == FieldLabel::Maximum)
        .unwrap();
    assert_eq!(report.links, vec![0x140]);
    assert_eq!(report.suggested.base, 0x0040_0810);
    assert_eq!(report.suggested.maximum_offsets, vec![0x140]);
}

#[test]
fn intersection_drops_chain_that_breaks_in_one_instance() {
    let targets = vec![
        ProcessTarget {
            process: chain_process(100, 0x0100_0000, 287, true),
            expected: 287,
        },
        ProcessTarget {
            process: chain_process(200, 0x0300_0000, 500, true),
            expected: 500,
        },
    ];
    let filter = RegionFilter::default();
    let config = ChainConfig::default();
    let intersector = ChainIntersector::new(&filter, &config);

    let scans = intersector.scan(&targets).unwrap();
    let stable = PointerChain::new("game.exe", 0x810, vec![0x140]);
    let second = PointerChain::new("game.exe", 0x900, vec![0x140]);
    let before = intersector.intersect(&targets, &scans);
    assert!(before.iter().any(|c| c.chain == second));

    // second instance frees the object behind 0x900 after discovery
    targets[1].process.set_u32(MODULE + 0x900, 0);

    let after = intersector.intersect(&targets, &scans);
    assert!(after.iter().all(|c| c.chain != second));
    assert!(after.iter().any(|c| c.chain == stable));
}
