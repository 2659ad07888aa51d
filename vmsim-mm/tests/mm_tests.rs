//! Memory management integration tests

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use vmsim_mm::{Error, MmConfig, MmSystem, PteState, Region, DEFAULT_AREA};

const PAGE: usize = 256;

fn system(ram_frames: usize, swap_frames: usize) -> Arc<MmSystem> {
    MmSystem::with_config(MmConfig::with_frames(ram_frames, swap_frames)).unwrap()
}

fn resident_fpn(state: PteState) -> Option<usize> {
    match state {
        PteState::Resident(fpn) => Some(fpn),
        _ => None,
    }
}

#[test]
fn test_six_pages_on_four_frames() {
    let sys = system(4, 4);
    let mut proc = sys.spawn(1).unwrap();

    for page in 0..4u8 {
        let symbol = page as usize;
        proc.allocate(PAGE).unwrap();
        proc.write(symbol, 0, 0x10 + page).unwrap();
        proc.write(symbol, PAGE - 1, 0x20 + page).unwrap();
    }
    assert_eq!(sys.stats().evictions, 0);

    // The 5th and 6th pages push out the two oldest-touched ones
    for page in 4..6u8 {
        let symbol = page as usize;
        proc.allocate(PAGE).unwrap();
        proc.write(symbol, 0, 0x10 + page).unwrap();
        proc.write(symbol, PAGE - 1, 0x20 + page).unwrap();
    }
    assert_eq!(sys.stats().evictions, 2);
    let pgd = proc.mm().pgd();
    assert!(pgd.get(0).unwrap().is_swapped());
    assert!(pgd.get(1).unwrap().is_swapped());
    for pgn in 2..6 {
        assert!(pgd.get(pgn).unwrap().is_resident());
    }

    // Re-faulting the evicted pages returns their original contents
    for page in 0..2u8 {
        let symbol = page as usize;
        assert_eq!(proc.read(symbol, 0).unwrap(), 0x10 + page);
        assert_eq!(proc.read(symbol, PAGE - 1).unwrap(), 0x20 + page);
    }
    assert!(proc.mm().pgd().get(0).unwrap().is_resident());
    assert!(proc.mm().pgd().get(1).unwrap().is_resident());
    assert_eq!(sys.stats().page_faults, 2);
}

#[test]
fn test_eviction_is_global_lru_across_processes() {
    let sys = system(4, 8);
    let mut a = sys.spawn(1).unwrap();
    let mut b = sys.spawn(2).unwrap();

    a.allocate(2 * PAGE).unwrap();
    b.allocate(2 * PAGE).unwrap();
    // Used order is now a:0, a:1, b:0, b:1; touching a:0 makes a:1 oldest
    a.read(0, 0).unwrap();

    b.allocate(PAGE).unwrap();
    assert!(a.mm().pgd().get(1).unwrap().is_swapped());
    assert!(a.mm().pgd().get(0).unwrap().is_resident());
    assert!(b.mm().pgd().get(0).unwrap().is_resident());
    assert!(b.mm().pgd().get(1).unwrap().is_resident());

    // Next victim is b:0, the oldest remaining frame
    let head = sys.ram().dump()[0];
    assert_eq!((head.owner, head.pgn), (b.mm().id(), 0));
    a.read(0, PAGE).unwrap();
    assert!(b.mm().pgd().get(0).unwrap().is_swapped());
}

#[test]
fn test_tlb_matches_page_table_after_access() {
    let sys = system(2, 8);
    let mut proc = sys.spawn(3).unwrap();
    for _ in 0..4 {
        proc.allocate(PAGE).unwrap();
    }
    for symbol in [0, 3, 1, 2, 0] {
        proc.write(symbol, 7, symbol as u8).unwrap();
        let pgn = proc.mm().symbol(symbol).unwrap().start / PAGE;
        let cached = sys.tlb().read(3, pgn).map(vmsim_mm::Pte::from_raw).unwrap();
        let entry = proc.mm().pgd().get(pgn).unwrap();
        assert_eq!(resident_fpn(cached.state()), resident_fpn(entry.state()));
        assert!(resident_fpn(entry.state()).is_some());
    }
}

#[test]
fn test_free_returns_frames_to_their_devices() {
    let sys = system(2, 4);
    let mut proc = sys.spawn(1).unwrap();
    proc.allocate(2 * PAGE).unwrap();
    proc.allocate(PAGE).unwrap();
    // Page 0 is on swap, page 1 in RAM
    assert!(matches!(proc.mm().pgd().get(0).unwrap().state(), PteState::Swapped { .. }));
    assert_eq!(sys.stats().swaps[0].free_frames, 3);

    proc.free(0).unwrap();
    let stats = sys.stats();
    assert_eq!(stats.ram.free_frames, 1);
    assert_eq!(stats.ram.used_frames, 1);
    assert_eq!(stats.swaps[0].free_frames, 4);
    assert!(proc.mm().pgd().get(0).unwrap().is_empty());
    assert!(proc.mm().pgd().get(1).unwrap().is_empty());
    assert_eq!(sys.tlb().read(1, 0), None);
    assert_eq!(sys.tlb().read(1, 1), None);
    assert_eq!(proc.mm().free_regions(DEFAULT_AREA).unwrap(), vec![Region::new(0, 2 * PAGE)]);
}

#[test]
fn test_over_capacity_allocation_changes_nothing() {
    let sys = system(2, 2);
    let mut proc = sys.spawn(1).unwrap();
    proc.allocate(2 * PAGE).unwrap();
    proc.write(0, 1, 0xee).unwrap();
    let table = proc.page_table(0, 64);
    let used = sys.ram().dump();

    let err = proc.allocate(5 * PAGE).unwrap_err();
    assert_eq!(err, Error::FrameExhausted);
    assert_eq!(err.code(), Error::FrameExhausted.code());
    assert_eq!(proc.page_table(0, 64), table);
    assert_eq!(sys.ram().dump(), used);
    assert_eq!(proc.mm().symbols().len(), 1);
    assert_eq!(proc.mm().vma(DEFAULT_AREA).unwrap().sbrk(), 2 * PAGE);
    assert_eq!(proc.read(0, 1).unwrap(), 0xee);
}

#[test]
fn test_exit_returns_everything() {
    let sys = system(2, 4);
    let mut proc = sys.spawn(9).unwrap();
    proc.allocate(2 * PAGE).unwrap();
    proc.allocate(2 * PAGE).unwrap();
    assert_eq!(sys.stats().swaps[0].free_frames, 2);

    proc.exit().unwrap();
    let stats = sys.stats();
    assert_eq!(stats.ram.free_frames, 2);
    assert_eq!(stats.swaps[0].free_frames, 4);
    assert_eq!(stats.processes, 0);
    assert_eq!(sys.tlb().read(9, 0), None);
}

#[test]
fn test_second_swap_device() {
    let config = MmConfig {
        swap_sizes: vec![4 * PAGE, 4 * PAGE],
        ..MmConfig::with_frames(1, 4)
    };
    let sys = MmSystem::with_config(config).unwrap();
    let mut proc = sys.spawn(1).unwrap();
    proc.set_active_swap(1).unwrap();
    proc.allocate(PAGE).unwrap();
    proc.write(0, 3, 0x33).unwrap();
    proc.allocate(PAGE).unwrap();

    assert_eq!(
        proc.mm().pgd().get(0).unwrap().state(),
        PteState::Swapped { swap_type: 1, swap_offset: 0 }
    );
    assert_eq!(sys.stats().swaps[0].free_frames, 4);
    assert_eq!(proc.read(0, 3).unwrap(), 0x33);
}

#[test]
fn test_config_from_memory_line() {
    let config: MmConfig = "0x800 0x1000 0 0 0".parse().unwrap();
    let sys = MmSystem::with_config(config).unwrap();
    assert_eq!(sys.ram().num_frames(), 8);
    assert_eq!(sys.swap_count(), 1);
}

#[test]
fn test_concurrent_processes() {
    let sys = system(64, 64);
    let handles: Vec<_> = (0..4u32)
        .map(|pid| {
            let sys = sys.clone();
            thread::spawn(move || {
                let mut proc = sys.spawn(pid).unwrap();
                for _ in 0..4 {
                    proc.allocate(PAGE).unwrap();
                }
                for round in 0..50usize {
                    for symbol in 0..4 {
                        let value = (pid as usize * 31 + round + symbol) as u8;
                        proc.write(symbol, round % PAGE, value).unwrap();
                        assert_eq!(proc.read(symbol, round % PAGE).unwrap(), value);
                    }
                }
                proc.exit().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let stats = sys.stats();
    assert_eq!(stats.ram.free_frames, 64);
    assert_eq!(stats.processes, 0);
}

#[test]
fn test_concurrent_eviction_conserves_frames() {
    // Each process alone needs more frames than RAM holds
    let sys = system(8, 64);
    let handles: Vec<_> = (0..4u32)
        .map(|pid| {
            let sys = sys.clone();
            thread::spawn(move || {
                let mut proc = sys.spawn(pid).unwrap();
                for _ in 0..12 {
                    proc.allocate(PAGE).unwrap();
                }
                for round in 0..20usize {
                    for symbol in 0..12 {
                        proc.write(symbol, round, pid as u8).unwrap();
                        proc.read((symbol + round) % 12, 0).unwrap();
                    }
                    if round == 10 {
                        proc.free(round % 12).unwrap();
                        proc.allocate(PAGE).unwrap();
                    }
                }
                proc.exit().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let stats = sys.stats();
    assert!(stats.evictions > 0);
    assert_eq!(stats.ram.free_frames, 8);
    assert_eq!(stats.ram.used_frames, 0);
    assert_eq!(stats.swaps[0].free_frames, 64);
    assert_eq!(stats.processes, 0);
}

proptest! {
    /// Every byte written reads back, whatever faults happened in between
    #[test]
    fn prop_round_trip_under_eviction(
        ops in prop::collection::vec((0usize..6, 0usize..PAGE, any::<u8>()), 1..80)
    ) {
        let sys = system(3, 8);
        let mut proc = sys.spawn(1).unwrap();
        for _ in 0..6 {
            proc.allocate(PAGE).unwrap();
        }
        let mut model = vec![[0u8; PAGE]; 6];
        for (symbol, offset, value) in &ops {
            proc.write(*symbol, *offset, *value).unwrap();
            model[*symbol][*offset] = *value;
        }
        for (symbol, offset, _) in &ops {
            prop_assert_eq!(proc.read(*symbol, *offset).unwrap(), model[*symbol][*offset]);
        }
    }

    /// After each access the TLB caches the page table's frame
    #[test]
    fn prop_tlb_consistent(symbols in prop::collection::vec(0usize..5, 1..40)) {
        let sys = system(2, 8);
        let mut proc = sys.spawn(4).unwrap();
        for _ in 0..5 {
            proc.allocate(PAGE).unwrap();
        }
        for symbol in symbols {
            proc.read(symbol, 0).unwrap();
            let pgn = symbol;
            let cached = sys.tlb().read(4, pgn).map(vmsim_mm::Pte::from_raw);
            let entry = proc.mm().pgd().get(pgn).unwrap();
            prop_assert!(entry.is_resident());
            prop_assert_eq!(cached.map(|pte| pte.fpn()), Some(entry.fpn()));
        }
    }
}
