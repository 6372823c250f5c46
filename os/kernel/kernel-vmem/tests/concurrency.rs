mod common;

use common::{Machine, map_page, pa, run_on, va};
use kernel_memory_addresses::PAGE_SIZE;
use kernel_vmem::{KernelRootSlice, MemoryType, NonBlockingTranslationMap, PageFlags, Protection, TranslationMap};
use std::sync::Barrier;
use std::thread;

const PAGES: u64 = 64;
const BASE: u64 = 0x40_0000;
const FRAMES: u64 = 0x9000_0000;

#[test]
fn protect_and_unmap_race_without_losing_entries() {
    let m = Machine::new(4);
    let map = TranslationMap::new_user(&m, KernelRootSlice::empty());
    for cpu in 0..4 {
        map.activate_on(cpu);
    }
    for i in 0..PAGES {
        map_page(&map, &m, BASE + i * PAGE_SIZE, FRAMES + i * PAGE_SIZE, Protection::READ | Protection::WRITE);
    }
    let end = va(BASE + PAGES * PAGE_SIZE);
    let barrier = Barrier::new(4);

    thread::scope(|s| {
        for cpu in 0..2 {
            let (map, barrier) = (&map, &barrier);
            s.spawn(move || {
                run_on(cpu);
                barrier.wait();
                for round in 0..50 {
                    let protection = if round % 2 == 0 {
                        Protection::READ
                    } else {
                        Protection::READ | Protection::WRITE
                    };
                    map.protect(va(BASE), end, protection, MemoryType::default()).unwrap();
                }
            });
        }

        let (map, barrier) = (&map, &barrier);
        s.spawn(move || {
            run_on(2);
            barrier.wait();
            // Every odd page.
            for i in (1..PAGES).step_by(2) {
                let at = va(BASE + i * PAGE_SIZE);
                map.unmap(at, at + PAGE_SIZE);
            }
        });

        s.spawn(move || {
            run_on(3);
            barrier.wait();
            for _ in 0..20 {
                for i in 0..PAGES {
                    let at = va(BASE + i * PAGE_SIZE);
                    map.set_flags(at, PageFlags::ACCESSED);
                    let q = map.query(at);
                    if q.is_present() {
                        assert_eq!(q.physical_address, pa(FRAMES + i * PAGE_SIZE));
                    }
                }
            }
        });
    });

    let mut remaining = 0;
    map.for_each_mapping(|at, pte| {
        let index = (at.as_u64() - BASE) / PAGE_SIZE;
        assert_eq!(index % 2, 0, "odd page {at} survived");
        assert_eq!(pte.physical_address(), pa(FRAMES + index * PAGE_SIZE));
        assert!(pte.read());
        remaining += 1;
    });
    assert_eq!(remaining, PAGES as usize / 2);
    assert_eq!(map.mapped_page_count(), remaining);
    assert_eq!(map.pending_invalidations(), 0);
}

#[test]
fn concurrent_mapping_into_one_tree() {
    let m = Machine::new(4);
    let map = TranslationMap::new_user(&m, KernelRootSlice::empty());

    thread::scope(|s| {
        for cpu in 0..4u64 {
            let (map, m) = (&map, &m);
            s.spawn(move || {
                run_on(cpu as usize);
                for i in 0..16 {
                    // Spread over several leaf and middle tables.
                    let at = (cpu << 30) + i * 0x20_0000;
                    map_page(map, m, at, FRAMES + (cpu * 16 + i) * PAGE_SIZE, Protection::READ);
                }
            });
        }
    });

    assert_eq!(map.mapped_page_count(), 64);
    // Root, four middle tables, one leaf table per page.
    assert_eq!(map.table_page_count(), 1 + 4 + 64);
    for cpu in 0..4u64 {
        for i in 0..16 {
            let q = map.query(va((cpu << 30) + i * 0x20_0000));
            assert_eq!(q.physical_address, pa(FRAMES + (cpu * 16 + i) * PAGE_SIZE));
        }
    }
}
