mod common;

use common::{Event, Machine, Request, map_page, run_on, va};
use kernel_vmem::{
    CpuSet, KernelRootSlice, MemoryType, NonBlockingTranslationMap, PageFlags, Protection, TranslationMap,
};

const KERNEL_VA: u64 = 0xffff_ffc0_0000_0000;

fn cpus(ids: &[usize]) -> CpuSet {
    ids.iter().copied().collect()
}

#[test]
fn kernel_flush_reaches_every_other_cpu() {
    let m = Machine::new(4);
    let map = TranslationMap::new_kernel(&m, None);
    map_page(&map, &m, KERNEL_VA, 0x9000_0000, Protection::KERNEL_READ);
    map.set_flags(va(KERNEL_VA), PageFlags::ACCESSED);
    assert_eq!(
        m.take_events(),
        vec![Event::Shootdown {
            from: 0,
            targets: cpus(&[1, 2, 3]),
            request: Request::Pages(vec![va(KERNEL_VA)]),
        }]
    );

    map.unmap(va(KERNEL_VA), va(KERNEL_VA + 0x1000));
    assert_eq!(
        m.take_events(),
        vec![
            Event::LocalPages {
                cpu: 0,
                pages: vec![va(KERNEL_VA)]
            },
            Event::Shootdown {
                from: 0,
                targets: cpus(&[1, 2, 3]),
                request: Request::Pages(vec![va(KERNEL_VA)]),
            },
        ]
    );
}

#[test]
fn user_flush_targets_only_cpus_running_the_map() {
    let m = Machine::new(4);
    let map = TranslationMap::new_user(&m, KernelRootSlice::empty());
    map.activate_on(0);
    map.activate_on(2);
    assert_eq!(map.active_cpus(), cpus(&[0, 2]));

    map_page(&map, &m, 0x1000, 0x9000_0000, Protection::READ);
    map.set_flags(va(0x1000), PageFlags::ACCESSED);
    m.take_events();

    map.unmap(va(0x1000), va(0x2000));
    assert_eq!(
        m.take_events(),
        vec![
            Event::LocalPages {
                cpu: 0,
                pages: vec![va(0x1000)]
            },
            Event::Shootdown {
                from: 0,
                targets: cpus(&[2]),
                request: Request::Pages(vec![va(0x1000)]),
            },
        ]
    );

    map.deactivate_on(2);
    map_page(&map, &m, 0x1000, 0x9000_0000, Protection::READ);
    map.set_flags(va(0x1000), PageFlags::ACCESSED);
    map.unmap(va(0x1000), va(0x2000));
    assert_eq!(
        m.take_events(),
        vec![Event::LocalPages {
            cpu: 0,
            pages: vec![va(0x1000)]
        }]
    );
}

#[test]
fn flush_from_another_cpu_excludes_that_cpu() {
    let m = Machine::new(3);
    let map = TranslationMap::new_kernel(&m, None);
    map_page(&map, &m, KERNEL_VA, 0x9000_0000, Protection::KERNEL_READ);
    map.set_flags(va(KERNEL_VA), PageFlags::ACCESSED);
    m.take_events();

    std::thread::scope(|s| {
        s.spawn(|| {
            run_on(2);
            map.unmap(va(KERNEL_VA), va(KERNEL_VA + 0x1000));
        });
    });
    assert_eq!(
        m.take_events(),
        vec![
            Event::LocalPages {
                cpu: 2,
                pages: vec![va(KERNEL_VA)]
            },
            Event::Shootdown {
                from: 2,
                targets: cpus(&[0, 1]),
                request: Request::Pages(vec![va(KERNEL_VA)]),
            },
        ]
    );
}

#[test]
fn overflowing_the_batch_invalidates_everything() {
    let m = Machine::new(2);
    let map: TranslationMap<'_, Machine, 4> = TranslationMap::kernel_with_capacity(&m, None);
    for i in 0..6 {
        let at = KERNEL_VA + i * 0x1000;
        map_page(&map, &m, at, 0x9000_0000 + i * 0x1000, Protection::KERNEL_READ);
        map.set_flags(va(at), PageFlags::ACCESSED);
    }
    m.take_events();

    map.unmap(va(KERNEL_VA), va(KERNEL_VA + 6 * 0x1000));
    assert_eq!(
        m.take_events(),
        vec![
            Event::LocalAll {
                cpu: 0,
                include_global: true
            },
            Event::Shootdown {
                from: 0,
                targets: cpus(&[1]),
                request: Request::All { include_global: true },
            },
        ]
    );
    assert_eq!(map.pending_invalidations(), 0);
}

#[test]
fn user_global_invalidation_spares_global_entries() {
    let m = Machine::new(2);
    let map: TranslationMap<'_, Machine, 2> = TranslationMap::user_with_capacity(&m, KernelRootSlice::empty());
    map.activate_on(1);
    for i in 0..3 {
        let at = 0x1000 + i * 0x1000;
        map_page(&map, &m, at, 0x9000_0000, Protection::READ);
        map.set_flags(va(at), PageFlags::ACCESSED);
    }
    m.take_events();

    map.unmap(va(0x1000), va(0x4000));
    assert_eq!(
        m.take_events(),
        vec![
            Event::LocalAll {
                cpu: 0,
                include_global: false
            },
            Event::Shootdown {
                from: 0,
                targets: cpus(&[1]),
                request: Request::All { include_global: false },
            },
        ]
    );
}

#[test]
fn executable_mappings_fence_instruction_fetch() {
    let m = Machine::new(2);
    let map = TranslationMap::new_user(&m, KernelRootSlice::empty());
    map.activate_on(0);
    map.activate_on(1);

    map_page(&map, &m, 0x1000, 0x9000_0000, Protection::READ | Protection::EXECUTE);
    assert_eq!(
        m.take_events(),
        vec![
            Event::LocalFenceInstructions { cpu: 0 },
            Event::Shootdown {
                from: 0,
                targets: cpus(&[1]),
                request: Request::FenceInstructions,
            },
        ]
    );

    // Downgrading to non-executable does not.
    map.protect(va(0x1000), va(0x2000), Protection::READ, MemoryType::default())
        .unwrap();
    assert!(m.take_events().is_empty());
}

#[test]
fn locker_defers_the_flush_until_released() {
    let m = Machine::new(1);
    let map = TranslationMap::new_user(&m, KernelRootSlice::empty());
    for at in [0x1000, 0x2000, 0x3000] {
        map_page(&map, &m, at, 0x9000_0000, Protection::READ | Protection::WRITE);
        map.set_flags(va(at), PageFlags::ACCESSED);
    }

    {
        let locker = map.lock();
        assert_eq!(locker.depth(), 1);
        map.unmap(va(0x1000), va(0x2000));
        map.protect(va(0x2000), va(0x3000), Protection::READ, MemoryType::default())
            .unwrap();
        map.clear_flags(va(0x3000), PageFlags::ACCESSED);

        assert_eq!(map.pending_invalidations(), 3);
        assert!(m.take_events().is_empty());
    }

    assert_eq!(
        m.take_events(),
        vec![Event::LocalPages {
            cpu: 0,
            pages: vec![va(0x1000), va(0x2000), va(0x3000)]
        }]
    );
    assert_eq!(map.pending_invalidations(), 0);
}

#[test]
fn repeated_updates_of_one_page_stay_a_page_list() {
    let m = Machine::new(1);
    let map: TranslationMap<'_, Machine, 4> = TranslationMap::user_with_capacity(&m, KernelRootSlice::empty());
    map_page(&map, &m, 0x1000, 0x9000_0000, Protection::READ);
    m.take_events();

    {
        let _locker = map.lock();
        for _ in 0..5 {
            map.clear_flags(va(0x1000), PageFlags::ACCESSED);
        }
        assert_eq!(map.pending_invalidations(), 1);
    }

    assert_eq!(
        m.take_events(),
        vec![Event::LocalPages {
            cpu: 0,
            pages: vec![va(0x1000)]
        }]
    );
}

#[test]
fn explicit_unlock_flushes() {
    let m = Machine::new(1);
    let map = TranslationMap::new_user(&m, KernelRootSlice::empty());
    map_page(&map, &m, 0x1000, 0x9000_0000, Protection::READ);
    map.set_flags(va(0x1000), PageFlags::ACCESSED);

    let outer = map.lock();
    let inner = map.lock();
    assert_eq!(inner.depth(), 2);
    map.unmap(va(0x1000), va(0x2000));
    inner.unlock();
    assert!(m.take_events().is_empty());
    outer.unlock();
    assert_eq!(m.take_events().len(), 1);
}

#[test]
fn flushing_nothing_does_nothing() {
    let m = Machine::new(4);
    let map = TranslationMap::new_kernel(&m, None);
    map.flush();
    map_page(&map, &m, KERNEL_VA, 0x9000_0000, Protection::KERNEL_READ);
    map.unmap(va(KERNEL_VA), va(KERNEL_VA + 0x1000));
    map.flush();
    assert!(m.take_events().is_empty());
}
