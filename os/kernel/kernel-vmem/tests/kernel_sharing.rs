mod common;

use common::{Machine, map_page, pa, va};
use kernel_alloc::PhysicalPageAllocator;
use kernel_info::memory::KERNEL_BASE;
use kernel_memory_addresses::PAGE_SIZE;
use kernel_vmem::walker::KERNEL_ROOT_SLOTS;
use kernel_vmem::{PageFlags, Protection, TranslationMap};

fn kernel_with_tables(m: &Machine) -> TranslationMap<'_, Machine> {
    let map = TranslationMap::new_kernel(m, None);
    let mut reservation = m.allocator().reserve(1 + KERNEL_ROOT_SLOTS).unwrap();
    map.preallocate_kernel_tables(&mut reservation);
    assert!(reservation.is_empty());
    m.allocator().unreserve(reservation);
    map
}

#[test]
fn preallocation_fills_every_kernel_root_slot() {
    let m = Machine::new(1);
    let kernel = kernel_with_tables(&m);
    assert_eq!(kernel.table_page_count(), 1 + KERNEL_ROOT_SLOTS);
    assert_eq!(kernel.shared_root_slice().len(), KERNEL_ROOT_SLOTS);

    // Kernel mappings now only ever need a leaf table.
    let at = va(KERNEL_BASE);
    assert_eq!(kernel.max_pages_needed_to_map(at, at + PAGE_SIZE), 2);
    map_page(&kernel, &m, KERNEL_BASE, 0x9000_0000, Protection::KERNEL_READ);
    assert_eq!(kernel.table_page_count(), 2 + KERNEL_ROOT_SLOTS);
}

#[test]
fn user_maps_see_later_kernel_mappings() {
    let m = Machine::new(1);
    let kernel = kernel_with_tables(&m);
    let user = TranslationMap::new_user(&m, kernel.shared_root_slice());

    map_page(&user, &m, 0x1000, 0x9000_0000, Protection::READ);
    assert_eq!(user.table_page_count(), 3);

    map_page(&kernel, &m, KERNEL_BASE + 0x20_0000, 0x9000_1000, Protection::KERNEL_READ | Protection::KERNEL_WRITE);
    let q = user.query(va(KERNEL_BASE + 0x20_0000));
    assert_eq!(q.physical_address, pa(0x9000_1000));
    assert_eq!(q.flags, PageFlags::PRESENT | PageFlags::KERNEL_READ | PageFlags::KERNEL_WRITE);

    // The user map only reports and counts what it owns.
    let mut own = Vec::new();
    user.for_each_mapping(|at, _| own.push(at));
    assert_eq!(own, vec![va(0x1000)]);
    assert_eq!(user.mapped_page_count(), 1);
}

#[test]
fn dropping_a_user_map_leaves_the_kernel_half_alone() {
    let m = Machine::new(1);
    let kernel = kernel_with_tables(&m);
    map_page(&kernel, &m, KERNEL_BASE, 0x9000_0000, Protection::KERNEL_READ);
    let free = m.allocator().free_count();

    {
        let user = TranslationMap::new_user(&m, kernel.shared_root_slice());
        map_page(&user, &m, 0x1000, 0x9000_1000, Protection::READ);
        map_page(&user, &m, 0x3f_c000_0000, 0x9000_2000, Protection::READ);
        assert_eq!(m.allocator().free_count(), free - 5);
    }

    assert_eq!(m.allocator().free_count(), free);
    assert_eq!(kernel.query(va(KERNEL_BASE)).physical_address, pa(0x9000_0000));
    assert_eq!(kernel.table_page_count(), 2 + KERNEL_ROOT_SLOTS);
}

#[test]
fn slots_filled_after_capture_are_not_shared() {
    let m = Machine::new(1);
    let kernel = TranslationMap::new_kernel(&m, None);
    map_page(&kernel, &m, KERNEL_BASE, 0x9000_0000, Protection::KERNEL_READ);
    let slice = kernel.shared_root_slice();
    assert_eq!(slice.len(), 1);

    // Next root slot, created after the capture.
    let late = KERNEL_BASE + (1 << 30);
    map_page(&kernel, &m, late, 0x9000_1000, Protection::KERNEL_READ);

    let user = TranslationMap::new_user(&m, slice);
    map_page(&user, &m, 0x1000, 0x9000_2000, Protection::READ);
    assert!(user.query(va(KERNEL_BASE)).is_present());
    assert!(!user.query(va(late)).is_present());
}

#[test]
fn kernel_map_without_tables_shares_nothing() {
    let m = Machine::new(1);
    let kernel = TranslationMap::new_kernel(&m, None);
    assert!(kernel.shared_root_slice().is_empty());
}

#[test]
fn adopted_boot_tables_outlive_the_map() {
    let m = Machine::new(1);
    let boot = kernel_with_tables(&m);
    map_page(&boot, &m, KERNEL_BASE, 0x9000_0000, Protection::KERNEL_READ);
    let root = boot.root().unwrap();
    let free = m.allocator().free_count();

    {
        let kernel = TranslationMap::new_kernel(&m, Some(root));
        assert_eq!(kernel.root(), Some(root));
        assert_eq!(kernel.table_page_count(), 0);
        assert_eq!(kernel.query(va(KERNEL_BASE)).physical_address, pa(0x9000_0000));
    }

    assert_eq!(m.allocator().free_count(), free);
    assert_eq!(boot.table_page_count(), 2 + KERNEL_ROOT_SLOTS);
    assert_eq!(boot.query(va(KERNEL_BASE)).physical_address, pa(0x9000_0000));
}
