//! A simulated machine for exercising translation maps on the host.
//!
//! Physical memory is a heap buffer reached through an
//! [`OffsetPhysMapper`]; TLB maintenance and shootdowns are recorded as
//! [`Event`]s instead of executed.

#![allow(dead_code)]

use kernel_alloc::phys_mapper::OffsetPhysMapper;
use kernel_alloc::frame_alloc::BitmapPageAllocator;
use kernel_alloc::{PageState, PhysicalPageAllocator};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPageNumber, VirtualAddress};
use kernel_registers::satp::Satp;
use kernel_sync::InterruptControl;
use kernel_vmem::{
    AreaId, AreaWiring, CacheKind, CpuId, CpuSet, MappingRecord, MemoryType, PageStore, Platform, Protection,
    Shootdown, TranslationMap, VmArea,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub const RAM_BASE: PhysicalAddress = PhysicalAddress::new(0x8000_0000);
pub const RAM_PAGES: usize = 1024;

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD: NonZeroU64 = NonZeroU64::new(NEXT_THREAD.fetch_add(1, Ordering::Relaxed)).unwrap();
    static CPU: Cell<CpuId> = const { Cell::new(0) };
    static PINS: Cell<u32> = const { Cell::new(0) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Run the calling thread on `cpu` from now on.
pub fn run_on(cpu: CpuId) {
    CPU.with(|c| c.set(cpu));
}

/// Pin depth of the calling thread.
pub fn pin_depth() -> u32 {
    PINS.with(Cell::get)
}

/// Requests as they were delivered to other harts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Pages(Vec<VirtualAddress>),
    All { include_global: bool },
    FenceInstructions,
}

impl From<&Shootdown<'_>> for Request {
    fn from(value: &Shootdown<'_>) -> Self {
        match value {
            Shootdown::Pages(pages) => Self::Pages(pages.to_vec()),
            Shootdown::All { include_global } => Self::All {
                include_global: *include_global,
            },
            Shootdown::FenceInstructions => Self::FenceInstructions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LocalPages { cpu: CpuId, pages: Vec<VirtualAddress> },
    LocalAll { cpu: CpuId, include_global: bool },
    LocalFenceInstructions { cpu: CpuId },
    Shootdown { from: CpuId, targets: CpuSet, request: Request },
}

pub struct Machine {
    mapper: OffsetPhysMapper,
    allocator: BitmapPageAllocator<OffsetPhysMapper>,
    cpus: usize,
    satp: AtomicU64,
    events: Mutex<Vec<Event>>,
    // Last, so the window outlives everything pointing into it.
    _ram: Vec<Frame>,
}

impl Machine {
    pub fn new(cpus: usize) -> Self {
        let mut ram: Vec<Frame> = (0..RAM_PAGES).map(|_| Frame([0xA5; 4096])).collect();
        let mapper = OffsetPhysMapper::for_buffer(ram.as_mut_ptr().cast(), RAM_BASE, (RAM_PAGES * 4096) as u64);
        Self {
            mapper,
            allocator: BitmapPageAllocator::new(mapper, RAM_BASE, RAM_PAGES),
            cpus,
            satp: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
            _ram: ram,
        }
    }

    pub fn allocator(&self) -> &BitmapPageAllocator<OffsetPhysMapper> {
        &self.allocator
    }

    /// Pretend the current hart loaded `satp`.
    pub fn load_satp(&self, satp: Satp) {
        self.satp.store(satp.into_bits(), Ordering::Relaxed);
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn assert_interrupts_disabled(&self) {
        assert!(!self.interrupts_enabled(), "local TLB maintenance with interrupts enabled");
    }
}

impl InterruptControl for Machine {
    fn disable_interrupts(&self) -> bool {
        IRQ_ENABLED.with(|e| e.replace(false))
    }

    fn restore_interrupts(&self, were_enabled: bool) {
        if were_enabled {
            IRQ_ENABLED.with(|e| e.set(true));
        }
    }

    fn interrupts_enabled(&self) -> bool {
        IRQ_ENABLED.with(Cell::get)
    }
}

impl Platform for Machine {
    type Mapper = OffsetPhysMapper;
    type Allocator = BitmapPageAllocator<OffsetPhysMapper>;

    fn phys_mapper(&self) -> &Self::Mapper {
        &self.mapper
    }

    fn page_allocator(&self) -> &Self::Allocator {
        &self.allocator
    }

    fn current_cpu(&self) -> CpuId {
        CPU.with(Cell::get)
    }

    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn current_thread(&self) -> NonZeroU64 {
        THREAD.with(|t| *t)
    }

    fn pin_current_thread(&self) {
        PINS.with(|p| p.set(p.get() + 1));
    }

    fn unpin_current_thread(&self) {
        PINS.with(|p| {
            assert!(p.get() > 0, "unbalanced unpin");
            p.set(p.get() - 1);
        });
    }

    fn current_satp(&self) -> Satp {
        Satp::from_bits(self.satp.load(Ordering::Relaxed))
    }

    fn invalidate_local_pages(&self, pages: &[VirtualAddress]) {
        self.assert_interrupts_disabled();
        self.record(Event::LocalPages {
            cpu: self.current_cpu(),
            pages: pages.to_vec(),
        });
    }

    fn invalidate_local_all(&self, include_global: bool) {
        self.assert_interrupts_disabled();
        self.record(Event::LocalAll {
            cpu: self.current_cpu(),
            include_global,
        });
    }

    fn fence_instructions_local(&self) {
        self.assert_interrupts_disabled();
        self.record(Event::LocalFenceInstructions {
            cpu: self.current_cpu(),
        });
    }

    fn send_shootdown(&self, targets: CpuSet, request: &Shootdown<'_>) {
        self.record(Event::Shootdown {
            from: self.current_cpu(),
            targets,
            request: request.into(),
        });
    }
}

pub fn va(raw: u64) -> VirtualAddress {
    VirtualAddress::new(raw)
}

pub fn pa(raw: u64) -> PhysicalAddress {
    PhysicalAddress::new(raw)
}

pub fn ppn(raw_pa: u64) -> PhysicalPageNumber {
    PhysicalAddress::new(raw_pa).ppn()
}

/// Reserve what mapping one page needs, map it, and return the rest.
pub fn map_page<const N: usize>(
    map: &TranslationMap<'_, Machine, N>,
    machine: &Machine,
    at: u64,
    to: u64,
    protection: Protection,
) {
    let start = va(at);
    let mut reservation = machine
        .allocator()
        .reserve(map.max_pages_needed_to_map(start, start + PAGE_SIZE))
        .unwrap();
    map.map(start, pa(to), protection, MemoryType::default(), &mut reservation)
        .unwrap();
    machine.allocator().unreserve(reservation);
}

/// A minimal area description.
#[derive(Debug, Clone)]
pub struct TestArea {
    pub id: AreaId,
    pub base: VirtualAddress,
    pub size: u64,
    pub cache_offset: u64,
    pub wiring: AreaWiring,
    pub cache_kind: CacheKind,
}

impl TestArea {
    pub fn new(id: AreaId, base: u64, pages: u64) -> Self {
        Self {
            id,
            base: va(base),
            size: pages * PAGE_SIZE,
            cache_offset: 0,
            wiring: AreaWiring::Unlocked,
            cache_kind: CacheKind::Backed,
        }
    }
}

impl VmArea for TestArea {
    fn id(&self) -> AreaId {
        self.id
    }

    fn base(&self) -> VirtualAddress {
        self.base
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn cache_offset(&self) -> u64 {
        self.cache_offset
    }

    fn wiring(&self) -> AreaWiring {
        self.wiring
    }

    fn cache_kind(&self) -> CacheKind {
        self.cache_kind
    }
}

/// What the store knows about one page.
#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub accessed: bool,
    pub modified: bool,
    pub temporary: bool,
    pub wired: u32,
    pub records: Vec<MappingRecord>,
    pub state: Option<PageState>,
}

/// An in-memory page database.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: Mutex<HashMap<PhysicalPageNumber, PageInfo>>,
    areas: Mutex<HashMap<AreaId, Vec<MappingRecord>>>,
    freed: Mutex<Vec<MappingRecord>>,
}

impl MemoryPageStore {
    /// Record that `area` maps `page` at `at`, from its own cache.
    pub fn add_mapping(&self, area: &TestArea, at: u64, page: PhysicalPageNumber) {
        self.link(area, at, page, true);
    }

    /// Record that `area` maps `page` at `at`, from a cache further down.
    pub fn add_lower_cache_mapping(&self, area: &TestArea, at: u64, page: PhysicalPageNumber) {
        self.link(area, at, page, false);
    }

    fn link(&self, area: &TestArea, at: u64, page: PhysicalPageNumber, in_area_cache: bool) {
        let record = MappingRecord {
            area: area.id,
            page,
            cache_offset: area.cache_offset + (at - area.base.as_u64()),
            in_area_cache,
        };
        self.pages
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .records
            .push(record.clone());
        self.areas.lock().unwrap().entry(area.id).or_default().push(record);
    }

    pub fn wire(&self, page: PhysicalPageNumber) {
        self.pages.lock().unwrap().entry(page).or_default().wired += 1;
    }

    pub fn set_temporary(&self, page: PhysicalPageNumber) {
        self.pages.lock().unwrap().entry(page).or_default().temporary = true;
    }

    pub fn page(&self, page: PhysicalPageNumber) -> PageInfo {
        self.pages.lock().unwrap().get(&page).cloned().unwrap_or_default()
    }

    pub fn area_records(&self, area: AreaId) -> usize {
        self.areas.lock().unwrap().get(&area).map_or(0, Vec::len)
    }

    pub fn freed(&self) -> Vec<MappingRecord> {
        self.freed.lock().unwrap().clone()
    }
}

impl PageStore for MemoryPageStore {
    fn mark_accessed(&self, page: PhysicalPageNumber) {
        self.pages.lock().unwrap().entry(page).or_default().accessed = true;
    }

    fn mark_modified(&self, page: PhysicalPageNumber) {
        self.pages.lock().unwrap().entry(page).or_default().modified = true;
    }

    fn is_modified(&self, page: PhysicalPageNumber) -> bool {
        self.page(page).modified
    }

    fn is_mapped(&self, page: PhysicalPageNumber) -> bool {
        let info = self.page(page);
        !info.records.is_empty() || info.wired > 0
    }

    fn is_cache_temporary(&self, page: PhysicalPageNumber) -> bool {
        self.page(page).temporary
    }

    fn set_page_state(&self, page: PhysicalPageNumber, state: PageState) {
        self.pages.lock().unwrap().entry(page).or_default().state = Some(state);
    }

    fn remove_mapping(&self, page: PhysicalPageNumber, area: AreaId) -> Option<MappingRecord> {
        let record = {
            let mut pages = self.pages.lock().unwrap();
            let records = &mut pages.get_mut(&page)?.records;
            let index = records.iter().position(|r| r.area == area)?;
            records.remove(index)
        };
        if let Some(records) = self.areas.lock().unwrap().get_mut(&area) {
            records.retain(|r| r != &record);
        }
        Some(record)
    }

    fn decrement_wired_count(&self, page: PhysicalPageNumber) {
        let mut pages = self.pages.lock().unwrap();
        let info = pages.entry(page).or_default();
        info.wired = info.wired.checked_sub(1).expect("wired count underflow");
    }

    fn take_area_mappings(&self, area: AreaId) -> Vec<MappingRecord> {
        self.areas.lock().unwrap().remove(&area).unwrap_or_default()
    }

    fn remove_from_page(&self, record: &MappingRecord) {
        if let Some(info) = self.pages.lock().unwrap().get_mut(&record.page) {
            info.records.retain(|r| r != record);
        }
    }

    fn free_mapping(&self, record: MappingRecord) {
        self.freed.lock().unwrap().push(record);
    }
}
