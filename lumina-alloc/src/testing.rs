//! In-memory device for tests.
//!
//! Layout:
//!
//! ```text
//! heap 0: 8 GiB, device local    type 0: DEVICE_LOCAL
//! heap 1: 512 MiB, host          type 1: HOST_VISIBLE | HOST_COHERENT
//!                                type 2: HOST_VISIBLE | HOST_COHERENT | HOST_CACHED
//!                                type 3: HOST_VISIBLE (non-coherent)
//! ```

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::device::{DeviceResult, MemoryDevice, RawMemory, ReportedHeapBudget, Resource};
use crate::error::DeviceError;
use crate::heap::{MemoryHeap, MemoryHeapFlags, MemoryProperties, MemoryPropertyFlags, MemoryType};

const GIB: u64 = 1 << 30;
const MIB: u64 = 1 << 20;

#[derive(Debug)]
struct MockMemory {
    memory_type_index: u32,
    size: u64,
    host: Option<Box<[u8]>>,
}

#[derive(Debug)]
pub(crate) struct MockDevice {
    properties: MemoryProperties,
    atom: u64,
    granularity: u64,
    next_handle: AtomicU64,
    live: Mutex<BTreeMap<RawMemory, MockMemory>>,
    max_allocation_size: AtomicU64,
    reported_budget: Mutex<Option<Vec<ReportedHeapBudget>>>,
    map_calls: AtomicU32,
    unmap_calls: AtomicU32,
    flushes: Mutex<Vec<(RawMemory, u64, u64)>>,
    invalidates: Mutex<Vec<(RawMemory, u64, u64)>>,
    binds: Mutex<Vec<(Resource, RawMemory, u64)>>,
    fail_binds: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Self {
        let heaps = vec![
            MemoryHeap::new(0, 8 * GIB, MemoryHeapFlags::DEVICE_LOCAL),
            MemoryHeap::new(1, 512 * MIB, MemoryHeapFlags::empty()),
        ];
        let types = vec![
            MemoryType::new(0, 0, MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryType::new(1, 1, MemoryPropertyFlags::host_visible_coherent()),
            MemoryType::new(2, 1, MemoryPropertyFlags::host_visible_cached()),
            MemoryType::new(3, 1, MemoryPropertyFlags::HOST_VISIBLE),
        ];
        Self {
            properties: MemoryProperties::new(heaps, types),
            atom: 64,
            granularity: 1,
            next_handle: AtomicU64::new(0x1000),
            live: Mutex::new(BTreeMap::new()),
            max_allocation_size: AtomicU64::new(u64::MAX),
            reported_budget: Mutex::new(None),
            map_calls: AtomicU32::new(0),
            unmap_calls: AtomicU32::new(0),
            flushes: Mutex::new(Vec::new()),
            invalidates: Mutex::new(Vec::new()),
            binds: Mutex::new(Vec::new()),
            fail_binds: AtomicBool::new(false),
        }
    }

    pub fn with_granularity(mut self, granularity: u64) -> Self {
        self.granularity = granularity;
        self
    }

    /// Refuse raw allocations above `size` bytes.
    pub fn fail_allocations_larger_than(&self, size: u64) {
        self.max_allocation_size.store(size, Ordering::Relaxed);
    }

    pub fn set_reported_budget(&self, budget: Vec<ReportedHeapBudget>) {
        *self.reported_budget.lock() = Some(budget);
    }

    pub fn fail_binds(&self, fail: bool) {
        self.fail_binds.store(fail, Ordering::Relaxed);
    }

    pub fn live_allocation_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.lock().values().map(|m| m.size).sum()
    }

    pub fn map_calls(&self) -> u32 {
        self.map_calls.load(Ordering::Relaxed)
    }

    pub fn unmap_calls(&self) -> u32 {
        self.unmap_calls.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> Vec<(RawMemory, u64, u64)> {
        self.flushes.lock().clone()
    }

    pub fn invalidates(&self) -> Vec<(RawMemory, u64, u64)> {
        self.invalidates.lock().clone()
    }

    pub fn binds(&self) -> Vec<(Resource, RawMemory, u64)> {
        self.binds.lock().clone()
    }

    fn heap_usage(live: &BTreeMap<RawMemory, MockMemory>, properties: &MemoryProperties, heap: u32) -> u64 {
        live.values()
            .filter(|m| properties.heap_of_type(m.memory_type_index).map(|h| h.index) == Some(heap))
            .map(|m| m.size)
            .sum()
    }

    fn check_range(&self, memory: RawMemory, offset: u64, size: u64) -> DeviceResult<()> {
        let live = self.live.lock();
        let entry = live.get(&memory).ok_or(DeviceError::Unknown(-1))?;
        assert_eq!(offset % self.atom, 0, "unaligned range offset {}", offset);
        assert!(offset + size <= entry.size, "range past the end of {}", memory);
        Ok(())
    }
}

impl MemoryDevice for MockDevice {
    fn memory_properties(&self) -> MemoryProperties {
        self.properties.clone()
    }

    fn allocate_raw(&self, memory_type_index: u32, size: u64) -> DeviceResult<RawMemory> {
        if size > self.max_allocation_size.load(Ordering::Relaxed) {
            return Err(DeviceError::OutOfDeviceMemory);
        }
        let heap = self
            .properties
            .heap_of_type(memory_type_index)
            .ok_or(DeviceError::Unknown(-2))?;

        let mut live = self.live.lock();
        if Self::heap_usage(&live, &self.properties, heap.index) + size > heap.size {
            return Err(DeviceError::OutOfDeviceMemory);
        }

        let memory = RawMemory::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        live.insert(
            memory,
            MockMemory {
                memory_type_index,
                size,
                host: None,
            },
        );
        Ok(memory)
    }

    fn free_raw(&self, memory: RawMemory) {
        let removed = self.live.lock().remove(&memory);
        assert!(removed.is_some(), "double free of {}", memory);
    }

    fn map(&self, memory: RawMemory) -> DeviceResult<NonNull<u8>> {
        let mut live = self.live.lock();
        let entry = live.get_mut(&memory).ok_or(DeviceError::MemoryMapFailed)?;
        let host_visible = self
            .properties
            .memory_type(entry.memory_type_index)
            .is_some_and(|t| t.is_host_visible());
        if !host_visible {
            return Err(DeviceError::MemoryMapFailed);
        }

        self.map_calls.fetch_add(1, Ordering::Relaxed);
        let size = entry.size as usize;
        let host = entry
            .host
            .get_or_insert_with(|| vec![0u8; size].into_boxed_slice());
        NonNull::new(host.as_mut_ptr()).ok_or(DeviceError::MemoryMapFailed)
    }

    fn unmap(&self, _memory: RawMemory) {
        self.unmap_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn flush_range(&self, memory: RawMemory, offset: u64, size: u64) -> DeviceResult<()> {
        self.check_range(memory, offset, size)?;
        self.flushes.lock().push((memory, offset, size));
        Ok(())
    }

    fn invalidate_range(&self, memory: RawMemory, offset: u64, size: u64) -> DeviceResult<()> {
        self.check_range(memory, offset, size)?;
        self.invalidates.lock().push((memory, offset, size));
        Ok(())
    }

    fn bind(&self, resource: Resource, memory: RawMemory, offset: u64) -> DeviceResult<()> {
        if self.fail_binds.load(Ordering::Relaxed) {
            return Err(DeviceError::Unknown(-3));
        }
        if !self.live.lock().contains_key(&memory) {
            return Err(DeviceError::Unknown(-4));
        }
        self.binds.lock().push((resource, memory, offset));
        Ok(())
    }

    fn query_budget(&self) -> Option<Vec<ReportedHeapBudget>> {
        self.reported_budget.lock().clone()
    }

    fn non_coherent_atom_size(&self) -> u64 {
        self.atom
    }

    fn buffer_image_granularity(&self) -> u64 {
        self.granularity
    }
}
