//! # Allocator
//!
//! Front end tying the pieces together:
//!
//! - one default [`BlockList`] per memory type,
//! - a registry of dedicated allocations per memory type,
//! - custom pools,
//! - the shared [`AllocatorCore`] holding the device, properties and budget.
//!
//! A request picks a memory type by cost, then goes to a dedicated memory
//! object when it is large or asks for one, and to the type's block list
//! otherwise. Failures on one memory type retry on the next best type.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::RwLock;

use crate::allocation::{Allocation, DedicatedAllocation, FRAME_INDEX_LOST};
use crate::block::{BlockId, Mapping};
use crate::block_list::{BlockList, BlockListDesc, BlockRequest};
use crate::budget::{BudgetTracker, HeapBudget};
use crate::config::{AllocatorCreateFlags, AllocatorCreateInfo, AllocatorTuning};
use crate::device::{MemoryDevice, RawMemory, Resource};
use crate::heap::{MemoryProperties, MemoryType};
use crate::pool::{Pool, PoolCreateInfo, PoolHandle};
use crate::request::{AllocationCreateFlags, AllocationCreateInfo, MemoryRequirements, SuballocationType};
use crate::stats::{PoolStats, StatInfo, Stats};
use crate::util::align_up;
use crate::{Error, Result};

/// Memory types addressable through a 32-bit type mask.
const MAX_MEMORY_TYPES: usize = 32;

// =============================================================================
// CORE
// =============================================================================

/// State shared by the allocator and all block lists.
pub(crate) struct AllocatorCore {
    device: Arc<dyn MemoryDevice>,
    properties: MemoryProperties,
    budget: BudgetTracker,
    tuning: AllocatorTuning,
    frame_in_use_count: u32,
    current_frame: AtomicU32,
    next_block_id: AtomicU32,
    large_block_size: u64,
    buffer_image_granularity: u64,
    non_coherent_atom_size: u64,
    use_device_budget: bool,
}

impl fmt::Debug for AllocatorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorCore")
            .field("properties", &self.properties)
            .field("budget", &self.budget)
            .field("tuning", &self.tuning)
            .field("frame_in_use_count", &self.frame_in_use_count)
            .field("current_frame", &self.current_frame)
            .finish_non_exhaustive()
    }
}

impl AllocatorCore {
    pub fn new(device: Arc<dyn MemoryDevice>, info: &AllocatorCreateInfo) -> Result<Self> {
        let mut properties = device.memory_properties();
        if properties.types.len() > MAX_MEMORY_TYPES {
            return Err(Error::InvalidUsage("device exposes more than 32 memory types"));
        }
        if properties
            .types
            .iter()
            .any(|t| properties.heaps.get(t.heap_index as usize).is_none())
        {
            return Err(Error::InvalidUsage("memory type refers to a missing heap"));
        }

        let mut heap_limits = Vec::with_capacity(properties.heaps.len());
        for (index, heap) in properties.heaps.iter_mut().enumerate() {
            let limit = info.heap_size_limits.get(index).copied().flatten();
            if let Some(limit) = limit {
                if limit < heap.size {
                    log::debug!("Heap {} limited to {} of {} bytes", index, limit, heap.size);
                    heap.size = limit;
                }
            }
            heap_limits.push(limit);
        }

        let use_device_budget = info.flags.contains(AllocatorCreateFlags::EXT_MEMORY_BUDGET);
        let budget = BudgetTracker::new(
            properties.heaps.iter().map(|h| h.size).collect(),
            heap_limits,
            use_device_budget,
            info.tuning.budget_refresh_interval,
        );
        if use_device_budget {
            budget.refresh(&*device);
        }

        let buffer_image_granularity = device.buffer_image_granularity().max(1);
        let non_coherent_atom_size = device.non_coherent_atom_size().max(1);

        Ok(Self {
            device,
            properties,
            budget,
            tuning: info.tuning,
            frame_in_use_count: info.frame_in_use_count,
            current_frame: AtomicU32::new(0),
            next_block_id: AtomicU32::new(1),
            large_block_size: info.large_heap_block_size(),
            buffer_image_granularity,
            non_coherent_atom_size,
            use_device_budget,
        })
    }

    pub fn device(&self) -> &dyn MemoryDevice {
        &*self.device
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn tuning(&self) -> &AllocatorTuning {
        &self.tuning
    }

    pub fn buffer_image_granularity(&self) -> u64 {
        self.buffer_image_granularity
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame.load(Ordering::Acquire)
    }

    pub fn next_block_id(&self) -> BlockId {
        BlockId::new(self.next_block_id.fetch_add(1, Ordering::Relaxed))
    }

    fn memory_type(&self, memory_type_index: u32) -> Result<&MemoryType> {
        self.properties
            .memory_type(memory_type_index)
            .ok_or(Error::InvalidUsage("memory type index out of range"))
    }

    pub fn heap_index(&self, memory_type_index: u32) -> u32 {
        self.properties
            .memory_type(memory_type_index)
            .map_or(0, |t| t.heap_index)
    }

    /// Budget of a heap, refreshing the device snapshot when due.
    pub fn heap_budget(&self, heap_index: u32) -> HeapBudget {
        if self.budget.needs_refresh() {
            self.budget.refresh(&*self.device);
        }
        self.budget.heap_budget(heap_index)
    }

    /// Block size for a memory type: an eighth of small heaps, the large
    /// heap block size otherwise.
    pub fn preferred_block_size(&self, memory_type_index: u32) -> u64 {
        let heap_size = self
            .properties
            .heap_of_type(memory_type_index)
            .map_or(0, |h| h.size);
        let size = if heap_size <= self.tuning.small_heap_max_size {
            heap_size / 8
        } else {
            self.large_block_size
        };
        align_up(size, 32)
    }

    /// Non-coherent host-visible types place allocations on atom boundaries.
    pub fn memory_type_min_alignment(&self, memory_type_index: u32) -> u64 {
        match self.properties.memory_type(memory_type_index) {
            Some(t) if t.is_non_coherent() => self.non_coherent_atom_size,
            _ => 1,
        }
    }

    /// Allocate a device memory object, charging its heap.
    pub fn allocate_device_memory(&self, memory_type_index: u32, size: u64) -> Result<RawMemory> {
        let heap = self.heap_index(memory_type_index);
        self.budget.reserve_block(heap, size)?;
        match self.device.allocate_raw(memory_type_index, size) {
            Ok(memory) => Ok(memory),
            Err(e) => {
                self.budget.release_block(heap, size);
                log::debug!(
                    "Device refused {} bytes on memory type {}: {}",
                    size,
                    memory_type_index,
                    e
                );
                Err(e.into())
            }
        }
    }

    pub fn free_device_memory(&self, memory_type_index: u32, memory: RawMemory, size: u64) {
        self.device.free_raw(memory);
        self.budget.release_block(self.heap_index(memory_type_index), size);
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Device memory allocator.
///
/// All methods take `&self`; the allocator can be shared across threads.
/// Tear it down with [`dispose`](Self::dispose) once every allocation and
/// pool has been released.
pub struct Allocator {
    core: AllocatorCore,
    block_lists: Vec<BlockList>,
    /// Dedicated allocations per memory type, memory object to size.
    dedicated: Vec<RwLock<BTreeMap<RawMemory, u64>>>,
    pools: RwLock<BTreeMap<PoolHandle, Arc<Pool>>>,
    next_pool_id: AtomicU32,
    disposed: AtomicBool,
}

static_assertions::assert_impl_all!(Allocator: Send, Sync);

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("core", &self.core)
            .field("pools", &self.pools.read().len())
            .finish_non_exhaustive()
    }
}

impl Allocator {
    /// Create an allocator on top of a device.
    pub fn new(device: Arc<dyn MemoryDevice>, info: AllocatorCreateInfo) -> Result<Self> {
        let core = AllocatorCore::new(device, &info)?;

        let block_lists = core
            .properties
            .types
            .iter()
            .map(|t| {
                BlockList::new(BlockListDesc {
                    memory_type_index: t.index,
                    heap_index: t.heap_index,
                    preferred_block_size: core.preferred_block_size(t.index),
                    explicit_block_size: false,
                    min_block_count: 0,
                    max_block_count: usize::MAX,
                    frame_in_use_count: core.frame_in_use_count,
                    pool: None,
                })
            })
            .collect();
        let dedicated = core
            .properties
            .types
            .iter()
            .map(|_| RwLock::new(BTreeMap::new()))
            .collect();

        log::info!(
            "Allocator created: {} heaps, {} memory types",
            core.properties.heaps.len(),
            core.properties.types.len()
        );

        Ok(Self {
            core,
            block_lists,
            dedicated,
            pools: RwLock::new(BTreeMap::new()),
            next_pool_id: AtomicU32::new(1),
            disposed: AtomicBool::new(false),
        })
    }

    /// Heaps and memory types in use, with heap sizes capped by limits.
    pub fn memory_properties(&self) -> &MemoryProperties {
        &self.core.properties
    }

    /// Find the best memory type for a request.
    pub fn find_memory_type_index(&self, memory_type_bits: u32, info: &AllocationCreateInfo) -> Result<u32> {
        let bits = if info.memory_type_bits != 0 {
            memory_type_bits & info.memory_type_bits
        } else {
            memory_type_bits
        };
        self.core
            .properties
            .find_memory_type_index(
                bits,
                info.effective_required_flags(),
                info.effective_preferred_flags(),
                info.effective_not_preferred_flags(),
            )
            .ok_or(Error::NoSuitableMemoryType)
    }

    // -------------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------------

    /// Allocate memory for the given requirements.
    pub fn allocate_memory(&self, requirements: &MemoryRequirements, info: &AllocationCreateInfo) -> Result<Allocation> {
        validate_request(requirements, info)?;

        if let Some(handle) = info.pool {
            return self.allocate_from_pool(handle, requirements, info);
        }

        let mut type_bits = requirements.memory_type_bits;
        let mut memory_type_index = self.find_memory_type_index(type_bits, info)?;
        loop {
            match self.allocate_memory_of_type(memory_type_index, requirements, info) {
                Ok(allocation) => return Ok(allocation),
                Err(e @ Error::InvalidUsage(_)) => return Err(e),
                Err(e) => {
                    type_bits &= !(1u32 << memory_type_index);
                    match self.find_memory_type_index(type_bits, info) {
                        Ok(next) => {
                            log::debug!(
                                "Memory type {} failed ({}), retrying on memory type {}",
                                memory_type_index,
                                e,
                                next
                            );
                            memory_type_index = next;
                        }
                        Err(_) => return Err(e),
                    }
                }
            }
        }
    }

    /// Allocate `count` allocations with identical parameters.
    ///
    /// Either every allocation succeeds or none is kept.
    pub fn allocate_memory_pages(
        &self,
        requirements: &MemoryRequirements,
        info: &AllocationCreateInfo,
        count: usize,
    ) -> Result<Vec<Allocation>> {
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_memory(requirements, info) {
                Ok(allocation) => pages.push(allocation),
                Err(e) => {
                    if let Err(free_err) = self.free_memory_pages(pages) {
                        log::error!("Rolling back partial page allocation failed: {}", free_err);
                    }
                    return Err(e);
                }
            }
        }
        Ok(pages)
    }

    /// Allocate memory for a resource and optionally bind it.
    pub fn allocate_for_resource(
        &self,
        resource: Resource,
        requirements: &MemoryRequirements,
        info: &AllocationCreateInfo,
        bind: bool,
    ) -> Result<Allocation> {
        let allocation = self.allocate_memory(requirements, info)?;
        if bind {
            if let Err(e) = self.bind_memory(&allocation, resource) {
                if let Err(free_err) = self.free_memory(allocation) {
                    log::error!("Releasing allocation after failed bind failed: {}", free_err);
                }
                return Err(e);
            }
        }
        Ok(allocation)
    }

    fn allocate_from_pool(
        &self,
        handle: PoolHandle,
        requirements: &MemoryRequirements,
        info: &AllocationCreateInfo,
    ) -> Result<Allocation> {
        let pool = self.pool(handle)?;
        let memory_type_index = pool.block_list.memory_type_index();
        if requirements.memory_type_bits & (1u32 << memory_type_index) == 0 {
            return Err(Error::NoSuitableMemoryType);
        }

        let request = self.block_request(memory_type_index, requirements, info)?;
        pool.block_list
            .allocate(&self.core, &request)
            .map(Allocation::Block)
    }

    fn block_request(
        &self,
        memory_type_index: u32,
        requirements: &MemoryRequirements,
        info: &AllocationCreateInfo,
    ) -> Result<BlockRequest> {
        let memory_type = self.core.memory_type(memory_type_index)?;
        let mut flags = info.flags;
        if !memory_type.is_host_visible() {
            flags.remove(AllocationCreateFlags::MAPPED);
        }
        Ok(BlockRequest {
            size: requirements.size,
            alignment: requirements
                .alignment
                .max(self.core.memory_type_min_alignment(memory_type_index)),
            kind: requirements.kind,
            flags,
            strategy: info.strategy,
        })
    }

    fn allocate_memory_of_type(
        &self,
        memory_type_index: u32,
        requirements: &MemoryRequirements,
        info: &AllocationCreateInfo,
    ) -> Result<Allocation> {
        let request = self.block_request(memory_type_index, requirements, info)?;
        let list = &self.block_lists[memory_type_index as usize];
        let never_allocate = request.flags.contains(AllocationCreateFlags::NEVER_ALLOCATE);

        let prefer_dedicated = request.flags.contains(AllocationCreateFlags::DEDICATED_MEMORY)
            || requirements.requires_dedicated
            || requirements.prefers_dedicated
            || requirements.size > list.preferred_block_size() / 2;

        if prefer_dedicated && !never_allocate {
            return self.allocate_dedicated(memory_type_index, &request);
        }

        match list.allocate(&self.core, &request) {
            Ok(allocation) => Ok(Allocation::Block(allocation)),
            Err(e @ Error::InvalidUsage(_)) => Err(e),
            Err(e) if never_allocate => Err(e),
            Err(e) => {
                log::debug!(
                    "Block allocation of {} bytes failed ({}), using dedicated memory",
                    request.size,
                    e
                );
                self.allocate_dedicated(memory_type_index, &request)
            }
        }
    }

    fn allocate_dedicated(&self, memory_type_index: u32, request: &BlockRequest) -> Result<Allocation> {
        let heap = self.core.heap_index(memory_type_index);
        let size = request.size;

        if request.flags.contains(AllocationCreateFlags::WITHIN_BUDGET)
            && self.core.heap_budget(heap).available() < size
        {
            return Err(Error::OutOfDeviceMemory);
        }

        let memory = self.core.allocate_device_memory(memory_type_index, size)?;
        let persistently_mapped = request.flags.contains(AllocationCreateFlags::MAPPED);
        let allocation = DedicatedAllocation {
            memory,
            size,
            memory_type_index,
            kind: request.kind,
            last_use_frame: AtomicU32::new(self.core.current_frame()),
            mapping: Mapping::default(),
            map_count: AtomicU32::new(0),
            persistently_mapped,
        };

        if persistently_mapped {
            if let Err(e) = allocation.mapping.map(self.core.device(), memory, 1) {
                self.core.free_device_memory(memory_type_index, memory, size);
                return Err(e);
            }
        }

        self.dedicated[memory_type_index as usize]
            .write()
            .insert(memory, size);
        self.core.budget.add_allocation(heap, size);
        log::trace!("Dedicated {} of {} bytes on memory type {}", memory, size, memory_type_index);

        Ok(Allocation::Dedicated(allocation))
    }

    // -------------------------------------------------------------------------
    // Release
    // -------------------------------------------------------------------------

    /// Release an allocation.
    pub fn free_memory(&self, allocation: Allocation) -> Result<()> {
        match allocation {
            Allocation::Block(a) => match a.pool {
                Some(handle) => self.pool(handle)?.block_list.free(&self.core, a),
                None => self
                    .block_lists
                    .get(a.memory_type_index as usize)
                    .ok_or(Error::InvalidUsage("memory type index out of range"))?
                    .free(&self.core, a),
            },
            Allocation::Dedicated(d) => self.free_dedicated(d),
        }
    }

    /// Release several allocations. Every one is released; the first error
    /// is returned.
    pub fn free_memory_pages(&self, allocations: Vec<Allocation>) -> Result<()> {
        let mut result = Ok(());
        for allocation in allocations.into_iter().rev() {
            if let Err(e) = self.free_memory(allocation) {
                result = result.and(Err(e));
            }
        }
        result
    }

    fn free_dedicated(&self, allocation: DedicatedAllocation) -> Result<()> {
        let memory_type_index = allocation.memory_type_index;
        let registered = self
            .dedicated
            .get(memory_type_index as usize)
            .and_then(|map| map.write().remove(&allocation.memory));
        if registered.is_none() {
            return Err(Error::InvalidUsage("dedicated allocation is not registered"));
        }

        let outstanding = allocation.map_count.load(Ordering::Acquire);
        if outstanding > 0 {
            log::warn!("Freeing {} still mapped {} times", allocation.memory, outstanding);
        }
        allocation
            .mapping
            .release(self.core.device(), allocation.memory);

        self.core
            .free_device_memory(memory_type_index, allocation.memory, allocation.size);
        self.core
            .budget
            .remove_allocation(self.core.heap_index(memory_type_index), allocation.size);
        log::trace!("Freed dedicated {}", allocation.memory);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    /// Bind a resource to the allocation's memory.
    pub fn bind_memory(&self, allocation: &Allocation, resource: Resource) -> Result<()> {
        if allocation.is_lost() {
            return Err(Error::InvalidUsage("cannot bind a lost allocation"));
        }
        let memory = allocation
            .memory()
            .ok_or(Error::InvalidUsage("owning memory block has been released"))?;
        self.core
            .device()
            .bind(resource, memory, allocation.offset())?;
        Ok(())
    }

    /// Map an allocation; pair with [`unmap_memory`](Self::unmap_memory).
    pub fn map_memory(&self, allocation: &Allocation) -> Result<core::ptr::NonNull<u8>> {
        if !self.core.memory_type(allocation.memory_type_index())?.is_host_visible() {
            return Err(Error::InvalidUsage("memory type is not host visible"));
        }
        allocation.map(self.core.device())
    }

    pub fn unmap_memory(&self, allocation: &Allocation) -> Result<()> {
        allocation.unmap(self.core.device())
    }

    /// Flush host writes in a range of the allocation.
    ///
    /// `size` may be [`WHOLE_SIZE`](crate::WHOLE_SIZE). No-op on coherent
    /// memory.
    pub fn flush_allocation(&self, allocation: &Allocation, offset: u64, size: u64) -> Result<()> {
        if !self.core.memory_type(allocation.memory_type_index())?.is_non_coherent() {
            return Ok(());
        }
        allocation.flush(self.core.device(), offset, size)
    }

    /// Make device writes in a range of the allocation visible to the host.
    pub fn invalidate_allocation(&self, allocation: &Allocation, offset: u64, size: u64) -> Result<()> {
        if !self.core.memory_type(allocation.memory_type_index())?.is_non_coherent() {
            return Ok(());
        }
        allocation.invalidate(self.core.device(), offset, size)
    }

    // -------------------------------------------------------------------------
    // Frames and eviction
    // -------------------------------------------------------------------------

    /// Advance the frame counter used for eviction.
    pub fn set_current_frame_index(&self, frame: u32) -> Result<()> {
        if frame == FRAME_INDEX_LOST {
            return Err(Error::InvalidUsage("frame index is reserved"));
        }
        self.core.current_frame.store(frame, Ordering::Release);
        if self.core.use_device_budget {
            self.core.budget.refresh(self.core.device());
        }
        Ok(())
    }

    pub fn current_frame_index(&self) -> u32 {
        self.core.current_frame()
    }

    /// Mark an allocation as used this frame. Returns `false` if lost.
    pub fn touch_allocation(&self, allocation: &Allocation) -> bool {
        allocation.touch(self.core.current_frame())
    }

    /// Evict an allocation now if its protection window has passed.
    pub fn make_allocation_lost(&self, allocation: &Allocation) -> bool {
        let frame_in_use_count = match allocation {
            Allocation::Block(a) => match a.pool.and_then(|h| self.pools.read().get(&h).cloned()) {
                Some(pool) => pool.block_list.frame_in_use_count(),
                None => self.core.frame_in_use_count,
            },
            Allocation::Dedicated(_) => return false,
        };
        allocation.make_lost(self.core.current_frame(), frame_in_use_count)
    }

    // -------------------------------------------------------------------------
    // Pools
    // -------------------------------------------------------------------------

    /// Create a custom pool.
    pub fn create_pool(&self, info: &PoolCreateInfo) -> Result<PoolHandle> {
        let memory_type_index = info.memory_type_index;
        self.core.memory_type(memory_type_index)?;

        let max_block_count = if info.max_block_count == 0 {
            usize::MAX
        } else {
            info.max_block_count
        };
        if info.min_block_count > max_block_count {
            return Err(Error::InvalidUsage("pool minimum block count exceeds its maximum"));
        }

        let explicit_block_size = info.block_size != 0;
        let handle = PoolHandle::new(self.next_pool_id.fetch_add(1, Ordering::Relaxed));
        let pool = Arc::new(Pool {
            handle,
            name: info.name.clone(),
            block_list: BlockList::new(BlockListDesc {
                memory_type_index,
                heap_index: self.core.heap_index(memory_type_index),
                preferred_block_size: if explicit_block_size {
                    info.block_size
                } else {
                    self.core.preferred_block_size(memory_type_index)
                },
                explicit_block_size,
                min_block_count: info.min_block_count,
                max_block_count,
                frame_in_use_count: info.frame_in_use_count.unwrap_or(self.core.frame_in_use_count),
                pool: Some(handle),
            }),
        });

        if let Err(e) = pool.block_list.create_min_blocks(&self.core) {
            if let Err(dispose_err) = pool.block_list.dispose(&self.core) {
                log::error!("Releasing blocks of failed {} failed: {}", handle, dispose_err);
            }
            return Err(e);
        }

        log::debug!(
            "Created {} '{}' on memory type {}",
            handle,
            pool.label(),
            memory_type_index
        );
        self.pools.write().insert(handle, pool);
        Ok(handle)
    }

    /// Destroy a pool. Fails if allocations from it are still alive.
    pub fn destroy_pool(&self, handle: PoolHandle) -> Result<()> {
        // The registry lock is held until the list is closed, so a pool is
        // either registered or fully released.
        let mut pools = self.pools.write();
        let pool = pools
            .get(&handle)
            .cloned()
            .ok_or(Error::InvalidUsage("unknown pool"))?;
        pool.block_list.dispose(&self.core)?;
        pools.remove(&handle);
        drop(pools);

        log::debug!("Destroyed {} '{}'", handle, pool.label());
        Ok(())
    }

    pub fn pool_stats(&self, handle: PoolHandle) -> Result<PoolStats> {
        Ok(self.pool(handle)?.block_list.pool_stats())
    }

    /// Evict every stale evictable allocation in a pool.
    pub fn make_pool_allocations_lost(&self, handle: PoolHandle) -> Result<u32> {
        Ok(self.pool(handle)?.block_list.make_allocations_lost(&self.core))
    }

    fn pool(&self, handle: PoolHandle) -> Result<Arc<Pool>> {
        self.pools
            .read()
            .get(&handle)
            .cloned()
            .ok_or(Error::InvalidUsage("unknown pool"))
    }

    // -------------------------------------------------------------------------
    // Statistics and budget
    // -------------------------------------------------------------------------

    /// Aggregate usage across default lists, pools and dedicated allocations.
    pub fn calculate_stats(&self) -> Stats {
        let mut stats = Stats::new(self.core.properties.types.len(), self.core.properties.heaps.len());

        for list in &self.block_lists {
            list.add_stats(&mut stats);
        }
        for pool in self.pools.read().values() {
            pool.block_list.add_stats(&mut stats);
        }
        for (memory_type_index, map) in self.dedicated.iter().enumerate() {
            let memory_type_index = memory_type_index as u32;
            let heap = self.core.heap_index(memory_type_index);
            for &size in map.read().values() {
                let mut info = StatInfo {
                    block_count: 1,
                    ..StatInfo::default()
                };
                info.record_allocation(size);
                stats.add(memory_type_index, heap, &info);
            }
        }

        stats.finish();
        stats
    }

    pub fn heap_budget(&self, heap_index: u32) -> HeapBudget {
        self.core.heap_budget(heap_index)
    }

    /// Budgets of every heap.
    pub fn heap_budgets(&self) -> Vec<HeapBudget> {
        (0..self.core.properties.heaps.len() as u32)
            .map(|heap| self.core.heap_budget(heap))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Release every pool and block.
    ///
    /// Fails with [`Error::InvalidUsage`] if allocations are still alive;
    /// everything that could be released is released anyway.
    pub fn dispose(self) -> Result<()> {
        let result = self.release_all();
        self.disposed.store(true, Ordering::Release);
        result
    }

    fn release_all(&self) -> Result<()> {
        let mut result = Ok(());

        for (memory_type_index, map) in self.dedicated.iter().enumerate() {
            let live = map.read().len();
            if live > 0 {
                log::error!(
                    "{} dedicated allocations still alive on memory type {}",
                    live,
                    memory_type_index
                );
                result = result.and(Err(Error::InvalidUsage("dedicated allocations are still alive")));
            }
        }

        // Pools that cannot be released stay registered with their blocks.
        self.pools.write().retain(|_, pool| match pool.block_list.dispose(&self.core) {
            Ok(()) => false,
            Err(e) => {
                log::error!(
                    "Destroying {} '{}' failed, {} bytes still held: {}",
                    pool.handle,
                    pool.label(),
                    pool.block_list.block_bytes(),
                    e
                );
                if result.is_ok() {
                    result = Err(e);
                }
                true
            }
        });

        for list in &self.block_lists {
            if let Err(e) = list.dispose(&self.core) {
                log::error!(
                    "Releasing memory type {} failed, {} bytes still held: {}",
                    list.memory_type_index(),
                    list.block_bytes(),
                    e
                );
                result = result.and(Err(e));
            }
        }

        result
    }

    #[cfg(test)]
    pub(crate) fn default_list(&self, memory_type_index: u32) -> &BlockList {
        &self.block_lists[memory_type_index as usize]
    }

    #[cfg(test)]
    pub(crate) fn pool_list_block_count(&self, handle: PoolHandle) -> usize {
        self.pool(handle).map_or(0, |p| p.block_list.block_count())
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.release_all() {
            log::error!("Allocator dropped with live allocations: {}", e);
        }
    }
}

fn validate_request(requirements: &MemoryRequirements, info: &AllocationCreateInfo) -> Result<()> {
    let flags = info.flags;

    if requirements.size == 0 {
        return Err(Error::InvalidUsage("allocation size must be non-zero"));
    }
    if !requirements.alignment.is_power_of_two() {
        return Err(Error::InvalidUsage("alignment must be a power of two"));
    }
    if requirements.kind == SuballocationType::Free {
        return Err(Error::InvalidUsage("allocation kind cannot be Free"));
    }
    if flags.contains(AllocationCreateFlags::DEDICATED_MEMORY | AllocationCreateFlags::NEVER_ALLOCATE) {
        return Err(Error::InvalidUsage("DEDICATED_MEMORY conflicts with NEVER_ALLOCATE"));
    }
    if flags.contains(AllocationCreateFlags::MAPPED | AllocationCreateFlags::CAN_BECOME_LOST) {
        return Err(Error::InvalidUsage("MAPPED conflicts with CAN_BECOME_LOST"));
    }
    if requirements.requires_dedicated
        && (flags.contains(AllocationCreateFlags::NEVER_ALLOCATE) || info.pool.is_some())
    {
        return Err(Error::InvalidUsage("dedicated memory is required but not allowed"));
    }
    if info.pool.is_some() && flags.contains(AllocationCreateFlags::DEDICATED_MEMORY) {
        return Err(Error::InvalidUsage("pool allocations cannot be dedicated"));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
