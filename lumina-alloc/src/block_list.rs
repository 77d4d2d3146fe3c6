//! # Block Lists
//!
//! All blocks of one memory type, either the allocator's default list for
//! that type or the list behind a custom pool.
//!
//! Allocation walks three stages under the list's write lock:
//!
//! 1. place into an existing block,
//! 2. create a new block (shrinking it on pressure or device failure),
//! 3. evict stale allocations, retrying a bounded number of times.
//!
//! Freeing keeps at most one empty block around and re-sorts blocks by free
//! space one step at a time so best-fit searches find full blocks first.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use spin::RwLock;

use crate::allocation::{AllocationState, BlockAllocation};
use crate::allocator::AllocatorCore;
use crate::block::MemoryBlock;
use crate::metadata::{AllocationRequest, RequestParams};
use crate::pool::PoolHandle;
use crate::request::{AllocationCreateFlags, AllocationStrategy, SuballocationType};
use crate::stats::{PoolStats, Stats};
use crate::{Error, Result};

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Fixed parameters of a block list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockListDesc {
    pub memory_type_index: u32,
    pub heap_index: u32,
    pub preferred_block_size: u64,
    /// Block size was chosen by the caller and must not be shrunk.
    pub explicit_block_size: bool,
    pub min_block_count: usize,
    pub max_block_count: usize,
    pub frame_in_use_count: u32,
    pub pool: Option<PoolHandle>,
}

/// One allocation request routed to a block list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockRequest {
    pub size: u64,
    pub alignment: u64,
    pub kind: SuballocationType,
    pub flags: AllocationCreateFlags,
    pub strategy: AllocationStrategy,
}

// =============================================================================
// BLOCK LIST
// =============================================================================

#[derive(Debug, Default)]
struct BlockListInner {
    blocks: Vec<MemoryBlock>,
    has_empty_block: bool,
    /// Set once the list has released its blocks; no new allocations.
    closed: bool,
}

impl BlockListInner {
    fn update_has_empty_block(&mut self) {
        self.has_empty_block = self.blocks.iter().any(|b| b.metadata.is_empty());
    }

    /// One adjacent swap towards ascending free space.
    fn incrementally_sort_blocks(&mut self) {
        for i in 1..self.blocks.len() {
            if self.blocks[i - 1].metadata.sum_free_size() > self.blocks[i].metadata.sum_free_size() {
                self.blocks.swap(i - 1, i);
                return;
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct BlockList {
    desc: BlockListDesc,
    inner: RwLock<BlockListInner>,
}

impl BlockList {
    pub fn new(desc: BlockListDesc) -> Self {
        Self {
            desc,
            inner: RwLock::new(BlockListInner::default()),
        }
    }

    pub fn memory_type_index(&self) -> u32 {
        self.desc.memory_type_index
    }

    pub fn preferred_block_size(&self) -> u64 {
        self.desc.preferred_block_size
    }

    pub fn frame_in_use_count(&self) -> u32 {
        self.desc.frame_in_use_count
    }

    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.read().blocks.iter().all(|b| b.metadata.is_empty())
    }

    /// Free bytes across all blocks.
    pub fn sum_free_size(&self) -> u64 {
        self.inner.read().blocks.iter().map(|b| b.metadata.sum_free_size()).sum()
    }

    pub fn validate(&self) -> bool {
        self.inner.read().blocks.iter().all(|b| b.metadata.validate())
    }

    /// Block sizes in list order.
    #[cfg(test)]
    pub fn block_sizes(&self) -> Vec<u64> {
        self.inner.read().blocks.iter().map(MemoryBlock::size).collect()
    }

    fn search_order(len: usize, strategy: AllocationStrategy) -> impl Iterator<Item = usize> {
        let forward = strategy == AllocationStrategy::BestFit;
        (0..len).map(move |i| if forward { i } else { len - 1 - i })
    }

    // -------------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------------

    /// Create blocks until the minimum block count is reached.
    pub fn create_min_blocks(&self, core: &AllocatorCore) -> Result<()> {
        let mut inner = self.inner.write();
        while inner.blocks.len() < self.desc.min_block_count {
            self.create_block(core, &mut inner, self.desc.preferred_block_size)?;
        }
        inner.update_has_empty_block();
        Ok(())
    }

    pub fn allocate(&self, core: &AllocatorCore, request: &BlockRequest) -> Result<BlockAllocation> {
        let flags = request.flags;
        let can_make_other_lost = flags.contains(AllocationCreateFlags::CAN_MAKE_OTHER_LOST);
        let within_budget = flags.contains(AllocationCreateFlags::WITHIN_BUDGET);
        let can_fallback_to_dedicated = self.desc.pool.is_none();

        if request.size > self.desc.preferred_block_size {
            return Err(Error::OutOfDeviceMemory);
        }

        let free_memory = core.heap_budget(self.desc.heap_index).available();
        let mut params = RequestParams {
            current_frame: core.current_frame(),
            frame_in_use_count: self.desc.frame_in_use_count,
            granularity: core.buffer_image_granularity(),
            size: request.size,
            alignment: request.alignment,
            kind: request.kind,
            strategy: request.strategy,
            can_make_other_lost: false,
            lost_allocation_cost: core.tuning().lost_allocation_cost,
        };

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::InvalidUsage("block list has been released"));
        }

        let can_create_new_block = !flags.contains(AllocationCreateFlags::NEVER_ALLOCATE)
            && inner.blocks.len() < self.desc.max_block_count
            && (free_memory >= request.size || !can_fallback_to_dedicated)
            && (!within_budget || free_memory >= request.size);

        // 1. Existing blocks, without evicting anything.
        if !can_make_other_lost || can_create_new_block {
            for index in Self::search_order(inner.blocks.len(), request.strategy) {
                if let Some(found) = inner.blocks[index].metadata.try_create_allocation_request(&params) {
                    return self.commit(core, &mut inner, index, &found, request);
                }
            }
        }

        // 2. A new block.
        if can_create_new_block {
            match self.create_sized_block(core, &mut inner, request.size, free_memory, within_budget) {
                Ok(index) => {
                    let found = inner.blocks[index]
                        .metadata
                        .try_create_allocation_request(&params)
                        .ok_or(Error::OutOfDeviceMemory)?;
                    return self.commit(core, &mut inner, index, &found, request);
                }
                Err(e) if !can_make_other_lost => return Err(e),
                Err(e) => {
                    log::debug!(
                        "New block for memory type {} failed ({}), trying eviction",
                        self.desc.memory_type_index,
                        e
                    );
                }
            }
        }

        // 3. Evict stale allocations.
        if can_make_other_lost {
            params.can_make_other_lost = true;
            let current_frame = params.current_frame;

            for _ in 0..core.tuning().max_eviction_attempts {
                let mut best: Option<(usize, AllocationRequest)> = None;
                for index in Self::search_order(inner.blocks.len(), request.strategy) {
                    let Some(found) = inner.blocks[index].metadata.try_create_allocation_request(&params)
                    else {
                        continue;
                    };
                    if best.map_or(true, |(_, b)| found.cost < b.cost) {
                        best = Some((index, found));
                        if found.cost == 0 || request.strategy == AllocationStrategy::FirstFit {
                            break;
                        }
                    }
                }

                let Some((index, mut found)) = best else {
                    return Err(Error::OutOfDeviceMemory);
                };

                let outcome = inner.blocks[index].metadata.make_requested_allocations_lost(
                    current_frame,
                    self.desc.frame_in_use_count,
                    &mut found,
                );
                if outcome.count > 0 {
                    core.budget().remove_allocation(self.desc.heap_index, outcome.bytes);
                    log::debug!(
                        "Evicted {} allocations ({} bytes) from memory type {}",
                        outcome.count,
                        outcome.bytes,
                        self.desc.memory_type_index
                    );
                }
                if outcome.completed {
                    return self.commit(core, &mut inner, index, &found, request);
                }
            }

            log::warn!(
                "Gave up evicting on memory type {} after {} attempts",
                self.desc.memory_type_index,
                core.tuning().max_eviction_attempts
            );
            return Err(Error::TooManyEvictionAttempts);
        }

        Err(Error::OutOfDeviceMemory)
    }

    /// Pick a size for a new block and create it, halving on pressure.
    fn create_sized_block(
        &self,
        core: &AllocatorCore,
        inner: &mut BlockListInner,
        size: u64,
        free_memory: u64,
        within_budget: bool,
    ) -> Result<usize> {
        let steps = core.tuning().max_block_shrink_steps;
        let mut block_size = self.desc.preferred_block_size;
        let mut shift = 0;

        if !self.desc.explicit_block_size {
            let max_existing = inner.blocks.iter().map(MemoryBlock::size).max().unwrap_or(0);
            while shift < steps {
                let smaller = block_size / 2;
                if (smaller > max_existing || block_size > free_memory) && smaller >= size * 2 {
                    block_size = smaller;
                    shift += 1;
                } else {
                    break;
                }
            }
            if within_budget {
                while shift < steps && block_size > free_memory && block_size / 2 >= size {
                    block_size /= 2;
                    shift += 1;
                }
            }
        }
        if within_budget && block_size > free_memory {
            return Err(Error::OutOfDeviceMemory);
        }

        let mut result = self.create_block(core, inner, block_size);
        if !self.desc.explicit_block_size {
            while result.is_err() && shift < steps {
                let smaller = block_size / 2;
                if smaller < size {
                    break;
                }
                block_size = smaller;
                shift += 1;
                result = self.create_block(core, inner, block_size);
            }
        }
        result
    }

    fn create_block(&self, core: &AllocatorCore, inner: &mut BlockListInner, size: u64) -> Result<usize> {
        let memory = core.allocate_device_memory(self.desc.memory_type_index, size)?;
        let id = core.next_block_id();
        inner.blocks.push(MemoryBlock::new(id, memory, size));
        log::debug!(
            "Created {} ({} bytes) on memory type {}",
            id,
            size,
            self.desc.memory_type_index
        );
        Ok(inner.blocks.len() - 1)
    }

    fn commit(
        &self,
        core: &AllocatorCore,
        inner: &mut BlockListInner,
        index: usize,
        found: &AllocationRequest,
        request: &BlockRequest,
    ) -> Result<BlockAllocation> {
        let persistently_mapped = request.flags.contains(AllocationCreateFlags::MAPPED);
        let can_become_lost = request.flags.contains(AllocationCreateFlags::CAN_BECOME_LOST);
        let block = &mut inner.blocks[index];
        let memory = block.memory().clone();

        if persistently_mapped {
            memory.mapping().map(core.device(), memory.memory(), 1)?;
        }

        let state = Arc::new(AllocationState::new(core.current_frame(), can_become_lost));
        if let Err(e) = block
            .metadata
            .alloc(found, request.kind, request.size, state.clone())
        {
            if persistently_mapped {
                memory.mapping().unmap(core.device(), memory.memory(), 1)?;
            }
            return Err(e);
        }

        core.budget().add_allocation(self.desc.heap_index, request.size);
        inner.update_has_empty_block();
        inner.incrementally_sort_blocks();

        log::trace!(
            "Allocated {} bytes at {}+{}",
            request.size,
            memory.id(),
            found.offset
        );

        Ok(BlockAllocation {
            block: Arc::downgrade(&memory),
            block_id: memory.id(),
            pool: self.desc.pool,
            offset: found.offset,
            size: request.size,
            alignment: request.alignment,
            memory_type_index: self.desc.memory_type_index,
            kind: request.kind,
            state,
            map_count: Default::default(),
            persistently_mapped,
        })
    }

    // -------------------------------------------------------------------------
    // Release
    // -------------------------------------------------------------------------

    pub fn free(&self, core: &AllocatorCore, allocation: BlockAllocation) -> Result<()> {
        let budget_exceeded = core.heap_budget(self.desc.heap_index).is_over_budget();

        let to_delete = {
            let mut inner = self.inner.write();
            let Some(index) = inner.blocks.iter().position(|b| b.id() == allocation.block_id) else {
                // An evicted region may outlive its block.
                if allocation.state.is_reclaimed() {
                    drop(inner);
                    return Self::release_detached(core, &allocation);
                }
                return Err(Error::InvalidUsage("allocation does not belong to this block list"));
            };

            let block = &mut inner.blocks[index];
            let memory = block.memory().clone();

            let outstanding = allocation.map_count.load(Ordering::Acquire);
            if outstanding > 0 {
                log::warn!("Freeing allocation in {} still mapped {} times", memory.id(), outstanding);
                memory.mapping().unmap(core.device(), memory.memory(), outstanding)?;
            }
            if allocation.persistently_mapped {
                memory.mapping().unmap(core.device(), memory.memory(), 1)?;
            }

            if !allocation.state.is_reclaimed() {
                block.metadata.free(allocation.offset, &allocation.state)?;
                core.budget().remove_allocation(self.desc.heap_index, allocation.size);
            }
            log::trace!("Freed {} bytes at {}+{}", allocation.size, memory.id(), allocation.offset);

            let can_delete = inner.blocks.len() > self.desc.min_block_count;
            let mut to_delete = None;
            if inner.blocks[index].metadata.is_empty() {
                // Keep a single spare block unless over budget.
                if (inner.has_empty_block || budget_exceeded) && can_delete {
                    to_delete = Some(inner.blocks.remove(index));
                }
            } else if inner.has_empty_block && can_delete {
                if inner.blocks.last().is_some_and(|b| b.metadata.is_empty()) {
                    to_delete = inner.blocks.pop();
                }
            }

            inner.update_has_empty_block();
            inner.incrementally_sort_blocks();
            to_delete
        };

        match to_delete {
            Some(block) => self.destroy_block(core, block),
            None => Ok(()),
        }
    }

    /// Drop the map references of a reclaimed allocation whose block has
    /// left the list.
    fn release_detached(core: &AllocatorCore, allocation: &BlockAllocation) -> Result<()> {
        if let Some(memory) = allocation.block.upgrade() {
            let mut count = allocation.map_count.load(Ordering::Acquire);
            if allocation.persistently_mapped {
                count += 1;
            }
            if count > 0 && memory.mapping().map_count() >= count {
                memory.mapping().unmap(core.device(), memory.memory(), count)?;
            }
        }
        log::trace!(
            "Freed lost allocation of {} bytes from released {}",
            allocation.size,
            allocation.block_id
        );
        Ok(())
    }

    fn destroy_block(&self, core: &AllocatorCore, block: MemoryBlock) -> Result<()> {
        let id = block.id();
        let size = block.size();
        match block.dispose(core.device()) {
            Ok(memory) => {
                core.free_device_memory(self.desc.memory_type_index, memory, size);
                log::debug!("Destroyed {} ({} bytes)", id, size);
                Ok(())
            }
            Err((block, e)) => {
                let mut inner = self.inner.write();
                inner.blocks.push(block);
                inner.update_has_empty_block();
                Err(e)
            }
        }
    }

    /// Evict every stale evictable allocation. Returns how many were lost.
    pub fn make_allocations_lost(&self, core: &AllocatorCore) -> u32 {
        let current_frame = core.current_frame();
        let mut inner = self.inner.write();
        let mut lost = 0;

        for block in inner.blocks.iter_mut() {
            let outcome = block
                .metadata
                .make_allocations_lost(current_frame, self.desc.frame_in_use_count);
            if outcome.bytes > 0 {
                core.budget().remove_allocation(self.desc.heap_index, outcome.bytes);
            }
            lost += outcome.count;
        }

        inner.update_has_empty_block();
        inner.incrementally_sort_blocks();
        lost
    }

    /// Release every block and close the list to new allocations. Fails
    /// without releasing anything if any block still holds allocations.
    pub fn dispose(&self, core: &AllocatorCore) -> Result<()> {
        let blocks = {
            let mut inner = self.inner.write();
            if inner.blocks.iter().any(|b| !b.metadata.is_empty()) {
                return Err(Error::InvalidUsage("block list still has live allocations"));
            }
            inner.has_empty_block = false;
            inner.closed = true;
            core::mem::take(&mut inner.blocks)
        };

        let mut result = Ok(());
        for block in blocks {
            if let Err(e) = self.destroy_block(core, block) {
                result = result.and(Err(e));
            }
        }
        if result.is_err() {
            // Blocks the device refused to release are back in the list.
            self.inner.write().closed = false;
        }
        result
    }

    /// Bytes of device memory held by the list's blocks.
    pub fn block_bytes(&self) -> u64 {
        self.inner.read().blocks.iter().map(MemoryBlock::size).sum()
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub fn add_stats(&self, stats: &mut Stats) {
        let inner = self.inner.read();
        for block in &inner.blocks {
            stats.add(
                self.desc.memory_type_index,
                self.desc.heap_index,
                &block.metadata.calc_stat_info(),
            );
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        let inner = self.inner.read();
        let mut stats = PoolStats {
            block_count: inner.blocks.len() as u32,
            ..PoolStats::default()
        };
        for block in &inner.blocks {
            block.metadata.add_pool_stats(&mut stats);
        }
        stats
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorCreateInfo;
    use crate::device::MemoryDevice;
    use crate::testing::MockDevice;
    use alloc::vec;

    const MIB: u64 = 1 << 20;

    fn core(device: MockDevice) -> AllocatorCore {
        AllocatorCore::new(Arc::new(device), &AllocatorCreateInfo::default()).unwrap()
    }

    fn default_list(core: &AllocatorCore) -> BlockList {
        BlockList::new(BlockListDesc {
            memory_type_index: 0,
            heap_index: 0,
            preferred_block_size: core.preferred_block_size(0),
            explicit_block_size: false,
            min_block_count: 0,
            max_block_count: usize::MAX,
            frame_in_use_count: 1,
            pool: None,
        })
    }

    fn request(size: u64) -> BlockRequest {
        BlockRequest {
            size,
            alignment: 256,
            kind: SuballocationType::Buffer,
            flags: AllocationCreateFlags::empty(),
            strategy: AllocationStrategy::BestFit,
        }
    }

    #[test]
    fn test_first_allocation_creates_one_block() {
        let core = core(MockDevice::new());
        let list = default_list(&core);
        assert_eq!(core.preferred_block_size(0), 256 * MIB);

        let a = list.allocate(&core, &request(4 * MIB)).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(list.block_count(), 1);
        let block = list.block_sizes()[0];
        assert!((4 * MIB..=256 * MIB).contains(&block));
        // No other blocks exist yet, so the new block was shrunk.
        assert_eq!(block, 32 * MIB);

        list.free(&core, a).unwrap();
        assert!(list.validate());
    }

    #[test]
    fn test_full_block_grows_list() {
        let core = core(MockDevice::new());
        let list = default_list(&core);

        let a = list.allocate(&core, &request(100 * MIB)).unwrap();
        let b = list.allocate(&core, &request(100 * MIB)).unwrap();
        assert_eq!(list.block_count(), 1);
        assert_eq!(list.sum_free_size(), 56 * MIB);

        let c = list.allocate(&core, &request(100 * MIB)).unwrap();
        assert_eq!(list.block_count(), 2);
        assert_ne!(c.block_id, a.block_id);
        assert_eq!(b.block_id, a.block_id);

        for x in [a, b, c] {
            list.free(&core, x).unwrap();
        }
        // One empty block is kept as a spare.
        assert_eq!(list.block_count(), 1);
    }

    #[test]
    fn test_only_one_empty_block_is_kept() {
        let core = core(MockDevice::new());
        let list = BlockList::new(BlockListDesc {
            explicit_block_size: true,
            preferred_block_size: 16 * MIB,
            ..default_list(&core).desc
        });

        let a = list.allocate(&core, &request(10 * MIB)).unwrap();
        let b = list.allocate(&core, &request(10 * MIB)).unwrap();
        assert_eq!(list.block_count(), 2);

        list.free(&core, a).unwrap();
        assert_eq!(list.block_count(), 2);

        list.free(&core, b).unwrap();
        assert_eq!(list.block_count(), 1);
        assert_eq!(core.budget().block_bytes(0), 16 * MIB);
    }

    #[test]
    fn test_min_block_count_is_retained() {
        let core = core(MockDevice::new());
        let list = BlockList::new(BlockListDesc {
            explicit_block_size: true,
            preferred_block_size: 8 * MIB,
            min_block_count: 2,
            ..default_list(&core).desc
        });
        list.create_min_blocks(&core).unwrap();
        assert_eq!(list.block_count(), 2);

        let a = list.allocate(&core, &request(MIB)).unwrap();
        list.free(&core, a).unwrap();
        assert_eq!(list.block_count(), 2);
        list.dispose(&core).unwrap();
        assert_eq!(core.budget().block_bytes(0), 0);
    }

    #[test]
    fn test_device_failure_shrinks_new_block() {
        let device = MockDevice::new();
        device.fail_allocations_larger_than(40 * MIB);
        let core = core(device);
        let list = default_list(&core);

        // 100 MiB can never fit under the device cap.
        assert_eq!(
            list.allocate(&core, &request(100 * MIB)).unwrap_err(),
            Error::OutOfDeviceMemory
        );
        assert_eq!(core.budget().block_bytes(0), 0);

        // Proactive shrinking stops at 64 MiB, which the device refuses.
        let a = list.allocate(&core, &request(20 * MIB)).unwrap();
        assert_eq!(list.block_sizes(), vec![32 * MIB]);
        list.free(&core, a).unwrap();
    }

    #[test]
    fn test_never_allocate_uses_existing_blocks_only() {
        let core = core(MockDevice::new());
        let list = default_list(&core);
        let never = BlockRequest {
            flags: AllocationCreateFlags::NEVER_ALLOCATE,
            ..request(MIB)
        };
        assert_eq!(list.allocate(&core, &never).unwrap_err(), Error::OutOfDeviceMemory);

        let a = list.allocate(&core, &request(MIB)).unwrap();
        let b = list.allocate(&core, &never).unwrap();
        assert_eq!(a.block_id, b.block_id);
        list.free(&core, a).unwrap();
        list.free(&core, b).unwrap();
    }

    #[test]
    fn test_round_trip_restores_free_bytes() {
        let core = core(MockDevice::new());
        let list = default_list(&core);
        let keep = list.allocate(&core, &request(3 * MIB)).unwrap();
        let before = list.sum_free_size();

        let sizes = [MIB, 5 * MIB, 300 * 1024, 7 * MIB];
        let live: Vec<_> = sizes
            .iter()
            .map(|&s| list.allocate(&core, &request(s)).unwrap())
            .collect();
        for a in live {
            list.free(&core, a).unwrap();
        }

        assert_eq!(list.sum_free_size(), before);
        assert!(list.validate());
        list.free(&core, keep).unwrap();
    }

    #[test]
    fn test_repeated_cycles_of_one_size_restore_free_bytes() {
        let core = core(MockDevice::new());
        let list = default_list(&core);
        let keep = list.allocate(&core, &request(2 * MIB)).unwrap();
        let before = list.sum_free_size();

        for _ in 0..2 {
            let a = list.allocate(&core, &request(6 * MIB)).unwrap();
            assert_eq!(list.sum_free_size(), before - 6 * MIB);
            list.free(&core, a).unwrap();
            assert_eq!(list.sum_free_size(), before);
        }

        assert_eq!(list.block_count(), 1);
        assert_eq!(core.budget().allocation_bytes(0), 2 * MIB);
        assert!(list.validate());
        list.free(&core, keep).unwrap();
    }

    #[test]
    fn test_eviction_without_candidates_fails() {
        let core = core(MockDevice::new());
        let list = BlockList::new(BlockListDesc {
            explicit_block_size: true,
            preferred_block_size: 4 * MIB,
            max_block_count: 1,
            frame_in_use_count: 0,
            ..default_list(&core).desc
        });

        // Not evictable: eviction finds nothing and reports out of memory.
        let a = list.allocate(&core, &request(4 * MIB)).unwrap();
        let evicting = BlockRequest {
            flags: AllocationCreateFlags::CAN_MAKE_OTHER_LOST,
            ..request(MIB)
        };
        assert_eq!(list.allocate(&core, &evicting).unwrap_err(), Error::OutOfDeviceMemory);
        list.free(&core, a).unwrap();
    }

    #[test]
    fn test_sort_moves_fuller_blocks_forward() {
        let mut inner = BlockListInner::default();
        let device = MockDevice::new();
        for (id, size) in [(1, 8 * MIB), (2, 4 * MIB)] {
            let memory = device.allocate_raw(0, size).unwrap();
            inner
                .blocks
                .push(MemoryBlock::new(crate::block::BlockId::new(id), memory, size));
        }
        inner.incrementally_sort_blocks();
        assert_eq!(inner.blocks[0].size(), 4 * MIB);
    }
}
