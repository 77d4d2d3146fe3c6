//! # Suballocation Metadata
//!
//! Bookkeeping for one memory block: an offset-ordered map of regions that
//! exactly tile the block, plus a size-ordered index of the free ones.
//!
//! ```text
//!   0        256            1280              4096
//!   | used A | free (1024)  |    used B       | free |
//!   +--------+--------------+-----------------+------+
//! ```
//!
//! Invariants kept by every mutation:
//! - regions are contiguous, non-overlapping and cover `[0, size)`
//! - no two free regions are adjacent
//! - `sum_free_size` and `free_count` match the free regions
//! - the size index holds exactly the free regions

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::allocation::AllocationState;
use crate::request::{AllocationStrategy, SuballocationType};
use crate::stats::{PoolStats, StatInfo};
use crate::util::{align_up, blocks_on_same_page, has_granularity_conflict};
use crate::{Error, Result};

// ============================================================================
// Suballocation
// ============================================================================

/// Occupancy of a region.
#[derive(Debug, Clone)]
pub(crate) enum SuballocationState {
    Free,
    Used {
        kind: SuballocationType,
        allocation: Arc<AllocationState>,
    },
}

/// One region of a block.
#[derive(Debug, Clone)]
pub(crate) struct Suballocation {
    pub offset: u64,
    pub size: u64,
    pub state: SuballocationState,
}

impl Suballocation {
    fn free(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            state: SuballocationState::Free,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self.state, SuballocationState::Free)
    }

    pub fn kind(&self) -> SuballocationType {
        match &self.state {
            SuballocationState::Free => SuballocationType::Free,
            SuballocationState::Used { kind, .. } => *kind,
        }
    }

    fn end(&self) -> u64 {
        self.offset + self.size
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Inputs of a placement search.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestParams {
    pub current_frame: u32,
    pub frame_in_use_count: u32,
    pub granularity: u64,
    pub size: u64,
    pub alignment: u64,
    pub kind: SuballocationType,
    pub strategy: AllocationStrategy,
    pub can_make_other_lost: bool,
    pub lost_allocation_cost: u64,
}

/// A placement found by a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocationRequest {
    /// Final, aligned offset of the new allocation.
    pub offset: u64,
    /// Free bytes in the regions the allocation spans.
    pub sum_free_size: u64,
    /// Bytes of allocations that must be evicted.
    pub sum_item_size: u64,
    /// Allocations that must be evicted first.
    pub items_to_make_lost: usize,
    /// Offset of the first region the allocation spans.
    pub item: u64,
    pub cost: u64,
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EvictionOutcome {
    /// Every requested eviction succeeded.
    pub completed: bool,
    pub count: u32,
    pub bytes: u64,
}

// ============================================================================
// Block Metadata
// ============================================================================

#[derive(Debug)]
pub(crate) struct BlockMetadata {
    size: u64,
    free_count: u32,
    sum_free_size: u64,
    suballocations: BTreeMap<u64, Suballocation>,
    /// Free regions ordered by `(size, offset)`.
    free_by_size: BTreeSet<(u64, u64)>,
}

impl BlockMetadata {
    pub fn new(size: u64) -> Self {
        let mut suballocations = BTreeMap::new();
        suballocations.insert(0, Suballocation::free(0, size));
        let mut free_by_size = BTreeSet::new();
        free_by_size.insert((size, 0));

        Self {
            size,
            free_count: 1,
            sum_free_size: size,
            suballocations,
            free_by_size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sum_free_size(&self) -> u64 {
        self.sum_free_size
    }

    pub fn allocation_count(&self) -> u32 {
        self.suballocations.len() as u32 - self.free_count
    }

    pub fn is_empty(&self) -> bool {
        self.suballocations.len() == 1 && self.free_count == 1
    }

    pub fn unused_range_size_max(&self) -> u64 {
        self.free_by_size.iter().next_back().map_or(0, |&(size, _)| size)
    }

    #[cfg(test)]
    pub fn suballocations(&self) -> impl Iterator<Item = &Suballocation> {
        self.suballocations.values()
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// Find a placement for `params.size` bytes.
    pub fn try_create_allocation_request(&self, params: &RequestParams) -> Option<AllocationRequest> {
        if params.size == 0 || params.size > self.size {
            return None;
        }

        if self.sum_free_size >= params.size {
            if let Some(request) = self.search_free(params) {
                return Some(request);
            }
        }

        if params.can_make_other_lost {
            return self.search_with_eviction(params);
        }

        None
    }

    fn search_free(&self, params: &RequestParams) -> Option<AllocationRequest> {
        let size = params.size;
        let max_padding = params.alignment.max(1) + params.granularity.max(1);
        let mut best: Option<(u64, AllocationRequest)> = None;

        match params.strategy {
            AllocationStrategy::FirstFit => {
                return self
                    .suballocations
                    .values()
                    .filter(|s| s.is_free() && s.size >= size)
                    .find_map(|s| self.check_allocation(params, s.offset, false));
            }
            AllocationStrategy::BestFit => {
                for &(free_size, offset) in self.free_by_size.range((size, 0)..) {
                    if let Some((leftover, _)) = best {
                        if free_size - size > leftover + max_padding {
                            break;
                        }
                    }
                    if let Some(request) = self.check_allocation(params, offset, false) {
                        let leftover = free_size - (request.offset - offset) - size;
                        if leftover == 0 {
                            return Some(request);
                        }
                        let better = best.map_or(true, |(l, r)| {
                            leftover < l || (leftover == l && request.offset < r.offset)
                        });
                        if better {
                            best = Some((leftover, request));
                        }
                    }
                }
            }
            AllocationStrategy::WorstFit => {
                for &(free_size, offset) in self.free_by_size.iter().rev() {
                    if free_size < size {
                        break;
                    }
                    if let Some((leftover, _)) = best {
                        if free_size - size < leftover {
                            break;
                        }
                    }
                    if let Some(request) = self.check_allocation(params, offset, false) {
                        let leftover = free_size - (request.offset - offset) - size;
                        if leftover == 0 {
                            return Some(request);
                        }
                        let better = best.map_or(true, |(l, r)| {
                            leftover > l || (leftover == l && request.offset < r.offset)
                        });
                        if better {
                            best = Some((leftover, request));
                        }
                    }
                }
            }
        }

        best.map(|(_, request)| request)
    }

    fn search_with_eviction(&self, params: &RequestParams) -> Option<AllocationRequest> {
        let mut best: Option<AllocationRequest> = None;

        for sub in self.suballocations.values() {
            let candidate = match &sub.state {
                SuballocationState::Free => true,
                SuballocationState::Used { allocation, .. } => {
                    allocation.is_reclaimable(params.current_frame, params.frame_in_use_count)
                }
            };
            if !candidate {
                continue;
            }

            if let Some(request) = self.check_allocation(params, sub.offset, true) {
                if best.map_or(true, |b| request.cost < b.cost) {
                    best = Some(request);
                    if request.cost == 0 || params.strategy == AllocationStrategy::FirstFit {
                        break;
                    }
                }
            }
        }

        best
    }

    /// Count a region into an eviction-mode request.
    fn absorb(&self, sub: &Suballocation, params: &RequestParams, request: &mut AllocationRequest) -> bool {
        match &sub.state {
            SuballocationState::Free => {
                request.sum_free_size += sub.size;
                true
            }
            SuballocationState::Used { allocation, .. } => {
                if allocation.is_reclaimable(params.current_frame, params.frame_in_use_count) {
                    request.items_to_make_lost += 1;
                    request.sum_item_size += sub.size;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Try to place the allocation starting in the region at `start`.
    fn check_allocation(
        &self,
        params: &RequestParams,
        start: u64,
        eviction: bool,
    ) -> Option<AllocationRequest> {
        let first = self.suballocations.get(&start)?;
        let mut request = AllocationRequest {
            offset: 0,
            sum_free_size: 0,
            sum_item_size: 0,
            items_to_make_lost: 0,
            item: start,
            cost: 0,
        };

        if eviction {
            if !self.absorb(first, params, &mut request) {
                return None;
            }
        } else {
            if !first.is_free() || first.size < params.size {
                return None;
            }
            request.sum_free_size = first.size;
        }
        if self.size - first.offset < params.size {
            return None;
        }

        let mut offset = align_up(first.offset, params.alignment);

        // A conflicting neighbour before us on the same page pushes the
        // allocation onto the next granularity boundary.
        if params.granularity > 1 {
            for prev in self.suballocations.range(..first.offset).rev().map(|(_, s)| s) {
                if !blocks_on_same_page(prev.offset, prev.size, offset, params.granularity) {
                    break;
                }
                if has_granularity_conflict(prev.kind(), params.kind) {
                    offset = align_up(offset, params.granularity);
                    break;
                }
            }
        }

        let end = offset.checked_add(params.size)?;
        if end > self.size {
            return None;
        }

        let mut following = self
            .suballocations
            .range(first.offset + 1..)
            .map(|(_, s)| s);

        if eviction {
            let mut last_end = first.end();
            while last_end < end {
                let next = following.next()?;
                if !self.absorb(next, params, &mut request) {
                    return None;
                }
                last_end = next.end();
            }
        } else if end > first.end() {
            return None;
        }

        // Neighbours after us on the same page must not conflict.
        if params.granularity > 1 {
            for next in following {
                if !blocks_on_same_page(offset, params.size, next.offset, params.granularity) {
                    break;
                }
                if !has_granularity_conflict(params.kind, next.kind()) {
                    continue;
                }
                match &next.state {
                    SuballocationState::Used { allocation, .. }
                        if eviction
                            && allocation
                                .is_reclaimable(params.current_frame, params.frame_in_use_count) =>
                    {
                        request.items_to_make_lost += 1;
                    }
                    _ => return None,
                }
            }
        }

        request.offset = offset;
        request.cost =
            request.sum_item_size + request.items_to_make_lost as u64 * params.lost_allocation_cost;
        Some(request)
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Commit a request found by [`try_create_allocation_request`].
    pub fn alloc(
        &mut self,
        request: &AllocationRequest,
        kind: SuballocationType,
        size: u64,
        allocation: Arc<AllocationState>,
    ) -> Result<()> {
        debug_assert_eq!(request.items_to_make_lost, 0);

        let free = match self.suballocations.get(&request.item) {
            Some(s)
                if s.is_free()
                    && request.offset >= s.offset
                    && request.offset + size <= s.end() =>
            {
                s.clone()
            }
            _ => return Err(Error::InvalidUsage("stale allocation request")),
        };

        self.suballocations.remove(&free.offset);
        self.free_by_size.remove(&(free.size, free.offset));
        self.free_count -= 1;

        let padding_begin = request.offset - free.offset;
        let padding_end = free.size - padding_begin - size;

        self.suballocations.insert(
            request.offset,
            Suballocation {
                offset: request.offset,
                size,
                state: SuballocationState::Used { kind, allocation },
            },
        );
        if padding_end > 0 {
            self.insert_free(request.offset + size, padding_end);
        }
        if padding_begin > 0 {
            self.insert_free(free.offset, padding_begin);
        }
        self.sum_free_size -= size;

        debug_assert!(self.validate());
        Ok(())
    }

    /// Release the allocation at `offset`.
    pub fn free(&mut self, offset: u64, allocation: &Arc<AllocationState>) -> Result<()> {
        match self.suballocations.get(&offset) {
            Some(Suballocation {
                state: SuballocationState::Used { allocation: owner, .. },
                ..
            }) if Arc::ptr_eq(owner, allocation) => {}
            _ => return Err(Error::InvalidUsage("memory freed was not allocated from this block")),
        }

        self.free_suballocation(offset);
        debug_assert!(self.validate());
        Ok(())
    }

    /// Evict the allocations a request needs.
    ///
    /// On success the request points at the merged free region that now
    /// holds the placement. Fails if any eviction lost its race.
    pub fn make_requested_allocations_lost(
        &mut self,
        current_frame: u32,
        frame_in_use_count: u32,
        request: &mut AllocationRequest,
    ) -> EvictionOutcome {
        let mut outcome = EvictionOutcome::default();
        let mut key = request.item;

        while request.items_to_make_lost > 0 {
            let Some(sub) = self.suballocations.get(&key) else {
                return outcome;
            };
            let (size, allocation) = match &sub.state {
                SuballocationState::Free => match self.next_offset(key) {
                    Some(next) => {
                        key = next;
                        continue;
                    }
                    None => return outcome,
                },
                SuballocationState::Used { allocation, .. } => (sub.size, allocation.clone()),
            };

            if !allocation.reclaim(current_frame, frame_in_use_count) {
                return outcome;
            }
            key = self.free_suballocation(key);
            request.items_to_make_lost -= 1;
            outcome.count += 1;
            outcome.bytes += size;
        }

        request.item = key;
        outcome.completed = true;
        debug_assert!(self.validate());
        outcome
    }

    /// Evict every allocation unused for more than `frame_in_use_count` frames.
    pub fn make_allocations_lost(&mut self, current_frame: u32, frame_in_use_count: u32) -> EvictionOutcome {
        let candidates: Vec<(u64, u64, Arc<AllocationState>)> = self
            .suballocations
            .values()
            .filter_map(|s| match &s.state {
                SuballocationState::Used { allocation, .. } if allocation.can_become_lost() => {
                    Some((s.offset, s.size, allocation.clone()))
                }
                _ => None,
            })
            .collect();

        let mut outcome = EvictionOutcome {
            completed: true,
            ..EvictionOutcome::default()
        };
        for (offset, size, allocation) in candidates {
            if allocation.reclaim(current_frame, frame_in_use_count) {
                self.free_suballocation(offset);
                outcome.count += 1;
                outcome.bytes += size;
            }
        }

        debug_assert!(self.validate());
        outcome
    }

    fn next_offset(&self, offset: u64) -> Option<u64> {
        self.suballocations
            .range(offset + 1..)
            .next()
            .map(|(&key, _)| key)
    }

    fn insert_free(&mut self, offset: u64, size: u64) {
        self.suballocations.insert(offset, Suballocation::free(offset, size));
        self.free_by_size.insert((size, offset));
        self.free_count += 1;
    }

    /// Mark a used region free and merge it with free neighbours.
    /// Returns the offset of the merged region.
    fn free_suballocation(&mut self, offset: u64) -> u64 {
        let Some(sub) = self.suballocations.get_mut(&offset) else {
            return offset;
        };
        debug_assert!(!sub.is_free());
        sub.state = SuballocationState::Free;
        let mut merged_size = sub.size;
        self.free_count += 1;
        self.sum_free_size += merged_size;

        let next = self
            .suballocations
            .range(offset + 1..)
            .next()
            .filter(|(_, s)| s.is_free())
            .map(|(&key, s)| (key, s.size));
        if let Some((next_offset, next_size)) = next {
            self.suballocations.remove(&next_offset);
            self.free_by_size.remove(&(next_size, next_offset));
            self.free_count -= 1;
            merged_size += next_size;
        }

        let prev = self
            .suballocations
            .range(..offset)
            .next_back()
            .filter(|(_, s)| s.is_free())
            .map(|(&key, s)| (key, s.size));
        let merged_offset = match prev {
            Some((prev_offset, prev_size)) => {
                self.suballocations.remove(&offset);
                self.free_by_size.remove(&(prev_size, prev_offset));
                self.free_count -= 1;
                merged_size += prev_size;
                prev_offset
            }
            None => offset,
        };

        if let Some(merged) = self.suballocations.get_mut(&merged_offset) {
            merged.size = merged_size;
        }
        self.free_by_size.insert((merged_size, merged_offset));
        merged_offset
    }

    // ------------------------------------------------------------------------
    // Statistics and validation
    // ------------------------------------------------------------------------

    pub fn calc_stat_info(&self) -> StatInfo {
        let mut info = StatInfo {
            block_count: 1,
            ..StatInfo::default()
        };
        for sub in self.suballocations.values() {
            if sub.is_free() {
                info.record_unused_range(sub.size);
            } else {
                info.record_allocation(sub.size);
            }
        }
        info
    }

    pub fn add_pool_stats(&self, stats: &mut PoolStats) {
        stats.size += self.size;
        stats.unused_size += self.sum_free_size;
        stats.allocation_count += self.allocation_count();
        stats.unused_range_count += self.free_count;
        stats.unused_range_size_max = stats.unused_range_size_max.max(self.unused_range_size_max());
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> bool {
        let mut expected_offset = 0;
        let mut prev_free = false;
        let mut free_count = 0;
        let mut sum_free = 0;

        for (&key, sub) in &self.suballocations {
            if key != sub.offset || sub.offset != expected_offset || sub.size == 0 {
                return false;
            }
            if sub.is_free() {
                if prev_free || !self.free_by_size.contains(&(sub.size, sub.offset)) {
                    return false;
                }
                free_count += 1;
                sum_free += sub.size;
            }
            prev_free = sub.is_free();
            expected_offset = sub.end();
        }

        expected_offset == self.size
            && free_count == self.free_count
            && sum_free == self.sum_free_size
            && self.free_by_size.len() == free_count as usize
    }
}

// ============================================================================
// Tests
// ============================================================================
