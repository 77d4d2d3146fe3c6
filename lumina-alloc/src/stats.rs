//! Statistics
//!
//! Aggregated usage numbers per memory type, per heap and in total.

use alloc::vec;
use alloc::vec::Vec;

// ============================================================================
// Stat Info
// ============================================================================

/// Usage numbers for a group of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    /// Device memory objects (blocks and dedicated allocations)
    pub block_count: u32,
    /// Live allocations
    pub allocation_count: u32,
    /// Free ranges between allocations
    pub unused_range_count: u32,
    /// Bytes occupied by allocations
    pub used_bytes: u64,
    /// Bytes not occupied by allocations
    pub unused_bytes: u64,
    /// Smallest allocation
    pub allocation_size_min: u64,
    /// Average allocation
    pub allocation_size_avg: u64,
    /// Largest allocation
    pub allocation_size_max: u64,
    /// Smallest free range
    pub unused_range_size_min: u64,
    /// Average free range
    pub unused_range_size_avg: u64,
    /// Largest free range
    pub unused_range_size_max: u64,
}

impl Default for StatInfo {
    fn default() -> Self {
        Self {
            block_count: 0,
            allocation_count: 0,
            unused_range_count: 0,
            used_bytes: 0,
            unused_bytes: 0,
            allocation_size_min: u64::MAX,
            allocation_size_avg: 0,
            allocation_size_max: 0,
            unused_range_size_min: u64::MAX,
            unused_range_size_avg: 0,
            unused_range_size_max: 0,
        }
    }
}

impl StatInfo {
    /// Record one allocation.
    pub(crate) fn record_allocation(&mut self, size: u64) {
        self.allocation_count += 1;
        self.used_bytes += size;
        self.allocation_size_min = self.allocation_size_min.min(size);
        self.allocation_size_max = self.allocation_size_max.max(size);
    }

    /// Record one free range.
    pub(crate) fn record_unused_range(&mut self, size: u64) {
        self.unused_range_count += 1;
        self.unused_bytes += size;
        self.unused_range_size_min = self.unused_range_size_min.min(size);
        self.unused_range_size_max = self.unused_range_size_max.max(size);
    }

    /// Merge another group into this one.
    pub(crate) fn add(&mut self, other: &StatInfo) {
        self.block_count += other.block_count;
        self.allocation_count += other.allocation_count;
        self.unused_range_count += other.unused_range_count;
        self.used_bytes += other.used_bytes;
        self.unused_bytes += other.unused_bytes;
        self.allocation_size_min = self.allocation_size_min.min(other.allocation_size_min);
        self.allocation_size_max = self.allocation_size_max.max(other.allocation_size_max);
        self.unused_range_size_min = self.unused_range_size_min.min(other.unused_range_size_min);
        self.unused_range_size_max = self.unused_range_size_max.max(other.unused_range_size_max);
    }

    /// Compute averages once every group has been merged.
    pub(crate) fn finish(&mut self) {
        self.allocation_size_avg = if self.allocation_count > 0 {
            self.used_bytes / u64::from(self.allocation_count)
        } else {
            0
        };
        self.unused_range_size_avg = if self.unused_range_count > 0 {
            self.unused_bytes / u64::from(self.unused_range_count)
        } else {
            0
        };
    }

    /// Total bytes in the group.
    pub fn total_bytes(&self) -> u64 {
        self.used_bytes + self.unused_bytes
    }
}

// ============================================================================
// Allocator Stats
// ============================================================================

/// Allocator-wide statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stats {
    /// Per memory type
    pub memory_type: Vec<StatInfo>,
    /// Per memory heap
    pub memory_heap: Vec<StatInfo>,
    /// Everything
    pub total: StatInfo,
}

impl Stats {
    pub(crate) fn new(type_count: usize, heap_count: usize) -> Self {
        Self {
            memory_type: vec![StatInfo::default(); type_count],
            memory_heap: vec![StatInfo::default(); heap_count],
            total: StatInfo::default(),
        }
    }

    /// Add a group under its memory type and heap.
    pub(crate) fn add(&mut self, memory_type_index: u32, heap_index: u32, info: &StatInfo) {
        if let Some(t) = self.memory_type.get_mut(memory_type_index as usize) {
            t.add(info);
        }
        if let Some(h) = self.memory_heap.get_mut(heap_index as usize) {
            h.add(info);
        }
        self.total.add(info);
    }

    pub(crate) fn finish(&mut self) {
        self.memory_type.iter_mut().for_each(StatInfo::finish);
        self.memory_heap.iter_mut().for_each(StatInfo::finish);
        self.total.finish();
    }
}

// ============================================================================
// Pool Stats
// ============================================================================

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Total bytes in the pool's blocks
    pub size: u64,
    /// Free bytes
    pub unused_size: u64,
    /// Live allocations
    pub allocation_count: u32,
    /// Free ranges
    pub unused_range_count: u32,
    /// Largest free range
    pub unused_range_size_max: u64,
    /// Blocks
    pub block_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_averages() {
        let mut a = StatInfo::default();
        a.block_count = 1;
        a.record_allocation(100);
        a.record_allocation(300);
        a.record_unused_range(50);

        let mut b = StatInfo::default();
        b.block_count = 1;
        b.record_unused_range(1000);

        let mut stats = Stats::new(2, 1);
        stats.add(0, 0, &a);
        stats.add(1, 0, &b);
        stats.finish();

        assert_eq!(stats.total.block_count, 2);
        assert_eq!(stats.total.allocation_size_avg, 200);
        assert_eq!(stats.total.unused_range_size_min, 50);
        assert_eq!(stats.total.unused_range_size_max, 1000);
        assert_eq!(stats.memory_heap[0].total_bytes(), 1450);
        assert_eq!(stats.memory_type[1].allocation_count, 0);
        assert_eq!(stats.memory_type[1].allocation_size_avg, 0);
    }
}
