//! # Heap Budget Tracking
//!
//! Lock-free per-heap counters of bytes held in device memory objects
//! (`block_bytes`) and bytes handed out to allocations (`allocation_bytes`).
//!
//! When the device reports live budgets, a snapshot is refreshed every
//! `refresh_interval` mutating operations and usage is extrapolated from the
//! counters in between. Otherwise usage is `block_bytes` and the budget is
//! 80% of the heap.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::RwLock;

use crate::device::MemoryDevice;
use crate::{Error, Result};

// =============================================================================
// HEAP BUDGET
// =============================================================================

/// Budget snapshot for one heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapBudget {
    /// Heap index
    pub heap_index: u32,
    /// Bytes held in device memory objects
    pub block_bytes: u64,
    /// Bytes handed out to live allocations
    pub allocation_bytes: u64,
    /// Estimated bytes in use on the heap
    pub usage: u64,
    /// Bytes that may be used
    pub budget: u64,
}

impl HeapBudget {
    /// Bytes left before the budget is reached.
    pub fn available(&self) -> u64 {
        self.budget.saturating_sub(self.usage)
    }

    /// Whether usage reached the budget.
    pub fn is_over_budget(&self) -> bool {
        self.usage >= self.budget
    }
}

// =============================================================================
// TRACKER
// =============================================================================

#[derive(Debug, Default)]
struct HeapCounters {
    block_bytes: AtomicU64,
    allocation_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DeviceSnapshot {
    usage: u64,
    budget: u64,
    block_bytes_at_fetch: u64,
}

/// Per-heap budget tracker.
#[derive(Debug)]
pub struct BudgetTracker {
    heaps: Vec<HeapCounters>,
    heap_sizes: Vec<u64>,
    heap_limits: Vec<Option<u64>>,
    snapshot: RwLock<Option<Vec<DeviceSnapshot>>>,
    operations_since_fetch: AtomicU32,
    use_device_budget: bool,
    refresh_interval: u32,
}

impl BudgetTracker {
    /// `heap_sizes` must already be capped by `heap_limits`.
    pub(crate) fn new(
        heap_sizes: Vec<u64>,
        heap_limits: Vec<Option<u64>>,
        use_device_budget: bool,
        refresh_interval: u32,
    ) -> Self {
        Self {
            heaps: heap_sizes.iter().map(|_| HeapCounters::default()).collect(),
            heap_sizes,
            heap_limits,
            snapshot: RwLock::new(None),
            operations_since_fetch: AtomicU32::new(0),
            use_device_budget,
            refresh_interval,
        }
    }

    fn counters(&self, heap_index: u32) -> Option<&HeapCounters> {
        self.heaps.get(heap_index as usize)
    }

    fn note_operation(&self) {
        self.operations_since_fetch.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for a new device memory object, honouring a hard heap limit.
    pub(crate) fn reserve_block(&self, heap_index: u32, size: u64) -> Result<()> {
        let counters = self
            .counters(heap_index)
            .ok_or(Error::InvalidUsage("heap index out of range"))?;

        match self.heap_limits.get(heap_index as usize).copied().flatten() {
            Some(limit) => {
                let mut current = counters.block_bytes.load(Ordering::Acquire);
                loop {
                    let after = current.checked_add(size).ok_or(Error::OutOfDeviceMemory)?;
                    if after > limit {
                        log::debug!(
                            "Heap {} limit {} reached ({} + {})",
                            heap_index,
                            limit,
                            current,
                            size
                        );
                        return Err(Error::OutOfDeviceMemory);
                    }
                    match counters.block_bytes.compare_exchange_weak(
                        current,
                        after,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => current = actual,
                    }
                }
            }
            None => {
                counters.block_bytes.fetch_add(size, Ordering::AcqRel);
            }
        }

        self.note_operation();
        Ok(())
    }

    /// Undo [`reserve_block`](Self::reserve_block).
    pub(crate) fn release_block(&self, heap_index: u32, size: u64) {
        if let Some(counters) = self.counters(heap_index) {
            counters.block_bytes.fetch_sub(size, Ordering::AcqRel);
            self.note_operation();
        }
    }

    pub(crate) fn add_allocation(&self, heap_index: u32, size: u64) {
        if let Some(counters) = self.counters(heap_index) {
            counters.allocation_bytes.fetch_add(size, Ordering::AcqRel);
            self.note_operation();
        }
    }

    pub(crate) fn remove_allocation(&self, heap_index: u32, size: u64) {
        if let Some(counters) = self.counters(heap_index) {
            counters.allocation_bytes.fetch_sub(size, Ordering::AcqRel);
            self.note_operation();
        }
    }

    /// Bytes held in device memory objects on a heap.
    pub fn block_bytes(&self, heap_index: u32) -> u64 {
        self.counters(heap_index)
            .map_or(0, |c| c.block_bytes.load(Ordering::Acquire))
    }

    /// Bytes handed out to allocations on a heap.
    pub fn allocation_bytes(&self, heap_index: u32) -> u64 {
        self.counters(heap_index)
            .map_or(0, |c| c.allocation_bytes.load(Ordering::Acquire))
    }

    /// Whether the device snapshot is due for a refresh.
    pub(crate) fn needs_refresh(&self) -> bool {
        self.use_device_budget
            && (self.operations_since_fetch.load(Ordering::Relaxed) >= self.refresh_interval
                || self.snapshot.read().is_none())
    }

    /// Pull fresh numbers from the device.
    pub(crate) fn refresh(&self, device: &dyn MemoryDevice) {
        if !self.use_device_budget {
            return;
        }
        let Some(reported) = device.query_budget() else {
            return;
        };

        let mut snapshot: Vec<DeviceSnapshot> = (0..self.heaps.len())
            .map(|heap| {
                let block_bytes = self.block_bytes(heap as u32);
                DeviceSnapshot {
                    usage: block_bytes,
                    budget: self.heap_sizes[heap] * 8 / 10,
                    block_bytes_at_fetch: block_bytes,
                }
            })
            .collect();

        for entry in reported {
            let heap = entry.heap_index as usize;
            let Some(slot) = snapshot.get_mut(heap) else {
                continue;
            };
            let heap_size = self.heap_sizes[heap];

            // Drivers sometimes report nonsense; keep the fallbacks then.
            if entry.budget != 0 {
                slot.budget = entry.budget.min(heap_size);
            }
            if entry.usage != 0 || slot.block_bytes_at_fetch == 0 {
                slot.usage = entry.usage;
            }
        }

        *self.snapshot.write() = Some(snapshot);
        self.operations_since_fetch.store(0, Ordering::Relaxed);
    }

    /// Current budget for a heap, from the last snapshot or the fallback.
    pub fn heap_budget(&self, heap_index: u32) -> HeapBudget {
        let block_bytes = self.block_bytes(heap_index);
        let allocation_bytes = self.allocation_bytes(heap_index);
        let heap_size = self.heap_sizes.get(heap_index as usize).copied().unwrap_or(0);

        let device = if self.use_device_budget {
            self.snapshot
                .read()
                .as_ref()
                .and_then(|s| s.get(heap_index as usize).copied())
        } else {
            None
        };

        let (usage, budget) = match device {
            Some(snap) => (
                (snap.usage + block_bytes).saturating_sub(snap.block_bytes_at_fetch),
                snap.budget,
            ),
            None => (block_bytes, heap_size * 8 / 10),
        };

        HeapBudget {
            heap_index,
            block_bytes,
            allocation_bytes,
            usage,
            budget,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ReportedHeapBudget;
    use crate::testing::MockDevice;
    use alloc::vec;

    const MIB: u64 = 1 << 20;

    #[test]
    fn test_fallback_budget() {
        let tracker = BudgetTracker::new(vec![1000 * MIB], vec![None], false, 30);
        tracker.reserve_block(0, 100 * MIB).unwrap();
        tracker.add_allocation(0, 40 * MIB);

        let budget = tracker.heap_budget(0);
        assert_eq!(budget.usage, 100 * MIB);
        assert_eq!(budget.budget, 800 * MIB);
        assert_eq!(budget.allocation_bytes, 40 * MIB);
        assert!(budget.allocation_bytes <= budget.block_bytes);
        assert_eq!(budget.available(), 700 * MIB);
    }

    #[test]
    fn test_hard_limit_rejects_and_rolls_back() {
        let tracker = BudgetTracker::new(vec![64 * MIB], vec![Some(64 * MIB)], false, 30);
        tracker.reserve_block(0, 48 * MIB).unwrap();
        assert_eq!(tracker.reserve_block(0, 32 * MIB), Err(Error::OutOfDeviceMemory));
        assert_eq!(tracker.block_bytes(0), 48 * MIB);

        tracker.release_block(0, 48 * MIB);
        tracker.reserve_block(0, 64 * MIB).unwrap();
    }

    #[test]
    fn test_device_snapshot_extrapolates_usage() {
        let device = MockDevice::new();
        device.set_reported_budget(vec![ReportedHeapBudget {
            heap_index: 0,
            usage: 500 * MIB,
            budget: 2000 * MIB,
        }]);

        let tracker = BudgetTracker::new(vec![1000 * MIB, 100 * MIB], vec![None, None], true, 30);
        assert!(tracker.needs_refresh());
        tracker.refresh(&device);
        assert!(!tracker.needs_refresh());

        tracker.reserve_block(0, 64 * MIB).unwrap();
        let budget = tracker.heap_budget(0);
        assert_eq!(budget.usage, 564 * MIB);
        // Reported budget is capped at the heap size.
        assert_eq!(budget.budget, 1000 * MIB);

        // Heap without a report keeps the fallback.
        assert_eq!(tracker.heap_budget(1).budget, 80 * MIB);
    }

    #[test]
    fn test_refresh_interval() {
        let device = MockDevice::new();
        device.set_reported_budget(vec![ReportedHeapBudget {
            heap_index: 0,
            usage: 10 * MIB,
            budget: 900 * MIB,
        }]);
        let tracker = BudgetTracker::new(vec![1000 * MIB], vec![None], true, 30);
        tracker.refresh(&device);

        for _ in 0..29 {
            tracker.add_allocation(0, 1);
        }
        assert!(!tracker.needs_refresh());
        tracker.remove_allocation(0, 29);
        assert!(tracker.needs_refresh());
    }
}
