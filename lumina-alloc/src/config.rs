//! Allocator Configuration

use alloc::vec::Vec;

use bitflags::bitflags;

/// Default block size for heaps larger than `small_heap_max_size`.
pub const DEFAULT_LARGE_HEAP_BLOCK_SIZE: u64 = 256 * 1024 * 1024;

/// Heaps up to this size use an eighth of the heap as block size.
pub const DEFAULT_SMALL_HEAP_MAX_SIZE: u64 = 1024 * 1024 * 1024;

static_assertions::const_assert!(DEFAULT_LARGE_HEAP_BLOCK_SIZE % 32 == 0);
static_assertions::const_assert!(DEFAULT_SMALL_HEAP_MAX_SIZE >= DEFAULT_LARGE_HEAP_BLOCK_SIZE);

bitflags! {
    /// Allocator creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocatorCreateFlags: u32 {
        /// Use the device's live budget query instead of the 80% heuristic.
        const EXT_MEMORY_BUDGET = 1 << 0;
    }
}

/// Tuning constants of the block list and budget tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorTuning {
    /// Halvings tried when sizing or retrying a new block.
    pub max_block_shrink_steps: u32,
    /// Eviction retries before giving up with `TooManyEvictionAttempts`.
    pub max_eviction_attempts: u32,
    /// Mutating operations between device budget refreshes.
    pub budget_refresh_interval: u32,
    /// Heaps up to this size get blocks of one eighth of the heap.
    pub small_heap_max_size: u64,
    /// Cost of evicting one allocation, in bytes, when ranking placements.
    pub lost_allocation_cost: u64,
}

impl AllocatorTuning {
    /// Default tuning.
    pub const DEFAULT: Self = Self {
        max_block_shrink_steps: 3,
        max_eviction_attempts: 32,
        budget_refresh_interval: 30,
        small_heap_max_size: DEFAULT_SMALL_HEAP_MAX_SIZE,
        lost_allocation_cost: 1024 * 1024,
    };
}

impl Default for AllocatorTuning {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Allocator creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllocatorCreateInfo {
    /// Flags
    pub flags: AllocatorCreateFlags,
    /// Block size for large heaps; zero selects the default
    pub preferred_large_heap_block_size: u64,
    /// Frames an allocation stays protected from eviction after use
    pub frame_in_use_count: u32,
    /// Hard per-heap limits, indexed by heap
    pub heap_size_limits: Vec<Option<u64>>,
    /// Tuning constants
    pub tuning: AllocatorTuning,
}

impl AllocatorCreateInfo {
    /// Default creation parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add flags
    pub fn with_flags(mut self, flags: AllocatorCreateFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Set block size for large heaps
    pub fn with_preferred_large_heap_block_size(mut self, size: u64) -> Self {
        self.preferred_large_heap_block_size = size;
        self
    }

    /// Set eviction protection window
    pub fn with_frame_in_use_count(mut self, frames: u32) -> Self {
        self.frame_in_use_count = frames;
        self
    }

    /// Set per-heap limits
    pub fn with_heap_size_limits(mut self, limits: Vec<Option<u64>>) -> Self {
        self.heap_size_limits = limits;
        self
    }

    /// Set tuning constants
    pub fn with_tuning(mut self, tuning: AllocatorTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Block size for large heaps.
    pub fn large_heap_block_size(&self) -> u64 {
        if self.preferred_large_heap_block_size != 0 {
            self.preferred_large_heap_block_size
        } else {
            DEFAULT_LARGE_HEAP_BLOCK_SIZE
        }
    }
}
