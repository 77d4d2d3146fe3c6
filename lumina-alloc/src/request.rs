//! Allocation Requests
//!
//! What a caller asks for: size and alignment, memory type constraints,
//! behavioural flags and the placement strategy.

use bitflags::bitflags;

use crate::heap::{MemoryPropertyFlags, MemoryUsage};
use crate::pool::PoolHandle;

// ============================================================================
// Suballocation Type
// ============================================================================

/// Kind of resource occupying a region.
///
/// Linear and non-linear resources must not share a
/// buffer/image granularity page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SuballocationType {
    /// Unused space.
    Free,
    /// Unknown resource; conflicts with everything.
    #[default]
    Unknown,
    /// Buffer.
    Buffer,
    /// Image with unknown tiling.
    ImageUnknown,
    /// Linearly tiled image.
    ImageLinear,
    /// Optimally tiled image.
    ImageOptimal,
}

// ============================================================================
// Strategy
// ============================================================================

/// How a free region is picked among candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocationStrategy {
    /// Smallest leftover space.
    #[default]
    BestFit,
    /// Largest leftover space.
    WorstFit,
    /// First region that fits.
    FirstFit,
}

// ============================================================================
// Create Flags
// ============================================================================

bitflags! {
    /// Allocation behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocationCreateFlags: u32 {
        /// Give the allocation its own device memory object.
        const DEDICATED_MEMORY = 1 << 0;
        /// Only suballocate from existing blocks.
        const NEVER_ALLOCATE = 1 << 1;
        /// Keep the allocation persistently mapped.
        const MAPPED = 1 << 2;
        /// The allocation may be evicted once it has not been used for
        /// more than the frames-in-use window.
        const CAN_BECOME_LOST = 1 << 3;
        /// The request may evict stale evictable allocations.
        const CAN_MAKE_OTHER_LOST = 1 << 4;
        /// Fail rather than exceed the heap budget.
        const WITHIN_BUDGET = 1 << 5;
    }
}

// ============================================================================
// Create Info
// ============================================================================

/// Parameters describing how an allocation is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationCreateInfo {
    /// Behaviour flags
    pub flags: AllocationCreateFlags,
    /// Usage hint feeding memory type selection
    pub usage: MemoryUsage,
    /// Flags the memory type must have
    pub required_flags: MemoryPropertyFlags,
    /// Flags the memory type should have
    pub preferred_flags: MemoryPropertyFlags,
    /// Flags the memory type should not have
    pub not_preferred_flags: MemoryPropertyFlags,
    /// Additional memory type mask; zero allows every type
    pub memory_type_bits: u32,
    /// Allocate from a custom pool instead of the default block lists
    pub pool: Option<PoolHandle>,
    /// Placement strategy
    pub strategy: AllocationStrategy,
}

impl AllocationCreateInfo {
    /// GPU only
    pub const GPU_ONLY: Self = Self::with_usage(MemoryUsage::GpuOnly);
    /// CPU to GPU
    pub const CPU_TO_GPU: Self = Self::with_usage(MemoryUsage::CpuToGpu);
    /// GPU to CPU
    pub const GPU_TO_CPU: Self = Self::with_usage(MemoryUsage::GpuToCpu);
    /// CPU only
    pub const CPU_ONLY: Self = Self::with_usage(MemoryUsage::CpuOnly);

    /// Create info for a usage hint
    pub const fn with_usage(usage: MemoryUsage) -> Self {
        Self {
            flags: AllocationCreateFlags::empty(),
            usage,
            required_flags: MemoryPropertyFlags::empty(),
            preferred_flags: MemoryPropertyFlags::empty(),
            not_preferred_flags: MemoryPropertyFlags::empty(),
            memory_type_bits: 0,
            pool: None,
            strategy: AllocationStrategy::BestFit,
        }
    }

    /// Add flags
    pub const fn with_flags(mut self, flags: AllocationCreateFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }

    /// Require property flags
    pub const fn with_required_flags(mut self, flags: MemoryPropertyFlags) -> Self {
        self.required_flags = flags;
        self
    }

    /// Prefer property flags
    pub const fn with_preferred_flags(mut self, flags: MemoryPropertyFlags) -> Self {
        self.preferred_flags = flags;
        self
    }

    /// Restrict memory types
    pub const fn with_memory_type_bits(mut self, bits: u32) -> Self {
        self.memory_type_bits = bits;
        self
    }

    /// Allocate from a pool
    pub const fn in_pool(mut self, pool: PoolHandle) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set strategy
    pub const fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Required flags after folding in the usage hint
    pub fn effective_required_flags(&self) -> MemoryPropertyFlags {
        self.required_flags | self.usage.required_flags()
    }

    /// Preferred flags after folding in the usage hint
    pub fn effective_preferred_flags(&self) -> MemoryPropertyFlags {
        self.preferred_flags | self.usage.preferred_flags()
    }

    /// Not-preferred flags after folding in the usage hint
    pub fn effective_not_preferred_flags(&self) -> MemoryPropertyFlags {
        self.not_preferred_flags | self.usage.not_preferred_flags()
    }
}

// ============================================================================
// Requirements
// ============================================================================

/// Memory requirements of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Size in bytes
    pub size: u64,
    /// Required alignment (power of two)
    pub alignment: u64,
    /// Allowed memory types
    pub memory_type_bits: u32,
    /// Resource kind, used for granularity checks
    pub kind: SuballocationType,
    /// The device requires a dedicated memory object
    pub requires_dedicated: bool,
    /// The device prefers a dedicated memory object
    pub prefers_dedicated: bool,
}

impl MemoryRequirements {
    /// Requirements with every memory type allowed
    pub const fn new(size: u64, alignment: u64) -> Self {
        Self {
            size,
            alignment,
            memory_type_bits: !0,
            kind: SuballocationType::Unknown,
            requires_dedicated: false,
            prefers_dedicated: false,
        }
    }

    /// Set the resource kind
    pub const fn with_kind(mut self, kind: SuballocationType) -> Self {
        self.kind = kind;
        self
    }

    /// Restrict memory types
    pub const fn with_memory_type_bits(mut self, bits: u32) -> Self {
        self.memory_type_bits = bits;
        self
    }

    /// Mark as requiring dedicated memory
    pub const fn requiring_dedicated(mut self) -> Self {
        self.requires_dedicated = true;
        self
    }

    /// Mark as preferring dedicated memory
    pub const fn preferring_dedicated(mut self) -> Self {
        self.prefers_dedicated = true;
        self
    }
}
