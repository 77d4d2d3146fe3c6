//! Memory Heaps and Types
//!
//! Physical memory regions exposed by the device and the selection of a
//! memory type for a request.

use alloc::vec::Vec;

use bitflags::bitflags;

// ============================================================================
// Property Flags
// ============================================================================

bitflags! {
    /// Memory type property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryPropertyFlags: u32 {
        /// Device local memory.
        const DEVICE_LOCAL = 1 << 0;
        /// Host visible memory.
        const HOST_VISIBLE = 1 << 1;
        /// Host coherent memory.
        const HOST_COHERENT = 1 << 2;
        /// Host cached memory.
        const HOST_CACHED = 1 << 3;
        /// Lazily allocated.
        const LAZILY_ALLOCATED = 1 << 4;
        /// Protected memory.
        const PROTECTED = 1 << 5;
    }
}

impl MemoryPropertyFlags {
    /// Host visible and coherent.
    pub fn host_visible_coherent() -> Self {
        Self::HOST_VISIBLE | Self::HOST_COHERENT
    }

    /// Host visible, coherent and cached.
    pub fn host_visible_cached() -> Self {
        Self::HOST_VISIBLE | Self::HOST_COHERENT | Self::HOST_CACHED
    }
}

bitflags! {
    /// Memory heap flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryHeapFlags: u32 {
        /// Heap lives in device local memory.
        const DEVICE_LOCAL = 1 << 0;
    }
}

// ============================================================================
// Memory Heap
// ============================================================================

/// A memory heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeap {
    /// Heap index.
    pub index: u32,
    /// Heap size in bytes.
    pub size: u64,
    /// Heap flags.
    pub flags: MemoryHeapFlags,
}

impl MemoryHeap {
    /// Create a new memory heap.
    pub const fn new(index: u32, size: u64, flags: MemoryHeapFlags) -> Self {
        Self { index, size, flags }
    }

    /// Check if device local.
    pub fn is_device_local(&self) -> bool {
        self.flags.contains(MemoryHeapFlags::DEVICE_LOCAL)
    }
}

// ============================================================================
// Memory Type
// ============================================================================

/// Memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Memory type index.
    pub index: u32,
    /// Heap index.
    pub heap_index: u32,
    /// Property flags.
    pub flags: MemoryPropertyFlags,
}

impl MemoryType {
    /// Create a new memory type.
    pub const fn new(index: u32, heap_index: u32, flags: MemoryPropertyFlags) -> Self {
        Self {
            index,
            heap_index,
            flags,
        }
    }

    /// Check if device local.
    pub fn is_device_local(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::DEVICE_LOCAL)
    }

    /// Check if host visible.
    pub fn is_host_visible(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Check if host coherent.
    pub fn is_host_coherent(&self) -> bool {
        self.flags.contains(MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Host visible but not coherent: mapped writes need explicit flushes.
    pub fn is_non_coherent(&self) -> bool {
        self.is_host_visible() && !self.is_host_coherent()
    }
}

// ============================================================================
// Memory Usage
// ============================================================================

/// Intended usage of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryUsage {
    /// No usage hint; only explicit flags count.
    #[default]
    Unknown,
    /// GPU only
    GpuOnly,
    /// CPU only
    CpuOnly,
    /// CPU to GPU (upload)
    CpuToGpu,
    /// GPU to CPU (readback)
    GpuToCpu,
    /// CPU side staging copy
    CpuCopy,
    /// GPU lazily allocated
    GpuLazilyAllocated,
}

impl MemoryUsage {
    /// Returns required memory property flags
    pub fn required_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::CpuOnly => MemoryPropertyFlags::host_visible_coherent(),
            Self::CpuToGpu | Self::GpuToCpu => MemoryPropertyFlags::HOST_VISIBLE,
            Self::GpuLazilyAllocated => MemoryPropertyFlags::LAZILY_ALLOCATED,
            Self::Unknown | Self::GpuOnly | Self::CpuCopy => MemoryPropertyFlags::empty(),
        }
    }

    /// Returns preferred memory property flags
    pub fn preferred_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::GpuOnly | Self::CpuToGpu => MemoryPropertyFlags::DEVICE_LOCAL,
            Self::GpuToCpu => MemoryPropertyFlags::HOST_CACHED,
            _ => MemoryPropertyFlags::empty(),
        }
    }

    /// Returns flags that make a memory type less attractive
    pub fn not_preferred_flags(self) -> MemoryPropertyFlags {
        match self {
            Self::CpuCopy => MemoryPropertyFlags::DEVICE_LOCAL,
            _ => MemoryPropertyFlags::empty(),
        }
    }
}

// ============================================================================
// Memory Properties
// ============================================================================

/// Device memory properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryProperties {
    /// Memory heaps.
    pub heaps: Vec<MemoryHeap>,
    /// Memory types.
    pub types: Vec<MemoryType>,
}

impl MemoryProperties {
    /// Create memory properties from heap and type tables.
    pub fn new(heaps: Vec<MemoryHeap>, types: Vec<MemoryType>) -> Self {
        Self { heaps, types }
    }

    /// Get a memory type by index.
    pub fn memory_type(&self, index: u32) -> Option<&MemoryType> {
        self.types.get(index as usize)
    }

    /// Get the heap backing a memory type.
    pub fn heap_of_type(&self, type_index: u32) -> Option<&MemoryHeap> {
        self.memory_type(type_index)
            .and_then(|t| self.heaps.get(t.heap_index as usize))
    }

    /// Find the cheapest memory type allowed by `type_bits`.
    ///
    /// Every required flag must be present. Each missing preferred flag and
    /// each present not-preferred flag costs one point. A type with zero
    /// cost is returned as soon as it is seen.
    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        required: MemoryPropertyFlags,
        preferred: MemoryPropertyFlags,
        not_preferred: MemoryPropertyFlags,
    ) -> Option<u32> {
        let mut best: Option<(u32, u32)> = None;

        for ty in self.types.iter().filter(|t| t.index < 32) {
            if type_bits & (1 << ty.index) == 0 || !ty.flags.contains(required) {
                continue;
            }

            let cost = (preferred - ty.flags).bits().count_ones()
                + (not_preferred & ty.flags).bits().count_ones();
            if best.map_or(true, |(_, c)| cost < c) {
                if cost == 0 {
                    return Some(ty.index);
                }
                best = Some((ty.index, cost));
            }
        }

        best.map(|(index, _)| index)
    }
}

// ============================================================================
// Tests
// ============================================================================
