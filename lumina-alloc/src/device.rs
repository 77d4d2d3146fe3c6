//! # Device Interface
//!
//! The allocator never talks to a graphics API directly. Everything it needs
//! from the device goes through [`MemoryDevice`]: raw memory allocation,
//! mapping, cache maintenance, resource binding and budget queries.

use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;

use crate::error::DeviceError;
use crate::heap::MemoryProperties;

/// Device result type alias
pub type DeviceResult<T> = core::result::Result<T, DeviceError>;

// =============================================================================
// HANDLES
// =============================================================================

/// Opaque handle to a raw device memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RawMemory(u64);

impl RawMemory {
    /// Wrap a device handle value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the device handle value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem#{:#x}", self.0)
    }
}

/// A resource that memory can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Buffer handle
    Buffer(u64),
    /// Image handle
    Image(u64),
}

/// Live budget numbers reported by the device for one heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportedHeapBudget {
    /// Heap index
    pub heap_index: u32,
    /// Bytes in use by this process, as seen by the driver
    pub usage: u64,
    /// Bytes this process may use before the system starts to suffer
    pub budget: u64,
}

// =============================================================================
// DEVICE TRAIT
// =============================================================================

/// Device memory operations the allocator depends on.
pub trait MemoryDevice: Send + Sync {
    /// Heaps and memory types exposed by the device.
    fn memory_properties(&self) -> MemoryProperties;

    /// Allocate `size` bytes from a memory type.
    fn allocate_raw(&self, memory_type_index: u32, size: u64) -> DeviceResult<RawMemory>;

    /// Release memory returned by [`allocate_raw`](Self::allocate_raw).
    fn free_raw(&self, memory: RawMemory);

    /// Map the whole memory object into the host address space.
    fn map(&self, memory: RawMemory) -> DeviceResult<NonNull<u8>>;

    /// Unmap a memory object.
    fn unmap(&self, memory: RawMemory);

    /// Flush host writes in `[offset, offset + size)` to the device.
    fn flush_range(&self, memory: RawMemory, offset: u64, size: u64) -> DeviceResult<()>;

    /// Make device writes in `[offset, offset + size)` visible to the host.
    fn invalidate_range(&self, memory: RawMemory, offset: u64, size: u64) -> DeviceResult<()>;

    /// Bind a resource to memory at `offset`.
    fn bind(&self, resource: Resource, memory: RawMemory, offset: u64) -> DeviceResult<()>;

    /// Live per-heap budget, if the device can report one.
    fn query_budget(&self) -> Option<Vec<ReportedHeapBudget>> {
        None
    }

    /// Granularity for flush and invalidate ranges on non-coherent memory.
    fn non_coherent_atom_size(&self) -> u64;

    /// Page size separating linear from non-linear resources.
    fn buffer_image_granularity(&self) -> u64;
}
