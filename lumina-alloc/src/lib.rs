//! LUMINA Alloc - Suballocating GPU Device Memory Allocator
//!
//! Carves a small number of large device memory objects into many
//! resource-sized regions, picking memory types by cost and keeping every
//! heap within its budget.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Allocator                         │
//! │   type selection · dedicated routing · pools · stats     │
//! ├──────────────────┬──────────────────┬────────────────────┤
//! │   Block Lists    │  Dedicated Map   │   Custom Pools     │
//! │ (one per type)   │ (own memory obj) │ (fixed limits)     │
//! ├──────────────────┴──────────────────┴────────────────────┤
//! │          Memory Blocks + Block Metadata                  │
//! │   (offset-ordered regions, size-ordered free index)      │
//! ├──────────────────────────────────────────────────────────┤
//! │   Budget Tracker        │   Frame-based eviction         │
//! ├─────────────────────────┴────────────────────────────────┤
//! │                MemoryDevice (trait)                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Suballocation**: best, worst and first fit placement with alignment
//!   and buffer/image granularity handling
//! - **Dedicated Memory**: large or driver-requested resources get their own
//!   memory object
//! - **Pools**: fixed block size and block count limits per memory type
//! - **Eviction**: allocations unused for a number of frames can be made lost
//!   to make room for new ones
//! - **Budget**: per-heap usage tracking, hard heap limits, optional live
//!   budget from the device
//!
//! # Example
//!
//! ```ignore
//! use lumina_alloc::prelude::*;
//!
//! let allocator = Allocator::new(device, AllocatorCreateInfo::default())?;
//! let requirements = MemoryRequirements::new(64 * 1024, 256).with_kind(SuballocationType::Buffer);
//! let allocation = allocator.allocate_memory(&requirements, &AllocationCreateInfo::GPU_ONLY)?;
//! allocator.bind_memory(&allocation, Resource::Buffer(handle))?;
//! allocator.free_memory(allocation)?;
//! allocator.dispose()?;
//! ```

#![no_std]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod allocation;
pub mod allocator;
pub mod block;
mod block_list;
pub mod budget;
pub mod config;
pub mod device;
pub mod error;
pub mod heap;
mod metadata;
pub mod pool;
pub mod request;
pub mod stats;
pub mod util;

#[cfg(test)]
mod testing;

pub use allocation::{Allocation, AllocationInfo, BlockAllocation, DedicatedAllocation, FRAME_INDEX_LOST, WHOLE_SIZE};
pub use allocator::Allocator;
pub use error::{DeviceError, Error, Result};

/// Prelude for common imports
pub mod prelude {
    pub use crate::allocation::{Allocation, AllocationInfo, WHOLE_SIZE};
    pub use crate::allocator::Allocator;
    pub use crate::budget::HeapBudget;
    pub use crate::config::{AllocatorCreateFlags, AllocatorCreateInfo, AllocatorTuning};
    pub use crate::device::{MemoryDevice, RawMemory, ReportedHeapBudget, Resource};
    pub use crate::error::{DeviceError, Error, Result};
    pub use crate::heap::{MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryType, MemoryUsage};
    pub use crate::pool::{PoolCreateInfo, PoolHandle};
    pub use crate::request::{
        AllocationCreateFlags, AllocationCreateInfo, AllocationStrategy, MemoryRequirements,
        SuballocationType,
    };
    pub use crate::stats::{PoolStats, StatInfo, Stats};
}
