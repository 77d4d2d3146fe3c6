//! Memory Blocks
//!
//! A block is one device memory object carved up by its metadata. The raw
//! memory and its mapping refcount live in [`BlockMemory`], shared weakly
//! with the allocations placed in it; the metadata stays with the owning
//! block list.

use alloc::sync::Arc;
use core::fmt;
use core::ptr::NonNull;

use spin::Mutex;

use crate::device::{MemoryDevice, RawMemory};
use crate::metadata::BlockMetadata;
use crate::{Error, Result};

// ============================================================================
// Block Id
// ============================================================================

/// Allocator-unique block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

// ============================================================================
// Mapping
// ============================================================================

#[derive(Debug, Default)]
struct MapState {
    count: u32,
    ptr: Option<NonNull<u8>>,
}

// SAFETY: the pointer is only stored and handed out; it is never
// dereferenced while the lock is held.
unsafe impl Send for MapState {}

/// Refcounted host mapping of a memory object.
#[derive(Debug, Default)]
pub(crate) struct Mapping {
    state: Mutex<MapState>,
}

impl Mapping {
    /// Add `count` references, mapping through the device on the first one.
    pub fn map(&self, device: &dyn MemoryDevice, memory: RawMemory, count: u32) -> Result<NonNull<u8>> {
        if count == 0 {
            return Err(Error::InvalidUsage("map count must be non-zero"));
        }

        let mut state = self.state.lock();
        if let Some(ptr) = state.ptr {
            state.count += count;
            return Ok(ptr);
        }

        let ptr = device.map(memory)?;
        state.ptr = Some(ptr);
        state.count = count;
        Ok(ptr)
    }

    /// Drop `count` references, unmapping through the device on the last one.
    pub fn unmap(&self, device: &dyn MemoryDevice, memory: RawMemory, count: u32) -> Result<()> {
        let mut state = self.state.lock();
        if count == 0 || state.count < count {
            return Err(Error::InvalidUsage("memory unmapped more times than it was mapped"));
        }

        state.count -= count;
        if state.count == 0 {
            state.ptr = None;
            device.unmap(memory);
        }
        Ok(())
    }

    pub fn map_count(&self) -> u32 {
        self.state.lock().count
    }

    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.state.lock().ptr
    }

    /// Drop every reference at once.
    pub fn release(&self, device: &dyn MemoryDevice, memory: RawMemory) {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count = 0;
            state.ptr = None;
            device.unmap(memory);
        }
    }
}

// ============================================================================
// Block Memory
// ============================================================================

/// Device memory object backing a block.
#[derive(Debug)]
pub struct BlockMemory {
    id: BlockId,
    memory: RawMemory,
    size: u64,
    mapping: Mapping,
}

impl BlockMemory {
    /// Block id.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Device memory object.
    pub fn memory(&self) -> RawMemory {
        self.memory
    }

    /// Block size.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn mapping(&self) -> &Mapping {
        &self.mapping
    }
}

// ============================================================================
// Memory Block
// ============================================================================

/// A block owned by a block list.
#[derive(Debug)]
pub(crate) struct MemoryBlock {
    memory: Arc<BlockMemory>,
    pub metadata: BlockMetadata,
}

impl MemoryBlock {
    pub fn new(id: BlockId, memory: RawMemory, size: u64) -> Self {
        Self {
            memory: Arc::new(BlockMemory {
                id,
                memory,
                size,
                mapping: Mapping::default(),
            }),
            metadata: BlockMetadata::new(size),
        }
    }

    pub fn id(&self) -> BlockId {
        self.memory.id
    }

    pub fn size(&self) -> u64 {
        self.memory.size
    }

    pub fn memory(&self) -> &Arc<BlockMemory> {
        &self.memory
    }

    /// Release the device memory. Fails if allocations are still placed here.
    ///
    /// On failure the block is handed back so the caller can keep tracking it.
    pub fn dispose(self, device: &dyn MemoryDevice) -> core::result::Result<RawMemory, (Self, Error)> {
        if !self.metadata.is_empty() {
            log::error!(
                "Disposing {} with {} live allocations",
                self.id(),
                self.metadata.allocation_count()
            );
            return Err((self, Error::InvalidUsage("memory block still has live allocations")));
        }

        let mapped = self.memory.mapping.map_count();
        if mapped > 0 {
            log::warn!("{} destroyed while mapped {} times", self.id(), mapped);
            self.memory.mapping.release(device, self.memory.memory);
        }
        Ok(self.memory.memory)
    }
}

// ============================================================================
// Tests
// ============================================================================
