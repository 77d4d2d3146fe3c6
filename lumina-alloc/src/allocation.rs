//! # Allocations
//!
//! An [`Allocation`] is either a region inside a shared memory block or a
//! whole dedicated device memory object. Both variants answer the same
//! queries and support mapping, flushing and frame tracking.
//!
//! Block allocations created with `CAN_BECOME_LOST` carry a liveness word:
//! the last frame they were used in, or [`FRAME_INDEX_LOST`] once evicted.
//! Touching and evicting race through compare-and-swap on that word, so an
//! allocation touched in the current frame can never be evicted.

use alloc::sync::{Arc, Weak};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::block::{BlockId, BlockMemory, Mapping};
use crate::device::{MemoryDevice, RawMemory};
use crate::pool::PoolHandle;
use crate::request::SuballocationType;
use crate::util::{align_down, align_up};
use crate::{Error, Result};

/// Frame index marking an evicted allocation.
pub const FRAME_INDEX_LOST: u32 = u32::MAX;

/// Size meaning "to the end of the allocation".
pub const WHOLE_SIZE: u64 = u64::MAX;

// =============================================================================
// LIVENESS STATE
// =============================================================================

/// Liveness word shared by an allocation handle and the block metadata.
#[derive(Debug)]
pub(crate) struct AllocationState {
    last_use_frame: AtomicU32,
    can_become_lost: bool,
    /// Set once the metadata has released the region of a lost allocation.
    reclaimed: AtomicBool,
}

impl AllocationState {
    pub(crate) fn new(current_frame: u32, can_become_lost: bool) -> Self {
        Self {
            last_use_frame: AtomicU32::new(current_frame),
            can_become_lost,
            reclaimed: AtomicBool::new(false),
        }
    }

    pub(crate) fn last_use_frame(&self) -> u32 {
        self.last_use_frame.load(Ordering::Acquire)
    }

    pub(crate) fn can_become_lost(&self) -> bool {
        self.can_become_lost
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.last_use_frame() == FRAME_INDEX_LOST
    }

    pub(crate) fn is_reclaimed(&self) -> bool {
        self.reclaimed.load(Ordering::Acquire)
    }

    /// Record use in `current_frame`. Fails only if the allocation is lost.
    pub(crate) fn touch(&self, current_frame: u32) -> bool {
        let mut observed = self.last_use_frame.load(Ordering::Acquire);
        loop {
            if observed == FRAME_INDEX_LOST {
                return false;
            }
            if observed == current_frame {
                return true;
            }
            match self.last_use_frame.compare_exchange_weak(
                observed,
                current_frame,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => observed = actual,
            }
        }
    }

    /// Flip to lost if unused for more than `frame_in_use_count` frames.
    pub(crate) fn make_lost(&self, current_frame: u32, frame_in_use_count: u32) -> bool {
        if !self.can_become_lost {
            return false;
        }
        let mut observed = self.last_use_frame.load(Ordering::Acquire);
        loop {
            if observed == FRAME_INDEX_LOST {
                return false;
            }
            if observed.saturating_add(frame_in_use_count) >= current_frame {
                return false;
            }
            match self.last_use_frame.compare_exchange_weak(
                observed,
                FRAME_INDEX_LOST,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => observed = actual,
            }
        }
    }

    /// Whether the region could be taken back right now.
    pub(crate) fn is_reclaimable(&self, current_frame: u32, frame_in_use_count: u32) -> bool {
        if !self.can_become_lost {
            return false;
        }
        let frame = self.last_use_frame();
        frame == FRAME_INDEX_LOST || frame.saturating_add(frame_in_use_count) < current_frame
    }

    /// Evict (or accept an earlier eviction) and mark the region released.
    ///
    /// Must be called with the owning block list locked for writing.
    pub(crate) fn reclaim(&self, current_frame: u32, frame_in_use_count: u32) -> bool {
        if !self.can_become_lost || self.is_reclaimed() {
            return false;
        }
        if self.is_lost() || self.make_lost(current_frame, frame_in_use_count) {
            self.reclaimed.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }
}

// =============================================================================
// BLOCK ALLOCATION
// =============================================================================

/// A region of a shared memory block.
#[derive(Debug)]
pub struct BlockAllocation {
    pub(crate) block: Weak<BlockMemory>,
    pub(crate) block_id: BlockId,
    pub(crate) pool: Option<PoolHandle>,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) alignment: u64,
    pub(crate) memory_type_index: u32,
    pub(crate) kind: SuballocationType,
    pub(crate) state: Arc<AllocationState>,
    pub(crate) map_count: AtomicU32,
    pub(crate) persistently_mapped: bool,
}

impl BlockAllocation {
    /// Block the region lives in.
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Pool the allocation came from.
    pub fn pool(&self) -> Option<PoolHandle> {
        self.pool
    }

    /// Alignment the region was placed with.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    fn block(&self) -> Result<Arc<BlockMemory>> {
        self.block
            .upgrade()
            .ok_or(Error::InvalidUsage("owning memory block has been released"))
    }
}

// =============================================================================
// DEDICATED ALLOCATION
// =============================================================================

/// An allocation owning its own device memory object.
#[derive(Debug)]
pub struct DedicatedAllocation {
    pub(crate) memory: RawMemory,
    pub(crate) size: u64,
    pub(crate) memory_type_index: u32,
    pub(crate) kind: SuballocationType,
    pub(crate) last_use_frame: AtomicU32,
    pub(crate) mapping: Mapping,
    pub(crate) map_count: AtomicU32,
    pub(crate) persistently_mapped: bool,
}

// =============================================================================
// ALLOCATION
// =============================================================================

/// Allocation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Memory type index
    pub memory_type_index: u32,
    /// Device memory object, if still present
    pub memory: Option<RawMemory>,
    /// Offset inside the memory object
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    /// Persistent mapping of the first byte
    pub mapped_ptr: Option<NonNull<u8>>,
    /// Whether this is a dedicated allocation
    pub dedicated: bool,
    /// Whether the allocation has been evicted
    pub lost: bool,
}

/// A live allocation.
///
/// Released with [`Allocator::free_memory`](crate::Allocator::free_memory),
/// which consumes the handle.
#[derive(Debug)]
pub enum Allocation {
    /// Region of a shared block
    Block(BlockAllocation),
    /// Own device memory object
    Dedicated(DedicatedAllocation),
}

impl Allocation {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Block(a) => a.size,
            Self::Dedicated(d) => d.size,
        }
    }

    /// Offset inside the device memory object.
    pub fn offset(&self) -> u64 {
        match self {
            Self::Block(a) => a.offset,
            Self::Dedicated(_) => 0,
        }
    }

    /// Memory type index.
    pub fn memory_type_index(&self) -> u32 {
        match self {
            Self::Block(a) => a.memory_type_index,
            Self::Dedicated(d) => d.memory_type_index,
        }
    }

    /// Resource kind the allocation was made for.
    pub fn kind(&self) -> SuballocationType {
        match self {
            Self::Block(a) => a.kind,
            Self::Dedicated(d) => d.kind,
        }
    }

    /// Device memory object, or `None` once the owning block is gone.
    pub fn memory(&self) -> Option<RawMemory> {
        match self {
            Self::Block(a) => a.block.upgrade().map(|b| b.memory()),
            Self::Dedicated(d) => Some(d.memory),
        }
    }

    /// Whether this allocation owns its memory object.
    pub fn is_dedicated(&self) -> bool {
        matches!(self, Self::Dedicated(_))
    }

    /// Whether this allocation may be evicted.
    pub fn can_become_lost(&self) -> bool {
        match self {
            Self::Block(a) => a.state.can_become_lost(),
            Self::Dedicated(_) => false,
        }
    }

    /// Whether this allocation has been evicted.
    pub fn is_lost(&self) -> bool {
        match self {
            Self::Block(a) => a.state.is_lost(),
            Self::Dedicated(_) => false,
        }
    }

    /// Last frame the allocation was touched in.
    pub fn last_use_frame(&self) -> u32 {
        match self {
            Self::Block(a) => a.state.last_use_frame(),
            Self::Dedicated(d) => d.last_use_frame.load(Ordering::Acquire),
        }
    }

    /// Mark as used in `current_frame`.
    ///
    /// Returns `false` if the allocation is lost.
    pub fn touch(&self, current_frame: u32) -> bool {
        match self {
            Self::Block(a) => a.state.touch(current_frame),
            Self::Dedicated(d) => {
                d.last_use_frame.store(current_frame, Ordering::Release);
                true
            }
        }
    }

    /// Evict if unused for more than `frame_in_use_count` frames.
    ///
    /// Returns `true` only for the call that performed the transition. The
    /// region itself is reclaimed by the block list on its next eviction
    /// pass or when the handle is freed.
    pub fn make_lost(&self, current_frame: u32, frame_in_use_count: u32) -> bool {
        match self {
            Self::Block(a) => a.state.make_lost(current_frame, frame_in_use_count),
            Self::Dedicated(_) => false,
        }
    }

    /// Pointer to the first byte if the allocation is persistently mapped.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        match self {
            Self::Block(a) if a.persistently_mapped => {
                let block = a.block.upgrade()?;
                let base = block.mapping().mapped_ptr()?;
                Some(offset_ptr(base, a.offset))
            }
            Self::Dedicated(d) if d.persistently_mapped => d.mapping.mapped_ptr(),
            _ => None,
        }
    }

    /// Snapshot of the allocation.
    pub fn info(&self) -> AllocationInfo {
        AllocationInfo {
            memory_type_index: self.memory_type_index(),
            memory: self.memory(),
            offset: self.offset(),
            size: self.size(),
            mapped_ptr: self.mapped_ptr(),
            dedicated: self.is_dedicated(),
            lost: self.is_lost(),
        }
    }

    /// Number of outstanding [`map`](Self::map) calls.
    pub fn map_count(&self) -> u32 {
        match self {
            Self::Block(a) => a.map_count.load(Ordering::Acquire),
            Self::Dedicated(d) => d.map_count.load(Ordering::Acquire),
        }
    }

    /// Map the allocation and return a pointer to its first byte.
    ///
    /// Each call must be paired with [`unmap`](Self::unmap).
    pub fn map(&self, device: &dyn MemoryDevice) -> Result<NonNull<u8>> {
        match self {
            Self::Block(a) => {
                if a.state.is_lost() {
                    return Err(Error::InvalidUsage("cannot map a lost allocation"));
                }
                let block = a.block()?;
                let base = block.mapping().map(device, block.memory(), 1)?;
                a.map_count.fetch_add(1, Ordering::AcqRel);
                Ok(offset_ptr(base, a.offset))
            }
            Self::Dedicated(d) => {
                let ptr = d.mapping.map(device, d.memory, 1)?;
                d.map_count.fetch_add(1, Ordering::AcqRel);
                Ok(ptr)
            }
        }
    }

    /// Undo one [`map`](Self::map).
    pub fn unmap(&self, device: &dyn MemoryDevice) -> Result<()> {
        let count = match self {
            Self::Block(a) => &a.map_count,
            Self::Dedicated(d) => &d.map_count,
        };
        count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .map_err(|_| Error::InvalidUsage("allocation unmapped more times than it was mapped"))?;

        match self {
            Self::Block(a) => {
                let block = a.block()?;
                block.mapping().unmap(device, block.memory(), 1)
            }
            Self::Dedicated(d) => d.mapping.unmap(device, d.memory, 1),
        }
    }

    /// Flush host writes in `[offset, offset + size)` of this allocation,
    /// rounded outward to the device's non-coherent atom.
    pub fn flush(&self, device: &dyn MemoryDevice, offset: u64, size: u64) -> Result<()> {
        let atom = device.non_coherent_atom_size().max(1);
        if let Some((memory, start, len)) = self.non_coherent_range(offset, size, atom)? {
            device.flush_range(memory, start, len)?;
        }
        Ok(())
    }

    /// Invalidate `[offset, offset + size)` of this allocation, rounded
    /// outward like [`flush`](Self::flush).
    pub fn invalidate(&self, device: &dyn MemoryDevice, offset: u64, size: u64) -> Result<()> {
        let atom = device.non_coherent_atom_size().max(1);
        if let Some((memory, start, len)) = self.non_coherent_range(offset, size, atom)? {
            device.invalidate_range(memory, start, len)?;
        }
        Ok(())
    }

    /// Range of the device memory object covering `[offset, offset + size)`
    /// of this allocation, rounded outward to `atom`.
    ///
    /// Returns `None` for an empty range.
    fn non_coherent_range(
        &self,
        offset: u64,
        size: u64,
        atom: u64,
    ) -> Result<Option<(RawMemory, u64, u64)>> {
        let alloc_size = self.size();
        if size == 0 {
            return Ok(None);
        }
        let past_end = size != WHOLE_SIZE && offset.checked_add(size).map_or(true, |end| end > alloc_size);
        if offset > alloc_size || past_end {
            return Err(Error::InvalidUsage("range exceeds the allocation"));
        }

        let start = align_down(offset, atom);
        let len = if size == WHOLE_SIZE {
            align_up(alloc_size - start, atom)
        } else {
            align_up(size + (offset - start), atom)
        };

        match self {
            Self::Block(a) => {
                if a.state.is_lost() {
                    return Ok(None);
                }
                let block = a.block()?;
                let start = start + a.offset;
                let len = len.min(block.size() - start);
                Ok(Some((block.memory(), start, len)))
            }
            Self::Dedicated(d) => Ok(Some((d.memory, start, len.min(alloc_size - start)))),
        }
    }
}

fn offset_ptr(base: NonNull<u8>, offset: u64) -> NonNull<u8> {
    // SAFETY: `offset` lies inside the mapped memory object, so the result
    // stays inside the same mapping and is non-null.
    unsafe { NonNull::new_unchecked(base.as_ptr().add(offset as usize)) }
}

// =============================================================================
// TESTS
// =============================================================================
