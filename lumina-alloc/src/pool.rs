//! # Custom Pools
//!
//! A pool is a block list with caller-chosen limits on a single memory type:
//! fixed block size, minimum blocks kept alive, maximum blocks allowed.
//! Allocations from a pool never fall back to dedicated memory.

use alloc::string::String;
use core::fmt;

use crate::block_list::BlockList;

/// Opaque pool handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolHandle(u32);

impl PoolHandle {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Pool creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolCreateInfo {
    /// Memory type all blocks come from
    pub memory_type_index: u32,
    /// Fixed block size; zero derives it from the heap
    pub block_size: u64,
    /// Blocks created up front and never released
    pub min_block_count: usize,
    /// Block limit; zero means unlimited
    pub max_block_count: usize,
    /// Eviction protection window; `None` uses the allocator's
    pub frame_in_use_count: Option<u32>,
    /// Debug name
    pub name: Option<String>,
}

impl PoolCreateInfo {
    /// Pool on a memory type with default limits.
    pub fn new(memory_type_index: u32) -> Self {
        Self {
            memory_type_index,
            ..Self::default()
        }
    }

    /// Set a fixed block size
    pub fn with_block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    /// Set block count limits
    pub fn with_block_count(mut self, min: usize, max: usize) -> Self {
        self.min_block_count = min;
        self.max_block_count = max;
        self
    }

    /// Set the eviction protection window
    pub fn with_frame_in_use_count(mut self, frames: u32) -> Self {
        self.frame_in_use_count = Some(frames);
        self
    }

    /// Set debug name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(String::from(name));
        self
    }
}

/// A live pool.
#[derive(Debug)]
pub(crate) struct Pool {
    pub handle: PoolHandle,
    pub name: Option<String>,
    pub block_list: BlockList,
}

impl Pool {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}
