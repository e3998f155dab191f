//! # Block Heap
//!
//! A fixed-block-size allocator over one contiguous address range. The range
//! is divided into page-sized blocks; a side table records, per block,
//! whether it is free, starts an allocation run, or continues one:
//!
//! ```text
//! range:  |blk 0|blk 1|blk 2|blk 3|blk 4|blk 5|...
//! table:  |First|Node |Node |Free |First|Free |...
//!          \___ run of 3 ___/      run of 1
//! ```
//!
//! Allocations are first-fit, scanning the table low-to-high for the first
//! run of free blocks long enough. The heap never touches the managed range
//! itself — all bookkeeping lives in the table — so a heap can manage memory
//! that must not (or cannot) be dereferenced, such as the multiheap's
//! virtual mirror ranges.
//!
//! Inputs are kernel-internal and trusted, but malformed addresses are
//! reported as errors rather than corrupting the table.

#![cfg_attr(not(test), no_std)]

mod heap;
mod table;

pub use heap::BlockHeap;
pub use table::{BlockEntry, BlockTable};

use kernel_memory_addresses::MemoryAddress;

/// Size of one allocation block in bytes. Matches the page size so block
/// runs can be remapped page-by-page during defragmentation.
pub const BLOCK_SIZE: u64 = 4096;

/// Errors reported by [`BlockHeap`] operations.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum BlockHeapError {
    /// The heap range is empty, inverted, or not block-aligned.
    #[error("heap range {0}..{1} is not a whole number of blocks")]
    InvalidRange(MemoryAddress, MemoryAddress),
    /// The supplied table does not have exactly one entry per block.
    #[error("block table holds {actual} entries, range needs {expected}")]
    TableSizeMismatch { expected: usize, actual: usize },
    /// The address lies outside the heap range.
    #[error("address {0} is outside the heap range")]
    OutOfRange(MemoryAddress),
    /// The address does not point at the first block of an allocation.
    #[error("address {0} does not start an allocation")]
    NotRunStart(MemoryAddress),
}
