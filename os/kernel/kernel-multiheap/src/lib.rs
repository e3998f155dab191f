//! # Multiheap
//!
//! One allocate/free interface over many disjoint physical regions, with
//! paging-based defragmentation.
//!
//! Each usable memory region gets its own [`BlockHeap`]; `alloc` scans them
//! first-fit in registration order. When no single region has a long enough
//! free run, `palloc` synthesizes one: it allocates a contiguous run in a
//! *paging heap* — a block heap whose address range mirrors the real region
//! shifted above the highest physical address, and which is never physically
//! backed — then maps each mirror page onto a scattered real block:
//!
//! ```text
//! real heap:    |used|FREE|used|FREE|used|      (no 2-block run)
//!                      \________ \_______
//!                       map       map    \
//! mirror heap:       ..|  V | V+4096 |..        (contiguous virtual run)
//! ```
//!
//! The boundary between real and mirror addresses is `max_end_physical`,
//! fixed once at [`Multiheap::ready`]. Mirror ranges must never be accessed
//! through the mirror heap itself; only the page-table aliases installed by
//! `palloc` are live memory.
//!
//! [`BlockHeap`]: kernel_blockheap::BlockHeap

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod mapper;
mod multiheap;

pub use mapper::{PageMapper, VmemPageMapper};
pub use multiheap::Multiheap;

use kernel_blockheap::BlockHeapError;
use kernel_memory_addresses::MemoryAddress;
use kernel_vmem::VmemError;

bitflags::bitflags! {
    /// Per-region registration flags.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct HeapFlags: u32 {
        /// The heap was created externally; the multiheap manages its
        /// blocks but not its lifetime.
        const EXTERNALLY_OWNED = 1 << 0;
        /// The region participates in paging defragmentation; `ready()`
        /// builds a mirror heap for it.
        const DEFRAGMENT_WITH_PAGING = 1 << 1;
    }
}

/// Errors from multiheap registration and free paths.
///
/// Allocation failure is not an error: `alloc`/`palloc` return `None` and
/// the caller decides whether that is fatal.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum MultiheapError {
    /// Region registration attempted after `ready()` finalized the set.
    #[error("multiheap is finalized, no further heaps may be added")]
    NotReady,
    /// The bootstrap heap could not supply bookkeeping memory.
    #[error("bootstrap heap exhausted while carving bookkeeping")]
    OutOfMemory,
    /// The freed or queried address is owned by no registered heap.
    #[error("address {0} belongs to no registered heap")]
    UnknownAddress(MemoryAddress),
    /// An underlying block-heap operation failed.
    #[error(transparent)]
    Heap(#[from] BlockHeapError),
    /// A page-table operation failed.
    #[error(transparent)]
    Paging(#[from] VmemError),
}
