//! # Virtual Memory Support
//!
//! Four-level x86-64 page-table management for the kernel and for per-task
//! address spaces.
//!
//! ## Virtual address walk
//!
//! A canonical 48-bit virtual address splits into four 9-bit table indices
//! plus a 12-bit page offset:
//!
//! ```text
//! | 47-39 | 38-30 | 29-21 | 20-12 | 11-0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! Each level is a 512-entry table of 64-bit entries sharing one layout
//! ([`PageEntryBits`]). Entries at the PML4/PDPT/PD levels point at the next
//! table; PT entries map a 4 KiB frame. Only 4 KiB pages are supported, and
//! only 4-level translation (5-level is rejected at descriptor creation).
//!
//! The walk state for one address space lives in a [`PagingDescriptor`].
//! Frames for tables come from a caller-supplied [`FrameAlloc`]; tables are
//! reached through a [`PhysMapper`], so the same code runs against real
//! identity-mapped RAM and against host-test buffers.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod arch;
mod descriptor;
mod frame_pool;
mod page_entry;
mod page_table;

pub use descriptor::PagingDescriptor;
pub use frame_pool::{IdentityPhysMapper, PoolFrameAlloc};
pub use page_entry::PageEntryBits;
pub use page_table::{ENTRIES_PER_TABLE, PageTable, table_indices};

use kernel_memory_addresses::PhysicalAddress;

/// Size of one page (and one page-table frame) in bytes.
pub const PAGE_SIZE: u64 = 4096;

bitflags::bitflags! {
    /// Leaf mapping permissions.
    ///
    /// An empty set unmaps: the entry's present bit is cleared while the
    /// frame bits stay in place, so the slot can be re-armed later without
    /// re-walking allocation.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct MapFlags: u64 {
        /// Translation is live; access does not fault.
        const PRESENT       = 1 << 0;
        /// Writes allowed (reads always are, when present).
        const WRITABLE      = 1 << 1;
        /// Accessible from user mode (CPL 3).
        const USER          = 1 << 2;
        /// Write-through caching; for memory-mapped I/O.
        const WRITE_THROUGH = 1 << 3;
        /// Bypass caches entirely; for MMIO or strongly ordered regions.
        const CACHE_DISABLE = 1 << 4;
        /// Instruction fetches from this page fault (requires EFER.NXE).
        const NO_EXECUTE    = 1 << 63;
    }
}

/// Source of 4 KiB physical frames for page tables.
///
/// Returned frames must be page-aligned and zeroable through the active
/// [`PhysMapper`].
pub trait FrameAlloc {
    /// Allocate one page-aligned 4 KiB frame, or `None` when exhausted.
    fn alloc_4k(&mut self) -> Option<PhysicalAddress>;

    /// Return a frame previously handed out by [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, frame: PhysicalAddress);
}

/// Converts physical addresses into usable pointers in the current address
/// space (identity map in this kernel; a test buffer on the host).
pub trait PhysMapper {
    /// Reinterpret the memory at `pa` as a `&mut T`.
    ///
    /// # Safety
    /// `pa` must be mapped writable in the current address space for the
    /// lifetime `'a`, and the bytes there must be a valid `T`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Errors from page-table construction and mapping.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    /// Only 4-level translation is implemented.
    #[error("{0}-level paging is not supported")]
    UnsupportedLevel(u8),
    /// A virtual or physical address argument is not page-aligned.
    #[error("address {0} is not page aligned")]
    InvalidAlignment(u64),
    /// A physical range's end precedes its start.
    #[error("physical range 0x{start:X}..0x{end:X} is inverted")]
    InvalidRange { start: u64, end: u64 },
    /// The frame allocator could not supply a table frame.
    #[error("out of physical frames for page tables")]
    OutOfMemory,
}

/// Align `x` down to the nearest multiple of `a` (a power of two).
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}

/// Whether `x` is a multiple of `a` (a power of two).
#[inline]
#[must_use]
pub const fn is_aligned(x: u64, a: u64) -> bool {
    x & (a - 1) == 0
}

#[inline]
fn check_page_aligned(addr: u64) -> Result<(), VmemError> {
    if is_aligned(addr, PAGE_SIZE) {
        Ok(())
    } else {
        Err(VmemError::InvalidAlignment(addr))
    }
}
