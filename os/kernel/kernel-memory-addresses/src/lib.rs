//! # Memory Address Newtypes
//!
//! Raw `u64` addresses with intent attached. The allocator stack deals in
//! three kinds of addresses:
//!
//! - [`MemoryAddress`]: a plain machine address with no claim about which
//!   address space it belongs to. The block heaps trade in these, because a
//!   heap range may be physical RAM or a never-backed virtual mirror range.
//! - [`PhysicalAddress`]: an address on the memory bus (RAM / MMIO).
//! - [`VirtualAddress`]: an address interpreted through the active page
//!   tables.
//!
//! Keeping the kinds distinct prevents VA/PA mix-ups at the seams between
//! the heap layer and the paging layer. Conversions are explicit.

#![cfg_attr(not(test), no_std)]

mod memory_address;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
