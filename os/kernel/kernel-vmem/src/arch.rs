//! Privileged TLB and CR3 access.
//!
//! Real instructions are gated behind the `asm` feature; without it (host
//! tests) the functions are no-ops, which is correct there because the host
//! never translates through these tables.

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Invalidate the TLB entry covering `va`.
#[cfg(feature = "asm")]
#[inline]
pub(crate) fn invalidate_page(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}

#[cfg(not(feature = "asm"))]
#[inline]
pub(crate) fn invalidate_page(_va: VirtualAddress) {}

/// Load CR3 with the physical address of a PML4.
///
/// # Safety
/// `root` must point at a valid, fully-constructed PML4 whose mappings cover
/// the currently executing code and stack.
#[cfg(feature = "asm")]
#[inline]
pub(crate) unsafe fn write_cr3(root: PhysicalAddress) {
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) root.as_u64(), options(nostack, preserves_flags));
    }
}

#[cfg(not(feature = "asm"))]
#[inline]
pub(crate) unsafe fn write_cr3(_root: PhysicalAddress) {}
