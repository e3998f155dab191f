//! # Kernel Heap
//!
//! The kernel-wide allocation facade: a [`KernelHeap`] (bootstrap heap plus
//! multiheap) and a [`KernelPaging`] (the kernel's own address space) behind
//! spin locks, with C-style free functions on top.
//!
//! Boot order matters:
//!
//! 1. [`kheap_init`] reads the boot loader's memory map and brings up the
//!    bootstrap heap. `kmalloc`/`kfree` work from here on.
//! 2. [`kpaging_init`] carves a frame pool from the bootstrap heap, builds
//!    the kernel address space, identity-maps usable RAM and loads CR3.
//! 3. [`kheap_post_paging`] registers the remaining usable regions for
//!    defragmentation and finalizes the multiheap. `kpalloc` can now serve
//!    physically scattered blocks behind contiguous virtual addresses.
//!
//! Lock order is heap before paging; nothing takes them in reverse.

#![cfg_attr(not(test), no_std)]

mod heap;
mod layout;
mod paging;

pub use heap::KernelHeap;
pub use layout::{
    BOOTSTRAP_HEAP_ADDRESS, BOOTSTRAP_TABLE_ADDRESS, MEMORY_MAP_ADDRESS, MIN_BOOTSTRAP_BYTES,
    PAGE_TABLE_POOL_FRAMES,
};
pub use paging::KernelPaging;

use kernel_memmap::MemoryMap;
use kernel_memory_addresses::{MemoryAddress, PhysicalAddress, VirtualAddress};
use kernel_multiheap::PageMapper;
use kernel_sync::SpinLock;
use kernel_vmem::{MapFlags, VmemError};

static KERNEL_HEAP: SpinLock<Option<KernelHeap>> = SpinLock::new(None);
static KERNEL_PAGING: SpinLock<Option<KernelPaging>> = SpinLock::new(None);

/// Stand-in mapper for the window between [`kheap_init`] and
/// [`kpaging_init`]. The multiheap only touches page tables once finalized,
/// which happens after paging is up, so any mapping request here is an
/// ordering bug.
struct EarlyBootMapper;

impl PageMapper for EarlyBootMapper {
    fn map(
        &mut self,
        va: VirtualAddress,
        _pa: PhysicalAddress,
        _flags: MapFlags,
    ) -> Result<(), VmemError> {
        panic!("page mapping for {va} requested before paging init")
    }

    fn translate(&self, _va: VirtualAddress) -> Option<PhysicalAddress> {
        None
    }
}

/// Bring up the kernel heap from the boot loader's memory map.
///
/// # Safety
/// Single-threaded boot context; the fixed layout addresses must be backed
/// RAM that nothing else uses afterwards. Call once.
///
/// # Panics
/// Panics when the machine has no usable region large enough for the
/// bootstrap heap.
pub unsafe fn kheap_init(memmap: &MemoryMap<'_>) {
    let heap = unsafe { KernelHeap::init(memmap) };
    *KERNEL_HEAP.lock() = Some(heap);
}

/// Build and activate the kernel address space.
///
/// # Safety
/// Requires [`kheap_init`]; the identity mappings produced from `memmap`
/// must cover the currently executing code, data and stack. Call once.
///
/// # Panics
/// Panics if the heap is missing or the address space cannot be built; the
/// kernel cannot run without paging.
pub unsafe fn kpaging_init(memmap: &MemoryMap<'_>) {
    let mut heap = KERNEL_HEAP.lock();
    let heap = heap.as_mut().expect("kpaging_init before kheap_init");

    let pool = heap.carve_frame_pool(layout::PAGE_TABLE_POOL_FRAMES);
    let mut paging = KernelPaging::new(pool)
        .unwrap_or_else(|err| panic!("kernel address space creation failed: {err}"));
    paging
        .map_known_regions(memmap)
        .unwrap_or_else(|err| panic!("identity mapping failed: {err}"));
    unsafe {
        paging.switch();
    }
    *KERNEL_PAGING.lock() = Some(paging);
}

/// Register remaining usable RAM and finalize the multiheap.
///
/// # Panics
/// Panics if called before [`kpaging_init`] or if region registration fails.
pub fn kheap_post_paging(memmap: &MemoryMap<'_>) {
    let mut heap = KERNEL_HEAP.lock();
    let heap = heap.as_mut().expect("kheap_post_paging before kheap_init");
    let mut paging = KERNEL_PAGING.lock();
    let paging = paging
        .as_mut()
        .expect("kheap_post_paging before kpaging_init");

    heap.post_paging(paging, memmap)
        .unwrap_or_else(|err| panic!("multiheap finalization failed: {err}"));
}

/// Allocate `size` bytes. Panics on exhaustion.
pub fn kmalloc(size: u64) -> MemoryAddress {
    KERNEL_HEAP
        .lock()
        .as_mut()
        .expect("kmalloc before kheap_init")
        .kmalloc(size)
}

/// Allocate `size` zeroed bytes. Panics on exhaustion.
pub fn kzalloc(size: u64) -> MemoryAddress {
    let mut heap = KERNEL_HEAP.lock();
    let heap = heap.as_mut().expect("kzalloc before kheap_init");
    // Real allocations are identity-mapped, mirror ones never come from
    // plain alloc; the range is dereferenceable either way.
    unsafe { heap.kzalloc(size) }
}

/// Allocate `size` bytes, defragmenting through the page tables when
/// needed. Panics on exhaustion.
pub fn kpalloc(size: u64) -> MemoryAddress {
    let mut heap = KERNEL_HEAP.lock();
    let heap = heap.as_mut().expect("kpalloc before kheap_init");
    let mut paging = KERNEL_PAGING.lock();
    match paging.as_mut() {
        Some(p) => heap.kpalloc(p, size),
        None => heap.kpalloc(&mut EarlyBootMapper, size),
    }
}

/// [`kpalloc`], zero-filled. Panics on exhaustion.
pub fn kpzalloc(size: u64) -> MemoryAddress {
    let mut heap = KERNEL_HEAP.lock();
    let heap = heap.as_mut().expect("kpzalloc before kheap_init");
    let mut paging = KERNEL_PAGING.lock();
    unsafe {
        match paging.as_mut() {
            Some(p) => heap.kpzalloc(p, size),
            None => heap.kpzalloc(&mut EarlyBootMapper, size),
        }
    }
}

/// Resize the allocation at `ptr`, preserving the overlapping prefix.
/// Panics on exhaustion.
///
/// # Safety
/// `ptr` must be a live allocation returned by this facade.
pub unsafe fn krealloc(ptr: MemoryAddress, new_size: u64) -> MemoryAddress {
    let mut heap = KERNEL_HEAP.lock();
    let heap = heap.as_mut().expect("krealloc before kheap_init");
    let mut paging = KERNEL_PAGING.lock();
    unsafe {
        match paging.as_mut() {
            Some(p) => heap.krealloc(p, ptr, new_size),
            None => heap.krealloc(&mut EarlyBootMapper, ptr, new_size),
        }
    }
}

/// Release an allocation. Frees of unowned addresses are logged, not fatal.
pub fn kfree(ptr: MemoryAddress) {
    let mut heap = KERNEL_HEAP.lock();
    let heap = heap.as_mut().expect("kfree before kheap_init");
    let mut paging = KERNEL_PAGING.lock();
    let result = match paging.as_mut() {
        Some(p) => heap.kfree(p, ptr),
        None => heap.kfree(&mut EarlyBootMapper, ptr),
    };
    if let Err(err) = result {
        log::error!("kfree({ptr}): {err}");
    }
}
