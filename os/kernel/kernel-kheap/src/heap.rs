use crate::layout;
use kernel_blockheap::{BLOCK_SIZE, BlockHeap, BlockTable};
use kernel_memmap::MemoryMap;
use kernel_memory_addresses::{MemoryAddress, PhysicalAddress};
use kernel_multiheap::{HeapFlags, Multiheap, MultiheapError, PageMapper};
use kernel_vmem::{PoolFrameAlloc, align_down, align_up};

/// The kernel allocator: a multiheap seeded with the bootstrap heap.
///
/// Life cycle mirrors boot: [`init`](Self::init) before paging (allocation
/// then runs on the bootstrap heap alone), [`post_paging`](Self::post_paging)
/// once an address space is active (registers the remaining usable regions
/// and finalizes the multiheap, enabling defragmentation).
///
/// By convention `kmalloc`/`kpalloc` failure halts the kernel; callers that
/// can degrade gracefully go through [`multiheap_mut`](Self::multiheap_mut)
/// and handle `None` themselves.
pub struct KernelHeap {
    multiheap: Multiheap,
    bootstrap_start: MemoryAddress,
    bootstrap_end: MemoryAddress,
}

impl KernelHeap {
    /// Bootstrap from the fixed boot layout: heap at
    /// [`layout::BOOTSTRAP_HEAP_ADDRESS`], block table at
    /// [`layout::BOOTSTRAP_TABLE_ADDRESS`], sized from the largest usable
    /// region of `memmap`.
    ///
    /// # Safety
    /// The fixed layout addresses must be backed, writable RAM, and nothing
    /// else may use those ranges afterwards.
    ///
    /// # Panics
    /// Panics when no usable region of at least
    /// [`layout::MIN_BOOTSTRAP_BYTES`] exists; the kernel cannot come up
    /// without its heap.
    #[must_use]
    pub unsafe fn init(memmap: &MemoryMap<'_>) -> Self {
        let largest = memmap
            .largest_usable()
            .unwrap_or_else(|| panic!("memory map reports no usable RAM"));
        let size = align_down(largest.length, BLOCK_SIZE);
        assert!(
            size >= layout::MIN_BOOTSTRAP_BYTES,
            "largest usable region ({size} bytes) is too small for the bootstrap heap"
        );

        let start = layout::BOOTSTRAP_HEAP_ADDRESS;
        let end = start + size;
        #[allow(clippy::cast_possible_truncation)]
        let blocks = (size / BLOCK_SIZE) as usize;
        let table =
            unsafe { BlockTable::from_raw(layout::BOOTSTRAP_TABLE_ADDRESS.as_mut_ptr(), blocks) };
        let boot = BlockHeap::create(start, end, table)
            .unwrap_or_else(|err| panic!("bootstrap heap creation failed: {err}"));

        log::info!("bootstrap heap {start}..{end} ({blocks} blocks)");
        Self::with_bootstrap(boot)
    }

    /// Wrap an already-built bootstrap heap. Used by boot paths that own
    /// their own layout, and by host tests.
    ///
    /// # Panics
    /// Panics if the heap cannot hold the multiheap's own bookkeeping.
    #[must_use]
    pub fn with_bootstrap(boot: BlockHeap) -> Self {
        let bootstrap_start = boot.start();
        let bootstrap_end = boot.end();
        let multiheap = Multiheap::new(boot)
            .unwrap_or_else(|err| panic!("kernel heap bootstrap failed: {err}"));
        Self {
            multiheap,
            bootstrap_start,
            bootstrap_end,
        }
    }

    /// Carve a frame pool for page tables out of the bootstrap heap.
    ///
    /// # Panics
    /// Panics when the bootstrap heap cannot supply the pool; paging cannot
    /// come up without table memory.
    pub fn carve_frame_pool(&mut self, frames: u64) -> PoolFrameAlloc {
        let bytes = frames * BLOCK_SIZE;
        let start = self
            .multiheap
            .alloc(bytes)
            .unwrap_or_else(|| panic!("kernel heap exhausted carving {frames} table frames"));
        PoolFrameAlloc::new(
            PhysicalAddress::new(start.as_u64()),
            PhysicalAddress::new(start.as_u64() + bytes),
        )
    }

    /// Register every usable region (bar the bootstrap's own) for
    /// defragmentation and finalize the multiheap. Call exactly once, with
    /// paging active.
    ///
    /// # Errors
    /// Propagates registration and reservation-mapping failures.
    pub fn post_paging<P: PageMapper>(
        &mut self,
        mapper: &mut P,
        memmap: &MemoryMap<'_>,
    ) -> Result<(), MultiheapError> {
        for region in memmap.usable() {
            let start = MemoryAddress::new(align_up(region.base.as_u64(), BLOCK_SIZE));
            let end = MemoryAddress::new(align_down(region.end().as_u64(), BLOCK_SIZE));
            if start >= end {
                continue;
            }
            // The region hosting the bootstrap heap is already registered.
            if start < self.bootstrap_end && end > self.bootstrap_start {
                continue;
            }
            self.multiheap
                .add(start, end, HeapFlags::DEFRAGMENT_WITH_PAGING)?;
            log::debug!("registered region {start}..{end}");
        }
        self.multiheap.ready(mapper)
    }

    /// Allocate `size` bytes.
    ///
    /// # Panics
    /// Panics on exhaustion; kernel-critical allocations have no fallback.
    pub fn kmalloc(&mut self, size: u64) -> MemoryAddress {
        self.multiheap
            .alloc(size)
            .unwrap_or_else(|| panic!("kernel heap exhausted allocating {size} bytes"))
    }

    /// Allocate `size` zeroed bytes.
    ///
    /// # Safety
    /// The returned range must be dereferenceable at its numeric address
    /// (identity-mapped RAM).
    ///
    /// # Panics
    /// Panics on exhaustion.
    pub unsafe fn kzalloc(&mut self, size: u64) -> MemoryAddress {
        let ptr = self.kmalloc(size);
        #[allow(clippy::cast_possible_truncation)]
        unsafe {
            ptr.as_mut_ptr::<u8>().write_bytes(0, size as usize);
        }
        ptr
    }

    /// Allocate `size` bytes, defragmenting through the page tables when no
    /// contiguous physical run exists.
    ///
    /// # Panics
    /// Panics on exhaustion.
    pub fn kpalloc<P: PageMapper>(&mut self, mapper: &mut P, size: u64) -> MemoryAddress {
        self.multiheap
            .palloc(mapper, size)
            .unwrap_or_else(|| panic!("kernel heap exhausted allocating {size} bytes (defragmented)"))
    }

    /// [`kpalloc`](Self::kpalloc), zero-filled.
    ///
    /// # Safety
    /// The returned range must be dereferenceable through the active page
    /// tables (true for both real and mirror allocations once paging is on).
    ///
    /// # Panics
    /// Panics on exhaustion.
    pub unsafe fn kpzalloc<P: PageMapper>(&mut self, mapper: &mut P, size: u64) -> MemoryAddress {
        let ptr = self.kpalloc(mapper, size);
        #[allow(clippy::cast_possible_truncation)]
        unsafe {
            ptr.as_mut_ptr::<u8>().write_bytes(0, size as usize);
        }
        ptr
    }

    /// Grow or shrink the allocation at `ptr`, preserving the overlapping
    /// prefix.
    ///
    /// # Safety
    /// `ptr` must be a live allocation from this heap, and old and new
    /// ranges must be dereferenceable through the active page tables.
    ///
    /// # Panics
    /// Panics on exhaustion.
    pub unsafe fn krealloc<P: PageMapper>(
        &mut self,
        mapper: &mut P,
        ptr: MemoryAddress,
        new_size: u64,
    ) -> MemoryAddress {
        unsafe { self.multiheap.realloc(mapper, ptr, new_size) }
            .unwrap_or_else(|| panic!("kernel heap exhausted reallocating to {new_size} bytes"))
    }

    /// Release an allocation.
    ///
    /// # Errors
    /// Reports frees of addresses this heap does not own.
    pub fn kfree<P: PageMapper>(
        &mut self,
        mapper: &mut P,
        ptr: MemoryAddress,
    ) -> Result<(), MultiheapError> {
        self.multiheap.free(mapper, ptr)
    }

    /// The bootstrap heap.
    #[must_use]
    pub fn bootstrap_heap(&self) -> &BlockHeap {
        self.multiheap.bootstrap_heap()
    }

    /// The multiheap, for callers that handle allocation failure themselves.
    pub fn multiheap_mut(&mut self) -> &mut Multiheap {
        &mut self.multiheap
    }
}
