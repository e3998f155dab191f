use crate::{HeapFlags, MultiheapError, PageMapper};
use kernel_blockheap::{BLOCK_SIZE, BlockEntry, BlockHeap, BlockHeapError, BlockTable};
use kernel_memory_addresses::{MemoryAddress, PhysicalAddress, VirtualAddress};
use kernel_vmem::MapFlags;

/// One registered region: its real heap and, after finalization, an optional
/// mirror heap for defragmented allocations.
struct Entry {
    heap: BlockHeap,
    paging_heap: Option<BlockHeap>,
    flags: HeapFlags,
    next: *mut Entry,
}

impl Entry {
    fn allows_paging(&self) -> bool {
        self.flags.contains(HeapFlags::DEFRAGMENT_WITH_PAGING)
    }
}

/// Registry of block heaps with first-fit dispatch and paging-based
/// defragmentation. See the crate docs for the mirror-heap scheme.
///
/// All bookkeeping (entry nodes, block tables for registered regions and
/// mirrors) is carved out of the bootstrap heap handed to [`new`](Self::new),
/// which also serves as the first registered region.
pub struct Multiheap {
    first: *mut Entry,
    total_heaps: usize,
    max_end_physical: MemoryAddress,
    ready: bool,
}

// Safety: entry nodes live in the bootstrap region and are reachable only
// through this struct; access is serialized by the owner (the facade lock).
unsafe impl Send for Multiheap {}

struct NodeIter {
    cur: *mut Entry,
}

impl Iterator for NodeIter {
    type Item = *mut Entry;

    fn next(&mut self) -> Option<*mut Entry> {
        if self.cur.is_null() {
            return None;
        }
        let node = self.cur;
        self.cur = unsafe { (*node).next };
        Some(node)
    }
}

impl Multiheap {
    /// Build a multiheap around `boot`, which becomes both the bookkeeping
    /// arena and the first registered region (externally owned, no
    /// defragmentation).
    ///
    /// # Errors
    /// [`MultiheapError::OutOfMemory`] if `boot` cannot even hold its own
    /// entry node.
    pub fn new(mut boot: BlockHeap) -> Result<Self, MultiheapError> {
        let node = boot
            .allocate(size_of::<Entry>() as u64)
            .ok_or(MultiheapError::OutOfMemory)?
            .as_mut_ptr::<Entry>();
        unsafe {
            node.write(Entry {
                heap: boot,
                paging_heap: None,
                flags: HeapFlags::EXTERNALLY_OWNED,
                next: core::ptr::null_mut(),
            });
        }
        Ok(Self {
            first: node,
            total_heaps: 1,
            max_end_physical: MemoryAddress::zero(),
            ready: false,
        })
    }

    /// Number of registered heaps, the bootstrap heap included.
    #[must_use]
    pub const fn total_heaps(&self) -> usize {
        self.total_heaps
    }

    /// The bootstrap heap (always the first entry).
    #[must_use]
    pub fn bootstrap_heap(&self) -> &BlockHeap {
        unsafe { &(*self.first).heap }
    }

    /// Whether [`ready`](Self::ready) has finalized the registry.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether further regions may still be registered.
    #[must_use]
    pub const fn can_add_heap(&self) -> bool {
        !self.ready
    }

    /// The fixed boundary between real and mirror addresses. Zero until
    /// [`ready`](Self::ready).
    #[must_use]
    pub const fn max_end_physical(&self) -> MemoryAddress {
        self.max_end_physical
    }

    /// Whether `ptr` lies in mirror (defragmented-allocation) space.
    ///
    /// Only meaningful once the registry is finalized.
    #[must_use]
    pub fn is_virtual(&self, ptr: MemoryAddress) -> bool {
        debug_assert!(self.ready, "mirror boundary is fixed at ready()");
        ptr >= self.max_end_physical
    }

    /// Register the region `[start, end)`, carving its block table from the
    /// bootstrap heap.
    ///
    /// # Errors
    /// - [`MultiheapError::NotReady`] after finalization.
    /// - [`MultiheapError::OutOfMemory`] if bookkeeping cannot be carved.
    /// - [`MultiheapError::Heap`] for a malformed range.
    pub fn add(
        &mut self,
        start: MemoryAddress,
        end: MemoryAddress,
        flags: HeapFlags,
    ) -> Result<(), MultiheapError> {
        if self.ready {
            return Err(MultiheapError::NotReady);
        }
        if start >= end
            || !start.is_aligned_to(BLOCK_SIZE)
            || !end.is_aligned_to(BLOCK_SIZE)
        {
            return Err(BlockHeapError::InvalidRange(start, end).into());
        }

        #[allow(clippy::cast_possible_truncation)]
        let blocks = ((end - start) / BLOCK_SIZE) as usize;
        let table = self.carve_table(blocks)?;
        let heap = BlockHeap::create(start, end, table)?;
        self.append(heap, flags)
    }

    /// Register an already-constructed heap. The multiheap dispatches into
    /// it but does not own its storage.
    ///
    /// # Errors
    /// [`MultiheapError::NotReady`] after finalization, or
    /// [`MultiheapError::OutOfMemory`] if the entry node cannot be carved.
    pub fn add_existing(&mut self, heap: BlockHeap, flags: HeapFlags) -> Result<(), MultiheapError> {
        if self.ready {
            return Err(MultiheapError::NotReady);
        }
        self.append(heap, flags | HeapFlags::EXTERNALLY_OWNED)
    }

    /// One-time finalization; paging must be active.
    ///
    /// Fixes `max_end_physical` as the highest real heap end, then builds a
    /// mirror heap for every region flagged for defragmentation: same block
    /// count, address range shifted by `max_end_physical`. Each mirror range
    /// gets a non-present reservation mapping so the page-table chains exist
    /// up front and `palloc`-time mappings cannot run out of table frames.
    ///
    /// # Errors
    /// - [`MultiheapError::OutOfMemory`] if mirror tables cannot be carved.
    /// - [`MultiheapError::Paging`] if a reservation mapping fails.
    pub fn ready<P: PageMapper>(&mut self, mapper: &mut P) -> Result<(), MultiheapError> {
        if self.ready {
            log::warn!("multiheap ready() called twice, ignoring");
            return Ok(());
        }

        let mut max_end = MemoryAddress::zero();
        for node in self.nodes() {
            let end = unsafe { (*node).heap.end() };
            if end > max_end {
                max_end = end;
            }
        }
        self.max_end_physical = max_end;

        for node in self.nodes() {
            if !unsafe { (*node).allows_paging() } {
                continue;
            }
            let (start, end, blocks) = {
                let heap = unsafe { &(*node).heap };
                (heap.start(), heap.end(), heap.total_blocks())
            };
            let mirror_start = MemoryAddress::new(max_end.as_u64() + start.as_u64());
            let mirror_end = MemoryAddress::new(max_end.as_u64() + end.as_u64());

            let table = self.carve_table(blocks)?;
            let mirror = BlockHeap::create(mirror_start, mirror_end, table)?;
            mapper.reserve(VirtualAddress::new(mirror_start.as_u64()), blocks as u64)?;

            log::debug!("mirror heap {mirror_start}..{mirror_end} ({blocks} blocks)");
            unsafe {
                (*node).paging_heap = Some(mirror);
            }
        }

        self.ready = true;
        log::info!("multiheap finalized: {} heaps, mirror boundary {max_end}", self.total_heaps);
        Ok(())
    }

    /// First-fit allocation across real heaps in registration order.
    ///
    /// Never defragments; returns `None` when no single heap has a long
    /// enough free run.
    pub fn alloc(&mut self, size: u64) -> Option<MemoryAddress> {
        self.first_pass(size)
    }

    /// Like [`alloc`](Self::alloc), but falls back to paging
    /// defragmentation.
    ///
    /// The fallback picks the first finalized region that allows
    /// defragmentation and still has enough free blocks in total, allocates
    /// a contiguous run in its mirror heap, and maps each mirror page onto a
    /// single real block wherever one is free. The returned address is then
    /// `>= max_end_physical` and contiguous through the page tables.
    ///
    /// # Panics
    /// Panics if real blocks or mappings vanish mid-stitch; both indicate
    /// corrupted heap state, which a bare-metal kernel cannot recover from.
    pub fn palloc<P: PageMapper>(&mut self, mapper: &mut P, size: u64) -> Option<MemoryAddress> {
        if let Some(ptr) = self.first_pass(size) {
            return Some(ptr);
        }
        if !self.ready {
            return None;
        }

        let wanted = size.div_ceil(BLOCK_SIZE);
        for node in self.nodes() {
            let entry = unsafe { &mut *node };
            let Some(mirror) = entry.paging_heap.as_mut() else {
                continue;
            };
            if (entry.heap.free_blocks() as u64) < wanted {
                continue;
            }
            // The mirror itself may lack a contiguous run; try the next
            // eligible region.
            let Some(virt) = mirror.allocate(size) else {
                continue;
            };

            for i in 0..wanted {
                let block = entry
                    .heap
                    .allocate(BLOCK_SIZE)
                    .unwrap_or_else(|| panic!("real heap ran dry stitching {virt}"));
                let va = VirtualAddress::new((virt + i * BLOCK_SIZE).as_u64());
                mapper
                    .map(
                        va,
                        PhysicalAddress::new(block.as_u64()),
                        MapFlags::PRESENT | MapFlags::WRITABLE,
                    )
                    .unwrap_or_else(|e| panic!("stitch mapping failed for {va}: {e}"));
            }
            log::debug!("defragmented {wanted} blocks at {virt}");
            return Some(virt);
        }
        None
    }

    /// Release an allocation made by [`alloc`](Self::alloc) or
    /// [`palloc`](Self::palloc).
    ///
    /// Mirror pointers are unstitched page by page: translate the mirror
    /// page to its real block, free the block, drop the mapping; finally the
    /// mirror run itself is released.
    ///
    /// # Errors
    /// - [`MultiheapError::UnknownAddress`] if no heap owns `ptr`.
    /// - [`MultiheapError::Heap`] if `ptr` does not start an allocation.
    ///
    /// # Panics
    /// Panics if a mirror page has no live translation; the stitch state is
    /// then corrupt.
    pub fn free<P: PageMapper>(
        &mut self,
        mapper: &mut P,
        ptr: MemoryAddress,
    ) -> Result<(), MultiheapError> {
        if self.ready && self.is_virtual(ptr) {
            self.free_virtual(mapper, ptr)
        } else {
            self.free_real(ptr)
        }
    }

    /// Length in blocks of the allocation starting at `ptr`, real or mirror.
    #[must_use]
    pub fn allocation_block_count(&self, ptr: MemoryAddress) -> Option<u64> {
        self.owning_heap(ptr)
            .and_then(|heap| heap.allocation_block_count(ptr))
    }

    /// Length in bytes of the allocation starting at `ptr`.
    #[must_use]
    pub fn allocation_byte_count(&self, ptr: MemoryAddress) -> Option<u64> {
        self.allocation_block_count(ptr).map(|b| b * BLOCK_SIZE)
    }

    /// Move the allocation at `old_ptr` into a fresh allocation of
    /// `new_size` bytes, copying the overlapping prefix.
    ///
    /// Defragments like [`palloc`](Self::palloc) when needed. On success the
    /// old allocation is freed; `None` leaves it untouched.
    ///
    /// # Safety
    /// `old_ptr` must be a live allocation from this multiheap, and both the
    /// old and new ranges must be dereferenceable at their numeric addresses
    /// through the active page tables.
    pub unsafe fn realloc<P: PageMapper>(
        &mut self,
        mapper: &mut P,
        old_ptr: MemoryAddress,
        new_size: u64,
    ) -> Option<MemoryAddress> {
        let old_bytes = self.allocation_byte_count(old_ptr)?;
        let new_ptr = self.palloc(mapper, new_size)?;

        #[allow(clippy::cast_possible_truncation)]
        let copy = old_bytes.min(new_size) as usize;
        unsafe {
            core::ptr::copy_nonoverlapping(
                old_ptr.as_mut_ptr::<u8>().cast_const(),
                new_ptr.as_mut_ptr::<u8>(),
                copy,
            );
        }

        if let Err(err) = self.free(mapper, old_ptr) {
            log::error!("realloc could not release {old_ptr}: {err}");
        }
        Some(new_ptr)
    }

    fn first_pass(&mut self, size: u64) -> Option<MemoryAddress> {
        for node in self.nodes() {
            let heap = unsafe { &mut (*node).heap };
            if let Some(ptr) = heap.allocate(size) {
                return Some(ptr);
            }
        }
        None
    }

    fn free_virtual<P: PageMapper>(
        &mut self,
        mapper: &mut P,
        ptr: MemoryAddress,
    ) -> Result<(), MultiheapError> {
        let node = self
            .nodes()
            .find(|&n| {
                unsafe { (*n).paging_heap.as_ref() }.is_some_and(|mirror| mirror.contains(ptr))
            })
            .ok_or_else(|| {
                log::error!("free of unowned mirror address {ptr}");
                MultiheapError::UnknownAddress(ptr)
            })?;

        let run = unsafe { (*node).paging_heap.as_ref() }
            .and_then(|mirror| mirror.allocation_block_count(ptr))
            .ok_or(BlockHeapError::NotRunStart(ptr))?;

        for i in 0..run {
            let va = VirtualAddress::new((ptr + i * BLOCK_SIZE).as_u64());
            let phys = mapper
                .translate(va)
                .unwrap_or_else(|| panic!("mirror page {va} has no backing frame"));
            self.free_real(phys.as_addr())?;
            mapper.unmap(va)?;
        }

        unsafe { (*node).paging_heap.as_mut() }
            .expect("owner found above")
            .free(ptr)?;
        Ok(())
    }

    fn free_real(&mut self, ptr: MemoryAddress) -> Result<(), MultiheapError> {
        for node in self.nodes() {
            let heap = unsafe { &mut (*node).heap };
            if heap.contains(ptr) {
                heap.free(ptr)?;
                return Ok(());
            }
        }
        log::error!("free of unowned address {ptr}");
        Err(MultiheapError::UnknownAddress(ptr))
    }

    /// The real or mirror heap whose range contains `ptr`.
    fn owning_heap(&self, ptr: MemoryAddress) -> Option<&BlockHeap> {
        for node in self.nodes() {
            let entry = unsafe { &*node };
            if entry.heap.contains(ptr) {
                return Some(&entry.heap);
            }
            if let Some(mirror) = entry.paging_heap.as_ref()
                && mirror.contains(ptr)
            {
                return Some(mirror);
            }
        }
        None
    }

    fn append(&mut self, heap: BlockHeap, flags: HeapFlags) -> Result<(), MultiheapError> {
        let node = self
            .carve_bytes(size_of::<Entry>() as u64)?
            .as_mut_ptr::<Entry>();
        unsafe {
            node.write(Entry {
                heap,
                paging_heap: None,
                flags,
                next: core::ptr::null_mut(),
            });
        }

        let mut tail = self.first;
        unsafe {
            while !(*tail).next.is_null() {
                tail = (*tail).next;
            }
            (*tail).next = node;
        }
        self.total_heaps += 1;
        Ok(())
    }

    fn carve_table(&mut self, blocks: usize) -> Result<BlockTable, MultiheapError> {
        let bytes = (blocks * size_of::<BlockEntry>()) as u64;
        let storage = self.carve_bytes(bytes)?;
        Ok(unsafe { BlockTable::from_raw(storage.as_mut_ptr::<BlockEntry>(), blocks) })
    }

    fn carve_bytes(&mut self, bytes: u64) -> Result<MemoryAddress, MultiheapError> {
        let boot = unsafe { &mut (*self.first).heap };
        boot.allocate(bytes).ok_or(MultiheapError::OutOfMemory)
    }

    fn nodes(&self) -> NodeIter {
        NodeIter { cur: self.first }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmemPageMapper;
    use kernel_vmem::{IdentityPhysMapper, PagingDescriptor, PoolFrameAlloc};

    #[repr(align(4096))]
    struct Page([u8; 4096]);

    /// Leak a page-aligned buffer standing in for one physical region.
    fn region(pages: usize) -> (MemoryAddress, MemoryAddress) {
        let buf = Box::leak(
            (0..pages)
                .map(|_| Page([0; 4096]))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );
        let start = MemoryAddress::from_ptr(buf.as_ptr());
        (start, start + pages as u64 * BLOCK_SIZE)
    }

    fn heap_over(pages: usize) -> BlockHeap {
        let (start, end) = region(pages);
        let table = BlockTable::from_slice(Box::leak(
            vec![BlockEntry::Free; pages].into_boxed_slice(),
        ));
        BlockHeap::create(start, end, table).unwrap()
    }

    type TestMapper = VmemPageMapper<IdentityPhysMapper, PoolFrameAlloc>;

    fn mapper(frames: usize) -> TestMapper {
        let (start, end) = region(frames);
        let mut pool = PoolFrameAlloc::new(
            PhysicalAddress::new(start.as_u64()),
            PhysicalAddress::new(end.as_u64()),
        );
        let desc = PagingDescriptor::new(4, &IdentityPhysMapper, &mut pool).unwrap();
        VmemPageMapper::new(desc, IdentityPhysMapper, pool)
    }

    fn within(ptr: MemoryAddress, range: (MemoryAddress, MemoryAddress)) -> bool {
        ptr >= range.0 && ptr < range.1
    }

    // Bootstrap blocks consumed per operation, for sizing exact-fit boot heaps:
    // new() takes 1 (its entry node), add() takes 2 (table + node), ready()
    // takes 1 per mirror.

    #[test]
    fn first_fit_skips_heaps_with_short_runs() {
        let mut mh = Multiheap::new(heap_over(5)).unwrap();
        let a = region(2);
        let b = region(5);
        mh.add(a.0, a.1, HeapFlags::empty()).unwrap();
        mh.add(b.0, b.1, HeapFlags::empty()).unwrap();
        // Boot is now exactly full (1 + 2 + 2 blocks), so allocations come
        // from the registered regions in order.
        let mut map = mapper(8);
        mh.ready(&mut map).unwrap();

        let three = mh.alloc(3 * BLOCK_SIZE).unwrap();
        assert!(within(three, b), "run of 3 only fits the second region");

        let one = mh.alloc(BLOCK_SIZE).unwrap();
        assert!(within(one, a), "single block comes from the first region");
    }

    #[test]
    fn registration_closes_at_ready() {
        let mut mh = Multiheap::new(heap_over(3)).unwrap();
        let a = region(2);
        mh.add(a.0, a.1, HeapFlags::empty()).unwrap();
        assert!(mh.can_add_heap());
        assert!(!mh.is_ready());

        let mut map = mapper(4);
        mh.ready(&mut map).unwrap();
        assert!(mh.is_ready());
        assert!(!mh.can_add_heap());

        let b = region(2);
        assert_eq!(mh.add(b.0, b.1, HeapFlags::empty()), Err(MultiheapError::NotReady));
        assert_eq!(
            mh.add_existing(heap_over(2), HeapFlags::empty()),
            Err(MultiheapError::NotReady)
        );
        assert_eq!(mh.total_heaps(), 2);
    }

    #[test]
    fn ready_twice_keeps_boundary() {
        let mut mh = Multiheap::new(heap_over(3)).unwrap();
        let a = region(2);
        mh.add(a.0, a.1, HeapFlags::empty()).unwrap();

        let mut map = mapper(4);
        mh.ready(&mut map).unwrap();
        let boundary = mh.max_end_physical();
        mh.ready(&mut map).unwrap();
        assert_eq!(mh.max_end_physical(), boundary);
    }

    #[test]
    fn mirror_boundary_is_highest_real_end() {
        let boot = heap_over(3);
        let boot_end = boot.end();
        let mut mh = Multiheap::new(boot).unwrap();
        let a = region(2);
        mh.add(a.0, a.1, HeapFlags::empty()).unwrap();
        let mut map = mapper(4);
        mh.ready(&mut map).unwrap();

        let boundary = mh.max_end_physical();
        assert_eq!(boundary, if boot_end > a.1 { boot_end } else { a.1 });
        assert!(mh.is_virtual(boundary));
        assert!(!mh.is_virtual(MemoryAddress::new(boundary.as_u64() - 1)));

        // Traffic never moves the boundary.
        let p = mh.alloc(BLOCK_SIZE).unwrap();
        mh.free(&mut map, p).unwrap();
        assert_eq!(mh.max_end_physical(), boundary);
    }

    #[test]
    fn palloc_stitches_scattered_blocks() {
        // Boot: 1 (new) + 2 (add A) + 2 (add B) + 2 (two mirrors) = 7.
        let mut mh = Multiheap::new(heap_over(7)).unwrap();
        let a = region(4);
        let b = region(4);
        mh.add(a.0, a.1, HeapFlags::DEFRAGMENT_WITH_PAGING).unwrap();
        mh.add(b.0, b.1, HeapFlags::DEFRAGMENT_WITH_PAGING).unwrap();
        let mut map = mapper(32);
        mh.ready(&mut map).unwrap();

        // Fill both regions, then punch two isolated holes into A.
        let a_blocks: Vec<_> = (0..4).map(|_| mh.alloc(BLOCK_SIZE).unwrap()).collect();
        let b_blocks: Vec<_> = (0..4).map(|_| mh.alloc(BLOCK_SIZE).unwrap()).collect();
        assert!(a_blocks.iter().all(|&p| within(p, a)));
        assert!(b_blocks.iter().all(|&p| within(p, b)));
        mh.free(&mut map, a_blocks[1]).unwrap();
        mh.free(&mut map, a_blocks[3]).unwrap();

        // No contiguous 2-block run exists anywhere.
        assert_eq!(mh.alloc(2 * BLOCK_SIZE), None);

        let v = mh.palloc(&mut map, 2 * BLOCK_SIZE).unwrap();
        assert!(mh.is_virtual(v));
        assert!(v >= mh.max_end_physical());

        // The two mirror pages resolve to the two holes in A, in first-fit
        // order, and are distinct backing memory.
        let p0 = map.translate(VirtualAddress::new(v.as_u64())).unwrap();
        let p1 = map
            .translate(VirtualAddress::new((v + BLOCK_SIZE).as_u64()))
            .unwrap();
        assert_eq!(p0.as_addr(), a_blocks[1]);
        assert_eq!(p1.as_addr(), a_blocks[3]);
        unsafe {
            *p0.as_addr().as_mut_ptr::<u8>() = 0x11;
            *p1.as_addr().as_mut_ptr::<u8>() = 0x22;
            assert_eq!(*p0.as_addr().as_mut_ptr::<u8>(), 0x11);
            assert_eq!(*p1.as_addr().as_mut_ptr::<u8>(), 0x22);
        }

        // Freeing the mirror pointer unstitches: translations drop and the
        // real blocks are allocatable again.
        mh.free(&mut map, v).unwrap();
        assert_eq!(map.translate(VirtualAddress::new(v.as_u64())), None);
        assert_eq!(
            map.translate(VirtualAddress::new((v + BLOCK_SIZE).as_u64())),
            None
        );
        assert_eq!(mh.alloc(BLOCK_SIZE), Some(a_blocks[1]));
        assert_eq!(mh.alloc(BLOCK_SIZE), Some(a_blocks[3]));
    }

    #[test]
    fn palloc_needs_enough_free_blocks_in_one_region() {
        // Boot: 1 + 2 + 1 (mirror) = 4.
        let mut mh = Multiheap::new(heap_over(4)).unwrap();
        let a = region(4);
        mh.add(a.0, a.1, HeapFlags::DEFRAGMENT_WITH_PAGING).unwrap();
        let mut map = mapper(16);
        mh.ready(&mut map).unwrap();

        let blocks: Vec<_> = (0..4).map(|_| mh.alloc(BLOCK_SIZE).unwrap()).collect();
        mh.free(&mut map, blocks[2]).unwrap();

        // One free block cannot back a two-block stitch.
        assert_eq!(mh.palloc(&mut map, 2 * BLOCK_SIZE), None);
        assert!(mh.palloc(&mut map, BLOCK_SIZE).is_some());
    }

    #[test]
    fn palloc_without_defrag_regions_fails_plainly() {
        let mut mh = Multiheap::new(heap_over(3)).unwrap();
        let a = region(2);
        mh.add(a.0, a.1, HeapFlags::empty()).unwrap();
        let mut map = mapper(4);
        mh.ready(&mut map).unwrap();

        let _fill: Vec<_> = (0..2).map(|_| mh.alloc(BLOCK_SIZE).unwrap()).collect();
        assert_eq!(mh.palloc(&mut map, BLOCK_SIZE), None);
    }

    #[test]
    fn free_of_unowned_address_is_reported() {
        let mut mh = Multiheap::new(heap_over(3)).unwrap();
        let mut map = mapper(4);
        mh.ready(&mut map).unwrap();

        let stray = MemoryAddress::new(0x1000);
        assert!(matches!(
            mh.free(&mut map, stray),
            Err(MultiheapError::UnknownAddress(_))
        ));
    }

    #[test]
    fn allocation_counts_cover_real_and_mirror() {
        // Boot: 1 + 2 + 1 = 4.
        let mut mh = Multiheap::new(heap_over(4)).unwrap();
        let a = region(4);
        mh.add(a.0, a.1, HeapFlags::DEFRAGMENT_WITH_PAGING).unwrap();
        let mut map = mapper(16);
        mh.ready(&mut map).unwrap();

        let p = mh.alloc(2 * BLOCK_SIZE).unwrap();
        assert_eq!(mh.allocation_block_count(p), Some(2));
        assert_eq!(mh.allocation_byte_count(p), Some(2 * BLOCK_SIZE));
        mh.free(&mut map, p).unwrap();
        assert_eq!(mh.allocation_block_count(p), None);

        // Fragment the region (holes at blocks 1 and 3) and stitch through
        // the mirror.
        let singles: Vec<_> = (0..4).map(|_| mh.alloc(BLOCK_SIZE).unwrap()).collect();
        mh.free(&mut map, singles[1]).unwrap();
        mh.free(&mut map, singles[3]).unwrap();

        let v = mh.palloc(&mut map, 2 * BLOCK_SIZE).unwrap();
        assert!(mh.is_virtual(v));
        assert_eq!(mh.allocation_block_count(v), Some(2));
        assert_eq!(mh.allocation_byte_count(v), Some(2 * BLOCK_SIZE));
        mh.free(&mut map, v).unwrap();
        assert_eq!(mh.allocation_block_count(v), None);
    }

    #[test]
    fn realloc_preserves_contents() {
        let mut mh = Multiheap::new(heap_over(8)).unwrap();
        let a = region(4);
        mh.add(a.0, a.1, HeapFlags::empty()).unwrap();
        let mut map = mapper(8);
        mh.ready(&mut map).unwrap();

        let p = mh.alloc(BLOCK_SIZE).unwrap();
        unsafe {
            p.as_mut_ptr::<u8>().write_bytes(0x5A, 64);
        }

        let q = unsafe { mh.realloc(&mut map, p, 2 * BLOCK_SIZE) }.unwrap();
        assert_ne!(q, p);
        assert_eq!(mh.allocation_block_count(q), Some(2));
        for i in 0..64 {
            assert_eq!(unsafe { *q.as_mut_ptr::<u8>().add(i) }, 0x5A);
        }
        // The old run was released.
        assert_eq!(mh.allocation_block_count(p), None);
    }
}
