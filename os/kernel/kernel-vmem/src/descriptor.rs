use crate::page_entry::PageEntryBits;
use crate::page_table::{ENTRIES_PER_TABLE, PageTable, table_indices};
use crate::{
    FrameAlloc, MapFlags, PAGE_SIZE, PhysMapper, VmemError, align_down, align_up, arch,
    check_page_aligned,
};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_memmap::MemoryMap;

/// Root of one address space's 4-level page-table tree.
///
/// The kernel owns one long-lived descriptor; the task subsystem creates one
/// per process and destroys it at teardown. Descriptors hold only the root
/// frame's physical address — the mapper and frame allocator are passed into
/// each operation, so ownership of those stays with the caller.
#[derive(Debug)]
pub struct PagingDescriptor {
    root: PhysicalAddress,
}

impl PagingDescriptor {
    /// Create a descriptor with an empty root table.
    ///
    /// # Errors
    /// - [`VmemError::UnsupportedLevel`] for any `level` other than 4
    ///   (5-level paging is explicitly not implemented).
    /// - [`VmemError::OutOfMemory`] if no frame is available for the root.
    pub fn new<M: PhysMapper, A: FrameAlloc>(
        level: u8,
        mapper: &M,
        alloc: &mut A,
    ) -> Result<Self, VmemError> {
        if level != 4 {
            return Err(VmemError::UnsupportedLevel(level));
        }
        let root = alloc.alloc_4k().ok_or(VmemError::OutOfMemory)?;
        unsafe { mapper.phys_to_mut::<PageTable>(root) }.zero();
        Ok(Self { root })
    }

    /// Physical address of the root (PML4) table.
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Install or replace the mapping for one page.
    ///
    /// Missing intermediate tables are allocated zeroed on the way down. If
    /// the leaf entry was already present, its TLB entry is invalidated
    /// before the new one is written (remap, not map-once). An empty `flags`
    /// unmaps: the present bit is cleared while the frame bits stay, which
    /// also serves to pre-build intermediates for a range before it is
    /// actually mapped.
    ///
    /// # Errors
    /// - [`VmemError::InvalidAlignment`] if `va` or `pa` is not page-aligned.
    /// - [`VmemError::OutOfMemory`] if an intermediate table cannot be
    ///   allocated.
    pub fn map<M: PhysMapper, A: FrameAlloc>(
        &self,
        mapper: &M,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        check_page_aligned(va.as_u64())?;
        check_page_aligned(pa.as_u64())?;

        let indices = table_indices(va);
        let mut table = unsafe { mapper.phys_to_mut::<PageTable>(self.root) };
        for &index in &indices[..3] {
            table = Self::descend_or_create(mapper, alloc, table, index)?;
        }

        let leaf_index = indices[3];
        if table.entry(leaf_index).present() {
            arch::invalidate_page(va);
        }

        let mut entry = PageEntryBits::new();
        entry.set_physical_address(pa);
        entry.set_present(flags.contains(MapFlags::PRESENT));
        entry.set_writable(flags.contains(MapFlags::WRITABLE));
        entry.set_user_access(flags.contains(MapFlags::USER));
        entry.set_write_through(flags.contains(MapFlags::WRITE_THROUGH));
        entry.set_cache_disabled(flags.contains(MapFlags::CACHE_DISABLE));
        entry.set_execute_disable(flags.contains(MapFlags::NO_EXECUTE));
        table.set_entry(leaf_index, entry);
        Ok(())
    }

    /// Map `count` consecutive pages starting at `va → pa`.
    ///
    /// Stops at the first failing page and returns that error; pages mapped
    /// before the failure stay mapped.
    ///
    /// # Errors
    /// See [`map`](Self::map).
    pub fn map_range<M: PhysMapper, A: FrameAlloc>(
        &self,
        mapper: &M,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        count: u64,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        for i in 0..count {
            self.map(mapper, alloc, va + i * PAGE_SIZE, pa + i * PAGE_SIZE, flags)?;
        }
        Ok(())
    }

    /// Map `va` onto the physical range `[phys_start, phys_end)`.
    ///
    /// # Errors
    /// - [`VmemError::InvalidRange`] if `phys_end < phys_start`.
    /// - [`VmemError::InvalidAlignment`] if any of the three addresses is
    ///   not page-aligned.
    pub fn map_to<M: PhysMapper, A: FrameAlloc>(
        &self,
        mapper: &M,
        alloc: &mut A,
        va: VirtualAddress,
        phys_start: PhysicalAddress,
        phys_end: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        if phys_end < phys_start {
            return Err(VmemError::InvalidRange {
                start: phys_start.as_u64(),
                end: phys_end.as_u64(),
            });
        }
        check_page_aligned(va.as_u64())?;
        check_page_aligned(phys_start.as_u64())?;
        check_page_aligned(phys_end.as_u64())?;

        let count = (phys_end.as_u64() - phys_start.as_u64()) / PAGE_SIZE;
        self.map_range(mapper, alloc, va, phys_start, count, flags)
    }

    /// Identity-map everything the kernel must be able to reach: the first
    /// MiB unconditionally (firmware and boot structures live there whether
    /// or not the map reports them), then every usable region from `memmap`,
    /// aligned outward to page boundaries.
    ///
    /// # Errors
    /// See [`map`](Self::map).
    pub fn map_known_regions<M: PhysMapper, A: FrameAlloc>(
        &self,
        mapper: &M,
        alloc: &mut A,
        memmap: &MemoryMap<'_>,
    ) -> Result<(), VmemError> {
        let flags = MapFlags::PRESENT | MapFlags::WRITABLE;

        self.map_to(
            mapper,
            alloc,
            VirtualAddress::new(0),
            PhysicalAddress::new(0),
            PhysicalAddress::new(0x10_0000),
            flags,
        )?;

        for region in memmap.usable() {
            let start = align_down(region.base.as_u64(), PAGE_SIZE);
            let end = align_up(region.end().as_u64(), PAGE_SIZE);
            log::debug!("identity mapping 0x{start:X}..0x{end:X}");
            self.map_to(
                mapper,
                alloc,
                VirtualAddress::new(start),
                PhysicalAddress::new(start),
                PhysicalAddress::new(end),
                flags,
            )?;
        }
        Ok(())
    }

    /// Translate `va` through this descriptor's tables.
    ///
    /// Returns `None` when any level is null or not present; otherwise the
    /// mapped frame address joined with the low 12 offset bits.
    #[must_use]
    pub fn translate<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress) -> Option<PhysicalAddress> {
        let indices = table_indices(va);
        let mut table = unsafe { mapper.phys_to_mut::<PageTable>(self.root) };
        for &index in &indices[..3] {
            let entry = table.entry(index);
            if !entry.present() {
                return None;
            }
            table = unsafe { mapper.phys_to_mut::<PageTable>(entry.physical_address()) };
        }

        let entry = table.entry(indices[3]);
        if !entry.present() {
            return None;
        }
        Some(PhysicalAddress::new(
            (entry.frame() << 12) | (va.as_u64() & 0xFFF),
        ))
    }

    /// Make this the active address space by loading its root into CR3.
    ///
    /// # Safety
    /// The descriptor must be fully constructed and must map the currently
    /// executing code, data and stack, or the CPU faults immediately.
    pub unsafe fn switch(&self) {
        unsafe { arch::write_cr3(self.root) }
    }

    /// Tear down the tree, returning every table frame (child tables first,
    /// then the root) to `alloc`. Mapped leaf frames are not freed; they
    /// belong to whoever mapped them.
    ///
    /// Must never be called on the currently active descriptor.
    pub fn destroy<M: PhysMapper, A: FrameAlloc>(self, mapper: &M, alloc: &mut A) {
        Self::free_table(mapper, alloc, self.root, 0);
    }

    // Depth is bounded by the tree shape: 0 = PML4, 3 = PT.
    fn free_table<M: PhysMapper, A: FrameAlloc>(
        mapper: &M,
        alloc: &mut A,
        table_pa: PhysicalAddress,
        depth: u8,
    ) {
        if depth < 3 {
            let table = unsafe { mapper.phys_to_mut::<PageTable>(table_pa) };
            for index in 0..ENTRIES_PER_TABLE {
                let entry = table.entry(index);
                if !entry.is_null() {
                    Self::free_table(mapper, alloc, entry.physical_address(), depth + 1);
                }
            }
        }
        alloc.free_4k(table_pa);
    }

    fn descend_or_create<'a, M: PhysMapper, A: FrameAlloc>(
        mapper: &M,
        alloc: &mut A,
        table: &mut PageTable,
        index: usize,
    ) -> Result<&'a mut PageTable, VmemError> {
        let entry = table.entry(index);
        if entry.is_null() {
            let frame = alloc.alloc_4k().ok_or(VmemError::OutOfMemory)?;
            let child = unsafe { mapper.phys_to_mut::<PageTable>(frame) };
            child.zero();

            let mut link = PageEntryBits::new();
            link.set_physical_address(frame);
            link.set_present(true);
            link.set_writable(true);
            link.set_user_access(true);
            table.set_entry(index, link);
            Ok(child)
        } else {
            Ok(unsafe { mapper.phys_to_mut::<PageTable>(entry.physical_address()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityPhysMapper, PoolFrameAlloc};

    #[repr(align(4096))]
    struct Aligned4K([u8; 4096]);

    /// Leak a 4 KiB-aligned buffer to serve as "physical RAM" for tables.
    fn pool(frames: usize) -> PoolFrameAlloc {
        let buf = Box::leak(
            (0..frames)
                .map(|_| Aligned4K([0; 4096]))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );
        let start = PhysicalAddress::new(buf.as_ptr() as u64);
        PoolFrameAlloc::new(start, start + frames as u64 * PAGE_SIZE)
    }

    const RW: MapFlags = MapFlags::PRESENT.union(MapFlags::WRITABLE);

    #[test]
    fn rejects_five_level_paging() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(1);
        let err = PagingDescriptor::new(5, &mapper, &mut alloc).unwrap_err();
        assert_eq!(err, VmemError::UnsupportedLevel(5));
    }

    #[test]
    fn map_then_translate_preserves_offset() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(8);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        let va = VirtualAddress::new(0x0000_7FFF_0000_0000);
        let pa = PhysicalAddress::new(0x0000_0000_0030_0000);
        desc.map(&mapper, &mut alloc, va, pa, RW).unwrap();

        assert_eq!(desc.translate(&mapper, va), Some(pa));
        assert_eq!(
            desc.translate(&mapper, va + 0x123),
            Some(pa + 0x123),
            "low 12 bits carry through"
        );
        assert_eq!(desc.translate(&mapper, va + PAGE_SIZE), None);
    }

    #[test]
    fn remap_replaces_frame_without_leaking_tables() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(8);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        let va = VirtualAddress::new(0x4000_0000);
        let p1 = PhysicalAddress::new(0x10_0000);
        let p2 = PhysicalAddress::new(0x20_0000);

        desc.map(&mapper, &mut alloc, va, p1, RW).unwrap();
        let tables_after_first = alloc.outstanding();
        desc.map(&mapper, &mut alloc, va, p2, RW).unwrap();

        assert_eq!(desc.translate(&mapper, va), Some(p2));
        assert_eq!(alloc.outstanding(), tables_after_first);
    }

    #[test]
    fn empty_flags_unmap_but_keep_intermediates() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(8);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        let va = VirtualAddress::new(0x4000_0000);
        let pa = PhysicalAddress::new(0x10_0000);
        desc.map(&mapper, &mut alloc, va, pa, RW).unwrap();
        let tables = alloc.outstanding();

        desc.map(&mapper, &mut alloc, va, pa, MapFlags::empty()).unwrap();
        assert_eq!(desc.translate(&mapper, va), None);
        // The walk structure stays in place for a later re-map.
        assert_eq!(alloc.outstanding(), tables);

        desc.map(&mapper, &mut alloc, va, pa, RW).unwrap();
        assert_eq!(desc.translate(&mapper, va), Some(pa));
        assert_eq!(alloc.outstanding(), tables);
    }

    #[test]
    fn reservation_prebuilds_intermediates() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(8);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        // Reserve with empty flags, then verify a later real map allocates
        // no further tables.
        let va = VirtualAddress::new(0x8000_0000);
        desc.map_range(&mapper, &mut alloc, va, PhysicalAddress::new(0), 4, MapFlags::empty())
            .unwrap();
        let tables = alloc.outstanding();

        desc.map(&mapper, &mut alloc, va + PAGE_SIZE, PhysicalAddress::new(0x30_0000), RW)
            .unwrap();
        assert_eq!(alloc.outstanding(), tables);
    }

    #[test]
    fn rejects_misaligned_addresses() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(4);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        let err = desc
            .map(
                &mapper,
                &mut alloc,
                VirtualAddress::new(0x1001),
                PhysicalAddress::new(0x2000),
                RW,
            )
            .unwrap_err();
        assert_eq!(err, VmemError::InvalidAlignment(0x1001));

        let err = desc
            .map(
                &mapper,
                &mut alloc,
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x2001),
                RW,
            )
            .unwrap_err();
        assert!(matches!(err, VmemError::InvalidAlignment(_)));
    }

    #[test]
    fn map_to_rejects_inverted_range() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(4);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        let err = desc
            .map_to(
                &mapper,
                &mut alloc,
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x4000),
                PhysicalAddress::new(0x2000),
                RW,
            )
            .unwrap_err();
        assert!(matches!(err, VmemError::InvalidRange { .. }));
    }

    #[test]
    fn map_range_maps_consecutive_pages() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(8);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        let va = VirtualAddress::new(0x10_0000);
        let pa = PhysicalAddress::new(0x50_0000);
        desc.map_range(&mapper, &mut alloc, va, pa, 3, RW).unwrap();

        for i in 0..3u64 {
            assert_eq!(
                desc.translate(&mapper, va + i * PAGE_SIZE),
                Some(pa + i * PAGE_SIZE)
            );
        }
        assert_eq!(desc.translate(&mapper, va + 3 * PAGE_SIZE), None);
    }

    #[test]
    fn map_known_regions_covers_low_memory_and_usable_ram() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(16);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        // One usable region with unaligned bounds, one reserved region.
        let mut bytes = 2u64.to_le_bytes().to_vec();
        for &(base, length, kind) in &[(0x20_0800u64, 0x2000u64, 1u32), (0x40_0000, 0x1000, 2)] {
            bytes.extend_from_slice(&base.to_le_bytes());
            bytes.extend_from_slice(&length.to_le_bytes());
            bytes.extend_from_slice(&kind.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        let memmap = MemoryMap::from_bytes(&bytes).unwrap();

        desc.map_known_regions(&mapper, &mut alloc, &memmap).unwrap();

        // First MiB is always identity mapped.
        let va = VirtualAddress::new(0x7000);
        assert_eq!(desc.translate(&mapper, va), Some(PhysicalAddress::new(0x7000)));
        // The usable region is mapped outward-aligned.
        assert_eq!(
            desc.translate(&mapper, VirtualAddress::new(0x20_0000)),
            Some(PhysicalAddress::new(0x20_0000))
        );
        assert_eq!(
            desc.translate(&mapper, VirtualAddress::new(0x20_2000)),
            Some(PhysicalAddress::new(0x20_2000))
        );
        // The reserved region is not.
        assert_eq!(desc.translate(&mapper, VirtualAddress::new(0x40_0000)), None);
    }

    #[test]
    fn destroy_returns_every_table_frame() {
        let mapper = IdentityPhysMapper;
        let mut alloc = pool(16);
        let desc = PagingDescriptor::new(4, &mapper, &mut alloc).unwrap();

        // Mappings in two distant VA subtrees force multiple table chains.
        desc.map(
            &mapper,
            &mut alloc,
            VirtualAddress::new(0x4000_0000),
            PhysicalAddress::new(0x10_0000),
            RW,
        )
        .unwrap();
        desc.map(
            &mapper,
            &mut alloc,
            VirtualAddress::new(0x0000_7F00_0000_0000),
            PhysicalAddress::new(0x20_0000),
            RW,
        )
        .unwrap();
        assert!(alloc.outstanding() > 1);

        desc.destroy(&mapper, &mut alloc);
        assert_eq!(alloc.outstanding(), 0);
    }
}
