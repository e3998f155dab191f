use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{FrameAlloc, MapFlags, PAGE_SIZE, PagingDescriptor, PhysMapper, VmemError};

/// The multiheap's seam to the paging layer.
///
/// Implemented over a real address space by [`VmemPageMapper`]; tests may
/// substitute their own bookkeeping implementation.
pub trait PageMapper {
    /// Install or replace the mapping for one page.
    ///
    /// # Errors
    /// Propagates paging errors; see [`PagingDescriptor::map`].
    fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), VmemError>;

    /// Resolve `va` through the active tables, if mapped.
    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress>;

    /// Drop the mapping for one page. Later translations of `va` fail until
    /// it is mapped again.
    ///
    /// # Errors
    /// Propagates paging errors.
    fn unmap(&mut self, va: VirtualAddress) -> Result<(), VmemError> {
        self.map(va, PhysicalAddress::zero(), MapFlags::empty())
    }

    /// Pre-build page-table structure for `count` pages at `va` without
    /// making them present, so later [`map`](Self::map) calls over the range
    /// cannot fail for lack of table memory.
    ///
    /// # Errors
    /// Propagates paging errors.
    fn reserve(&mut self, va: VirtualAddress, count: u64) -> Result<(), VmemError> {
        for i in 0..count {
            self.map(va + i * PAGE_SIZE, PhysicalAddress::zero(), MapFlags::empty())?;
        }
        Ok(())
    }
}

/// [`PageMapper`] over a concrete address space: a [`PagingDescriptor`] plus
/// the [`PhysMapper`] and table-frame allocator it needs.
///
/// For consumers that own a descriptor outright, such as per-task address
/// spaces. The kernel facade keeps its descriptor, mapper and frame pool as
/// separate fields (it needs them individually for region mapping and CR3
/// switching) and implements [`PageMapper`] itself.
pub struct VmemPageMapper<M: PhysMapper, A: FrameAlloc> {
    desc: PagingDescriptor,
    phys: M,
    tables: A,
}

impl<M: PhysMapper, A: FrameAlloc> VmemPageMapper<M, A> {
    pub const fn new(desc: PagingDescriptor, phys: M, tables: A) -> Self {
        Self { desc, phys, tables }
    }

    /// The wrapped descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &PagingDescriptor {
        &self.desc
    }
}

impl<M: PhysMapper, A: FrameAlloc> PageMapper for VmemPageMapper<M, A> {
    fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        self.desc.map(&self.phys, &mut self.tables, va, pa, flags)
    }

    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.desc.translate(&self.phys, va)
    }
}
