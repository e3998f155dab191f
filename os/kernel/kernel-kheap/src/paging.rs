use kernel_memmap::MemoryMap;
use kernel_multiheap::PageMapper;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{IdentityPhysMapper, MapFlags, PagingDescriptor, PoolFrameAlloc, VmemError};

/// The kernel's own address space: a level-4 descriptor, the identity
/// mapper (all kernel-visible RAM is identity-mapped), and a dedicated
/// frame pool for table memory.
pub struct KernelPaging {
    desc: PagingDescriptor,
    phys: IdentityPhysMapper,
    frames: PoolFrameAlloc,
}

impl KernelPaging {
    /// Build an empty kernel address space drawing table frames from
    /// `frames`.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if even the root table cannot be
    /// allocated.
    pub fn new(mut frames: PoolFrameAlloc) -> Result<Self, VmemError> {
        let phys = IdentityPhysMapper;
        let desc = PagingDescriptor::new(4, &phys, &mut frames)?;
        Ok(Self { desc, phys, frames })
    }

    /// Identity-map the first MiB plus every usable region of `memmap`.
    ///
    /// # Errors
    /// Propagates mapping failures; see [`PagingDescriptor::map_known_regions`].
    pub fn map_known_regions(&mut self, memmap: &MemoryMap<'_>) -> Result<(), VmemError> {
        self.desc.map_known_regions(&self.phys, &mut self.frames, memmap)
    }

    /// Load this address space into CR3.
    ///
    /// # Safety
    /// The space must map the currently executing code, data and stack;
    /// call only after [`map_known_regions`](Self::map_known_regions).
    pub unsafe fn switch(&self) {
        unsafe { self.desc.switch() }
    }

    /// The underlying descriptor, for task-subsystem consumers.
    #[must_use]
    pub const fn descriptor(&self) -> &PagingDescriptor {
        &self.desc
    }
}

impl PageMapper for KernelPaging {
    fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        self.desc.map(&self.phys, &mut self.frames, va, pa, flags)
    }

    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.desc.translate(&self.phys, va)
    }
}
