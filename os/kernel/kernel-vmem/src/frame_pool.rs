use crate::{FrameAlloc, PAGE_SIZE, PhysMapper};
use kernel_memory_addresses::PhysicalAddress;

/// Intrusive free-list node written into the first bytes of a freed frame.
struct FreeFrame {
    next: *mut FreeFrame,
}

/// Frame allocator over one physical range, with frame reuse.
///
/// Hands out frames bump-style from `[next, end)` and recycles freed frames
/// through an intrusive list threaded through the frames themselves. This
/// requires the pool's range to be dereferenceable at its physical address
/// (identity-mapped RAM, or a host-test buffer) — the same precondition as
/// [`IdentityPhysMapper`].
pub struct PoolFrameAlloc {
    next: u64,
    end: u64,
    free_head: *mut FreeFrame,
    outstanding: usize,
}

// Safety: raw pointers only reference the pool's own range; access is
// serialized by the owner.
unsafe impl Send for PoolFrameAlloc {}

impl PoolFrameAlloc {
    /// Create a pool over `[start, end)`. Both bounds must be page-aligned.
    #[must_use]
    pub fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        debug_assert!(start.as_u64() % PAGE_SIZE == 0);
        debug_assert!(end.as_u64() % PAGE_SIZE == 0);
        Self {
            next: start.as_u64(),
            end: end.as_u64(),
            free_head: core::ptr::null_mut(),
            outstanding: 0,
        }
    }

    /// Number of frames currently handed out and not yet returned.
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }
}

impl FrameAlloc for PoolFrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        if !self.free_head.is_null() {
            let frame = self.free_head;
            self.free_head = unsafe { (*frame).next };
            self.outstanding += 1;
            return Some(PhysicalAddress::new(frame as u64));
        }
        if self.next + PAGE_SIZE > self.end {
            log::warn!("frame pool exhausted at 0x{:X}", self.next);
            return None;
        }
        let frame = self.next;
        self.next += PAGE_SIZE;
        self.outstanding += 1;
        Some(PhysicalAddress::new(frame))
    }

    fn free_4k(&mut self, frame: PhysicalAddress) {
        debug_assert!(frame.as_u64() % PAGE_SIZE == 0);
        let node = frame.as_addr().as_mut_ptr::<FreeFrame>();
        unsafe {
            (*node).next = self.free_head;
        }
        self.free_head = node;
        self.outstanding -= 1;
    }
}

/// [`PhysMapper`] for identity-mapped memory: the physical address *is* the
/// pointer. Holds in this kernel (all RAM identity-mapped via
/// `map_known_regions`) and in host tests where "physical" addresses are
/// real buffer addresses.
#[derive(Copy, Clone, Default)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *pa.as_addr().as_mut_ptr::<T>() }
    }
}
