use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// One 64-bit page-table entry.
///
/// The same layout is used at all four levels: at PML4/PDPT/PD an entry
/// points to the next-level table, at PT it maps a 4 KiB frame. An entry is
/// *null* iff its raw value is zero.
///
/// ### Bit layout
///
/// | Bits  | Name              | Meaning |
/// |-------|-------------------|---------|
/// | 0     | `P` (present)     | Valid entry if set |
/// | 1     | `RW`              | Writable if set |
/// | 2     | `US`              | User-mode accessible if set |
/// | 3     | `PWT`             | Write-through caching |
/// | 4     | `PCD`             | Disable caching |
/// | 5     | `A`               | Accessed (set by the CPU) |
/// | 6–11  | ignored/reserved  | Unused here; PS must stay 0 (4 KiB only) |
/// | 12–51 | `frame`           | Physical frame number (address bits 51:12) |
/// | 52–62 | OS available      | Free for OS bookkeeping |
/// | 63    | `NX`              | Execute disable |
///
/// The accessors generated by [`bitfield_struct`] compile to explicit shifts
/// and masks, so the layout above is guaranteed regardless of target ABI.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageEntryBits {
    /// Present (P, bit 0). Clear entries fault on access.
    pub present: bool,

    /// Writable (RW, bit 1). Clear for read-only.
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Clear restricts to supervisor mode.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Bits 6–11: dirty/PS/global and reserved bits, all unused with
    /// 4 KiB-only mappings.
    #[bits(6)]
    __: u8,

    /// Physical frame number (bits 12–51): the mapped frame's address with
    /// its 12 alignment zeros dropped.
    #[bits(40)]
    pub frame: u64,

    /// Bits 52–62, available to the OS.
    #[bits(11)]
    pub available: u16,

    /// Execute disable (NX, bit 63).
    pub execute_disable: bool,
}

impl PageEntryBits {
    /// Whether every field is zero. Null entries terminate table walks.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.into_bits() == 0
    }

    /// The physical address this entry points at (next table or frame).
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << 12)
    }

    /// Point this entry at `pa` (must be page-aligned).
    #[inline]
    pub fn set_physical_address(&mut self, pa: PhysicalAddress) {
        debug_assert!(pa.as_u64() & 0xFFF == 0, "frame address not page aligned");
        self.set_frame(pa.as_u64() >> 12);
    }
}
