use crate::{ENTRY_SIZE, REGION_TYPE_USABLE};
use kernel_memory_addresses::{MemoryAddress, PhysicalAddress};

/// Classification of a physical memory region.
///
/// The firmware distinguishes several reserved flavors (ACPI data, NVS,
/// bad RAM); the allocator only cares whether it may touch the range, so
/// everything that is not plain usable RAM collapses to [`Reserved`](Self::Reserved).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionKind {
    /// Allocatable RAM (`type == 1`).
    Usable,
    /// Anything else; the allocator must never touch it.
    Reserved,
}

impl RegionKind {
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        if raw == REGION_TYPE_USABLE {
            Self::Usable
        } else {
            Self::Reserved
        }
    }
}

/// One record of the boot loader's memory map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    /// First byte of the region.
    pub base: PhysicalAddress,
    /// Length in bytes.
    pub length: u64,
    /// Usability classification.
    pub kind: RegionKind,
    /// Extended attribute bits, passed through from the firmware.
    pub attr: u32,
}

impl MemoryRegion {
    /// Decode one packed 24-byte record (all fields little-endian).
    #[must_use]
    pub fn decode(record: &[u8; ENTRY_SIZE]) -> Self {
        let mut u64_field = [0u8; 8];
        let mut u32_field = [0u8; 4];

        u64_field.copy_from_slice(&record[0..8]);
        let base = u64::from_le_bytes(u64_field);
        u64_field.copy_from_slice(&record[8..16]);
        let length = u64::from_le_bytes(u64_field);
        u32_field.copy_from_slice(&record[16..20]);
        let raw_kind = u32::from_le_bytes(u32_field);
        u32_field.copy_from_slice(&record[20..24]);
        let attr = u32::from_le_bytes(u32_field);

        Self {
            base: PhysicalAddress::new(base),
            length,
            kind: RegionKind::from_raw(raw_kind),
            attr,
        }
    }

    /// One past the last byte of the region.
    #[must_use]
    pub fn end(&self) -> MemoryAddress {
        self.base.as_addr() + self.length
    }

    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.kind == RegionKind::Usable
    }

    /// Whether `addr` falls inside this region.
    #[must_use]
    pub fn contains(&self, addr: MemoryAddress) -> bool {
        addr >= self.base.as_addr() && addr < self.end()
    }
}
