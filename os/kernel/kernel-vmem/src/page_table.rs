use crate::page_entry::PageEntryBits;
use kernel_memory_addresses::VirtualAddress;

/// Entries per table at every level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// One 512-entry page table, page-sized and page-aligned so it occupies
/// exactly one frame. Used for all four levels.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Clear every entry to null.
    pub fn zero(&mut self) {
        for entry in &mut self.entries {
            *entry = PageEntryBits::new();
        }
    }

    #[inline]
    #[must_use]
    pub fn entry(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub fn set_entry(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    /// Iterate over all entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = PageEntryBits> + '_ {
        self.entries.iter().copied()
    }
}

/// Split a virtual address into its four table indices, root first:
/// `(PML4, PDPT, PD, PT)`, from bits 47–39, 38–30, 29–21 and 20–12.
#[inline]
#[must_use]
pub const fn table_indices(va: VirtualAddress) -> [usize; 4] {
    let raw = va.as_u64();
    [
        ((raw >> 39) & 0x1FF) as usize,
        ((raw >> 30) & 0x1FF) as usize,
        ((raw >> 21) & 0x1FF) as usize,
        ((raw >> 12) & 0x1FF) as usize,
    ]
}
