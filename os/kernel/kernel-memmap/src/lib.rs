//! # Physical Memory Map (E820-style)
//!
//! The boot loader leaves a fixed-layout table in low memory describing the
//! machine's physical memory regions:
//!
//! ```text
//! +----------------------+--------------------------------------+
//! | entry count (u64 LE) | count x 24-byte records              |
//! +----------------------+--------------------------------------+
//!
//! record: | base_addr: u64 LE | length: u64 LE | type: u32 LE | attr: u32 LE |
//! ```
//!
//! `type == 1` marks a region the kernel may allocate from; every other type
//! is treated as reserved. The table is consumed once at kernel init to seed
//! the bootstrap heap and the multiheap's region registration, and by the
//! paging layer to identity-map usable memory.
//!
//! Records are decoded with explicit little-endian field reads — the layout
//! above is a wire contract with the boot loader, not a Rust struct layout.

#![cfg_attr(not(test), no_std)]

mod region;

pub use region::{MemoryRegion, RegionKind};

use kernel_memory_addresses::MemoryAddress;

/// Bytes of the leading entry-count field.
pub const HEADER_SIZE: usize = 8;

/// Bytes per packed region record.
pub const ENTRY_SIZE: usize = 24;

/// `type` value marking a region as allocatable RAM.
pub const REGION_TYPE_USABLE: u32 = 1;

/// Errors from decoding the boot loader's memory-map table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum MemoryMapError {
    /// The byte slice ends before the advertised number of records.
    #[error("memory map truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// A decoded view over the boot loader's memory-map table.
///
/// Borrows the raw record bytes; individual regions are decoded on access,
/// so the type is usable before any allocator exists.
#[derive(Copy, Clone)]
pub struct MemoryMap<'a> {
    records: &'a [u8],
    count: usize,
}

impl<'a> MemoryMap<'a> {
    /// Decode a table from `bytes` (count header followed by the records).
    ///
    /// # Errors
    /// [`MemoryMapError::Truncated`] if `bytes` is shorter than the header
    /// plus the advertised records.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, MemoryMapError> {
        if bytes.len() < HEADER_SIZE {
            return Err(MemoryMapError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&bytes[..HEADER_SIZE]);
        let count = usize::try_from(u64::from_le_bytes(header)).map_err(|_| {
            MemoryMapError::Truncated {
                expected: usize::MAX,
                actual: bytes.len(),
            }
        })?;

        let expected = HEADER_SIZE + count * ENTRY_SIZE;
        if bytes.len() < expected {
            return Err(MemoryMapError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        log::debug!("memory map: {count} regions");
        Ok(Self {
            records: &bytes[HEADER_SIZE..expected],
            count,
        })
    }

    /// Read the table the boot loader left at `addr`.
    ///
    /// # Safety
    /// `addr` must point at a well-formed table (count header plus records)
    /// that stays reachable and unmodified for `'a`.
    #[must_use]
    pub unsafe fn from_addr(addr: MemoryAddress) -> Self {
        let header = unsafe { core::ptr::read_unaligned(addr.as_mut_ptr::<[u8; HEADER_SIZE]>()) };
        #[allow(clippy::cast_possible_truncation)]
        let count = u64::from_le_bytes(header) as usize;
        let records = unsafe {
            core::slice::from_raw_parts(
                (addr + HEADER_SIZE as u64).as_mut_ptr::<u8>(),
                count * ENTRY_SIZE,
            )
        };
        Self { records, count }
    }

    /// Number of records in the table.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Decode the record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<MemoryRegion> {
        if index >= self.count {
            return None;
        }
        let start = index * ENTRY_SIZE;
        let mut record = [0u8; ENTRY_SIZE];
        record.copy_from_slice(&self.records[start..start + ENTRY_SIZE]);
        Some(MemoryRegion::decode(&record))
    }

    /// Iterate over all regions in table order.
    pub fn iter(&self) -> impl Iterator<Item = MemoryRegion> + '_ {
        (0..self.count).filter_map(|i| self.get(i))
    }

    /// Iterate over usable regions only, in table order.
    pub fn usable(&self) -> impl Iterator<Item = MemoryRegion> + '_ {
        self.iter().filter(MemoryRegion::is_usable)
    }

    /// Total bytes of usable RAM reported by the table.
    #[must_use]
    pub fn total_usable_bytes(&self) -> u64 {
        self.usable().map(|r| r.length).sum()
    }

    /// The single largest usable region, if any.
    #[must_use]
    pub fn largest_usable(&self) -> Option<MemoryRegion> {
        self.usable().max_by_key(|r| r.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_record(out: &mut Vec<u8>, base: u64, length: u64, kind: u32, attr: u32) {
        out.extend_from_slice(&base.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&attr.to_le_bytes());
    }

    fn table(records: &[(u64, u64, u32, u32)]) -> Vec<u8> {
        let mut bytes = (records.len() as u64).to_le_bytes().to_vec();
        for &(base, length, kind, attr) in records {
            push_record(&mut bytes, base, length, kind, attr);
        }
        bytes
    }

    #[test]
    fn decodes_regions_in_order() {
        let bytes = table(&[
            (0x0, 0x9_fc00, 1, 0),
            (0x9_fc00, 0x400, 2, 0),
            (0x10_0000, 0x3ff_0000, 1, 1),
        ]);
        let map = MemoryMap::from_bytes(&bytes).unwrap();

        assert_eq!(map.len(), 3);
        let second = map.get(1).unwrap();
        assert_eq!(second.base.as_u64(), 0x9_fc00);
        assert_eq!(second.length, 0x400);
        assert_eq!(second.kind, RegionKind::Reserved);
        let third = map.get(2).unwrap();
        assert_eq!(third.kind, RegionKind::Usable);
        assert_eq!(third.attr, 1);
        assert_eq!(third.end().as_u64(), 0x40f_0000);
    }

    #[test]
    fn rejects_truncated_table() {
        let mut bytes = table(&[(0, 0x1000, 1, 0)]);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            MemoryMap::from_bytes(&bytes),
            Err(MemoryMapError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_short_header() {
        assert!(MemoryMap::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn usable_iteration_skips_reserved() {
        let bytes = table(&[
            (0x0, 0x8000, 2, 0),
            (0x1_0000, 0x4000, 1, 0),
            (0x8_0000, 0x2000, 3, 0),
            (0x10_0000, 0x8000, 1, 0),
        ]);
        let map = MemoryMap::from_bytes(&bytes).unwrap();

        let usable: Vec<_> = map.usable().map(|r| r.base.as_u64()).collect();
        assert_eq!(usable, vec![0x1_0000, 0x10_0000]);
        assert_eq!(map.total_usable_bytes(), 0x4000 + 0x8000);
        assert_eq!(map.largest_usable().unwrap().base.as_u64(), 0x10_0000);
    }

    #[test]
    fn empty_table_is_empty() {
        let bytes = table(&[]);
        let map = MemoryMap::from_bytes(&bytes).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.total_usable_bytes(), 0);
        assert!(map.largest_usable().is_none());
    }

    #[test]
    fn from_addr_matches_from_bytes() {
        let bytes = table(&[(0x10_0000, 0x10_0000, 1, 0)]);
        let map = unsafe { MemoryMap::from_addr(MemoryAddress::from_ptr(bytes.as_ptr())) };
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(0).unwrap().base.as_u64(), 0x10_0000);
    }
}
