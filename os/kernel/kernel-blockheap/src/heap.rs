use crate::{BLOCK_SIZE, BlockEntry, BlockHeapError, BlockTable};
use kernel_memory_addresses::MemoryAddress;

/// Fixed-block first-fit allocator over `[start, end)`.
///
/// See the crate docs for the run model. The heap only mutates its block
/// table; the managed range is never read or written.
#[derive(Debug)]
pub struct BlockHeap {
    start: MemoryAddress,
    end: MemoryAddress,
    table: BlockTable,
}

impl BlockHeap {
    /// Create a heap over `[start, end)` with the given table storage.
    ///
    /// Resets the table, so every block starts out free.
    ///
    /// # Errors
    /// - [`BlockHeapError::InvalidRange`] if the range is empty, inverted,
    ///   or either bound is not block-aligned.
    /// - [`BlockHeapError::TableSizeMismatch`] if the table does not hold
    ///   exactly one entry per block.
    pub fn create(
        start: MemoryAddress,
        end: MemoryAddress,
        mut table: BlockTable,
    ) -> Result<Self, BlockHeapError> {
        if start >= end
            || !start.is_aligned_to(BLOCK_SIZE)
            || !end.is_aligned_to(BLOCK_SIZE)
        {
            return Err(BlockHeapError::InvalidRange(start, end));
        }

        #[allow(clippy::cast_possible_truncation)]
        let blocks = ((end - start) / BLOCK_SIZE) as usize;
        if table.total() != blocks {
            return Err(BlockHeapError::TableSizeMismatch {
                expected: blocks,
                actual: table.total(),
            });
        }

        table.clear();
        Ok(Self { start, end, table })
    }

    /// First byte of the managed range.
    #[must_use]
    pub const fn start(&self) -> MemoryAddress {
        self.start
    }

    /// One past the last byte of the managed range.
    #[must_use]
    pub const fn end(&self) -> MemoryAddress {
        self.end
    }

    /// Whether `addr` falls inside the managed range.
    #[must_use]
    pub fn contains(&self, addr: MemoryAddress) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Number of blocks in the managed range.
    #[must_use]
    pub const fn total_blocks(&self) -> usize {
        self.table.total()
    }

    /// Number of currently free blocks.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        (0..self.table.total())
            .filter(|&i| self.table.get(i) == BlockEntry::Free)
            .count()
    }

    /// Number of currently allocated blocks.
    #[must_use]
    pub fn used_blocks(&self) -> usize {
        self.total_blocks() - self.free_blocks()
    }

    /// Allocate `size` bytes, rounded up to whole blocks.
    ///
    /// First-fit: the lowest-addressed free run long enough wins. Returns
    /// `None` when no such run exists — callers fall through to other heaps
    /// or to the defragmentation path.
    pub fn allocate(&mut self, size: u64) -> Option<MemoryAddress> {
        if size == 0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let want = size.div_ceil(BLOCK_SIZE) as usize;
        if want > self.table.total() {
            return None;
        }

        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for i in 0..self.table.total() {
            if self.table.get(i) == BlockEntry::Free {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len == want {
                    return Some(self.claim(run_start, want));
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    /// Free the allocation run starting at `addr`, returning its length in
    /// blocks.
    ///
    /// # Errors
    /// - [`BlockHeapError::OutOfRange`] if `addr` lies outside the heap.
    /// - [`BlockHeapError::NotRunStart`] if `addr` does not point at the
    ///   `First` block of a live run.
    pub fn free(&mut self, addr: MemoryAddress) -> Result<u64, BlockHeapError> {
        let index = self
            .block_index(addr)
            .ok_or(BlockHeapError::OutOfRange(addr))?;
        if addr != self.block_address(index) {
            log::warn!("block heap: free of unaligned address {addr}");
            return Err(BlockHeapError::NotRunStart(addr));
        }

        match self.table.get(index) {
            BlockEntry::First { run } => {
                for i in index..index + run as usize {
                    self.table.set(i, BlockEntry::Free);
                }
                Ok(u64::from(run))
            }
            _ => {
                log::warn!("block heap: free of {addr} which does not start a run");
                Err(BlockHeapError::NotRunStart(addr))
            }
        }
    }

    /// Length in blocks of the run starting at `addr`, or `None` if `addr`
    /// does not start a live run.
    #[must_use]
    pub fn allocation_block_count(&self, addr: MemoryAddress) -> Option<u64> {
        let index = self.block_index(addr)?;
        if addr != self.block_address(index) {
            return None;
        }
        match self.table.get(index) {
            BlockEntry::First { run } => Some(u64::from(run)),
            _ => None,
        }
    }

    /// Length in bytes of the run starting at `addr`.
    #[must_use]
    pub fn allocation_byte_count(&self, addr: MemoryAddress) -> Option<u64> {
        self.allocation_block_count(addr).map(|b| b * BLOCK_SIZE)
    }

    /// Index of the block containing `addr`, or `None` if out of range.
    #[must_use]
    pub fn block_index(&self, addr: MemoryAddress) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        Some(((addr - self.start) / BLOCK_SIZE) as usize)
    }

    /// Address of the block at `index`.
    ///
    /// # Panics
    /// Panics (debug) if `index` is out of bounds.
    #[must_use]
    pub fn block_address(&self, index: usize) -> MemoryAddress {
        debug_assert!(index < self.table.total());
        self.start + index as u64 * BLOCK_SIZE
    }

    fn claim(&mut self, run_start: usize, want: usize) -> MemoryAddress {
        #[allow(clippy::cast_possible_truncation)]
        self.table.set(run_start, BlockEntry::First { run: want as u32 });
        for i in run_start + 1..run_start + want {
            self.table.set(i, BlockEntry::Node);
        }
        self.block_address(run_start)
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, index: usize) -> BlockEntry {
        self.table.get(index)
    }
}
