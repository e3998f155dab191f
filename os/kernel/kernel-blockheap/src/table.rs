/// Per-block bookkeeping record.
///
/// Every allocation is a *run*: one `First` entry carrying the run length,
/// followed by `run - 1` `Node` entries. Free blocks carry no run metadata.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockEntry {
    /// Block is available.
    Free,
    /// First block of an allocation spanning `run` blocks (including this one).
    First { run: u32 },
    /// Continuation block of a preceding `First`.
    Node,
}

/// Storage for a heap's block entries.
///
/// Wraps raw storage because the table itself is often carved out of another
/// heap (the multiheap does this for every registered region) or placed at a
/// fixed boot-time address, neither of which can be expressed as an owned
/// Rust allocation.
#[derive(Debug)]
pub struct BlockTable {
    entries: *mut BlockEntry,
    total: usize,
}

// Safety: the table is plain data; exclusive access is enforced by whoever
// owns the containing heap (single thread of control, or the facade's lock).
unsafe impl Send for BlockTable {}

impl BlockTable {
    /// Wrap a static slice as table storage.
    #[must_use]
    pub fn from_slice(entries: &'static mut [BlockEntry]) -> Self {
        Self {
            entries: entries.as_mut_ptr(),
            total: entries.len(),
        }
    }

    /// Wrap raw storage for `total` entries.
    ///
    /// # Safety
    /// `entries` must point at writable memory for `total` `BlockEntry`
    /// values, exclusive to this table for its lifetime. The storage need
    /// not be initialized; [`BlockHeap::create`](crate::BlockHeap::create)
    /// resets every entry.
    #[must_use]
    pub const unsafe fn from_raw(entries: *mut BlockEntry, total: usize) -> Self {
        Self { entries, total }
    }

    /// Number of entries (= number of blocks in the heap range).
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> BlockEntry {
        debug_assert!(index < self.total);
        unsafe { *self.entries.add(index) }
    }

    #[inline]
    pub(crate) fn set(&mut self, index: usize, entry: BlockEntry) {
        debug_assert!(index < self.total);
        unsafe {
            *self.entries.add(index) = entry;
        }
    }

    /// Reset every entry to [`BlockEntry::Free`].
    pub(crate) fn clear(&mut self) {
        for i in 0..self.total {
            self.set(i, BlockEntry::Free);
        }
    }
}
