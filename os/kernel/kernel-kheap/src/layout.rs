//! Fixed boot-time memory layout.
//!
//! These addresses are a contract with the boot loader: the memory map and
//! the bootstrap heap's block table live below the kernel image, the heap
//! itself at 16 MiB. All of them exist before any allocator does.

use kernel_blockheap::BLOCK_SIZE;
use kernel_memory_addresses::MemoryAddress;

/// Where the boot loader leaves the E820-style memory map.
pub const MEMORY_MAP_ADDRESS: MemoryAddress = MemoryAddress::new(0x6000);

/// Block-table storage for the bootstrap heap. Grows upward with one entry
/// per bootstrap block.
pub const BOOTSTRAP_TABLE_ADDRESS: MemoryAddress = MemoryAddress::new(0x7E00);

/// First byte of the bootstrap heap's managed range.
pub const BOOTSTRAP_HEAP_ADDRESS: MemoryAddress = MemoryAddress::new(0x0100_0000);

/// Smallest usable region the bootstrap heap accepts. Boot fails below this.
pub const MIN_BOOTSTRAP_BYTES: u64 = 4 * 1024 * 1024;

/// Frames set aside for the kernel's page tables, carved from the bootstrap
/// heap before paging is enabled (256 frames = 1 MiB of tables).
pub const PAGE_TABLE_POOL_FRAMES: u64 = 256;

const _: () = assert!(BOOTSTRAP_HEAP_ADDRESS.as_u64() % BLOCK_SIZE == 0);
const _: () = assert!(MIN_BOOTSTRAP_BYTES % BLOCK_SIZE == 0);
const _: () = assert!(PAGE_TABLE_POOL_FRAMES * BLOCK_SIZE <= MIN_BOOTSTRAP_BYTES);
