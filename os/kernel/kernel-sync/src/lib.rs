//! # Kernel synchronization primitives
//!
//! The allocator runs under a single logical thread of control (one core,
//! no preemption inside kernel code), so the lock here mostly documents
//! ownership of the global heap state rather than arbitrating real
//! contention. It is still a correct TATAS spin lock should a second
//! context ever appear.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
