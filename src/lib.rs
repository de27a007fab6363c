//! Segregated free-list heap allocator over the program break.
//!
//! A drop-in engine for the platform `malloc` family in a
//! single-threaded process. Address space comes from the OS through an
//! sbrk-style break source in monotonically growing chunks and is
//! carved into boundary-tagged blocks. Freed and split-off blocks park
//! on an *unsorted* list first and are only classified into one of 74
//! segregated size classes once a search has passed them over, so hot
//! reallocation stays cheap and coalescing is deferred to the moment a
//! block is actually wanted.
//!
//! # Layout
//!
//! - Exact-size classes, one per alignment step, up to 504 bytes
//! - Power-of-two classes from 512 bytes, everything past 1 MiB shared
//! - Every block carries its header replicated as a footer, making
//!   both-direction coalescing O(1)
//!
//! # Usage
//!
//! The engine lives in [`Arena`], generic over its [`BreakSource`], and
//! a process-global arena over the real break backs the crate-level
//! entry points:
//!
//! ```ignore
//! let p = unsafe { segmalloc::allocate(64) };
//! if !p.is_null() {
//!     unsafe { segmalloc::release(p) };
//! }
//! ```
//!
//! The entry points are `unsafe`: the allocator is deliberately
//! single-threaded and nothing in it synchronises. Callers must keep
//! every operation on one thread.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod arena;
pub mod block;
pub mod config;
pub mod error;
pub mod size_class;
pub mod traits;

mod allocator;
mod freelist;

#[cfg(feature = "stats")]
pub mod stats;

pub use arena::Arena;
pub use error::AllocError;
pub use traits::{BreakSource, SourceExhausted};

#[cfg(unix)]
pub use traits::SystemBreak;

/// The process-global arena over the system break.
#[cfg(unix)]
struct GlobalArena(core::cell::UnsafeCell<Arena<SystemBreak>>);

// SAFETY: the crate's contract is single-threaded use; every entry
// point below is unsafe and requires it.
#[cfg(unix)]
unsafe impl Sync for GlobalArena {}

#[cfg(unix)]
static GLOBAL: GlobalArena = GlobalArena(core::cell::UnsafeCell::new(Arena::new(SystemBreak)));

#[cfg(unix)]
unsafe fn global() -> &'static mut Arena<SystemBreak> {
    // SAFETY: single-threaded contract, so no aliasing mutable access
    unsafe { &mut *GLOBAL.0.get() }
}

/// Allocate `size` bytes from the process arena.
///
/// Returns null for a zero request. On failure, returns null and
/// records out-of-memory in the thread's error slot.
///
/// # Safety
/// The process arena is single-threaded: no other thread may be inside
/// any entry point of this crate at the same time.
#[cfg(unix)]
pub unsafe fn allocate(size: usize) -> *mut u8 {
    // SAFETY: forwarded caller contract
    match unsafe { global() }.allocate(size) {
        Ok(ptr) => ptr,
        Err(err) => {
            error::report(err);
            core::ptr::null_mut()
        }
    }
}

/// Release a pointer previously returned by an entry point of this
/// crate. Null is a no-op.
///
/// # Safety
/// Single-threaded contract as for [`allocate`]; `ptr` must be null or
/// a live pointer from this arena.
#[cfg(unix)]
pub unsafe fn release(ptr: *mut u8) {
    // SAFETY: forwarded caller contract
    unsafe { global().release(ptr) }
}

/// Allocate a zeroed region for `count` items of `size` bytes each.
///
/// Returns null when the total overflows or memory is exhausted, and
/// records out-of-memory in the thread's error slot.
///
/// # Safety
/// Single-threaded contract as for [`allocate`].
#[cfg(unix)]
pub unsafe fn zeroed_allocate(count: usize, size: usize) -> *mut u8 {
    // SAFETY: forwarded caller contract
    match unsafe { global() }.zeroed_allocate(count, size) {
        Ok(ptr) => ptr,
        Err(err) => {
            error::report(err);
            core::ptr::null_mut()
        }
    }
}

/// Resize `ptr` to `new_size` bytes, in place when possible.
///
/// Null `ptr` behaves like [`allocate`]; zero `new_size` releases `ptr`
/// and returns null. On failure, returns null, records out-of-memory,
/// and leaves `ptr` valid.
///
/// # Safety
/// Single-threaded contract as for [`allocate`]; `ptr` must be null or
/// a live pointer from this arena.
#[cfg(unix)]
pub unsafe fn resize(ptr: *mut u8, new_size: usize) -> *mut u8 {
    // SAFETY: forwarded caller contract
    match unsafe { global().resize(ptr, new_size) } {
        Ok(out) => out,
        Err(err) => {
            error::report(err);
            core::ptr::null_mut()
        }
    }
}

/// Usable payload bytes behind a live pointer from this arena. Null
/// gives zero.
///
/// # Safety
/// Single-threaded contract as for [`allocate`]; `ptr` must be null or
/// a live pointer from this arena.
#[cfg(unix)]
pub unsafe fn usable_size(ptr: *mut u8) -> usize {
    // SAFETY: forwarded caller contract
    unsafe { global().usable_size(ptr) }
}
