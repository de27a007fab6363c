//! Error types for the allocator.

use core::fmt;

/// Errors surfaced by allocation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The OS refused to grow the heap, or a size computation overflowed.
    OutOfMemory,
    /// A pointer handed back to the allocator failed validation.
    InvalidPointer,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidPointer => write!(f, "invalid pointer"),
        }
    }
}

/// Record `err` in the calling thread's `errno` slot.
#[cfg(unix)]
pub(crate) fn report(err: AllocError) {
    #[cfg(target_os = "linux")]
    {
        let code = match err {
            AllocError::OutOfMemory => libc::ENOMEM,
            AllocError::InvalidPointer => libc::EINVAL,
        };
        // SAFETY: __errno_location returns a valid pointer to this
        // thread's errno.
        unsafe { *libc::__errno_location() = code };
    }
    #[cfg(not(target_os = "linux"))]
    let _ = err;
}
