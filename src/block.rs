//! Block metadata layer: boundary tags, flag bits, pointer conversions.
//!
//! A block is one header word, a payload region, and a footer word
//! holding an exact copy of the header. Block sizes are multiples of
//! the alignment unit, so the low bits of the tag are free for flags.
//! While a block is free, the first two payload words hold its
//! free-list links instead of user data.
//!
//! Everything here is a pure function over raw block pointers; the
//! higher layers never touch a tag directly.

use crate::config::{DWORD, WORD};

/// Tag bit 0: set iff the block is currently allocated.
pub const ALLOC: usize = 0x1;

/// Tag bit 1: reserved for a quick-list deferred-free flag. Always
/// clear today, but the coalescability tests already honour it.
pub const QUICK: usize = 0x2;

/// Mask covering every flag bit of a tag.
pub const FLAG_MASK: usize = 0x7;

/// In-memory layout of a block header and its free-list links.
///
/// `next` and `prev` are meaningful only while the block is free; an
/// allocated block's payload begins where `next` sits. The prologue and
/// epilogue sentinels are bare `tag` words — their links and footers
/// must never be touched.
#[repr(C)]
pub struct Block {
    pub(crate) tag: usize,
    pub(crate) next: *mut Block,
    pub(crate) prev: *mut Block,
}

/// Total byte size of the block.
#[inline]
pub unsafe fn size(b: *const Block) -> usize {
    unsafe { (*b).tag & !FLAG_MASK }
}

/// Bytes of the block usable by the caller.
#[inline]
pub unsafe fn user_size(b: *const Block) -> usize {
    unsafe { size(b) - DWORD }
}

#[inline]
pub unsafe fn is_alloc(b: *const Block) -> bool {
    unsafe { (*b).tag & ALLOC != 0 }
}

#[inline]
pub unsafe fn is_quick(b: *const Block) -> bool {
    unsafe { (*b).tag & QUICK != 0 }
}

/// Mark the block allocated and off any quick list.
#[inline]
pub unsafe fn mark_alloc(b: *mut Block) {
    unsafe { (*b).tag = ((*b).tag & !QUICK) | ALLOC }
}

/// Clear the allocated bit without touching anything else.
#[inline]
pub unsafe fn mark_free(b: *mut Block) {
    unsafe { (*b).tag &= !ALLOC }
}

#[inline]
pub unsafe fn mark_quick(b: *mut Block) {
    unsafe { (*b).tag |= QUICK }
}

#[inline]
pub unsafe fn mark_unquick(b: *mut Block) {
    unsafe { (*b).tag &= !QUICK }
}

/// The block's footer word.
#[inline]
pub unsafe fn footer_of(b: *mut Block) -> *mut usize {
    unsafe { (b as *mut u8).add(size(b) - WORD) as *mut usize }
}

/// Copy the header tag to the footer. Set flags before calling so they
/// reach the footer too. Forbidden on sentinels.
#[inline]
pub unsafe fn sync_footer(b: *mut Block) {
    unsafe { *footer_of(b) = (*b).tag }
}

/// Write a new size into the header, keeping the flags, then sync the
/// footer. Forbidden on sentinels.
#[inline]
pub unsafe fn set_size_and_sync(b: *mut Block, s: usize) {
    unsafe {
        (*b).tag = ((*b).tag & FLAG_MASK) | s;
        sync_footer(b);
    }
}

/// Write a brand-new tag for a block carved out of raw bytes: the given
/// size, no flags, footer synced.
#[inline]
pub unsafe fn init_block(b: *mut Block, s: usize) {
    unsafe {
        (*b).tag = s;
        sync_footer(b);
    }
}

/// Write a sentinel tag: allocated, size zero. Sentinels have no
/// footer, so nothing is copied.
#[inline]
pub unsafe fn set_boundary(b: *mut Block) {
    unsafe { (*b).tag = ALLOC }
}

/// The user pointer for a block: one word past the header.
#[inline]
pub unsafe fn user_of(b: *mut Block) -> *mut u8 {
    unsafe { (b as *mut u8).add(WORD) }
}

/// The block header behind a user pointer.
#[inline]
pub unsafe fn block_of(user: *mut u8) -> *mut Block {
    unsafe { user.sub(WORD) as *mut Block }
}

/// The next block in raw address order.
#[inline]
pub unsafe fn next_raw(b: *mut Block) -> *mut Block {
    unsafe { (b as *mut u8).add(size(b)) as *mut Block }
}

/// The footer of the block immediately below `b` in raw address order.
/// For the block right after the prologue this is the prologue's header,
/// which reads the same way.
#[inline]
unsafe fn prev_footer(b: *mut Block) -> *mut usize {
    unsafe { (b as *mut u8).sub(WORD) as *mut usize }
}

/// The previous block in raw address order, located through its footer.
#[inline]
pub unsafe fn prev_raw(b: *mut Block) -> *mut Block {
    unsafe { (b as *mut u8).sub(*prev_footer(b) & !FLAG_MASK) as *mut Block }
}

/// Whether the previous raw-order block can be merged into: both the
/// allocated and the quick bit of its footer must be clear.
#[inline]
pub unsafe fn prev_coalescable(b: *mut Block) -> bool {
    unsafe { *prev_footer(b) & (ALLOC | QUICK) == 0 }
}

/// Whether the next raw-order block can be merged into.
#[inline]
pub unsafe fn next_coalescable(b: *mut Block) -> bool {
    unsafe { (*next_raw(b)).tag & (ALLOC | QUICK) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ALIGNMENT, MIN_BLOCK};

    /// An aligned scratch region large enough for a few blocks.
    #[repr(align(16))]
    struct Scratch([u8; 256]);

    fn scratch() -> Scratch {
        Scratch([0; 256])
    }

    #[test]
    fn test_tag_flags_round_trip() {
        let mut buf = scratch();
        let b = buf.0.as_mut_ptr() as *mut Block;
        unsafe {
            init_block(b, 64);
            assert_eq!(size(b), 64);
            assert!(!is_alloc(b));
            assert!(!is_quick(b));

            mark_alloc(b);
            assert!(is_alloc(b));
            assert_eq!(size(b), 64);

            mark_quick(b);
            assert!(is_quick(b));
            mark_unquick(b);
            assert!(!is_quick(b));

            // mark_alloc clears the quick bit as a side effect
            mark_quick(b);
            mark_alloc(b);
            assert!(!is_quick(b));

            mark_free(b);
            assert!(!is_alloc(b));
        }
    }

    #[test]
    fn test_footer_mirrors_header() {
        let mut buf = scratch();
        let b = buf.0.as_mut_ptr() as *mut Block;
        unsafe {
            init_block(b, 48);
            mark_alloc(b);
            sync_footer(b);
            assert_eq!(*footer_of(b), (*b).tag);

            set_size_and_sync(b, 32);
            assert_eq!(size(b), 32);
            assert!(is_alloc(b), "flags survive a size rewrite");
            assert_eq!(*footer_of(b), (*b).tag);
        }
    }

    #[test]
    fn test_user_block_conversion() {
        let mut buf = scratch();
        let b = buf.0.as_mut_ptr() as *mut Block;
        unsafe {
            init_block(b, MIN_BLOCK);
            let u = user_of(b);
            assert_eq!(u as usize - b as usize, WORD);
            assert_eq!(block_of(u), b);
            assert_eq!(user_size(b), MIN_BLOCK - DWORD);
        }
    }

    #[test]
    fn test_raw_neighbour_walk() {
        let mut buf = scratch();
        let base = buf.0.as_mut_ptr();
        unsafe {
            // sentinel word, then two blocks back to back
            let sentinel = base as *mut Block;
            set_boundary(sentinel);
            let first = base.add(WORD) as *mut Block;
            init_block(first, 64);
            let second = next_raw(first);
            assert_eq!(second as usize, first as usize + 64);
            init_block(second, 32);

            assert_eq!(prev_raw(second), first);
            assert_eq!(next_raw(second) as usize, second as usize + 32);
        }
    }

    #[test]
    fn test_coalescability_masks_both_bits() {
        let mut buf = scratch();
        let base = buf.0.as_mut_ptr();
        unsafe {
            let first = base as *mut Block;
            init_block(first, 64);
            let second = next_raw(first);
            init_block(second, 64);

            assert!(prev_coalescable(second));
            assert!(next_coalescable(first));

            mark_quick(first);
            sync_footer(first);
            assert!(!prev_coalescable(second), "quick bit blocks merging");

            mark_unquick(first);
            mark_alloc(first);
            sync_footer(first);
            assert!(!prev_coalescable(second));
        }
    }

    #[test]
    fn test_sentinel_tag() {
        let mut buf = scratch();
        let b = buf.0.as_mut_ptr() as *mut Block;
        unsafe {
            set_boundary(b);
            assert!(is_alloc(b));
            assert!(!is_quick(b));
            assert_eq!(size(b), 0);
        }
    }

    #[test]
    fn test_alignment_of_user_pointer() {
        // A block header sits one word below an alignment boundary, so
        // the user pointer lands exactly on one.
        let mut buf = scratch();
        let base = buf.0.as_mut_ptr();
        unsafe {
            let b = base.add(WORD) as *mut Block;
            init_block(b, 32);
            assert_eq!(user_of(b) as usize % ALIGNMENT, 0);
        }
    }
}
