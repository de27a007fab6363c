//! Allocator layout constants and alignment arithmetic.

/// Size of a single machine word, the width of one boundary tag.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Size of a double word.
pub const DWORD: usize = 2 * WORD;

/// Alignment unit. Every user pointer and every block size is a
/// multiple of this.
pub const ALIGNMENT: usize = DWORD;

/// Per-block overhead: one header word plus one footer word.
pub const OVERHEAD: usize = DWORD;

/// Minimum block size: header, two free-list link words, footer.
pub const MIN_BLOCK: usize = 2 * DWORD;

/// Largest block size served by the exact-size small lists.
pub const MAX_SMALL: usize = 504;

/// Number of free lists, including the unsorted list.
pub const LIST_COUNT: usize = 75;

/// Index of the unsorted list.
pub const UNSORTED: usize = 0;

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Check if `value` is a multiple of `align`.
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}
