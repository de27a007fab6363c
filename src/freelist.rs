//! The segregated free-list set.
//!
//! Seventy-five doubly linked LIFO lists indexed by size class, with
//! the unsorted list at index 0. Which list a block is on is not
//! tracked per block: a block can only ever head the unsorted list or
//! the list for its own size class, and a non-head block unlinks
//! through its neighbours alone, so checking the two candidate heads is
//! enough to remove a block from whichever list holds it.

use core::ptr;

use crate::block::{self, Block};
use crate::config::{LIST_COUNT, UNSORTED};
use crate::size_class::index_for;

/// The array of free-list heads.
pub(crate) struct FreeLists {
    heads: [*mut Block; LIST_COUNT],
}

impl FreeLists {
    pub(crate) const fn new() -> Self {
        Self {
            heads: [ptr::null_mut(); LIST_COUNT],
        }
    }

    /// Head of the list at `index`, null when the list is empty.
    #[inline]
    pub(crate) fn head(&self, index: usize) -> *mut Block {
        self.heads[index]
    }

    /// Prepend `b` to the unsorted list, or to its size class when
    /// `unsorted` is false.
    ///
    /// Clears both flag bits and syncs the footer first; this is the
    /// one place a block transitions to the free state.
    ///
    /// # Safety
    /// `b` must be a valid non-sentinel block that is not on any list.
    pub(crate) unsafe fn insert(&mut self, b: *mut Block, unsorted: bool) {
        unsafe {
            let index = if unsorted {
                UNSORTED
            } else {
                index_for(block::size(b))
            };

            block::mark_free(b);
            block::mark_unquick(b);
            block::sync_footer(b);

            let head = self.heads[index];
            (*b).next = head;
            (*b).prev = ptr::null_mut();
            if !head.is_null() {
                (*head).prev = b;
            }
            self.heads[index] = b;
        }
    }

    /// Unlink `b` from whichever list holds it, then mark it allocated
    /// and uncoalescable with a synced footer.
    ///
    /// # Safety
    /// `b` must currently be on exactly one list.
    pub(crate) unsafe fn remove(&mut self, b: *mut Block) {
        unsafe {
            let class_index = index_for(block::size(b));

            if self.heads[class_index] == b || self.heads[UNSORTED] == b {
                let index = if self.heads[class_index] == b {
                    class_index
                } else {
                    UNSORTED
                };
                self.heads[index] = (*b).next;
                if !self.heads[index].is_null() {
                    (*self.heads[index]).prev = ptr::null_mut();
                }
            } else {
                // not a head, so a predecessor exists
                (*(*b).prev).next = (*b).next;
            }
            if !(*b).next.is_null() {
                (*(*b).next).prev = (*b).prev;
            }

            block::mark_alloc(b);
            block::sync_footer(b);
        }
    }
}
