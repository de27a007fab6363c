//! Allocation policy engine.
//!
//! Find-fit, split, coalesce, and heap-growth policy layered over the
//! arena and the free-list set. The search drains the unsorted list
//! first, coalescing blocks as they come off and refiling the ones that
//! do not fit, then falls back to segregated fit from the smallest
//! adequate class upwards. Split remainders go back to the unsorted
//! list: their future is unknown, and classifying them now would be
//! wasted work if the next operation merges them into a neighbour.

use core::cmp;
use core::ptr;

use crate::arena::Arena;
use crate::block::{self, Block};
use crate::config::{ALIGNMENT, LIST_COUNT, MAX_SMALL, MIN_BLOCK, OVERHEAD, UNSORTED};
use crate::error::AllocError;
use crate::size_class::index_for;
use crate::traits::BreakSource;

#[cfg(any(debug_assertions, feature = "debug-validate"))]
use crate::config::{WORD, is_aligned};

/// Block size needed to serve a user request: header and footer added,
/// rounded up to the alignment unit. `None` when the arithmetic
/// overflows.
fn padded(request: usize) -> Option<usize> {
    let raw = request.checked_add(OVERHEAD)?.checked_add(ALIGNMENT - 1)?;
    Some(raw & !(ALIGNMENT - 1))
}

impl<S: BreakSource> Arena<S> {
    /// Allocate `request` bytes, returning an aligned user pointer.
    ///
    /// `Ok(null)` for a zero request; `Err(OutOfMemory)` when the
    /// request cannot be represented as a block size or the break
    /// source refuses to grow.
    pub fn allocate(&mut self, request: usize) -> Result<*mut u8, AllocError> {
        self.initialise()?;
        if request == 0 {
            return Ok(ptr::null_mut());
        }
        let need = padded(request).ok_or(AllocError::OutOfMemory)?;

        // SAFETY: the arena is initialised; every block touched below
        // comes from the lists or the raw walk and is live arena
        // memory.
        unsafe {
            let b = match self.find_block(need) {
                Some(found) => found,
                None => {
                    let tail = block::prev_raw(self.epilogue);
                    if !block::is_alloc(tail) {
                        // grow the trailing free block instead of
                        // making a whole new one
                        self.extend_heap(need - block::size(tail))?;
                        self.lists.remove(tail);
                        block::set_size_and_sync(tail, need);
                        tail
                    } else {
                        self.extend_heap(need)?
                    }
                }
            };

            if !block::is_alloc(b) {
                // came off a free list rather than fresh heap
                self.lists.remove(b);
            }
            self.split(b, need);

            #[cfg(feature = "stats")]
            {
                self.stats.total_allocs += 1;
                self.stats.live_bytes += block::size(b);
                self.stats.update_peak();
            }

            Ok(block::user_of(b))
        }
    }

    /// Release a user pointer back to the arena.
    ///
    /// Null is a no-op. The freed block is coalesced with its
    /// neighbours and parked on the unsorted list.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer obtained from this arena that
    /// has not been released since.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if self.initialise().is_err() {
            return;
        }

        #[cfg(any(debug_assertions, feature = "debug-validate"))]
        {
            if self.validate_release(ptr).is_err() {
                return;
            }
        }

        // SAFETY: ptr came from this arena, so its block header and
        // neighbour tags are valid.
        unsafe {
            #[cfg(feature = "stats")]
            {
                self.stats.total_frees += 1;
                self.stats.live_bytes -= block::size(block::block_of(ptr));
            }

            let b = self.coalesce(block::block_of(ptr));
            self.lists.insert(b, true);
        }
    }

    /// Allocate a zeroed region for `count` items of `size` bytes.
    pub fn zeroed_allocate(&mut self, count: usize, size: usize) -> Result<*mut u8, AllocError> {
        if size != 0 && count > usize::MAX / size {
            return Err(AllocError::OutOfMemory);
        }
        let total = count * size;

        let ptr = self.allocate(total)?;
        if !ptr.is_null() {
            // SAFETY: the block behind ptr has at least total usable
            // bytes.
            unsafe { ptr::write_bytes(ptr, 0, total) };
        }
        Ok(ptr)
    }

    /// Resize `ptr` in place when the neighbourhood allows, otherwise
    /// move the data to a fresh block.
    ///
    /// Null `ptr` behaves like `allocate(new_size)`. A zero `new_size`
    /// releases `ptr` and returns `Ok(null)`.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer obtained from this arena that
    /// has not been released since. On `Err` the old pointer remains
    /// valid.
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> Result<*mut u8, AllocError> {
        if ptr.is_null() {
            return self.allocate(new_size);
        }
        if new_size == 0 {
            // SAFETY: forwarded caller contract
            unsafe { self.release(ptr) };
            return Ok(ptr::null_mut());
        }
        self.initialise()?;
        let need = padded(new_size).ok_or(AllocError::OutOfMemory)?;

        // SAFETY: ptr came from this arena; every block reached below
        // is live arena memory.
        unsafe {
            let mut b = block::block_of(ptr);
            let original_user = block::user_size(b);
            #[cfg(feature = "stats")]
            let old_size = block::size(b);

            if need > block::size(b) {
                // merge whatever free neighbours exist before deciding;
                // a single round takes both sides, so this settles
                // after at most two passes
                loop {
                    let before = block::size(b);
                    b = self.coalesce(b);
                    if block::size(b) <= before {
                        break;
                    }
                }
            }

            if block::size(b) < need {
                if block::next_raw(b) == self.epilogue {
                    // last block in the heap: grow over the break
                    // without another list search
                    if let Err(err) = self.extend_heap(need - block::size(b)) {
                        self.undo_failed_grow(b, ptr);
                        #[cfg(feature = "stats")]
                        {
                            let now = block::size(block::block_of(ptr));
                            self.stats.live_bytes = self.stats.live_bytes - old_size + now;
                        }
                        return Err(err);
                    }
                    block::mark_alloc(b);
                    block::set_size_and_sync(b, need);

                    let dest = block::user_of(b);
                    if dest != ptr {
                        // a leftward merge moved the header down
                        ptr::copy(ptr, dest, original_user);
                    }

                    #[cfg(feature = "stats")]
                    {
                        self.stats.live_bytes = self.stats.live_bytes - old_size + need;
                        self.stats.update_peak();
                    }
                    Ok(dest)
                } else {
                    // move to a fresh block
                    let dest = match self.allocate(new_size) {
                        Ok(dest) => dest,
                        Err(err) => {
                            self.undo_failed_grow(b, ptr);
                            #[cfg(feature = "stats")]
                            {
                                let now = block::size(block::block_of(ptr));
                                self.stats.live_bytes = self.stats.live_bytes - old_size + now;
                            }
                            return Err(err);
                        }
                    };
                    ptr::copy(ptr, dest, original_user);

                    // the old block only goes back to the lists when
                    // the fresh one sits above it; a lower fresh block
                    // cannot overlap, but the original kept this guard
                    let old_user = block::user_of(b);
                    if (old_user as usize) < (dest as usize) {
                        #[cfg(feature = "stats")]
                        {
                            self.stats.total_frees += 1;
                            self.stats.live_bytes -= old_size;
                        }
                        let freed = self.coalesce(b);
                        self.lists.insert(freed, true);
                    }
                    Ok(dest)
                }
            } else {
                // shrinking, or coalescing created the room
                if !block::is_alloc(b) {
                    self.lists.remove(b);
                }

                let dest = block::user_of(b);
                if dest != ptr {
                    ptr::copy(ptr, dest, cmp::min(original_user, new_size));
                }
                // split after the move so the data is not overwritten
                self.split(b, need);

                #[cfg(feature = "stats")]
                {
                    self.stats.live_bytes = self.stats.live_bytes - old_size + block::size(b);
                    self.stats.update_peak();
                }
                Ok(dest)
            }
        }
    }

    /// Usable payload bytes behind a live user pointer.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer from this arena.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        if ptr.is_null() {
            0
        } else {
            // SAFETY: caller contract
            unsafe { block::user_size(block::block_of(ptr)) }
        }
    }

    /// Search the lists for a free block of at least `need` bytes.
    ///
    /// Stage one drains the unsorted list: each head is coalesced,
    /// taken off its list, and either returned or refiled into its size
    /// class. Stage two is segregated fit; small classes hold one size
    /// each so their head is returned unchecked, larger classes are
    /// walked in full before moving up.
    ///
    /// A block returned from stage one is already unlinked and carries
    /// the allocated mark from the unlinking; a block from stage two is
    /// still on its list. The caller's `is_alloc` check covers both.
    unsafe fn find_block(&mut self, need: usize) -> Option<*mut Block> {
        unsafe {
            loop {
                let head = self.lists.head(UNSORTED);
                if head.is_null() {
                    break;
                }
                let candidate = self.coalesce(head);
                if !block::is_alloc(candidate) {
                    // nothing merged, so it is still filed
                    self.lists.remove(candidate);
                }
                if block::size(candidate) >= need {
                    return Some(candidate);
                }
                self.lists.insert(candidate, false);
            }

            for index in index_for(need)..LIST_COUNT {
                let mut cur = self.lists.head(index);
                if need <= MAX_SMALL {
                    // small classes hold a single size, the head fits
                    if !cur.is_null() {
                        return Some(cur);
                    }
                    continue;
                }
                while !cur.is_null() {
                    if block::size(cur) >= need {
                        return Some(cur);
                    }
                    cur = (*cur).next;
                }
            }
            None
        }
    }

    /// Shrink `b` to `target` bytes when the remainder can stand alone
    /// as a block, parking the remainder on the unsorted list.
    /// Otherwise `b` keeps its full size.
    unsafe fn split(&mut self, b: *mut Block, target: usize) {
        unsafe {
            let rest = block::size(b) - target;
            if rest >= MIN_BLOCK {
                block::set_size_and_sync(b, target);
                let remainder = block::next_raw(b);
                block::init_block(remainder, rest);
                self.lists.insert(remainder, true);
            }
        }
    }

    /// Merge `b` with its free raw-order neighbours, unlinking them as
    /// they are absorbed, and return the canonical (leftmost) header.
    ///
    /// The result is off every list. Its allocated bit is whatever the
    /// surviving header carried — the unlinking marks merged neighbours
    /// allocated — so callers either refile it or take it.
    unsafe fn coalesce(&mut self, b: *mut Block) -> *mut Block {
        unsafe {
            let mut left = b;
            let mut new_size = block::size(b);

            if block::prev_coalescable(b) {
                let prev = block::prev_raw(b);
                self.lists.remove(prev);
                new_size += block::size(prev);
                left = prev;
            }
            if block::next_coalescable(b) {
                let next = block::next_raw(b);
                self.lists.remove(next);
                new_size += block::size(next);
            }

            if new_size != block::size(b) {
                if !block::is_alloc(b) {
                    self.lists.remove(b);
                }
                block::set_size_and_sync(left, new_size);
            }
            left
        }
    }

    /// Put the heap back together after a grow path failed.
    ///
    /// When the pre-grow coalesce merged leftwards, the caller's
    /// pointer no longer sits behind the canonical header; hand the
    /// merged-off prefix back as its own free block and give the
    /// caller's block a fresh synced tag, so the old pointer stays
    /// releasable and the structural invariants hold.
    unsafe fn undo_failed_grow(&mut self, b: *mut Block, ptr: *mut u8) {
        unsafe {
            let orig = block::block_of(ptr);
            if b == orig {
                return;
            }
            let merged_end = b as usize + block::size(b);
            let prefix = orig as usize - b as usize;

            block::set_size_and_sync(b, prefix);
            block::init_block(orig, merged_end - orig as usize);
            block::mark_alloc(orig);
            block::sync_footer(orig);
            self.lists.insert(b, true);
        }
    }

    #[cfg(any(debug_assertions, feature = "debug-validate"))]
    fn validate_release(&self, ptr: *mut u8) -> Result<(), AllocError> {
        let addr = ptr as usize;
        if !is_aligned(addr, ALIGNMENT) {
            return Err(AllocError::InvalidPointer);
        }
        // user pointers sit one word past a header inside the arena
        let first = self.prologue as usize + 2 * WORD;
        let end = self.epilogue as usize;
        if addr < first || addr >= end {
            return Err(AllocError::InvalidPointer);
        }
        // SAFETY: addr is inside the arena, so the tag word below it is
        // readable.
        unsafe {
            let b = block::block_of(ptr);
            let size = block::size(b);
            if size < MIN_BLOCK || size > end - (b as usize) {
                return Err(AllocError::InvalidPointer);
            }
            if !block::is_alloc(b) {
                // already free
                return Err(AllocError::InvalidPointer);
            }
        }
        Ok(())
    }
}


#[cfg(all(test, feature = "stats"))]
mod stats_tests {
    use super::*;
    use crate::traits::FixedBreak;

    #[test]
    fn test_counters_track_round_trips() {
        let mut arena = Arena::new(FixedBreak::new(8192));
        let p = arena.allocate(100).unwrap();
        let q = arena.allocate(50).unwrap();
        let snapshot = arena.stats();
        assert_eq!(snapshot.total_allocs, 2);
        assert_eq!(snapshot.live_bytes, 128 + 80);
        assert!(snapshot.heap_bytes >= snapshot.live_bytes);

        unsafe {
            arena.release(p);
            arena.release(q);
        }
        let snapshot = arena.stats();
        assert_eq!(snapshot.total_frees, 2);
        assert_eq!(snapshot.live_bytes, 0);
        assert_eq!(snapshot.peak_live_bytes, 208);
        assert!(snapshot.heap_extensions >= 1);
    }

    #[test]
    fn test_resize_keeps_live_bytes_in_step() {
        let mut arena = Arena::new(FixedBreak::new(8192));
        let p = arena.allocate(32).unwrap();
        let p = unsafe { arena.resize(p, 200).unwrap() };
        assert_eq!(arena.stats().live_bytes, 224); // padded 200-byte request
        unsafe { arena.release(p) };
        assert_eq!(arena.stats().live_bytes, 0);
    }
}
