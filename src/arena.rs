//! Heap arena manager.
//!
//! Owns the contiguous region between the prologue and epilogue
//! sentinels, the free-list set, and the break source that grows the
//! region. The arena grows only at the high end: the fresh block is
//! written over the old epilogue, which pre-reserves its own slot, so
//! no alignment fixup is ever needed mid-arena. The arena never
//! shrinks.

use core::mem;
use core::ptr;

use crate::block::{self, Block};
use crate::config::{ALIGNMENT, WORD, align_up, is_aligned};
use crate::error::AllocError;
use crate::freelist::FreeLists;
use crate::traits::BreakSource;

#[cfg(feature = "stats")]
use crate::stats::AllocatorStats;

/// The managed heap: break source, sentinels, and the free-list set.
///
/// All state lives in this one value. Nothing here synchronises; an
/// arena belongs to a single thread.
pub struct Arena<S: BreakSource> {
    pub(crate) source: S,
    pub(crate) prologue: *mut Block,
    pub(crate) epilogue: *mut Block,
    pub(crate) lists: FreeLists,
    pub(crate) initialised: bool,
    #[cfg(feature = "stats")]
    pub(crate) stats: AllocatorStats,
}

impl<S: BreakSource> Arena<S> {
    /// An empty arena over `source`. No memory is touched until the
    /// first operation.
    pub const fn new(source: S) -> Self {
        Self {
            source,
            prologue: ptr::null_mut(),
            epilogue: ptr::null_mut(),
            lists: FreeLists::new(),
            initialised: false,
            #[cfg(feature = "stats")]
            stats: AllocatorStats::new(),
        }
    }

    /// One-time arena setup: pad the break up to the alignment unit and
    /// lay down the prologue and epilogue sentinels back to back.
    /// Idempotent; every public operation runs it before touching
    /// state.
    pub(crate) fn initialise(&mut self) -> Result<(), AllocError> {
        if self.initialised {
            return Ok(());
        }

        let old_break = self
            .source
            .extend(0)
            .map_err(|_| AllocError::OutOfMemory)?
            .as_ptr() as usize;
        let pad = align_up(old_break, ALIGNMENT) - old_break;
        // padding plus both sentinel words, rounded so the chunk end
        // stays aligned
        let request = align_up(pad + WORD + mem::size_of::<Block>(), ALIGNMENT);
        self.source
            .extend(request)
            .map_err(|_| AllocError::OutOfMemory)?;

        self.prologue = (old_break + pad) as *mut Block;
        self.epilogue = (old_break + pad + WORD) as *mut Block;
        // SAFETY: both sentinel words are inside the chunk just granted
        unsafe {
            block::set_boundary(self.prologue);
            block::set_boundary(self.epilogue);
        }

        self.initialised = true;
        Ok(())
    }

    /// Grow the arena by `delta` bytes, which the caller has already
    /// aligned. The old epilogue becomes the header of a fresh block of
    /// size `delta`, marked allocated, and a new epilogue is written at
    /// the new high end. On failure the arena and sentinels are
    /// untouched.
    pub(crate) fn extend_heap(&mut self, delta: usize) -> Result<*mut Block, AllocError> {
        debug_assert!(is_aligned(delta, ALIGNMENT));

        self.source
            .extend(delta)
            .map_err(|_| AllocError::OutOfMemory)?;

        let fresh = self.epilogue;
        // SAFETY: the break just moved up by delta, so the fresh
        // block's tags and the new epilogue word are all backed.
        unsafe {
            block::mark_alloc(fresh);
            block::set_size_and_sync(fresh, delta);
            self.epilogue = block::next_raw(fresh);
            block::set_boundary(self.epilogue);
        }

        #[cfg(feature = "stats")]
        {
            self.stats.heap_bytes += delta;
            self.stats.heap_extensions += 1;
        }

        Ok(fresh)
    }

    /// Snapshot of the allocator statistics.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> AllocatorStats {
        self.stats
    }
}

#[cfg(test)]
impl<S: BreakSource> Arena<S> {
    /// Every non-sentinel block in raw address order as
    /// `(header, size, allocated)`.
    pub(crate) fn collect_blocks(&self) -> std::vec::Vec<(*mut Block, usize, bool)> {
        let mut out = std::vec::Vec::new();
        if !self.initialised {
            return out;
        }
        unsafe {
            let mut b = (self.prologue as usize + WORD) as *mut Block;
            while b != self.epilogue {
                out.push((b, block::size(b), block::is_alloc(b)));
                b = block::next_raw(b);
            }
        }
        out
    }

    /// Assert every structural invariant: footer mirrors header, sizes
    /// and user pointers aligned, the raw walk lands exactly on the
    /// epilogue and sums to the arena span, no two coalescable free
    /// blocks touch, and the free lists are consistent doubly linked
    /// lists holding exactly the free blocks, each in the right list.
    pub(crate) fn verify(&self) {
        use crate::config::{LIST_COUNT, MIN_BLOCK, UNSORTED};
        use crate::size_class::index_for;
        use std::collections::HashMap;

        if !self.initialised {
            return;
        }

        unsafe {
            assert!(block::is_alloc(self.prologue) && block::size(self.prologue) == 0);
            assert!(block::is_alloc(self.epilogue) && block::size(self.epilogue) == 0);

            let mut walked_free = std::vec::Vec::new();
            let mut sum = 0usize;
            let mut prev_coalescable_free = false;
            let mut b = (self.prologue as usize + WORD) as *mut Block;
            while b != self.epilogue {
                let size = block::size(b);
                assert!(size >= MIN_BLOCK, "undersized block in walk");
                assert!(is_aligned(size, ALIGNMENT), "misaligned block size");
                assert!(is_aligned(block::user_of(b) as usize, ALIGNMENT));
                assert_eq!(*block::footer_of(b), (*b).tag, "footer out of sync");

                let coalescable_free = !block::is_alloc(b) && !block::is_quick(b);
                assert!(
                    !(prev_coalescable_free && coalescable_free),
                    "adjacent free blocks survived"
                );
                prev_coalescable_free = coalescable_free;

                if !block::is_alloc(b) {
                    walked_free.push(b);
                }
                sum += size;
                b = block::next_raw(b);
            }
            assert_eq!(
                sum,
                self.epilogue as usize - self.prologue as usize - WORD,
                "block sizes do not cover the arena"
            );

            // every free block is on exactly one list, in the right one
            let mut listed: HashMap<*mut Block, usize> = HashMap::new();
            for index in 0..LIST_COUNT {
                let head = self.lists.head(index);
                if !head.is_null() {
                    assert!((*head).prev.is_null(), "list head has a predecessor");
                }
                let mut cur = head;
                while !cur.is_null() {
                    assert!(!block::is_alloc(cur), "allocated block on a free list");
                    assert!(
                        index == UNSORTED || index == index_for(block::size(cur)),
                        "block filed under the wrong class"
                    );
                    let next = (*cur).next;
                    if !next.is_null() {
                        assert_eq!((*next).prev, cur, "broken back link");
                    }
                    assert!(
                        listed.insert(cur, index).is_none(),
                        "block on more than one list"
                    );
                    cur = next;
                }
            }
            assert_eq!(listed.len(), walked_free.len());
            for b in walked_free {
                assert!(listed.contains_key(&b), "free block missing from the lists");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FixedBreak;

    #[test]
    fn test_initialise_places_sentinels_back_to_back() {
        let mut arena = Arena::new(FixedBreak::new(4096));
        arena.initialise().unwrap();
        assert!(arena.initialised);
        assert!(is_aligned(arena.prologue as usize, ALIGNMENT));
        assert_eq!(arena.epilogue as usize, arena.prologue as usize + WORD);
        unsafe {
            assert!(block::is_alloc(arena.prologue));
            assert_eq!(block::size(arena.prologue), 0);
        }
        assert!(arena.collect_blocks().is_empty());
    }

    #[test]
    fn test_initialise_is_idempotent() {
        let mut arena = Arena::new(FixedBreak::new(4096));
        arena.initialise().unwrap();
        let prologue = arena.prologue;
        arena.initialise().unwrap();
        assert_eq!(arena.prologue, prologue);
    }

    #[test]
    fn test_initialise_pads_a_skewed_break() {
        for skew in [1usize, 8, 15, 16] {
            let mut arena = Arena::new(FixedBreak::skewed(4096, skew));
            arena.initialise().unwrap();
            assert!(
                is_aligned(arena.prologue as usize, ALIGNMENT),
                "skew {skew} not padded away"
            );
        }
    }

    #[test]
    fn test_initialise_failure_is_clean() {
        let mut arena = Arena::new(FixedBreak::new(8));
        assert_eq!(arena.initialise(), Err(AllocError::OutOfMemory));
        assert!(!arena.initialised);
    }

    #[test]
    fn test_extend_heap_writes_block_over_old_epilogue() {
        let mut arena = Arena::new(FixedBreak::new(4096));
        arena.initialise().unwrap();
        let old_epilogue = arena.epilogue;

        let fresh = arena.extend_heap(128).unwrap();
        assert_eq!(fresh, old_epilogue);
        unsafe {
            assert_eq!(block::size(fresh), 128);
            assert!(block::is_alloc(fresh));
            assert_eq!(block::next_raw(fresh), arena.epilogue);
            assert!(block::is_alloc(arena.epilogue));
            assert_eq!(block::size(arena.epilogue), 0);
        }
        arena.verify();
    }

    #[test]
    fn test_extend_heap_failure_leaves_sentinels() {
        let mut arena = Arena::new(FixedBreak::new(64));
        arena.initialise().unwrap();
        let epilogue = arena.epilogue;
        assert_eq!(arena.extend_heap(1 << 20), Err(AllocError::OutOfMemory));
        assert_eq!(arena.epilogue, epilogue);
        unsafe {
            assert!(block::is_alloc(arena.epilogue));
            assert_eq!(block::size(arena.epilogue), 0);
        }
        arena.verify();
    }

    #[test]
    fn test_repeated_extension_is_contiguous() {
        let mut arena = Arena::new(FixedBreak::new(4096));
        arena.initialise().unwrap();
        let first = arena.extend_heap(64).unwrap();
        let second = arena.extend_heap(96).unwrap();
        assert_eq!(second as usize, first as usize + 64);
        assert_eq!(arena.collect_blocks().len(), 2);
        arena.verify();
    }
}
