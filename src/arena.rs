//! Monotonic bump arena (spec §4.2), the building block every other
//! allocator in this crate is carved from.
//!
//! Grounded on the teacher's `bump_pointer_space.rs`: a start/current/
//! end triple with a CAS-bumped cursor (`alloc_non_virtual_without_accounting`)
//! for the lock-free fast path, generalized here to operate over a
//! plain byte buffer instead of an always-mmap'd `ContinuousMemMapAllocSpace`,
//! and to support the rollback/resize/chaining operations spec §4.2
//! names that the teacher's space does not need.

use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::globals::{align_up, ALLOCATION_GRANULARITY};

/// A monotonic bump region over `[start, end)`. `current` only moves
/// forward except via `Reset`/`Resize`/`Free` (spec §3 invariant:
/// `start <= current <= end`).
pub struct Arena {
    start: *mut u8,
    current: AtomicPtr<u8>,
    end: *mut u8,
    next: Option<Box<Arena>>,
}

unsafe impl Send for Arena {}

impl Arena {
    /// Wraps an existing buffer as an arena. The buffer is not owned;
    /// callers carve arenas out of pool memory.
    ///
    /// # Safety
    /// `[start, end)` must be valid for the arena's lifetime and not
    /// aliased by any other arena or allocator.
    pub unsafe fn new(start: *mut u8, end: *mut u8) -> Self {
        debug_assert!(start <= end);
        Self {
            start,
            current: AtomicPtr::new(start),
            end,
            next: None,
        }
    }

    pub fn start(&self) -> *mut u8 {
        self.start
    }

    pub fn end(&self) -> *mut u8 {
        self.end
    }

    pub fn current(&self) -> *mut u8 {
        self.current.load(Ordering::Acquire)
    }

    pub fn get_occupied_size(&self) -> usize {
        self.current() as usize - self.start as usize
    }

    pub fn get_free_size(&self) -> usize {
        self.end as usize - self.current() as usize
    }

    pub fn in_arena(&self, p: *const u8) -> bool {
        (self.start as *const u8) <= p && p < (self.end as *const u8)
    }

    /// Bumps `current` forward by `align_up(size, alignment)`. Returns
    /// `None` if the arena lacks the space; never partially succeeds.
    pub fn alloc(&self, size: usize, alignment: usize) -> Option<*mut u8> {
        debug_assert!(alignment.is_power_of_two());
        loop {
            let cur = self.current.load(Ordering::Relaxed);
            let aligned = align_up(cur as usize, alignment) as *mut u8;
            let new_cur = unsafe { aligned.add(size) };
            if new_cur > self.end {
                return None;
            }
            if self
                .current
                .compare_exchange_weak(cur, new_cur, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(aligned);
            }
        }
    }

    /// Like [`Arena::alloc`], but the effective limit is `limit`
    /// instead of `self.end` — used by [`crate::bump::BumpAllocator`]
    /// so TLAB carving from the top of the arena can shrink the
    /// region ordinary bump allocations are allowed to use without
    /// touching the arena's real `end`.
    pub fn alloc_bounded(&self, size: usize, alignment: usize, limit: *mut u8) -> Option<*mut u8> {
        debug_assert!(alignment.is_power_of_two());
        debug_assert!(limit <= self.end);
        loop {
            let cur = self.current.load(Ordering::Relaxed);
            let aligned = align_up(cur as usize, alignment) as *mut u8;
            let new_cur = unsafe { aligned.add(size) };
            if new_cur > limit {
                return None;
            }
            if self
                .current
                .compare_exchange_weak(cur, new_cur, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(aligned);
            }
        }
    }

    /// Like [`Arena::alloc`] but requires `current` and `size` to
    /// already be aligned; skips the alignment arithmetic (spec §4.2).
    pub fn aligned_alloc(&self, size: usize, alignment: usize) -> Option<*mut u8> {
        debug_assert!(crate::globals::is_aligned(self.current() as usize, alignment));
        debug_assert!(crate::globals::is_aligned(size, alignment));
        loop {
            let cur = self.current.load(Ordering::Relaxed);
            let new_cur = unsafe { cur.add(size) };
            if new_cur > self.end {
                return None;
            }
            if self
                .current
                .compare_exchange_weak(cur, new_cur, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(cur);
            }
        }
    }

    /// Trims `current` back to `p`, used only as a rollback primitive
    /// (spec Open Question: no caller contract beyond rollback is
    /// assumed; see DESIGN.md).
    pub fn free(&self, p: *mut u8) {
        debug_assert!(self.in_arena(p) || p == self.end);
        self.current.store(p, Ordering::Release);
    }

    pub fn reset(&self) {
        self.current.store(self.start, Ordering::Release);
    }

    /// Sets `current := start + n`, poisoning the vacated suffix in
    /// debug builds so use-after-resize is caught. Precondition:
    /// `n <= occupied size`.
    pub fn resize(&self, n: usize) {
        let occupied = self.get_occupied_size();
        debug_assert!(n <= occupied);
        let new_cur = unsafe { self.start.add(n) };
        #[cfg(debug_assertions)]
        unsafe {
            let vacated_len = occupied - n;
            std::ptr::write_bytes(new_cur, 0xCD, vacated_len);
        }
        self.current.store(new_cur, Ordering::Release);
    }

    /// Grows `end` by `extra_len` bytes. Legal only when the caller's
    /// `extra` pointer equals the current `end` (spec §3): the arena's
    /// backing buffer must already have been extended by that amount.
    ///
    /// # Safety
    /// The `extra_len` bytes past the old `end` must be valid memory.
    pub unsafe fn expand_arena(&mut self, extra: *mut u8, extra_len: usize) {
        assert_eq!(extra, self.end, "ExpandArena requires extra == end");
        self.end = extra.add(extra_len);
    }

    pub fn get_next_arena(&self) -> Option<&Arena> {
        self.next.as_deref()
    }

    pub fn link_to(&mut self, next: Arena) {
        self.next = Some(Box::new(next));
    }

    pub fn round_request(size: usize) -> usize {
        align_up(size, ALLOCATION_GRANULARITY)
    }
}

pub fn null_arena_ptr() -> *mut u8 {
    null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_arena(size: usize) -> (Vec<u8>, Arena) {
        let mut buf = vec![0u8; size];
        let start = buf.as_mut_ptr();
        let end = unsafe { start.add(size) };
        let arena = unsafe { Arena::new(start, end) };
        (buf, arena)
    }

    /// Scenario 1 (spec §8): arena exhaustion and reset.
    #[test]
    fn exhaustion_then_reset_repeats_first_address() {
        let (_buf, arena) = make_arena(1024 * 1024);
        let mut first = None;
        for i in 0..1024 {
            let p = arena.alloc(1024, 8).unwrap_or_else(|| panic!("alloc {i} failed"));
            if i == 0 {
                first = Some(p);
            }
        }
        assert!(arena.alloc(1024, 8).is_none(), "1025th allocation must fail");
        arena.reset();
        let p = arena.alloc(1024, 8).unwrap();
        assert_eq!(Some(p), first);
    }

    #[test]
    fn resize_trims_and_poisons_vacated_suffix() {
        let (_buf, arena) = make_arena(4096);
        arena.alloc(256, 8).unwrap();
        arena.alloc(256, 8).unwrap();
        arena.resize(256);
        assert_eq!(arena.get_occupied_size(), 256);
        unsafe {
            let tail = arena.start().add(256);
            assert_eq!(*tail, 0xCD);
        }
    }

    #[test]
    fn expand_arena_requires_extra_equal_to_end() {
        let mut buf = vec![0u8; 8192];
        let start = buf.as_mut_ptr();
        let end = unsafe { start.add(4096) };
        let mut arena = unsafe { Arena::new(start, end) };
        unsafe {
            arena.expand_arena(end, 4096);
        }
        assert_eq!(arena.end(), unsafe { start.add(8192) });
        assert!(arena.alloc(8192, 8).is_some());
    }

    #[test]
    #[should_panic(expected = "ExpandArena requires extra == end")]
    fn expand_arena_rejects_mismatched_extra() {
        let (mut buf, mut arena) = make_arena(4096);
        let bogus = buf.as_mut_ptr();
        unsafe {
            arena.expand_arena(bogus, 4096);
        }
    }

    #[test]
    fn zero_size_request_returns_a_valid_non_advancing_pointer() {
        let (_buf, arena) = make_arena(4096);
        let before = arena.current();
        let p = arena.alloc(0, 8).unwrap();
        assert_eq!(p, before);
        assert_eq!(arena.current(), before);
    }
}
