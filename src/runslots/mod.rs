//! Run-slots allocator (spec §4.4): fixed-size-slot pages, one
//! partial-page list per size class, a shared free-page cache for
//! pages that have emptied out and can be re-formatted for any class.
//!
//! Grounded on `examples/original_source/runtime/mem/runslots_allocator-inl.h`
//! for the empty/partial/full page lifecycle and the per-class
//! partial-page list; the page itself is [`page::RunSlotsPage`].
//!
//! Pages acquired from the pool manager are never handed back to it:
//! once emptied they are cached (unformatted) for reuse by any size
//! class. This matches the original runslots allocator's reluctance
//! to eagerly release run-slots memory back to the OS; see DESIGN.md.

pub mod page;
pub mod size_class;

use std::ptr::null_mut;

use crate::globals::RUNSLOTS_PAGE_SIZE;
use crate::pool::PoolManager;
use crate::space_type::{AllocatorId, AllocatorKind, SpaceType};
use crate::sync::Locking;

use page::{PageState, RunSlotsPage};
use size_class::{size_class_to_index, slot_size_for, NUM_SIZE_CLASSES};

struct Inner {
    /// Head of the partial-pages intrusive list, per size class.
    partial: [*mut RunSlotsPage; NUM_SIZE_CLASSES],
    /// Aligned bases of pages that emptied out, cached unformatted for
    /// reuse by any size class before falling back to the pool manager.
    free_pages: Vec<*mut u8>,
}

unsafe impl Send for Inner {}

/// Allocates small, fixed-size-class objects out of self-aligned
/// pages carved from a shared [`PoolManager`] reservation.
pub struct RunSlotsAllocator<'p> {
    pool_manager: &'p PoolManager,
    id: AllocatorId,
    lock: Locking,
    inner: std::cell::UnsafeCell<Inner>,
}

unsafe impl Send for RunSlotsAllocator<'_> {}
unsafe impl Sync for RunSlotsAllocator<'_> {}

impl<'p> RunSlotsAllocator<'p> {
    pub fn new(pool_manager: &'p PoolManager, id: AllocatorId) -> Self {
        Self {
            pool_manager,
            id,
            lock: Locking::mutex(),
            inner: std::cell::UnsafeCell::new(Inner {
                partial: [null_mut(); NUM_SIZE_CLASSES],
                free_pages: Vec::new(),
            }),
        }
    }

    /// Serves `size` (must be `<= RUNSLOTS_MAX_SLOT_SIZE`) from the
    /// matching size class's partial-page list, pulling a fresh or
    /// cached page in when the list is empty.
    pub fn alloc(&self, size: usize) -> Option<*mut u8> {
        let slot_size = slot_size_for(size);
        let class = size_class_to_index(slot_size);
        let _guard = self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };

        if inner.partial[class].is_null() {
            let page = self.acquire_page(&mut inner.free_pages, slot_size)?;
            inner.partial[class] = page;
        }

        let page_ptr = inner.partial[class];
        let page = unsafe { &mut *page_ptr };
        let slot = page.alloc_slot().expect("partial-list page must have a free slot");

        if page.state() == PageState::Full {
            let next = page.next();
            inner.partial[class] = next;
            if !next.is_null() {
                unsafe { (*next).set_prev(null_mut()) };
            }
            page.set_next(null_mut());
        }
        Some(slot)
    }

    /// Returns a cached page (re-formatted for `slot_size`) or
    /// requests a fresh one from the pool manager. A page-sized pool
    /// is requested at `2*RUNSLOTS_PAGE_SIZE` so an aligned window can
    /// be carved out; the pool manager only guarantees OS-page
    /// alignment, not `RUNSLOTS_PAGE_SIZE` alignment.
    fn acquire_page(&self, free_pages: &mut Vec<*mut u8>, slot_size: usize) -> Option<*mut RunSlotsPage> {
        let base = match free_pages.pop() {
            Some(base) => base,
            None => {
                let pool = self.pool_manager.alloc_pool(
                    RUNSLOTS_PAGE_SIZE * 2,
                    SpaceType::Object,
                    AllocatorKind::RunSlots,
                    self.id,
                )?;
                let raw = pool.base() as usize;
                ((raw + RUNSLOTS_PAGE_SIZE - 1) & !(RUNSLOTS_PAGE_SIZE - 1)) as *mut u8
            }
        };
        Some(unsafe { RunSlotsPage::format(base, slot_size) })
    }

    /// Returns a slot to its owning page. When the page transitions to
    /// empty, it's pulled out of the partial list and parked in the
    /// free-page cache for the next `alloc`.
    ///
    /// # Safety
    /// `ptr` must be a pointer previously returned by [`Self::alloc`]
    /// on this allocator, not already freed.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let _guard = self.lock.lock();
        let inner = &mut *self.inner.get();
        let page_ptr = RunSlotsPage::from_interior(ptr);
        let page = &mut *page_ptr;
        let was_full = page.state() == PageState::Full;
        page.free_slot(ptr);

        if was_full {
            let class = size_class_to_index(page.slot_size());
            let head = inner.partial[class];
            page.set_next(head);
            if !head.is_null() {
                (*head).set_prev(page_ptr);
            }
            inner.partial[class] = page_ptr;
        }

        if page.state() == PageState::Empty {
            let class = size_class_to_index(page.slot_size());
            Self::unlink(inner, class, page_ptr);
            inner.free_pages.push(page_ptr as *mut u8);
        }
    }

    fn unlink(inner: &mut Inner, class: usize, page_ptr: *mut RunSlotsPage) {
        let page = unsafe { &mut *page_ptr };
        let prev = page.prev();
        let next = page.next();
        if !prev.is_null() {
            unsafe { (*prev).set_next(next) };
        } else {
            inner.partial[class] = next;
        }
        if !next.is_null() {
            unsafe { (*next).set_prev(prev) };
        }
        page.set_next(null_mut());
        page.set_prev(null_mut());
    }

    pub fn is_live(&self, ptr: *const u8) -> bool {
        let page = unsafe { &*RunSlotsPage::from_interior(ptr) };
        page.is_live(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PoolManager {
        PoolManager::new([32 * 1024 * 1024; 5])
    }

    /// Scenario 3 (spec §8): run-slots reuse. A page that fills then
    /// fully empties is reformatted and handed back out rather than
    /// triggering a fresh pool request.
    #[test]
    fn emptied_page_is_cached_and_reused() {
        let mgr = manager();
        let alloc = RunSlotsAllocator::new(&mgr, AllocatorId(0));
        let slot_size = 16;
        let capacity = RunSlotsPage::payload_capacity() / slot_size;

        let mut ptrs = Vec::new();
        for _ in 0..capacity {
            ptrs.push(alloc.alloc(slot_size).expect("page has room"));
        }

        for &p in &ptrs {
            unsafe { alloc.free(p) };
        }

        // A different size class should be able to reuse the cached,
        // now-unformatted page.
        let p = alloc.alloc(64).expect("reused page serves a new class");
        assert!(alloc.is_live(p));
    }

    #[test]
    fn allocations_from_different_pages_do_not_alias() {
        let mgr = manager();
        let alloc = RunSlotsAllocator::new(&mgr, AllocatorId(0));
        let a = alloc.alloc(16).unwrap();
        let b = alloc.alloc(16).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn free_transitions_full_page_back_onto_the_partial_list() {
        let mgr = manager();
        let alloc = RunSlotsAllocator::new(&mgr, AllocatorId(0));
        let slot_size = 32;
        let capacity = RunSlotsPage::payload_capacity() / slot_size;
        let mut ptrs = Vec::new();
        for _ in 0..capacity {
            ptrs.push(alloc.alloc(slot_size).unwrap());
        }
        unsafe { alloc.free(ptrs[0]) };
        let p = alloc.alloc(slot_size).expect("freed slot is reused before a new page");
        assert_eq!(p, ptrs[0]);
    }
}
