//! Humongous allocator (spec §4.6): one dedicated pool per large
//! object, with a small reserved cache of recently freed pools kept
//! ready for reuse instead of returning straight to the pool manager.
//!
//! Grounded on the teacher's `LargeObjectSpace`/`PreciseAllocation`
//! (a mutex-guarded sorted `Vec` of per-object allocations, `contains`
//! via binary search) generalized from `libc::malloc`/`free` to pool
//! manager-backed pools, per
//! `examples/original_source/runtime/mem/humongous_obj_allocator-inl.h`'s
//! occupied/reserved/free pool-list split.

use crate::globals::PAGE_SIZE;
use crate::pool::{Pool, PoolManager};
use crate::space_type::{AllocatorId, AllocatorKind, SpaceType};
use crate::sync::Locking;

/// Caps how many freed pools are kept warm in the reserved cache
/// before being returned to the pool manager outright.
const DEFAULT_RESERVED_CACHE_LIMIT: usize = 4;

struct Inner {
    /// Live allocations, sorted by base address for O(log n) `contains`.
    occupied: Vec<Pool>,
    /// Freed pools kept around for reuse by a same-or-smaller request.
    reserved: Vec<Pool>,
}

/// Allocates objects too large for the free-list allocator, each
/// backed by its own pool.
pub struct HumongousAllocator<'p> {
    pool_manager: &'p PoolManager,
    id: AllocatorId,
    lock: Locking,
    reserved_cache_limit: usize,
    inner: std::cell::UnsafeCell<Inner>,
}

unsafe impl Send for Inner {}
unsafe impl Send for HumongousAllocator<'_> {}
unsafe impl Sync for HumongousAllocator<'_> {}

impl<'p> HumongousAllocator<'p> {
    pub fn new(pool_manager: &'p PoolManager, id: AllocatorId) -> Self {
        Self::with_reserved_cache_limit(pool_manager, id, DEFAULT_RESERVED_CACHE_LIMIT)
    }

    pub fn with_reserved_cache_limit(pool_manager: &'p PoolManager, id: AllocatorId, reserved_cache_limit: usize) -> Self {
        Self {
            pool_manager,
            id,
            lock: Locking::mutex(),
            reserved_cache_limit,
            inner: std::cell::UnsafeCell::new(Inner {
                occupied: Vec::new(),
                reserved: Vec::new(),
            }),
        }
    }

    /// Serves `size` bytes from the reserved cache when a big-enough
    /// pool is already warm, otherwise requests a fresh one.
    pub fn alloc(&self, size: usize) -> Option<*mut u8> {
        let size = crate::globals::align_up(size, PAGE_SIZE);
        let _guard = self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };

        let pool = if let Some(idx) = inner.reserved.iter().position(|p| p.len() >= size) {
            inner.reserved.remove(idx)
        } else {
            self.pool_manager
                .alloc_pool(size, SpaceType::Humongous, AllocatorKind::Humongous, self.id)?
        };

        let base = pool.base();
        let pos = inner.occupied.partition_point(|p| p.base() < base);
        inner.occupied.insert(pos, pool);
        Some(base)
    }

    /// Releases the pool backing `ptr` (which must be a base pointer
    /// previously returned by [`Self::alloc`]), caching it in the
    /// reserved list up to the configured limit.
    ///
    /// # Safety
    /// `ptr` must be a pointer previously returned by [`Self::alloc`]
    /// on this allocator and not already freed.
    pub unsafe fn free(&self, ptr: *const u8) {
        let _guard = self.lock.lock();
        let inner = &mut *self.inner.get();
        let pos = match inner.occupied.iter().position(|p| p.base() as *const u8 == ptr) {
            Some(p) => p,
            None => return,
        };
        let pool = inner.occupied.remove(pos);
        if inner.reserved.len() < self.reserved_cache_limit {
            inner.reserved.push(pool);
        } else {
            self.pool_manager.free_pool(pool);
        }
    }

    /// `O(log n)` containment check over live (occupied) allocations.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let inner = unsafe { &*self.inner.get() };
        let idx = inner.occupied.partition_point(|p| p.base() as *const u8 <= ptr);
        if idx == 0 {
            return false;
        }
        inner.occupied[idx - 1].contains(ptr)
    }

    pub fn occupied_count(&self) -> usize {
        unsafe { (*self.inner.get()).occupied.len() }
    }

    /// Hands `visitor` the base pointer of every currently-occupied
    /// humongous object, in address order.
    pub fn iterate(&self, mut visitor: impl FnMut(*mut u8)) {
        let inner = unsafe { &*self.inner.get() };
        for pool in &inner.occupied {
            visitor(pool.base());
        }
    }

    pub fn reserved_count(&self) -> usize {
        unsafe { (*self.inner.get()).reserved.len() }
    }

    /// Evicts every pool from the reserved cache back to the pool
    /// manager; called under memory pressure.
    pub fn release_reserved(&self) {
        let _guard = self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };
        for pool in inner.reserved.drain(..) {
            self.pool_manager.free_pool(pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PoolManager {
        PoolManager::new([64 * 1024 * 1024; 5])
    }

    /// Scenario 5 (spec §8): humongous reserved cache.
    #[test]
    fn freed_pool_is_reused_from_the_reserved_cache_without_remapping() {
        let mgr = manager();
        let alloc = HumongousAllocator::new(&mgr, AllocatorId(0));
        let p1 = alloc.alloc(2 * 1024 * 1024).unwrap();
        unsafe { alloc.free(p1) };
        assert_eq!(alloc.reserved_count(), 1);
        let p2 = alloc.alloc(2 * 1024 * 1024).unwrap();
        assert_eq!(p1, p2, "second alloc reused the cached pool's base");
        assert_eq!(alloc.reserved_count(), 0);
    }

    #[test]
    fn contains_is_false_once_freed() {
        let mgr = manager();
        let alloc = HumongousAllocator::new(&mgr, AllocatorId(0));
        let p = alloc.alloc(4096).unwrap();
        assert!(alloc.contains(p));
        unsafe { alloc.free(p) };
        assert!(!alloc.contains(p));
    }

    #[test]
    fn reserved_cache_evicts_to_pool_manager_past_its_limit() {
        let mgr = manager();
        let alloc = HumongousAllocator::with_reserved_cache_limit(&mgr, AllocatorId(0), 1);
        let p1 = alloc.alloc(4096).unwrap();
        let p2 = alloc.alloc(4096).unwrap();
        unsafe {
            alloc.free(p1);
            alloc.free(p2);
        }
        assert_eq!(alloc.reserved_count(), 1);
    }
}
