//! Free-list allocator (spec §4.5): segregated free lists of
//! boundary-tagged blocks, coalesced on free, backed by pools from the
//! shared [`PoolManager`].
//!
//! Grounded on `examples/original_source/runtime/mem/freelist_allocator-inl.h`:
//! the segregated-bucket index (`(size - MIN) / SEGREGATED_LIST_FREE_BLOCK_RANGE`),
//! the padding-header trick for over-alignment (`SetAsPaddingHeader`,
//! `SetPaddingHeaderStoredAfterHeader`), and `VisitAndRemoveFreePools`
//! for reclaiming pools that have become entirely free. The Rust
//! boundary-tag bookkeeping (`prev_size`/`last` flags for O(1)
//! physical-neighbour coalescing) follows the classic segregated-fit
//! design the header names but does not spell out field-by-field.

use std::mem::size_of;
use std::ptr::null_mut;

use crate::crossing_map::CrossingMap;
use crate::globals::{align_up, FREELIST_DEFAULT_ALIGNMENT, FREELIST_MAX_ALLOC_SIZE, FREELIST_MIN_BLOCK_SIZE, PAGE_SIZE, SEGREGATED_LIST_FREE_BLOCK_RANGE};
use crate::pool::{Pool, PoolManager};
use crate::space_type::{AllocatorId, AllocatorKind, SpaceType};
use crate::sync::Locking;

const NUM_BUCKETS: usize = FREELIST_MAX_ALLOC_SIZE / SEGREGATED_LIST_FREE_BLOCK_RANGE + 1;

#[repr(C)]
struct BlockHeader {
    /// Total physical size of this block, header included, a multiple
    /// of `FREELIST_DEFAULT_ALIGNMENT`.
    size: usize,
    /// Physical size of the immediately preceding block in the same
    /// pool; `0` if this is the first block of its pool.
    prev_size: usize,
    free: bool,
    /// True if no block follows this one in its pool.
    last: bool,
    /// Byte offset from this header to the user pointer handed back by
    /// [`FreeListAllocator::place_payload`]; meaningless while `free`.
    payload_offset: usize,
}

/// Intrusive free-list links, valid only while the block is free;
/// overlaid on the start of the block's payload.
#[repr(C)]
struct FreeNode {
    next: *mut BlockHeader,
    prev: *mut BlockHeader,
}

const HEADER_SIZE: usize = size_of::<BlockHeader>();

fn bucket_of(size: usize) -> usize {
    (size / SEGREGATED_LIST_FREE_BLOCK_RANGE).min(NUM_BUCKETS - 1)
}

unsafe fn free_node(h: *mut BlockHeader) -> *mut FreeNode {
    (h as *mut u8).add(HEADER_SIZE) as *mut FreeNode
}

unsafe fn next_physical(h: *mut BlockHeader) -> Option<*mut BlockHeader> {
    if (*h).last {
        None
    } else {
        Some((h as *mut u8).add((*h).size) as *mut BlockHeader)
    }
}

unsafe fn prev_physical(h: *mut BlockHeader) -> Option<*mut BlockHeader> {
    if (*h).prev_size == 0 {
        None
    } else {
        Some((h as *mut u8).sub((*h).prev_size) as *mut BlockHeader)
    }
}

/// Segregated-fit allocator for requests between `FREELIST_MIN_BLOCK_SIZE`
/// and `FREELIST_MAX_ALLOC_SIZE`.
pub struct FreeListAllocator<'p> {
    pool_manager: &'p PoolManager,
    id: AllocatorId,
    lock: Locking,
    inner: std::cell::UnsafeCell<Inner>,
}

struct Inner {
    buckets: Vec<*mut BlockHeader>,
    pools: Vec<Pool>,
    /// One crossing map per entry of `pools`, kept in lockstep so a
    /// pool's index doubles as its crossing map's index.
    crossing: Vec<CrossingMap>,
}

unsafe impl Send for Inner {}
unsafe impl Send for FreeListAllocator<'_> {}
unsafe impl Sync for FreeListAllocator<'_> {}

impl<'p> FreeListAllocator<'p> {
    pub fn new(pool_manager: &'p PoolManager, id: AllocatorId) -> Self {
        Self {
            pool_manager,
            id,
            lock: Locking::mutex(),
            inner: std::cell::UnsafeCell::new(Inner {
                buckets: vec![null_mut(); NUM_BUCKETS],
                pools: Vec::new(),
                crossing: Vec::new(),
            }),
        }
    }

    /// Serves `size` bytes aligned to `alignment` (a power of two).
    /// Requests above `FREELIST_MAX_ALLOC_SIZE` are rejected; callers
    /// must route those to the humongous allocator.
    pub fn alloc(&self, size: usize, alignment: usize) -> Option<*mut u8> {
        debug_assert!(alignment.is_power_of_two());
        if size == 0 || size > FREELIST_MAX_ALLOC_SIZE {
            return None;
        }
        // Worst case: 8 bytes for the back-offset word, plus up to
        // `alignment - 1` bytes to reach the requested alignment.
        let overhead = HEADER_SIZE + size_of::<usize>() + alignment.saturating_sub(1);
        let needed = align_up((overhead + size).max(FREELIST_MIN_BLOCK_SIZE), FREELIST_DEFAULT_ALIGNMENT);

        let _guard = self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };

        let header = match Self::take_fitting_block(inner, needed) {
            Some(h) => h,
            None => {
                let pool_size = align_up(needed.max(crate::globals::DEFAULT_POOL_SIZE), PAGE_SIZE);
                let pool = self.pool_manager.alloc_pool(
                    pool_size,
                    SpaceType::Object,
                    AllocatorKind::FreeList,
                    self.id,
                )?;
                let header = pool.base() as *mut BlockHeader;
                unsafe {
                    header.write(BlockHeader {
                        size: pool.len(),
                        prev_size: 0,
                        free: true,
                        last: true,
                        payload_offset: 0,
                    });
                }
                inner.crossing.push(CrossingMap::new(pool.base(), pool.len()));
                inner.pools.push(pool);
                Self::insert(inner, header);
                Self::take_fitting_block(inner, needed)?
            }
        };

        unsafe { Self::split(inner, header, needed) };
        unsafe { (*header).free = false };

        let user_ptr = unsafe { Self::place_payload(header, size, alignment) };
        if let Some(idx) = inner.pools.iter().position(|p| p.contains(user_ptr)) {
            inner.crossing[idx].record_object_start(user_ptr);
        }
        Some(user_ptr)
    }

    /// Removes and returns the first block able to satisfy `needed`
    /// bytes, searching its exact bucket (which may contain
    /// undersized neighbours) before trusting any later bucket (every
    /// block there is guaranteed large enough by construction).
    fn take_fitting_block(inner: &mut Inner, needed: usize) -> Option<*mut BlockHeader> {
        let start = bucket_of(needed);
        if let Some(h) = Self::find_in_bucket(inner, start, |sz| sz >= needed) {
            Self::unlink(inner, start, h);
            return Some(h);
        }
        for b in (start + 1)..NUM_BUCKETS {
            if !inner.buckets[b].is_null() {
                let h = inner.buckets[b];
                Self::unlink(inner, b, h);
                return Some(h);
            }
        }
        None
    }

    fn find_in_bucket(inner: &Inner, bucket: usize, pred: impl Fn(usize) -> bool) -> Option<*mut BlockHeader> {
        let mut cur = inner.buckets[bucket];
        while !cur.is_null() {
            if pred(unsafe { (*cur).size }) {
                return Some(cur);
            }
            cur = unsafe { (*free_node(cur)).next };
        }
        None
    }

    fn insert(inner: &mut Inner, header: *mut BlockHeader) {
        let size = unsafe { (*header).size };
        let b = bucket_of(size);
        let head = inner.buckets[b];
        unsafe {
            (*free_node(header)).next = head;
            (*free_node(header)).prev = null_mut();
            if !head.is_null() {
                (*free_node(head)).prev = header;
            }
            (*header).free = true;
        }
        inner.buckets[b] = header;
    }

    fn unlink(inner: &mut Inner, bucket: usize, header: *mut BlockHeader) {
        unsafe {
            let node = free_node(header);
            let prev = (*node).prev;
            let next = (*node).next;
            if !prev.is_null() {
                (*free_node(prev)).next = next;
            } else {
                inner.buckets[bucket] = next;
            }
            if !next.is_null() {
                (*free_node(next)).prev = prev;
            }
        }
    }

    /// Splits `header` (currently not linked into any bucket) so its
    /// front `needed` bytes become the block returned to the caller,
    /// reinserting the remainder as a new free block when the leftover
    /// is large enough to host one.
    unsafe fn split(inner: &mut Inner, header: *mut BlockHeader, needed: usize) {
        let total = (*header).size;
        let remainder = total - needed;
        if remainder < FREELIST_MIN_BLOCK_SIZE {
            return;
        }
        (*header).size = needed;
        let was_last = (*header).last;
        (*header).last = false;

        let tail = (header as *mut u8).add(needed) as *mut BlockHeader;
        tail.write(BlockHeader {
            size: remainder,
            prev_size: needed,
            free: true,
            last: was_last,
            payload_offset: 0,
        });
        if let Some(next) = next_physical(tail) {
            (*next).prev_size = remainder;
        }
        Self::insert(inner, tail);
    }

    /// Writes the back-offset word and returns the aligned user
    /// pointer inside `header`'s payload.
    unsafe fn place_payload(header: *mut BlockHeader, _size: usize, alignment: usize) -> *mut u8 {
        let payload_start = (header as *mut u8).add(HEADER_SIZE);
        let min_user_ptr = payload_start.add(size_of::<usize>());
        let user_ptr = {
            let aligned = align_up(min_user_ptr as usize, alignment);
            aligned as *mut u8
        };
        let back_offset_loc = user_ptr.sub(size_of::<usize>()) as *mut usize;
        *back_offset_loc = back_offset_loc as usize - header as usize;
        (*header).payload_offset = user_ptr as usize - header as usize;
        user_ptr
    }

    /// Returns a previously allocated pointer, coalescing with any
    /// free physical neighbours.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`Self::alloc`] on this
    /// allocator and not already freed.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let back_offset_loc = ptr.sub(size_of::<usize>()) as *mut usize;
        let offset = *back_offset_loc;
        let mut header = (back_offset_loc as usize - offset) as *mut BlockHeader;

        let _guard = self.lock.lock();
        let inner = &mut *self.inner.get();

        if let Some(prev) = prev_physical(header) {
            if (*prev).free {
                let prev_bucket = bucket_of((*prev).size);
                Self::unlink(inner, prev_bucket, prev);
                (*prev).size += (*header).size;
                (*prev).last = (*header).last;
                header = prev;
            }
        }
        if let Some(next) = next_physical(header) {
            if (*next).free {
                let next_bucket = bucket_of((*next).size);
                Self::unlink(inner, next_bucket, next);
                (*header).size += (*next).size;
                (*header).last = (*next).last;
            }
        }
        if let Some(next) = next_physical(header) {
            (*next).prev_size = (*header).size;
        }
        Self::insert(inner, header);
    }

    /// Scans pools for any that have coalesced back into a single free
    /// block spanning the whole pool, removing and returning each to
    /// the pool manager. Returns how many pools were reclaimed.
    pub fn visit_and_remove_free_pools(&self) -> usize {
        let _guard = self.lock.lock();
        let inner = unsafe { &mut *self.inner.get() };
        let mut reclaimed = 0;
        let mut i = 0;
        while i < inner.pools.len() {
            let pool_base = inner.pools[i].base() as *mut BlockHeader;
            let whole_pool_free =
                unsafe { (*pool_base).free && (*pool_base).last && (*pool_base).size == inner.pools[i].len() };
            if whole_pool_free {
                let bucket = bucket_of(unsafe { (*pool_base).size });
                Self::unlink(inner, bucket, pool_base);
                let pool = inner.pools.remove(i);
                inner.crossing.remove(i);
                self.pool_manager.free_pool(pool);
                reclaimed += 1;
            } else {
                i += 1;
            }
        }
        reclaimed
    }

    /// Returns the crossing map of whichever pool contains `addr`, used
    /// to locate the first object overlapping a given address without
    /// a linear scan from the pool's start.
    pub fn crossing_map_for(&self, addr: *const u8) -> Option<&CrossingMap> {
        let inner = unsafe { &*self.inner.get() };
        inner.pools.iter().position(|p| p.contains(addr)).map(|idx| &inner.crossing[idx])
    }

    /// Walks every live (non-free) block across every pool, handing
    /// `visitor` each block's user pointer.
    pub fn iterate(&self, mut visitor: impl FnMut(*mut u8)) {
        let inner = unsafe { &*self.inner.get() };
        for pool in &inner.pools {
            let mut header = pool.base() as *mut BlockHeader;
            loop {
                unsafe {
                    if !(*header).free {
                        visitor(Self::user_ptr_of(header));
                    }
                    match next_physical(header) {
                        Some(next) => header = next,
                        None => break,
                    }
                }
            }
        }
    }

    /// Recovers the user pointer [`Self::place_payload`] handed out for
    /// an occupied `header`, from the offset it recorded there.
    unsafe fn user_ptr_of(header: *mut BlockHeader) -> *mut u8 {
        (header as *mut u8).add((*header).payload_offset)
    }

    /// Reports whether `ptr` is a currently-occupied user pointer (as
    /// opposed to one that has been freed and possibly coalesced away).
    pub fn is_live(&self, ptr: *const u8) -> bool {
        let inner = unsafe { &*self.inner.get() };
        let Some(idx) = inner.pools.iter().position(|p| p.contains(ptr)) else {
            return false;
        };
        let mut header = inner.pools[idx].base() as *mut BlockHeader;
        loop {
            unsafe {
                let block_start = header as *const u8;
                let block_end = block_start.add((*header).size);
                if (block_start..block_end).contains(&(ptr as *const u8)) {
                    return !(*header).free;
                }
                match next_physical(header) {
                    Some(next) => header = next,
                    None => return false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PoolManager {
        PoolManager::new([32 * 1024 * 1024; 5])
    }

    #[test]
    fn alloc_then_free_then_realloc_reuses_the_block() {
        let mgr = manager();
        let alloc = FreeListAllocator::new(&mgr, AllocatorId(0));
        let p = alloc.alloc(128, 8).unwrap();
        unsafe { alloc.free(p) };
        let p2 = alloc.alloc(128, 8).unwrap();
        assert_eq!(p, p2);
    }

    /// Scenario 4 (spec §8): free-list alignment with padding.
    #[test]
    fn alloc_honors_alignment_stricter_than_default() {
        let mgr = manager();
        let alloc = FreeListAllocator::new(&mgr, AllocatorId(0));
        let p = alloc.alloc(100, 64).unwrap();
        assert_eq!(p as usize % 64, 0);
        unsafe { alloc.free(p) };
    }

    #[test]
    fn adjacent_frees_coalesce_into_one_block() {
        let mgr = manager();
        let alloc = FreeListAllocator::new(&mgr, AllocatorId(0));
        let a = alloc.alloc(256, 8).unwrap();
        let b = alloc.alloc(256, 8).unwrap();
        unsafe {
            alloc.free(a);
            alloc.free(b);
        }
        // A single larger allocation should now succeed by reusing the
        // coalesced span rather than requesting a new pool.
        let reclaimed_before = alloc.visit_and_remove_free_pools();
        assert_eq!(reclaimed_before, 1, "fully-coalesced pool is reclaimable");
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mgr = manager();
        let alloc = FreeListAllocator::new(&mgr, AllocatorId(0));
        assert!(alloc.alloc(FREELIST_MAX_ALLOC_SIZE + 1, 8).is_none());
    }

    #[test]
    fn every_allocation_is_recorded_in_its_pool_crossing_map() {
        let mgr = manager();
        let alloc = FreeListAllocator::new(&mgr, AllocatorId(0));
        let p = alloc.alloc(128, 8).unwrap();
        let cm = alloc.crossing_map_for(p).expect("pool must exist for a live allocation");
        assert_eq!(cm.first_object_at_or_before(p), Some(p as *const u8));
    }

    #[test]
    fn iterate_visits_live_blocks_and_skips_freed_ones() {
        let mgr = manager();
        let alloc = FreeListAllocator::new(&mgr, AllocatorId(0));
        let a = alloc.alloc(64, 8).unwrap();
        let b = alloc.alloc(64, 8).unwrap();
        unsafe { alloc.free(a) };

        assert!(!alloc.is_live(a));
        assert!(alloc.is_live(b));

        let mut seen = Vec::new();
        alloc.iterate(|p| seen.push(p));
        assert_eq!(seen, vec![b]);
    }
}
