//! Pool manager (spec §4.1).
//!
//! Owns one reserved virtual range per [`SpaceType`], hands out
//! page-aligned pools from it, and can classify any raw address back
//! to its owning pool in O(log n). Grounded on the teacher's `Mmap`
//! (a single flat reservation) generalized to the "one big reservation
//! subdivided into many pools, with a registry for reverse lookup"
//! shape `examples/original_source/runtime/mem/mem_pool.h`'s
//! `PoolManager`/`MemPool` pair describes.

use parking_lot::RwLock;

use crate::globals::{align_up, PAGE_SIZE};
use crate::mmap::Mmap;
use crate::space_type::{AllocatorId, AllocatorKind, SpaceType};

/// A page-aligned, page-sized-multiple span of committed memory handed
/// out by the pool manager. Ownership is single-valued: exactly one
/// allocator instance holds a `Pool` at a time (spec §3).
pub struct Pool {
    base: *mut u8,
    len: usize,
    space: SpaceType,
    owner_kind: AllocatorKind,
    owner_id: AllocatorId,
}

unsafe impl Send for Pool {}

impl Pool {
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> *mut u8 {
        unsafe { self.base.add(self.len) }
    }

    pub fn space_type(&self) -> SpaceType {
        self.space
    }

    pub fn owner(&self) -> (AllocatorKind, AllocatorId) {
        (self.owner_kind, self.owner_id)
    }

    pub fn contains(&self, addr: *const u8) -> bool {
        (self.base as *const u8) <= addr && addr < self.end() as *const u8
    }
}

struct Reservation {
    mmap: Mmap,
    /// Sorted, non-overlapping `(offset, len)` ranges not currently
    /// handed out, maintained as a simple free list (first-fit; the
    /// pool manager does not need the splitting sophistication of the
    /// free-list allocator since pools are carved in page multiples
    /// and coalescing happens lazily on `free_pool`).
    free: Vec<(usize, usize)>,
    cursor: usize,
}

impl Reservation {
    fn new(size: usize) -> Option<Self> {
        let mmap = Mmap::reserve(size)?;
        Some(Self {
            mmap,
            free: Vec::new(),
            cursor: 0,
        })
    }

    fn alloc(&mut self, size: usize) -> Option<(*mut u8, usize)> {
        let size = align_up(size, PAGE_SIZE);
        // First-fit among freed ranges.
        if let Some(idx) = self.free.iter().position(|&(_, len)| len >= size) {
            let (offset, len) = self.free.remove(idx);
            let remainder = len - size;
            if remainder > 0 {
                self.free.push((offset + size, remainder));
            }
            let base = unsafe { self.mmap.start().add(offset) };
            return self.commit_and_return(base, size);
        }
        if self.cursor + size > self.mmap.size() {
            return None;
        }
        let base = unsafe { self.mmap.start().add(self.cursor) };
        self.cursor += size;
        self.commit_and_return(base, size)
    }

    fn commit_and_return(&self, base: *mut u8, size: usize) -> Option<(*mut u8, usize)> {
        if self.mmap.commit(base, size) {
            Some((base, size))
        } else {
            None
        }
    }

    fn free(&mut self, base: *mut u8, len: usize) {
        self.mmap.decommit(base, len);
        let offset = base as usize - self.mmap.start() as usize;
        self.free.push((offset, len));
        self.free.sort_unstable_by_key(|&(o, _)| o);
        // Coalesce adjacent ranges.
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.free.len());
        for &(o, l) in &self.free {
            if let Some(last) = merged.last_mut() {
                if last.0 + last.1 == o {
                    last.1 += l;
                    continue;
                }
            }
            merged.push((o, l));
        }
        self.free = merged;
    }
}

struct Registry {
    reservations: [Option<Reservation>; 5],
    /// Sorted by base address for binary-search classification
    /// (`GetSpaceTypeForAddr` et al. must be O(log n) or better, spec
    /// §4.1).
    live: Vec<(*mut u8, *mut u8, SpaceType, AllocatorKind, AllocatorId)>,
}

unsafe impl Send for Registry {}

/// Owns one reserved virtual range per space type and classifies any
/// live pointer back to the pool that owns it.
pub struct PoolManager {
    registry: RwLock<Registry>,
    reservation_size: [usize; 5],
}

impl PoolManager {
    /// `reservation_size` gives the size to reserve, lazily, for each
    /// space type the first time a pool is requested from it.
    pub fn new(reservation_size: [usize; 5]) -> Self {
        Self {
            registry: RwLock::new(Registry {
                reservations: Default::default(),
                live: Vec::new(),
            }),
            reservation_size,
        }
    }

    /// Returns a page-aligned pool of at least `size` bytes from the
    /// reservation for `space`. `None` on reservation exhaustion.
    pub fn alloc_pool(
        &self,
        size: usize,
        space: SpaceType,
        kind: AllocatorKind,
        id: AllocatorId,
    ) -> Option<Pool> {
        let mut reg = self.registry.write();
        let idx = space.index();
        if reg.reservations[idx].is_none() {
            reg.reservations[idx] = Reservation::new(self.reservation_size[idx]);
        }
        let reservation = reg.reservations[idx].as_mut()?;
        let (base, len) = reservation.alloc(size)?;
        reg.live.push((base, unsafe { base.add(len) }, space, kind, id));
        reg.live.sort_unstable_by_key(|&(b, ..)| b as usize);
        Some(Pool {
            base,
            len,
            space,
            owner_kind: kind,
            owner_id: id,
        })
    }

    /// Decommits the pool's pages and returns the range to the free
    /// list for its space.
    pub fn free_pool(&self, pool: Pool) {
        let mut reg = self.registry.write();
        let idx = pool.space.index();
        if let Some(pos) = reg.live.iter().position(|&(b, ..)| b == pool.base) {
            reg.live.remove(pos);
        }
        if let Some(reservation) = reg.reservations[idx].as_mut() {
            reservation.free(pool.base, pool.len);
        }
    }

    fn find(&self, addr: *const u8) -> Option<(*mut u8, *mut u8, SpaceType, AllocatorKind, AllocatorId)> {
        let reg = self.registry.read();
        let idx = reg
            .live
            .partition_point(|&(b, ..)| (b as usize) <= addr as usize);
        if idx == 0 {
            return None;
        }
        let entry = reg.live[idx - 1];
        if (entry.0 as *const u8) <= addr && addr < entry.1 as *const u8 {
            Some(entry)
        } else {
            None
        }
    }

    pub fn space_type_for_addr(&self, addr: *const u8) -> Option<SpaceType> {
        self.find(addr).map(|(_, _, space, ..)| space)
    }

    pub fn allocator_info_for_addr(&self, addr: *const u8) -> Option<(AllocatorKind, AllocatorId)> {
        self.find(addr).map(|(_, _, _, kind, id)| (kind, id))
    }

    pub fn start_addr_pool_for_addr(&self, addr: *const u8) -> Option<*mut u8> {
        self.find(addr).map(|(base, ..)| base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PoolManager {
        PoolManager::new([16 * 1024 * 1024; 5])
    }

    #[test]
    fn alloc_pool_is_page_aligned_and_classifiable() {
        let mgr = manager();
        let pool = mgr
            .alloc_pool(4096, SpaceType::Object, AllocatorKind::Bump, AllocatorId(0))
            .expect("pool");
        assert_eq!(pool.base() as usize % PAGE_SIZE, 0);
        let mid = unsafe { pool.base().add(pool.len() / 2) };
        assert_eq!(mgr.space_type_for_addr(mid), Some(SpaceType::Object));
        assert_eq!(
            mgr.allocator_info_for_addr(mid),
            Some((AllocatorKind::Bump, AllocatorId(0)))
        );
    }

    #[test]
    fn addr_outside_any_pool_is_unclassified() {
        let mgr = manager();
        let _pool = mgr
            .alloc_pool(4096, SpaceType::Object, AllocatorKind::Bump, AllocatorId(0))
            .expect("pool");
        let bogus = 0x1usize as *const u8;
        assert_eq!(mgr.space_type_for_addr(bogus), None);
    }

    #[test]
    fn freed_pool_range_is_reused() {
        let mgr = manager();
        let pool = mgr
            .alloc_pool(4096, SpaceType::Object, AllocatorKind::FreeList, AllocatorId(1))
            .expect("pool");
        let base = pool.base();
        mgr.free_pool(pool);
        let pool2 = mgr
            .alloc_pool(4096, SpaceType::Object, AllocatorKind::FreeList, AllocatorId(2))
            .expect("pool2");
        assert_eq!(pool2.base(), base);
    }

    #[test]
    fn reservation_exhaustion_returns_none() {
        let mgr = PoolManager::new([8192; 5]);
        let _p1 = mgr
            .alloc_pool(8192, SpaceType::Internal, AllocatorKind::Arena, AllocatorId(0))
            .expect("first pool fits");
        let p2 = mgr.alloc_pool(8192, SpaceType::Internal, AllocatorKind::Arena, AllocatorId(1));
        assert!(p2.is_none());
    }
}
