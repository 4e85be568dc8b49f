//! Object-allocator facades (spec §4.8): the routing layer a VM talks
//! to, dispatching each request to whichever allocator family fits its
//! size and the configured GC algorithm.
//!
//! Grounded on the teacher's split between `BumpPointerSpace` (young),
//! `RosAllocSpace`/segregated space (general), and `LargeObjectSpace`
//! (large) living side by side under one heap, generalized into three
//! named facades matching `examples/original_source`'s allocator
//! variants (`bump-allocator-inl.h`, `runslots_allocator-inl.h`,
//! `freelist_allocator-inl.h`, `humongous_obj_allocator-inl.h`,
//! `g1-allocator.cpp`, `pygote_space_allocator-inl.h`). Root-set
//! discovery and the mark/sweep-vs-copy decision are out of scope
//! (spec §1 Non-goals): each facade's `collect` takes liveness as an
//! input (a caller-supplied [`crate::gc::GcVisitor`]) and performs only
//! the physical relocation/reclamation a real collector would trigger
//! after marking.

use crate::bump::BumpAllocator;
use crate::config::{GrowthPolicy, HeapConfig};
use crate::crossing_map::{CrossingMap, CrossingMapObserver};
use crate::freelist::FreeListAllocator;
use crate::gc::{CollectMode, GcVisitor, Liveness};
use crate::globals::{ALLOCATION_GRANULARITY, FREELIST_MAX_ALLOC_SIZE};
use crate::header::ObjectHeader;
use crate::humongous::HumongousAllocator;
use crate::pool::{Pool, PoolManager};
use crate::region::{RegionAllocator, RegionTag};
use crate::space_type::{AllocatorId, AllocatorKind, SpaceType};
use crate::stats::MemStats;
use crate::tlab::Tlab;

/// Total bytes a header plus its payload occupy, rounded the way
/// [`crate::bump::BumpAllocator::alloc`] rounds requests so stepping by
/// this size always lands on the next header; shared by every facade's
/// `Iterate*`/`IsLive` surface.
fn object_span(header: *mut ObjectHeader) -> usize {
    let payload = unsafe { (*header).size() } as usize;
    crate::arena::Arena::round_request(std::mem::size_of::<ObjectHeader>() + payload)
}

/// `IsLive` over a bump arena: true only when `ptr` lands exactly on an
/// object boundary below the bump cursor, found by walking from the
/// nearest recorded crossing-map start instead of the arena's own
/// start.
fn bump_is_live(arena: &crate::arena::Arena, crossing: &CrossingMap, ptr: *const u8) -> bool {
    if !arena.in_arena(ptr) || (ptr as usize) >= arena.current() as usize {
        return false;
    }
    let Some(start) = crossing.first_object_at_or_before(ptr) else {
        return false;
    };
    let mut cur = start as *mut u8;
    loop {
        if cur as *const u8 == ptr {
            return true;
        }
        if cur as usize > ptr as usize {
            return false;
        }
        cur = unsafe { cur.add(object_span(cur as *mut ObjectHeader)) };
    }
}

/// Physically compacts a bump arena in place: every object `visitor`
/// reports alive is shifted down to close the gaps left by dead ones,
/// and the bump cursor is pulled back to the new high-water mark. Used
/// by both [`NonGenerationalHeap::collect`] and [`GenerationalHeap`]'s
/// own collection path in `gc.rs`.
fn compact_bump_in_place(arena: &crate::arena::Arena, visitor: &mut dyn GcVisitor) {
    let start = arena.start();
    let end = arena.current();
    let mut write = start;
    let mut cur = start;
    while (cur as usize) < (end as usize) {
        let header = cur as *mut ObjectHeader;
        let span = object_span(header);
        if visitor.visit(cur) == Liveness::Alive {
            if write != cur {
                unsafe { std::ptr::copy(cur, write, span) };
            }
            write = unsafe { write.add(span) };
        }
        cur = unsafe { cur.add(span) };
    }
    arena.resize(write as usize - start as usize);
}

fn new_backing_pool<'p>(
    pool_manager: &'p PoolManager,
    size: usize,
    space: SpaceType,
    id: AllocatorId,
) -> Option<Pool> {
    pool_manager.alloc_pool(size, space, AllocatorKind::Bump, id)
}

/// Single-space heap for a stop-the-world or epsilon collector: one
/// bump-allocated young area plus a free-list/humongous tail, no
/// generational promotion.
pub struct NonGenerationalHeap<'p> {
    config: HeapConfig,
    pool_manager: &'p PoolManager,
    young_pool: Pool,
    young: BumpAllocator<CrossingMapObserver>,
    freelist: FreeListAllocator<'p>,
    humongous: HumongousAllocator<'p>,
    growth: GrowthPolicy,
    stats: MemStats,
}

impl<'p> NonGenerationalHeap<'p> {
    pub fn new(pool_manager: &'p PoolManager, config: HeapConfig) -> Option<Self> {
        let young_pool = new_backing_pool(pool_manager, config.young_space_size, SpaceType::Object, AllocatorId(0))?;
        let observer = CrossingMapObserver::new(young_pool.base(), young_pool.len());
        let young = unsafe { BumpAllocator::new(young_pool.base(), young_pool.end(), 0, observer) };
        Some(Self {
            freelist: FreeListAllocator::new(pool_manager, AllocatorId(1)),
            humongous: HumongousAllocator::new(pool_manager, AllocatorId(2)),
            growth: GrowthPolicy::new(1024, config.large_object_threshold),
            config,
            pool_manager,
            young_pool,
            young,
            stats: MemStats::new(),
        })
    }

    pub fn allocate_object(&self, size: usize) -> Option<*mut u8> {
        self.growth.record_allocation();
        let ptr = if let Some(p) = self.young.alloc(size) {
            Some(p)
        } else if size <= FREELIST_MAX_ALLOC_SIZE {
            self.freelist.alloc(size, crate::globals::FREELIST_DEFAULT_ALIGNMENT)
        } else {
            self.growth.record_large_allocation(size);
            self.humongous.alloc(size)
        };
        if ptr.is_some() {
            self.stats.space(SpaceType::Object).record_alloc(size);
        }
        ptr
    }

    /// Non-movable allocations bypass the bump young space (which this
    /// crate's compaction hooks treat as movable) and go straight to
    /// the free list/humongous tail.
    pub fn allocate_non_movable(&self, size: usize) -> Option<*mut u8> {
        if size <= FREELIST_MAX_ALLOC_SIZE {
            self.freelist.alloc(size, crate::globals::FREELIST_DEFAULT_ALIGNMENT)
        } else {
            self.humongous.alloc(size)
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn stats(&self) -> &MemStats {
        &self.stats
    }

    pub fn young_space_size(&self) -> usize {
        self.young_pool.len()
    }

    /// `ContainObject`: every pool in this heap was carved from
    /// `pool_manager`, so its registry alone can answer containment
    /// regardless of which sub-allocator the pointer belongs to.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.pool_manager.space_type_for_addr(ptr).is_some()
    }

    pub fn young_arena(&self) -> &crate::arena::Arena {
        self.young.arena()
    }

    pub fn young_crossing_map(&self) -> &CrossingMap {
        self.young.observer().map()
    }

    /// Non-movable objects here are simply everything outside the
    /// bump-allocated young generation, since free-list/humongous
    /// allocations never move (spec §4.8).
    pub fn is_object_in_non_movable_space(&self, ptr: *const u8) -> bool {
        self.contains(ptr) && !self.young_arena().in_arena(ptr)
    }

    /// `IsLive`: dispatches to whichever sub-allocator owns `ptr`.
    pub fn is_live(&self, ptr: *const u8) -> bool {
        if self.young_arena().in_arena(ptr) {
            return bump_is_live(self.young_arena(), self.young_crossing_map(), ptr);
        }
        if self.humongous.contains(ptr) {
            return true;
        }
        self.freelist.is_live(ptr)
    }

    /// `IterateRegularSizeObjects`: every young and free-list object,
    /// i.e. everything below the humongous threshold.
    pub fn iterate_regular_size_objects(&self, mut visitor: impl FnMut(*mut u8)) {
        self.young.iterate_over_objects(&|p| object_span(p as *mut ObjectHeader), &mut visitor);
        self.freelist.iterate(&mut visitor);
    }

    /// `IterateNonRegularSizeObjects`: every humongous object.
    pub fn iterate_non_regular_size_objects(&self, visitor: impl FnMut(*mut u8)) {
        self.humongous.iterate(visitor);
    }

    /// `VisitAndRemoveAllPools`: reclaims every free-list pool that has
    /// coalesced back into a single free block.
    pub fn visit_and_remove_all_pools(&self) -> usize {
        self.freelist.visit_and_remove_free_pools()
    }

    /// `Collect(gc_object_visitor, mode)`: compacts the young bump
    /// generation in place; the free-list/humongous tail never moves,
    /// so it isn't touched here (spec §1 Non-goals: no copying
    /// collector for non-movable spaces).
    pub fn collect(&self, mode: CollectMode, visitor: &mut dyn GcVisitor) {
        if mode != CollectMode::None {
            compact_bump_in_place(self.young.arena(), visitor);
        }
        self.stats.record_gc_cycle();
        self.growth
            .update_after_collection(&self.config, self.young.arena().get_occupied_size(), 0);
    }
}

/// Young/old heap for a generational collector: new objects bump
/// allocate into young; a young allocation that doesn't fit falls
/// through to the old free-list space (approximating promotion — the
/// real promotion decision belongs to the collector this crate doesn't
/// implement).
pub struct GenerationalHeap<'p> {
    config: HeapConfig,
    pool_manager: &'p PoolManager,
    young_pool: Pool,
    young: BumpAllocator<CrossingMapObserver>,
    old: FreeListAllocator<'p>,
    humongous: HumongousAllocator<'p>,
    growth: GrowthPolicy,
    stats: MemStats,
}

impl<'p> GenerationalHeap<'p> {
    pub fn new(pool_manager: &'p PoolManager, config: HeapConfig) -> Option<Self> {
        let young_pool = new_backing_pool(pool_manager, config.young_space_size, SpaceType::Object, AllocatorId(0))?;
        let tlab_capacity = if config.use_tlab_for_allocations { 64 } else { 0 };
        let observer = CrossingMapObserver::new(young_pool.base(), young_pool.len());
        let young = unsafe { BumpAllocator::new(young_pool.base(), young_pool.end(), tlab_capacity, observer) };
        Some(Self {
            old: FreeListAllocator::new(pool_manager, AllocatorId(1)),
            humongous: HumongousAllocator::new(pool_manager, AllocatorId(2)),
            growth: GrowthPolicy::new(1024, config.large_object_threshold),
            config,
            pool_manager,
            young_pool,
            young,
            stats: MemStats::new(),
        })
    }

    pub fn allocate_object(&self, size: usize) -> Option<*mut u8> {
        self.growth.record_allocation();
        let ptr = if size > self.config.humongous_object_threshold {
            self.growth.record_large_allocation(size);
            self.humongous.alloc(size)
        } else if let Some(p) = self.young.alloc(size) {
            Some(p)
        } else {
            self.old.alloc(size, crate::globals::FREELIST_DEFAULT_ALIGNMENT)
        };
        if ptr.is_some() {
            self.stats.space(SpaceType::Object).record_alloc(size);
        }
        ptr
    }

    pub fn allocate_non_movable(&self, size: usize) -> Option<*mut u8> {
        if size > self.config.humongous_object_threshold {
            self.humongous.alloc(size)
        } else {
            self.old.alloc(size, crate::globals::FREELIST_DEFAULT_ALIGNMENT)
        }
    }

    /// `CreateNewTlab`: carves a fresh thread-local bump window from
    /// the young generation.
    pub fn create_new_tlab(&self, size: usize) -> Option<Tlab> {
        if !self.config.use_tlab_for_allocations {
            return None;
        }
        self.young.create_new_tlab(size)
    }

    pub fn young_bump_remaining(&self) -> usize {
        self.young.arena().get_free_size()
    }

    pub fn young_space_size(&self) -> usize {
        self.young_pool.len()
    }

    pub fn young_arena(&self) -> &crate::arena::Arena {
        self.young.arena()
    }

    /// `ContainObject`: every pool in this heap was carved from
    /// `pool_manager`, so its registry alone can answer containment
    /// regardless of which sub-allocator the pointer belongs to.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.pool_manager.space_type_for_addr(ptr).is_some()
    }

    pub fn is_object_in_non_movable_space(&self, ptr: *const u8) -> bool {
        self.pool_manager.space_type_for_addr(ptr) == Some(SpaceType::NonMovableObject)
            || !self.young_arena().in_arena(ptr)
    }

    pub fn stats(&self) -> &MemStats {
        &self.stats
    }

    pub fn young_crossing_map(&self) -> &CrossingMap {
        self.young.observer().map()
    }

    /// `IsLive`: dispatches to whichever generation owns `ptr`.
    pub fn is_live(&self, ptr: *const u8) -> bool {
        if self.young_arena().in_arena(ptr) {
            return bump_is_live(self.young_arena(), self.young_crossing_map(), ptr);
        }
        if self.humongous.contains(ptr) {
            return true;
        }
        self.old.is_live(ptr)
    }

    /// `IterateRegularSizeObjects`: young and old-generation objects.
    pub fn iterate_regular_size_objects(&self, mut visitor: impl FnMut(*mut u8)) {
        self.young.iterate_over_objects(&|p| object_span(p as *mut ObjectHeader), &mut visitor);
        self.old.iterate(&mut visitor);
    }

    /// `IterateNonRegularSizeObjects`: humongous objects.
    pub fn iterate_non_regular_size_objects(&self, visitor: impl FnMut(*mut u8)) {
        self.humongous.iterate(visitor);
    }

    /// `IterateOverTenuredObjects`: objects already promoted to the old
    /// free-list generation, excluding anything still in young.
    pub fn iterate_over_tenured_objects(&self, visitor: impl FnMut(*mut u8)) {
        self.old.iterate(visitor);
    }

    /// `VisitAndRemoveAllPools`: reclaims any old-generation pool that
    /// has coalesced back into a single free block.
    pub fn visit_and_remove_all_pools(&self) -> usize {
        self.old.visit_and_remove_free_pools()
    }

    /// Resets the young generation (everything still alive must
    /// already have been promoted by the caller) and folds the
    /// occupancy into the growth policy.
    pub fn collect(&self) {
        self.stats.record_gc_cycle();
        self.growth
            .update_after_collection(&self.config, self.young.arena().get_occupied_size(), 0);
        self.young.reset();
    }
}

/// Region-based heap for a G1-like collector: every allocation lands
/// in a tagged region; humongous objects get their own dedicated pool
/// instead of spanning regions.
pub struct G1LikeHeap<'p> {
    config: HeapConfig,
    pool_manager: &'p PoolManager,
    regions: RegionAllocator<'p>,
    humongous: HumongousAllocator<'p>,
    growth: GrowthPolicy,
    stats: MemStats,
}

impl<'p> G1LikeHeap<'p> {
    pub fn new(pool_manager: &'p PoolManager, config: HeapConfig) -> Self {
        Self {
            regions: RegionAllocator::with_region_size(pool_manager, AllocatorId(0), config.region_size),
            humongous: HumongousAllocator::new(pool_manager, AllocatorId(1)),
            growth: GrowthPolicy::new(1024, config.large_object_threshold),
            config,
            pool_manager,
            stats: MemStats::new(),
        }
    }

    pub fn allocate_object(&self, size: usize) -> Option<*mut u8> {
        self.growth.record_allocation();
        let ptr = if size > self.config.humongous_object_threshold {
            self.growth.record_large_allocation(size);
            self.humongous.alloc(size)
        } else {
            self.regions.alloc(RegionTag::Eden, size, crate::globals::ALLOCATION_GRANULARITY)
        };
        if ptr.is_some() {
            self.stats.space(SpaceType::Object).record_alloc(size);
        }
        ptr
    }

    pub fn allocate_non_movable(&self, size: usize) -> Option<*mut u8> {
        self.regions.alloc(RegionTag::NonMovable, size, crate::globals::ALLOCATION_GRANULARITY)
    }

    pub fn region_count(&self) -> usize {
        self.regions.region_count()
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        self.pool_manager.space_type_for_addr(ptr).is_some()
    }

    /// Non-movable region requests never land in a `regions`-tracked
    /// bump region at all (spec §4.7), so any contained pointer outside
    /// the ordinary region list is non-movable by construction.
    pub fn is_object_in_non_movable_space(&self, ptr: *const u8) -> bool {
        self.pool_manager.space_type_for_addr(ptr) == Some(SpaceType::NonMovableObject)
    }

    /// `IsLive`: humongous objects are contained-or-not; region objects
    /// defer to the region allocator's crossing-map-assisted walk.
    pub fn is_live(&self, ptr: *const u8) -> bool {
        if self.humongous.contains(ptr) {
            return true;
        }
        self.regions.is_live(ptr, &|p| object_span(p as *mut ObjectHeader))
    }

    /// `IterateRegularSizeObjects`: every object in every region.
    pub fn iterate_regular_size_objects(&self, visitor: impl FnMut(*mut u8, RegionTag)) {
        self.regions.iterate_all(&|p| object_span(p as *mut ObjectHeader), visitor);
    }

    /// `IterateNonRegularSizeObjects`: humongous objects.
    pub fn iterate_non_regular_size_objects(&self, visitor: impl FnMut(*mut u8)) {
        self.humongous.iterate(visitor);
    }

    /// `VisitAndRemoveAllPools`: reclaims non-movable large-object pools
    /// that have coalesced back into a single free block.
    pub fn visit_and_remove_all_pools(&self) -> usize {
        self.regions.visit_and_remove_non_movable_pools()
    }

    pub fn stats(&self) -> &MemStats {
        &self.stats
    }

    /// `Collect(gc_object_visitor, mode)`: marks every eden object
    /// `visitor` reports alive, then compacts the marked survivors into
    /// the old generation's regions and resets eden. `NonMovable`/
    /// `Pinned` regions are never touched (spec §4.7).
    pub fn collect(&self, mode: CollectMode, visitor: &mut dyn GcVisitor) {
        if mode != CollectMode::None {
            let size_of = |p: *mut u8| object_span(p as *mut ObjectHeader);
            self.regions.iterate_several_specific_regions(RegionTag::Eden, &size_of, |obj| {
                if visitor.visit(obj) == Liveness::Alive {
                    self.regions.mark(obj);
                }
            });
            self.regions.compact_several_specific_regions(RegionTag::Eden, &size_of, |obj, _tag| {
                let span = size_of(obj);
                if let Some(dest) = self.regions.alloc(RegionTag::Old, span, ALLOCATION_GRANULARITY) {
                    unsafe { std::ptr::copy_nonoverlapping(obj, dest, span) };
                }
            });
            self.regions.reset_several_specific_regions(RegionTag::Eden);
        }
        self.stats.record_gc_cycle();
        self.growth.update_after_collection(&self.config, 0, 0);
    }
}

/// A bump space that freezes after the owning process forks (spec
/// §4.8's zygote/pygote model): allocations before `freeze` are shared
/// read-only memory every child inherits; once frozen, further
/// allocation requests must be routed to a per-child overflow space by
/// the caller, since this crate has no process-fork awareness of its
/// own.
pub struct PygoteSpace {
    bump: BumpAllocator<CrossingMapObserver>,
    _pool: Pool,
    frozen: std::sync::atomic::AtomicBool,
}

impl PygoteSpace {
    pub fn new(pool_manager: &PoolManager, size: usize, id: AllocatorId) -> Option<Self> {
        let pool = new_backing_pool(pool_manager, size, SpaceType::Object, id)?;
        let observer = CrossingMapObserver::new(pool.base(), pool.len());
        let bump = unsafe { BumpAllocator::new(pool.base(), pool.end(), 0, observer) };
        Some(Self {
            bump,
            _pool: pool,
            frozen: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn alloc(&self, size: usize) -> Option<*mut u8> {
        if self.is_frozen() {
            return None;
        }
        self.bump.alloc(size)
    }

    pub fn freeze(&self) {
        self.frozen.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(std::sync::atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PoolManager {
        PoolManager::new([64 * 1024 * 1024; 5])
    }

    fn small_config() -> HeapConfig {
        let mut c = HeapConfig::default();
        c.young_space_size = 1024 * 1024;
        c.humongous_object_threshold = 256 * 1024;
        c
    }

    #[test]
    fn non_generational_heap_routes_by_size() {
        let mgr = manager();
        let heap = NonGenerationalHeap::new(&mgr, small_config()).unwrap();
        let small = heap.allocate_object(32).unwrap();
        let large = heap.allocate_object(1024 * 1024).unwrap();
        assert_ne!(small, large);
    }

    /// Scenario 8 (spec §8): Collect preserves reachable allocation
    /// state across a growth-policy update.
    #[test]
    fn generational_collect_resets_young_and_grows_threshold_under_pressure() {
        let mgr = manager();
        let heap = GenerationalHeap::new(&mgr, small_config()).unwrap();
        for _ in 0..100 {
            heap.allocate_object(1024).unwrap();
        }
        let remaining_before = heap.young_bump_remaining();
        heap.collect();
        assert!(heap.young_bump_remaining() > remaining_before);
    }

    #[test]
    fn g1_like_heap_routes_humongous_objects_outside_regions() {
        let mgr = manager();
        let heap = G1LikeHeap::new(&mgr, small_config());
        let eden = heap.allocate_object(64).unwrap();
        let humongous = heap.allocate_object(512 * 1024).unwrap();
        assert_ne!(eden, humongous);
        assert_eq!(heap.region_count(), 1);
    }

    #[test]
    fn pygote_space_rejects_allocation_once_frozen() {
        let mgr = manager();
        let space = PygoteSpace::new(&mgr, 4096, AllocatorId(0)).unwrap();
        assert!(space.alloc(64).is_some());
        space.freeze();
        assert!(space.alloc(64).is_none());
    }
}
