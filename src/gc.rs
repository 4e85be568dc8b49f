//! GC-facing interfaces (spec §6): the allocator/heap-manager surface
//! the interpreter, JIT, and collector call through, plus the object
//! header/mem-stats readers spec §6 groups alongside it.
//!
//! Grounded on `examples/original_source/runtime/include/mem/heap_manager.h`'s
//! split between the heap-manager's mutator-facing `AllocateObject`/
//! `CreateNewTLAB` surface and the GC's `Collect`/iteration surface,
//! layered on top of this crate's [`crate::facade::GenerationalHeap`]
//! the way the teacher layers `Heap`'s public API over its internal
//! spaces. The actual mark/sweep or copy decision belongs to the
//! collector (spec §1 Non-goals); `collect` below performs the physical
//! half of a minor cycle — in-place compaction of the young generation
//! driven by a caller-supplied liveness oracle — which is the part this
//! crate owns.

use crate::arena::Arena;
use crate::crossing_map::CrossingMap;
use crate::facade::GenerationalHeap;
use crate::header::ObjectHeader;
use crate::monitor::MonitorPool;

/// `collect_mode` (spec §4.8): which generations a `Collect` call
/// should touch. Only `Minor` is interpreted by [`collect`] below —
/// the others are recorded for the caller's own dispatch since major/
/// full collection of the free-list-backed old generation needs the
/// collector's own root set, not just this crate's physical operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Minor,
    Major,
    All,
    Full,
    None,
}

/// Per-object verdict a [`GcVisitor`] returns during `Collect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// `gc_object_visitor` (spec §6): classifies one object during a
/// collection pass.
pub trait GcVisitor {
    fn visit(&mut self, obj: *mut u8) -> Liveness;
}

/// Total bytes a header plus its payload occupy in an arena, rounded
/// the same way [`crate::bump::BumpAllocator::alloc`] rounds requests
/// so stepping by this size always lands on the next header.
fn object_span(header: *mut ObjectHeader) -> usize {
    let payload = unsafe { (*header).size() } as usize;
    Arena::round_request(std::mem::size_of::<ObjectHeader>() + payload)
}

/// Allocates `size` bytes of payload for a movable object, prepending
/// and initialising an [`ObjectHeader`]. Zero-fills the payload and
/// performs a full fence before returning, per spec §6's
/// `AllocateObject` contract. Class-pointer initialization belongs to
/// the class-linker collaborator this crate's scope excludes (see
/// [`crate::header`]'s module doc comment).
pub fn allocate_object(heap: &GenerationalHeap<'_>, size: usize) -> Option<*mut ObjectHeader> {
    let total = std::mem::size_of::<ObjectHeader>() + size;
    let base = heap.allocate_object(total)?;
    Some(unsafe { init_header(base, size) })
}

/// `AllocateNonMovableObject`: same initialization, routed to the old
/// free-list space instead of the young bump space.
pub fn allocate_non_movable_object(heap: &GenerationalHeap<'_>, size: usize) -> Option<*mut ObjectHeader> {
    let total = std::mem::size_of::<ObjectHeader>() + size;
    let base = heap.allocate_non_movable(total)?;
    Some(unsafe { init_header(base, size) })
}

unsafe fn init_header(base: *mut u8, payload_size: usize) -> *mut ObjectHeader {
    let payload = base.add(std::mem::size_of::<ObjectHeader>());
    std::ptr::write_bytes(payload, 0, payload_size);
    let header = base as *mut ObjectHeader;
    header.write(ObjectHeader::new(payload_size as u32));
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    header
}

/// `IterateOverObjects`: walks every live object currently in the
/// young generation, in allocation order.
pub fn iterate_over_young_objects(heap: &GenerationalHeap<'_>, mut visitor: impl FnMut(*mut ObjectHeader)) {
    iterate_over_objects_in_range(
        heap.young_crossing_map(),
        heap.young_arena().start(),
        heap.young_arena().current(),
        &mut visitor,
    );
}

/// `IterateOverObjectsInRange`: like [`iterate_over_young_objects`] but
/// bounded to `[lo, end)`, used by card-table/crossing-map scans that
/// only need to revisit one region. `lo` need not itself be an object
/// boundary: `crossing` locates the first object that overlaps it
/// (spec §4.3) instead of walking linearly from the space's start, so
/// the cost of the scan is proportional to the range, not the whole
/// generation.
pub fn iterate_over_objects_in_range(crossing: &CrossingMap, lo: *mut u8, end: *mut u8, mut visitor: impl FnMut(*mut ObjectHeader)) {
    let mut cur = match crossing.first_object_at_or_before(lo) {
        Some(obj) => obj as *mut u8,
        None => return,
    };
    while (cur as usize) < (end as usize) {
        let header = cur as *mut ObjectHeader;
        visitor(header);
        cur = unsafe { cur.add(object_span(header)) };
    }
}

/// `Collect(gc_object_visitor, Minor)`: classifies every young object
/// through `visitor`, compacts survivors to the front of the arena in
/// place, and shrinks the bump cursor to match — dead objects are
/// simply the bytes past the new cursor, immediately reusable by the
/// next `Alloc`. Other modes are the caller's responsibility; see the
/// module doc comment.
///
/// Scenario 8 (spec §8): after this call, [`iterate_over_young_objects`]
/// visits exactly the objects `visitor` reported alive.
pub fn collect(heap: &GenerationalHeap<'_>, mode: CollectMode, visitor: &mut dyn GcVisitor) {
    if mode == CollectMode::None {
        return;
    }
    let arena = heap.young_arena();
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
    heap.stats().record_gc_cycle();
}

/// `VisitAndRemoveFreePools`: reclaims any old-generation pool that has
/// coalesced back into a single free block, typically called right
/// after [`collect`].
pub fn visit_and_remove_free_pools(old: &crate::freelist::FreeListAllocator<'_>) -> usize {
    old.visit_and_remove_free_pools()
}

/// Heap-manager API (spec §6) consumed by the interpreter/JIT.
/// Implemented for [`GenerationalHeap`] here rather than made generic
/// over all three facades: `CreateNewTLAB` only makes sense for a heap
/// with a bump-allocated young generation, and the non-generational/
/// G1-like facades' callers use their own `allocate_object`/
/// `allocate_non_movable` methods directly.
pub trait HeapManager {
    fn allocate_object(&self, size: usize) -> Option<*mut ObjectHeader>;
    fn allocate_non_movable_object(&self, size: usize) -> Option<*mut ObjectHeader>;
    fn create_new_tlab(&self, size: usize) -> Option<crate::tlab::Tlab>;
}

impl HeapManager for GenerationalHeap<'_> {
    fn allocate_object(&self, size: usize) -> Option<*mut ObjectHeader> {
        allocate_object(self, size)
    }

    fn allocate_non_movable_object(&self, size: usize) -> Option<*mut ObjectHeader> {
        allocate_non_movable_object(self, size)
    }

    fn create_new_tlab(&self, size: usize) -> Option<crate::tlab::Tlab> {
        GenerationalHeap::create_new_tlab(self, size)
    }
}

/// `HoldsLock`/`MonitorEnter`/`MonitorExit` convenience matching spec
/// §6's monitor API, dispatching on the object's current mark-word
/// state the way [`ObjectHeader::monitor_enter`] already does; kept
/// here rather than on `ObjectHeader` itself since it needs the
/// per-thread identity a header has no business storing.
pub fn monitor_enter<'a>(header: &ObjectHeader, monitors: &'a MonitorPool, thread_id: u32) -> Option<crate::monitor::ObjectLock<'a>> {
    header
        .monitor_enter(monitors, thread_id)
        .map(|id| crate::monitor::ObjectLock::new(monitors, id, thread_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::pool::PoolManager;

    fn heap() -> (PoolManager, HeapConfig) {
        let mut config = HeapConfig::default();
        config.young_space_size = 1024 * 1024;
        config.use_tlab_for_allocations = false;
        (PoolManager::new([16 * 1024 * 1024; 5]), config)
    }

    struct EveryOther {
        index: usize,
    }

    impl GcVisitor for EveryOther {
        fn visit(&mut self, _obj: *mut u8) -> Liveness {
            self.index += 1;
            if self.index % 2 == 0 {
                Liveness::Alive
            } else {
                Liveness::Dead
            }
        }
    }

    /// Scenario 8 (spec §8): Collect preserves live.
    #[test]
    fn collect_compacts_young_generation_to_exactly_the_live_objects() {
        let (mgr, config) = heap();
        let gen_heap = GenerationalHeap::new(&mgr, config).unwrap();
        let mut survivors = Vec::new();
        for i in 0..1000 {
            let obj = allocate_object(&gen_heap, 32).unwrap();
            if i % 2 == 1 {
                survivors.push(obj as *mut u8);
            }
        }

        let mut visitor = EveryOther { index: 0 };
        collect(&gen_heap, CollectMode::Minor, &mut visitor);

        let mut visited = Vec::new();
        iterate_over_young_objects(&gen_heap, |h| visited.push(h as *mut u8));
        assert_eq!(visited.len(), 500);
        // Every surviving object must still be reachable by containment;
        // the discarded half must not be (their bytes now belong to
        // whatever gets allocated next).
        for s in &survivors {
            assert!(gen_heap.contains(*s));
        }
    }

    #[test]
    fn allocate_object_zero_initializes_payload_and_writes_unlocked_mark() {
        let (mgr, config) = heap();
        let gen_heap = GenerationalHeap::new(&mgr, config).unwrap();
        let header = allocate_object(&gen_heap, 64).unwrap();
        unsafe {
            assert_eq!((*header).size(), 64);
            assert_eq!((*header).mark_word().state(), crate::markword::LockState::Unlocked);
            let payload = (header as *mut u8).add(std::mem::size_of::<ObjectHeader>());
            let slice = std::slice::from_raw_parts(payload, 64);
            assert!(slice.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn collect_mode_none_leaves_young_generation_untouched() {
        let (mgr, config) = heap();
        let gen_heap = GenerationalHeap::new(&mgr, config).unwrap();
        allocate_object(&gen_heap, 32).unwrap();
        let occupied_before = gen_heap.young_arena().get_occupied_size();
        let mut visitor = EveryOther { index: 0 };
        collect(&gen_heap, CollectMode::None, &mut visitor);
        assert_eq!(gen_heap.young_arena().get_occupied_size(), occupied_before);
    }
}
