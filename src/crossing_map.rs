//! Crossing map (spec §3): for each card-sized slice of a space,
//! records the offset of the first object that starts within it, so a
//! card-table scan can jump straight to an object boundary instead of
//! walking from the region's start.
//!
//! Grounded on the teacher's `internal/card_table.rs` card-table
//! layout (`CARD_SHIFT`/`CARD_SIZE`, atomic per-card updates), applied
//! here to first-object tracking instead of dirty/clean marking.
//! The teacher's non-x86 CAS fallback has a name typo
//! (`compare_exchange_weal`) that is not reproduced here.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::bump::AllocObserver;
use crate::globals::CROSSING_MAP_GRANULARITY;

/// Sentinel meaning "no object starts in this card".
const UNSET: u32 = u32::MAX;

/// One entry per card over `[base, base + span)`.
pub struct CrossingMap {
    base: usize,
    card_size: usize,
    first_object_offset: Vec<AtomicU32>,
}

impl CrossingMap {
    pub fn new(base: *const u8, span: usize) -> Self {
        Self::with_card_size(base, span, CROSSING_MAP_GRANULARITY)
    }

    pub fn with_card_size(base: *const u8, span: usize, card_size: usize) -> Self {
        debug_assert!(card_size.is_power_of_two());
        let num_cards = (span + card_size - 1) / card_size;
        let mut first_object_offset = Vec::with_capacity(num_cards);
        first_object_offset.resize_with(num_cards, || AtomicU32::new(UNSET));
        Self {
            base: base as usize,
            card_size,
            first_object_offset,
        }
    }

    fn card_index(&self, addr: *const u8) -> usize {
        (addr as usize - self.base) / self.card_size
    }

    /// Records that an object starts at `addr`. Only the first
    /// recording per card is kept, matching bump/TLAB allocation's
    /// monotonic address order — later objects in the same card are
    /// necessarily not the card's first object.
    pub fn record_object_start(&self, addr: *const u8) {
        let card = self.card_index(addr);
        let offset_in_card = (addr as usize - self.base) % self.card_size;
        let _ = self.first_object_offset[card].compare_exchange(
            UNSET,
            offset_in_card as u32,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Returns the offset (from the card's start) of the first object
    /// known to start within the card containing `addr`.
    pub fn first_object_offset_for(&self, addr: *const u8) -> Option<u32> {
        let card = self.card_index(addr);
        let v = self.first_object_offset[card].load(Ordering::Acquire);
        if v == UNSET {
            None
        } else {
            Some(v)
        }
    }

    /// Clears every card's recorded offset, e.g. after a region reset.
    pub fn clear(&self) {
        for c in &self.first_object_offset {
            c.store(UNSET, Ordering::Release);
        }
    }

    pub fn card_size(&self) -> usize {
        self.card_size
    }

    /// Walks backward from the card containing `addr` to the nearest
    /// card with a recorded object start, since a card with no start of
    /// its own is necessarily covered by an object that began in an
    /// earlier card (spec §4.3: "use the crossing map to find the first
    /// object overlapping `lo`").
    pub fn first_object_at_or_before(&self, addr: *const u8) -> Option<*const u8> {
        let mut card = self.card_index(addr);
        loop {
            let v = self.first_object_offset[card].load(Ordering::Acquire);
            if v != UNSET {
                let card_base = self.base + card * self.card_size;
                return Some((card_base + v as usize) as *const u8);
            }
            if card == 0 {
                return None;
            }
            card -= 1;
        }
    }
}

/// Wires a [`CrossingMap`] into [`crate::bump::BumpAllocator`]'s
/// `AllocObserver` seam (spec §9): every successful bump allocation
/// records its start, and a `Reset` re-initialises the map over the
/// arena's full extent (spec §4.3).
pub struct CrossingMapObserver {
    map: CrossingMap,
}

impl CrossingMapObserver {
    pub fn new(base: *const u8, span: usize) -> Self {
        Self {
            map: CrossingMap::new(base, span),
        }
    }

    pub fn map(&self) -> &CrossingMap {
        &self.map
    }
}

impl AllocObserver for CrossingMapObserver {
    fn on_alloc(&self, ptr: *mut u8, _size: usize) {
        self.map.record_object_start(ptr);
    }

    fn on_reset(&self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_recorded_object_in_a_card_wins() {
        let buf = vec![0u8; 4096];
        let cm = CrossingMap::with_card_size(buf.as_ptr(), 4096, 512);
        let a = unsafe { buf.as_ptr().add(10) };
        let b = unsafe { buf.as_ptr().add(100) };
        cm.record_object_start(b);
        cm.record_object_start(a);
        assert_eq!(cm.first_object_offset_for(a), Some(100));
    }

    #[test]
    fn cards_without_an_object_report_none() {
        let buf = vec![0u8; 4096];
        let cm = CrossingMap::with_card_size(buf.as_ptr(), 4096, 512);
        let untouched = unsafe { buf.as_ptr().add(600) };
        assert_eq!(cm.first_object_offset_for(untouched), None);
    }

    #[test]
    fn clear_resets_every_card() {
        let buf = vec![0u8; 4096];
        let cm = CrossingMap::with_card_size(buf.as_ptr(), 4096, 512);
        cm.record_object_start(buf.as_ptr());
        cm.clear();
        assert_eq!(cm.first_object_offset_for(buf.as_ptr()), None);
    }

    #[test]
    fn first_object_at_or_before_walks_back_to_an_earlier_card() {
        let buf = vec![0u8; 4096];
        let cm = CrossingMap::with_card_size(buf.as_ptr(), 4096, 512);
        let start = unsafe { buf.as_ptr().add(10) };
        cm.record_object_start(start);
        let mid_next_card = unsafe { buf.as_ptr().add(600) };
        assert_eq!(cm.first_object_at_or_before(mid_next_card), Some(start));
    }

    #[test]
    fn first_object_at_or_before_is_none_when_nothing_precedes_addr() {
        let buf = vec![0u8; 4096];
        let cm = CrossingMap::with_card_size(buf.as_ptr(), 4096, 512);
        assert_eq!(cm.first_object_at_or_before(buf.as_ptr()), None);
    }

    #[test]
    fn observer_records_every_alloc_and_clears_on_reset() {
        let buf = vec![0u8; 4096];
        let observer = CrossingMapObserver::new(buf.as_ptr(), 4096);
        let obj = unsafe { buf.as_ptr().add(16) };
        observer.on_alloc(obj as *mut u8, 32);
        assert_eq!(observer.map().first_object_offset_for(obj), Some(16));
        observer.on_reset();
        assert_eq!(observer.map().first_object_offset_for(obj), None);
    }
}
