//! Object header (spec §3, §4.9): prepended to every managed
//! allocation, carrying the mark word state machine.
//!
//! Grounded on the teacher's `HeapObjectHeader` (a small
//! `modular-bitfield`-packed struct prepended to every object) and
//! `examples/original_source/runtime/object_header.cpp`'s
//! `GetHashCode`/`AtomicSetMark` state machine, which this module
//! reimplements directly against [`MarkWord`]/[`MonitorPool`] — the
//! teacher's header has no lock-state bits at all (it's a tracing-GC
//! header, not a monitor-bearing one), so that part is new rather than
//! adapted.
//!
//! Class metadata (the teacher's `get_gc_info_index`/vtable machinery)
//! belongs to the class-linker collaborator this crate's scope
//! excludes; [`ObjectHeader`] only carries what every allocator and
//! the monitor subsystem need: size and the mark word.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::globals::LIGHT_LOCK_MAX_COUNT;
use crate::markword::{mask_hash, LockState, MarkWord};
use crate::monitor::MonitorPool;

/// Header prepended to every managed allocation.
#[repr(C)]
pub struct ObjectHeader {
    mark: AtomicU32,
    size: u32,
}

impl ObjectHeader {
    pub fn new(size: u32) -> Self {
        Self {
            mark: AtomicU32::new(MarkWord::unlocked().to_bits()),
            size,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mark_word(&self) -> MarkWord {
        MarkWord::from_bits(self.mark.load(Ordering::Acquire))
    }

    fn cas(&self, old: MarkWord, new: MarkWord) -> bool {
        self.mark
            .compare_exchange(old.to_bits(), new.to_bits(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn compute_hash(&self) -> u32 {
        let addr = self as *const Self as usize as u32;
        mask_hash(addr.wrapping_mul(2_654_435_761))
    }

    /// `GetHashCode`: returns this object's stable identity hash,
    /// computing and recording it on first call. Forces inflation to a
    /// heavy lock when called on a light-locked object, since the
    /// light-lock payload has no room left for a hash.
    pub fn get_hash_code(&self, monitors: &MonitorPool) -> u32 {
        loop {
            let mw = self.mark_word();
            match mw.state() {
                LockState::Unlocked => {
                    let hash = self.compute_hash();
                    if self.cas(mw, MarkWord::hashed(hash)) {
                        return hash;
                    }
                }
                LockState::Hashed => return mw.hash(),
                LockState::LightLocked => {
                    let thread_id = mw.light_lock_thread_id();
                    let count = mw.light_lock_count();
                    let monitor_id = monitors.inflate_owned(thread_id, count + 1);
                    let hash = self.compute_hash();
                    monitors.set_hash(monitor_id, hash);
                    if self.cas(mw, MarkWord::heavy_locked(monitor_id)) {
                        return monitors.hash(monitor_id).unwrap();
                    }
                    monitors.deflate(monitor_id);
                }
                LockState::HeavyLocked => {
                    let id = mw.heavy_lock_monitor_id();
                    if let Some(hash) = monitors.hash(id) {
                        return hash;
                    }
                    return monitors.set_hash(id, self.compute_hash());
                }
                LockState::Forwarded => panic!("GetHashCode on a forwarded object header"),
            }
        }
    }

    /// `MonitorEnter`: acquires the object's lock, starting as a
    /// cheap light lock and inflating to a heavy lock on contention or
    /// on light-lock recursion overflow. Returns the heavy monitor id
    /// once inflated so the caller can build an
    /// [`crate::monitor::ObjectLock`] for `Wait`/`Notify`; `None` while
    /// still light-locked (no monitor backs it yet).
    pub fn monitor_enter(&self, monitors: &MonitorPool, thread_id: u32) -> Option<u32> {
        loop {
            let mw = self.mark_word();
            match mw.state() {
                LockState::Unlocked => {
                    if self.cas(mw, MarkWord::light_locked(thread_id, 0)) {
                        return None;
                    }
                }
                LockState::Hashed => {
                    let monitor_id = monitors.inflate_owned(thread_id, 0);
                    monitors.set_hash(monitor_id, mw.hash());
                    if self.cas(mw, MarkWord::heavy_locked(monitor_id)) {
                        return Some(monitor_id);
                    }
                    monitors.deflate(monitor_id);
                }
                LockState::LightLocked => {
                    let owner = mw.light_lock_thread_id();
                    let count = mw.light_lock_count();
                    if owner == thread_id {
                        if count >= LIGHT_LOCK_MAX_COUNT {
                            let monitor_id = monitors.inflate_owned(thread_id, count as u32 + 2);
                            if self.cas(mw, MarkWord::heavy_locked(monitor_id)) {
                                return Some(monitor_id);
                            }
                            monitors.deflate(monitor_id);
                        } else if self.cas(mw, MarkWord::light_locked(owner, count + 1)) {
                            return None;
                        }
                    } else {
                        let monitor_id = monitors.inflate_owned(owner, count + 1);
                        if self.cas(mw, MarkWord::heavy_locked(monitor_id)) {
                            monitors.with_monitor(monitor_id, |m| m.enter(thread_id));
                            return Some(monitor_id);
                        }
                        monitors.deflate(monitor_id);
                    }
                }
                LockState::HeavyLocked => {
                    let id = mw.heavy_lock_monitor_id();
                    monitors.with_monitor(id, |m| m.enter(thread_id));
                    return Some(id);
                }
                LockState::Forwarded => panic!("MonitorEnter on a forwarded object header"),
            }
        }
    }

    /// `MonitorExit`, the light-lock counterpart to
    /// [`Self::monitor_enter`]'s `None` path. Heavy-locked objects
    /// release through [`crate::monitor::ObjectLock`]'s `Drop` instead.
    pub fn monitor_exit_light(&self, thread_id: u32) {
        loop {
            let mw = self.mark_word();
            assert_eq!(mw.state(), LockState::LightLocked, "MonitorExit on a non-light-locked header");
            assert_eq!(mw.light_lock_thread_id(), thread_id, "MonitorExit by non-owning thread");
            let count = mw.light_lock_count();
            let new = if count == 0 {
                MarkWord::unlocked()
            } else {
                MarkWord::light_locked(thread_id, count - 1)
            };
            if self.cas(mw, new) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_repeated_calls() {
        let monitors = MonitorPool::new();
        let header = ObjectHeader::new(32);
        let h1 = header.get_hash_code(&monitors);
        let h2 = header.get_hash_code(&monitors);
        assert_eq!(h1, h2);
        assert_eq!(header.mark_word().state(), LockState::Hashed);
    }

    #[test]
    fn light_lock_enter_exit_round_trips_to_unlocked() {
        let monitors = MonitorPool::new();
        let header = ObjectHeader::new(16);
        assert!(header.monitor_enter(&monitors, 1).is_none());
        assert_eq!(header.mark_word().state(), LockState::LightLocked);
        header.monitor_exit_light(1);
        assert_eq!(header.mark_word().state(), LockState::Unlocked);
    }

    /// Scenario 6 (spec §8): monitor inflation under recursion overflow.
    #[test]
    fn light_lock_recursion_overflow_forces_inflation() {
        let monitors = MonitorPool::new();
        let header = ObjectHeader::new(16);
        for _ in 0..=LIGHT_LOCK_MAX_COUNT {
            assert!(header.monitor_enter(&monitors, 1).is_none());
        }
        // One more recursive enter must inflate since the light-lock
        // count field is saturated.
        let inflated = header.monitor_enter(&monitors, 1);
        assert!(inflated.is_some());
        assert_eq!(header.mark_word().state(), LockState::HeavyLocked);
    }

    /// Scenario 7 (spec §8): hash stability across inflation.
    #[test]
    fn hash_survives_inflation_from_light_lock_to_heavy() {
        let monitors = MonitorPool::new();
        let header = ObjectHeader::new(16);
        header.monitor_enter(&monitors, 1);
        let hash = header.get_hash_code(&monitors);
        assert_eq!(header.mark_word().state(), LockState::HeavyLocked);
        assert_eq!(header.get_hash_code(&monitors), hash);
    }
}
