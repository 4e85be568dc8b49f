//! Monitor and monitor pool (spec §4.9), backing a heavy-locked mark
//! word.
//!
//! Grounded on `examples/original_source/runtime/monitor_object_lock.h`'s
//! `ObjectLock` (`Wait`/`TimedWait`/`Notify`/`NotifyAll` RAII wrapper)
//! and the inflate-on-contention pattern in
//! `examples/original_source/runtime/object_header.cpp`'s
//! `GetHashCodeFromMonitor`. Built on `parking_lot::{Mutex, Condvar}`,
//! the synchronization primitives the teacher's codebase already
//! standardizes on for everything but the lock-free allocator fast
//! paths.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

const UNSET_HASH: u32 = u32::MAX;

struct MonitorState {
    owner: Option<u32>,
    recursion: u32,
}

/// A reentrant, waitable lock inflated from a mark word's light-lock
/// state. One monitor backs exactly one heavy-locked object at a time.
pub struct Monitor {
    state: Mutex<MonitorState>,
    /// Signaled when `owner` becomes `None`, waking a blocked `enter`.
    entry_cv: Condvar,
    /// Signaled by `notify`/`notify_all`, waking a blocked `wait`.
    wait_cv: Condvar,
    hash: AtomicU32,
}

impl Monitor {
    fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState { owner: None, recursion: 0 }),
            entry_cv: Condvar::new(),
            wait_cv: Condvar::new(),
            hash: AtomicU32::new(UNSET_HASH),
        }
    }

    /// Sets ownership directly without blocking. Used only by the
    /// inflation path, where the calling thread already conceptually
    /// holds the lock via the mark word's light-lock bits and the
    /// monitor itself is freshly allocated.
    fn force_own(&self, thread_id: u32, recursion: u32) {
        let mut s = self.state.lock();
        s.owner = Some(thread_id);
        s.recursion = recursion;
    }

    pub fn enter(&self, thread_id: u32) {
        let mut s = self.state.lock();
        loop {
            match s.owner {
                None => {
                    s.owner = Some(thread_id);
                    s.recursion = 1;
                    return;
                }
                Some(o) if o == thread_id => {
                    s.recursion += 1;
                    return;
                }
                _ => self.entry_cv.wait(&mut s),
            }
        }
    }

    pub fn exit(&self, thread_id: u32) {
        let mut s = self.state.lock();
        assert_eq!(s.owner, Some(thread_id), "MonitorExit by non-owning thread");
        s.recursion -= 1;
        if s.recursion == 0 {
            s.owner = None;
            self.entry_cv.notify_one();
        }
    }

    /// Releases the monitor, blocks until notified, then reacquires it
    /// with its original recursion count restored.
    pub fn wait(&self, thread_id: u32) {
        let mut s = self.state.lock();
        assert_eq!(s.owner, Some(thread_id), "Wait by non-owning thread");
        let saved = s.recursion;
        s.owner = None;
        s.recursion = 0;
        self.entry_cv.notify_one();
        self.wait_cv.wait(&mut s);
        self.reacquire(&mut s, thread_id, saved);
    }

    /// Like [`Self::wait`] but bounded by `timeout`. Returns `true` if
    /// woken by a notification, `false` on timeout.
    pub fn timed_wait(&self, thread_id: u32, timeout: Duration) -> bool {
        let mut s = self.state.lock();
        assert_eq!(s.owner, Some(thread_id), "TimedWait by non-owning thread");
        let saved = s.recursion;
        s.owner = None;
        s.recursion = 0;
        self.entry_cv.notify_one();
        let result = self.wait_cv.wait_for(&mut s, timeout);
        self.reacquire(&mut s, thread_id, saved);
        !result.timed_out()
    }

    fn reacquire(&self, s: &mut parking_lot::MutexGuard<'_, MonitorState>, thread_id: u32, recursion: u32) {
        loop {
            match s.owner {
                None => {
                    s.owner = Some(thread_id);
                    s.recursion = recursion;
                    return;
                }
                _ => self.entry_cv.wait(s),
            }
        }
    }

    pub fn notify_one(&self) {
        self.wait_cv.notify_one();
    }

    pub fn notify_all(&self) {
        self.wait_cv.notify_all();
    }

    /// Stores `hash` iff no hash has been stored yet; the first writer
    /// wins so the identity hash of an inflated object stays stable.
    fn set_hash(&self, hash: u32) -> u32 {
        match self.hash.compare_exchange(UNSET_HASH, hash, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => hash,
            Err(existing) => existing,
        }
    }

    fn hash(&self) -> Option<u32> {
        match self.hash.load(Ordering::Acquire) {
            UNSET_HASH => None,
            h => Some(h),
        }
    }
}

/// Owns every inflated monitor, indexed by the id a heavy-locked mark
/// word stores. Deflated ids are recycled.
pub struct MonitorPool {
    monitors: RwLock<Vec<Option<Box<Monitor>>>>,
    free_ids: Mutex<Vec<u32>>,
}

impl MonitorPool {
    pub fn new() -> Self {
        Self {
            monitors: RwLock::new(Vec::new()),
            free_ids: Mutex::new(Vec::new()),
        }
    }

    /// Allocates a fresh monitor, setting its initial ownership. Used
    /// only during inflation, when the caller already knows who
    /// conceptually owns the lock being promoted.
    pub(crate) fn inflate_owned(&self, thread_id: u32, recursion: u32) -> u32 {
        let monitor = Box::new(Monitor::new());
        monitor.force_own(thread_id, recursion);
        if let Some(id) = self.free_ids.lock().pop() {
            self.monitors.write()[id as usize] = Some(monitor);
            id
        } else {
            let mut monitors = self.monitors.write();
            monitors.push(Some(monitor));
            (monitors.len() - 1) as u32
        }
    }

    pub fn with_monitor<R>(&self, id: u32, f: impl FnOnce(&Monitor) -> R) -> R {
        let monitors = self.monitors.read();
        let m = monitors[id as usize].as_ref().expect("monitor id is live");
        f(m)
    }

    pub fn set_hash(&self, id: u32, hash: u32) -> u32 {
        self.with_monitor(id, |m| m.set_hash(hash))
    }

    pub fn hash(&self, id: u32) -> Option<u32> {
        self.with_monitor(id, |m| m.hash())
    }

    /// Releases a monitor with no remaining references, e.g. after its
    /// owning object is collected. Left as an explicit caller action
    /// since this pool has no way to observe object liveness itself.
    pub fn deflate(&self, id: u32) {
        self.monitors.write()[id as usize] = None;
        self.free_ids.lock().push(id);
    }
}

impl Default for MonitorPool {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII scoped lock over a heavy-locked object, mirroring the
/// original's `ObjectLock`.
pub struct ObjectLock<'a> {
    pool: &'a MonitorPool,
    monitor_id: u32,
    thread_id: u32,
}

impl<'a> ObjectLock<'a> {
    pub fn new(pool: &'a MonitorPool, monitor_id: u32, thread_id: u32) -> Self {
        pool.with_monitor(monitor_id, |m| m.enter(thread_id));
        Self {
            pool,
            monitor_id,
            thread_id,
        }
    }

    pub fn wait(&self) {
        self.pool.with_monitor(self.monitor_id, |m| m.wait(self.thread_id));
    }

    pub fn timed_wait(&self, timeout: Duration) -> bool {
        self.pool
            .with_monitor(self.monitor_id, |m| m.timed_wait(self.thread_id, timeout))
    }

    pub fn notify(&self) {
        self.pool.with_monitor(self.monitor_id, |m| m.notify_one());
    }

    pub fn notify_all(&self) {
        self.pool.with_monitor(self.monitor_id, |m| m.notify_all());
    }
}

impl Drop for ObjectLock<'_> {
    fn drop(&mut self) {
        self.pool.with_monitor(self.monitor_id, |m| m.exit(self.thread_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_enter_exit_on_the_same_thread_does_not_deadlock() {
        let pool = MonitorPool::new();
        let id = pool.inflate_owned(1, 0);
        pool.set_hash(id, 0);
        let lock1 = ObjectLock::new(&pool, id, 1);
        let lock2 = ObjectLock::new(&pool, id, 1);
        drop(lock2);
        drop(lock1);
    }

    /// Scenario 7 (spec §8): hash stability across inflation.
    #[test]
    fn hash_is_stable_once_set_on_an_inflated_monitor() {
        let pool = MonitorPool::new();
        let id = pool.inflate_owned(1, 0);
        let first = pool.set_hash(id, 0xCAFE);
        let second = pool.set_hash(id, 0xBEEF);
        assert_eq!(first, 0xCAFE);
        assert_eq!(second, 0xCAFE, "first writer's hash wins");
        assert_eq!(pool.hash(id), Some(0xCAFE));
    }

    #[test]
    fn deflated_id_is_recycled_by_the_next_inflate() {
        let pool = MonitorPool::new();
        let id = pool.inflate_owned(1, 0);
        pool.deflate(id);
        let id2 = pool.inflate_owned(2, 0);
        assert_eq!(id, id2);
    }

    #[test]
    fn notify_wakes_a_waiter_which_reacquires_the_monitor() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(MonitorPool::new());
        let id = pool.inflate_owned(1, 0);
        pool.with_monitor(id, |m| m.exit(1));

        let waiter_pool = Arc::clone(&pool);
        let waiter = thread::spawn(move || {
            let lock = ObjectLock::new(&waiter_pool, id, 2);
            lock.wait();
        });

        // Give the waiter a chance to park before notifying.
        thread::sleep(Duration::from_millis(50));
        {
            let _lock = ObjectLock::new(&pool, id, 1);
            _lock.notify_all();
        }
        waiter.join().unwrap();
    }
}
