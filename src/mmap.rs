//! Page-granular reserve / commit / protect / release of virtual memory.
//!
//! Adapted from the teacher's `_win`/`_unix` split in `mmap.rs`: same
//! `start`/`size` shape and the same PROT_READ|PROT_WRITE-on-commit,
//! MADV_DONTNEED-on-decommit idiom, but generalized from the
//! immix-block aligner to an arbitrary-alignment pool primitive, and
//! given a fallible constructor so the pool manager (§4.1) can report
//! reservation exhaustion with `None` instead of panicking.

use crate::globals::{align_up, PAGE_SIZE};

#[cfg(windows)]
mod imp {
    use std::ptr::null_mut;
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
    use winapi::um::winnt::{MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

    pub fn reserve(size: usize) -> *mut u8 {
        unsafe { VirtualAlloc(null_mut(), size, MEM_RESERVE, PAGE_READWRITE) as *mut u8 }
    }

    pub fn commit(addr: *mut u8, size: usize) -> bool {
        unsafe { !VirtualAlloc(addr.cast(), size, MEM_COMMIT, PAGE_READWRITE).is_null() }
    }

    pub fn decommit(addr: *mut u8, size: usize) {
        unsafe {
            VirtualFree(addr.cast(), size, MEM_DECOMMIT);
        }
    }

    pub fn protect_none(addr: *mut u8, size: usize) {
        unsafe {
            let mut old = 0u32;
            VirtualProtect(addr.cast(), size, PAGE_NOACCESS, &mut old);
        }
    }

    pub fn release(addr: *mut u8, _size: usize) {
        unsafe {
            VirtualFree(addr.cast(), 0, MEM_RELEASE);
        }
    }
}

#[cfg(unix)]
mod imp {
    pub fn reserve(size: usize) -> *mut u8 {
        unsafe {
            let map = libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if map == libc::MAP_FAILED {
                core::ptr::null_mut()
            } else {
                map as *mut u8
            }
        }
    }

    pub fn commit(addr: *mut u8, size: usize) -> bool {
        unsafe { libc::mprotect(addr.cast(), size, libc::PROT_READ | libc::PROT_WRITE) == 0 }
    }

    pub fn decommit(addr: *mut u8, size: usize) {
        unsafe {
            libc::madvise(addr.cast(), size, libc::MADV_DONTNEED);
            libc::mprotect(addr.cast(), size, libc::PROT_NONE);
        }
    }

    pub fn protect_none(addr: *mut u8, size: usize) {
        unsafe {
            libc::mprotect(addr.cast(), size, libc::PROT_NONE);
        }
    }

    pub fn release(addr: *mut u8, size: usize) {
        unsafe {
            libc::munmap(addr.cast(), size);
        }
    }
}

/// A single anonymous virtual memory reservation. Memory starts out
/// reserved-but-inaccessible; ranges must be [`Mmap::commit`]-ed before
/// use and may be [`Mmap::decommit`]-ed to return physical pages to the
/// OS without giving up the address range.
pub struct Mmap {
    start: *mut u8,
    size: usize,
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Reserves `size` bytes (rounded up to the page size). Returns
    /// `None` on reservation exhaustion; never panics (spec §4.1: the
    /// pool manager's only failure mode is a null/`None` return).
    pub fn reserve(size: usize) -> Option<Self> {
        let size = align_up(size.max(1), PAGE_SIZE);
        let start = imp::reserve(size);
        if start.is_null() {
            None
        } else {
            Some(Self { start, size })
        }
    }

    pub fn start(&self) -> *mut u8 {
        self.start
    }

    pub fn end(&self) -> *mut u8 {
        unsafe { self.start.add(self.size) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, addr: *const u8) -> bool {
        (self.start as *const u8) <= addr && addr < self.end() as *const u8
    }

    /// Makes `[addr, addr+size)` readable/writable. `addr` and `size`
    /// must lie within this reservation and be page-aligned.
    #[must_use]
    pub fn commit(&self, addr: *mut u8, size: usize) -> bool {
        debug_assert!(self.contains(addr) || size == 0);
        imp::commit(addr, size)
    }

    /// Returns physical pages to the OS without releasing the virtual
    /// range; subsequent access is undefined until re-`commit`-ed.
    pub fn decommit(&self, addr: *mut u8, size: usize) {
        debug_assert!(self.contains(addr) || size == 0);
        imp::decommit(addr, size);
    }

    /// Marks a range inaccessible without decommitting, used to guard
    /// unused tail pages of a humongous pool.
    pub fn protect_none(&self, addr: *mut u8, size: usize) {
        imp::protect_none(addr, size);
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        imp::release(self.start, self.size);
    }
}

pub fn page_size() -> usize {
    #[cfg(unix)]
    unsafe {
        libc::sysconf(libc::_SC_PAGESIZE) as usize
    }
    #[cfg(not(unix))]
    {
        PAGE_SIZE
    }
}
