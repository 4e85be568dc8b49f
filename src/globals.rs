//! Size constants shared across the allocator family.
//!
//! Mirrors the teacher's `globals.rs` (block/line sizes for the immix
//! collector); the values here are the managed-heap constants named in
//! the data model instead.

/// Default OS page size assumed when `mmap`-ing pools. Real page size is
/// queried at runtime via [`crate::mmap::page_size`]; this is only used
/// for `const` contexts that cannot call into libc.
pub const PAGE_SIZE: usize = 4096;

/// A `RunSlots` page is self-aligned to its own size so the page header
/// is recoverable from any interior pointer by masking (spec §3).
pub const RUNSLOTS_PAGE_SIZE: usize = 256 * 1024;
pub const RUNSLOTS_ALIGNMENT: usize = RUNSLOTS_PAGE_SIZE;

/// Largest size class served by the run-slots allocator.
pub const RUNSLOTS_MAX_SLOT_SIZE: usize = 256;
/// Smallest size class served by the run-slots allocator.
pub const RUNSLOTS_MIN_SLOT_SIZE: usize = 8;

/// Default alignment used by the free-list allocator for ordinary
/// requests (spec §4.5).
pub const FREELIST_DEFAULT_ALIGNMENT: usize = 8;
/// Minimum block size: large enough to host the header plus the
/// intrusive free-list links when the block is free.
pub const FREELIST_MIN_BLOCK_SIZE: usize = 64;
/// Width, in bytes, of one segregated-bucket range.
pub const SEGREGATED_LIST_FREE_BLOCK_RANGE: usize = 256;
/// Largest allocation the free-list allocator will serve; above this,
/// allocations are routed to the humongous allocator.
pub const FREELIST_MAX_ALLOC_SIZE: usize = 8 * 1024 * 1024;

/// Default size of a pool handed out by the pool manager when an
/// allocator asks for more memory without specifying an exact size.
pub const DEFAULT_POOL_SIZE: usize = 4 * 1024 * 1024;

/// Default region size for the region allocator (spec: 256 KiB - 1 MiB).
pub const DEFAULT_REGION_SIZE: usize = 1024 * 1024;

/// Default granularity of the crossing map, in bytes per card.
pub const CROSSING_MAP_GRANULARITY: usize = 512;

/// All managed allocations are rounded up to this granularity.
pub const ALLOCATION_GRANULARITY: usize = 8;

/// Maximum recursion count a light lock may reach before a
/// `MonitorEnter` is forced to inflate to a heavy lock (spec §4.9).
pub const LIGHT_LOCK_MAX_COUNT: u32 = (1 << 10) - 1;

pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}
