//! Memory statistics (spec §3, §6): atomic counters per space type,
//! readable without locking out allocators.
//!
//! Grounded on the teacher's `HeapStatistics`/`FormattedSize` (a
//! human-readable B/K/M/G report), generalized from the teacher's
//! immix-specific fields (`memory_allocated_for_immix_blocks`,
//! `large_allocations`) to one counter set per [`SpaceType`].

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::space_type::SpaceType;

/// Bytes and object counts for one space type, tracked independently
/// so a facade can report per-generation pressure.
#[derive(Default)]
pub struct SpaceStats {
    bytes_allocated: AtomicUsize,
    objects_allocated: AtomicUsize,
    pools_mapped: AtomicUsize,
}

impl SpaceStats {
    pub fn record_alloc(&self, bytes: usize) {
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_mapped(&self) {
        self.pools_mapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    pub fn objects_allocated(&self) -> usize {
        self.objects_allocated.load(Ordering::Relaxed)
    }

    pub fn pools_mapped(&self) -> usize {
        self.pools_mapped.load(Ordering::Relaxed)
    }
}

/// Whole-heap statistics, one [`SpaceStats`] per [`SpaceType`] plus
/// collection-cycle counters.
pub struct MemStats {
    spaces: [SpaceStats; 5],
    total_gc_cycles: AtomicU64,
    total_objects_found_on_stack: AtomicU64,
}

impl MemStats {
    pub fn new() -> Self {
        Self {
            spaces: Default::default(),
            total_gc_cycles: AtomicU64::new(0),
            total_objects_found_on_stack: AtomicU64::new(0),
        }
    }

    pub fn space(&self, ty: SpaceType) -> &SpaceStats {
        &self.spaces[ty.index()]
    }

    pub fn record_gc_cycle(&self) {
        self.total_gc_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_objects_found_on_stack(&self, n: u64) {
        self.total_objects_found_on_stack.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total_gc_cycles(&self) -> u64 {
        self.total_gc_cycles.load(Ordering::Relaxed)
    }

    pub fn total_memory_allocated(&self) -> usize {
        self.spaces.iter().map(|s| s.bytes_allocated()).sum()
    }
}

impl Default for MemStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a byte count using the largest whole unit it's at least
/// one of (B/K/M/G), matching the teacher's `FormattedSize`.
pub struct FormattedSize(pub usize);

impl fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(&str, usize); 4] = [("G", 1 << 30), ("M", 1 << 20), ("K", 1 << 10), ("B", 1)];
        for (suffix, scale) in UNITS {
            if self.0 >= scale {
                let whole = self.0 / scale;
                let frac = (self.0 % scale) * 10 / scale;
                return if frac == 0 {
                    write!(f, "{whole}{suffix}")
                } else {
                    write!(f, "{whole}.{frac}{suffix}")
                };
            }
        }
        write!(f, "0B")
    }
}

impl fmt::Display for MemStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "gc cycles: {}", self.total_gc_cycles())?;
        for ty in SpaceType::ALL {
            let s = self.space(ty);
            writeln!(
                f,
                "{ty:?}: {} allocated across {} objects, {} pools mapped",
                FormattedSize(s.bytes_allocated()),
                s.objects_allocated(),
                s.pools_mapped()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_stats_accumulate_independently_per_space() {
        let stats = MemStats::new();
        stats.space(SpaceType::Object).record_alloc(128);
        stats.space(SpaceType::Humongous).record_alloc(4096);
        assert_eq!(stats.space(SpaceType::Object).bytes_allocated(), 128);
        assert_eq!(stats.space(SpaceType::Humongous).bytes_allocated(), 4096);
        assert_eq!(stats.total_memory_allocated(), 128 + 4096);
    }

    #[test]
    fn formatted_size_picks_the_largest_whole_unit() {
        assert_eq!(FormattedSize(512).to_string(), "512B");
        assert_eq!(FormattedSize(2048).to_string(), "2K");
        assert_eq!(FormattedSize(1536).to_string(), "1.5K");
        assert_eq!(FormattedSize(10 * (1 << 20)).to_string(), "10M");
    }
}
