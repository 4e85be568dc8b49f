//! Space-type tag attached to every pool (spec §3, §4.1).

/// Allocation category a pool is charged against. Mirrors
/// `examples/original_source/runtime/include/mem/gc_types.h`'s
/// `SpaceType` enum, trimmed to the subset spec §3 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpaceType {
    Object,
    NonMovableObject,
    Humongous,
    Internal,
    Compiler,
}

impl SpaceType {
    pub const ALL: [SpaceType; 5] = [
        SpaceType::Object,
        SpaceType::NonMovableObject,
        SpaceType::Humongous,
        SpaceType::Internal,
        SpaceType::Compiler,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Identifies which allocator family owns a pool, recorded by the pool
/// manager so `GetAllocatorInfoForAddr` can classify a raw pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    Arena,
    Bump,
    RunSlots,
    FreeList,
    Humongous,
    Region,
}

/// Opaque identity of the allocator instance that owns a pool, used
/// alongside [`AllocatorKind`] to disambiguate e.g. the young vs. old
/// free-list allocator in a generational facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorId(pub u32);
