//! Managed-heap memory subsystem: arenas, bump/TLAB allocation,
//! run-slots, free-list, humongous and region allocators, and the
//! object-header/monitor primitives that couple them to a GC.
//!
//! Module map:
//! - [`globals`] / [`config`] / [`space_type`]: shared constants, VM
//!   configuration, and the space/allocator tags pools are charged
//!   against.
//! - [`mmap`] / [`pool`]: OS-level virtual memory and the pool manager
//!   every allocator carves its memory from.
//! - [`sync`]: the `Locking` capability injected into allocators.
//! - [`arena`] / [`tlab`] / [`bump`]: the bump-pointer building block
//!   and the TLAB/young-generation allocator built on it.
//! - [`runslots`] / [`freelist`] / [`humongous`] / [`region`]: the
//!   fixed-slot, segregated free-list, large-object, and region-tagged
//!   allocator families.
//! - [`bitmap`] / [`crossing_map`]: the mark bitmap and first-object
//!   index a moving/card-marking GC scans against.
//! - [`markword`] / [`monitor`] / [`header`]: the object mark word,
//!   its monitor-inflation protocol, and the header every allocation
//!   carries.
//! - [`stats`]: per-space allocation counters.
//! - [`facade`] / [`gc`]: the object-allocator facades (spec §4.8) and
//!   the GC-facing `Collect`/iteration surface (spec §6) built on top
//!   of everything above.

pub mod arena;
pub mod bitmap;
pub mod bump;
pub mod config;
pub mod crossing_map;
pub mod facade;
pub mod freelist;
pub mod gc;
pub mod globals;
pub mod header;
pub mod humongous;
pub mod markword;
pub mod mmap;
pub mod monitor;
pub mod pool;
pub mod region;
pub mod runslots;
pub mod space_type;
pub mod stats;
pub mod sync;
pub mod tlab;
