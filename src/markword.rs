//! Object mark word (spec §4.9): a single machine word multiplexed
//! between lock state, identity hash, and forwarding address.
//!
//! Grounded on `examples/original_source/runtime/object_header_config.h`'s
//! `LowEndConfig`/`HighEndConfig` (state tag + thread-id-sized lock
//! field packed into one word) and the state machine
//! `examples/original_source/runtime/object_header.cpp`'s `GetHashCode`
//! switches over (`STATE_UNLOCKED`/`LIGHT_LOCKED`/`HEAVY_LOCKED`/`HASHED`),
//! extended with a `Forwarded` state for the compacting collectors this
//! crate's allocators support (spec §4.9 diagram). Packed by hand
//! rather than with `modular-bitfield` (as the teacher's `header.rs`
//! packs its size/marked fields) since the payload's meaning changes
//! per state and a fixed struct layout can't express that.

use crate::globals::{ALLOCATION_GRANULARITY, LIGHT_LOCK_MAX_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LockState {
    Unlocked = 0,
    LightLocked = 1,
    HeavyLocked = 2,
    Hashed = 3,
    Forwarded = 4,
}

impl LockState {
    fn from_bits(bits: u32) -> Self {
        match bits {
            0 => LockState::Unlocked,
            1 => LockState::LightLocked,
            2 => LockState::HeavyLocked,
            3 => LockState::Hashed,
            4 => LockState::Forwarded,
            _ => unreachable!("invalid mark word state tag {bits}"),
        }
    }
}

const STATE_BITS: u32 = 3;
const STATE_MASK: u32 = (1 << STATE_BITS) - 1;
const PAYLOAD_BITS: u32 = 32 - STATE_BITS;
const PAYLOAD_MASK: u32 = (1 << PAYLOAD_BITS) - 1;

const THREAD_ID_BITS: u32 = 19;
const THREAD_ID_MASK: u32 = (1 << THREAD_ID_BITS) - 1;
const COUNT_BITS: u32 = PAYLOAD_BITS - THREAD_ID_BITS;
const COUNT_MASK: u32 = (1 << COUNT_BITS) - 1;

const FORWARD_SHIFT: u32 = ALLOCATION_GRANULARITY.trailing_zeros();

/// A packed 32-bit mark word. Forwarding addresses are restricted to
/// the low 4 GiB of the address space (`PAYLOAD_BITS + FORWARD_SHIFT`
/// bits of addressable range) — acceptable for the bounded test heaps
/// this crate allocates; a production 64-bit word would follow
/// `object_header_config.h`'s `HighEndConfig<uint64_t>` instead. See
/// DESIGN.md.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MarkWord(u32);

impl MarkWord {
    pub fn unlocked() -> Self {
        MarkWord(LockState::Unlocked as u32)
    }

    pub fn state(self) -> LockState {
        LockState::from_bits(self.0 & STATE_MASK)
    }

    fn payload(self) -> u32 {
        (self.0 >> STATE_BITS) & PAYLOAD_MASK
    }

    fn with(state: LockState, payload: u32) -> Self {
        debug_assert!(payload <= PAYLOAD_MASK);
        MarkWord((payload << STATE_BITS) | state as u32)
    }

    pub fn light_locked(thread_id: u32, count: u32) -> Self {
        debug_assert!(count <= LIGHT_LOCK_MAX_COUNT);
        let payload = (thread_id & THREAD_ID_MASK) | ((count & COUNT_MASK) << THREAD_ID_BITS);
        Self::with(LockState::LightLocked, payload)
    }

    pub fn light_lock_thread_id(self) -> u32 {
        debug_assert_eq!(self.state(), LockState::LightLocked);
        self.payload() & THREAD_ID_MASK
    }

    pub fn light_lock_count(self) -> u32 {
        debug_assert_eq!(self.state(), LockState::LightLocked);
        (self.payload() >> THREAD_ID_BITS) & COUNT_MASK
    }

    pub fn heavy_locked(monitor_id: u32) -> Self {
        Self::with(LockState::HeavyLocked, monitor_id & PAYLOAD_MASK)
    }

    pub fn heavy_lock_monitor_id(self) -> u32 {
        debug_assert_eq!(self.state(), LockState::HeavyLocked);
        self.payload()
    }

    pub fn hashed(hash: u32) -> Self {
        Self::with(LockState::Hashed, hash & PAYLOAD_MASK)
    }

    pub fn hash(self) -> u32 {
        debug_assert_eq!(self.state(), LockState::Hashed);
        self.payload()
    }

    pub fn forwarded(to: *const u8) -> Self {
        let shifted = ((to as usize) >> FORWARD_SHIFT) as u32;
        Self::with(LockState::Forwarded, shifted & PAYLOAD_MASK)
    }

    pub fn forwarding_address(self) -> *const u8 {
        debug_assert_eq!(self.state(), LockState::Forwarded);
        ((self.payload() as usize) << FORWARD_SHIFT) as *const u8
    }

    pub fn to_bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        MarkWord(bits)
    }
}

/// Masks a hash value down to what [`MarkWord::hashed`]'s payload can
/// carry, so a hash computed once and a hash read back out of the mark
/// word always compare equal.
pub fn mask_hash(hash: u32) -> u32 {
    hash & PAYLOAD_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_lock_round_trips_thread_id_and_count() {
        let mw = MarkWord::light_locked(42, 7);
        assert_eq!(mw.state(), LockState::LightLocked);
        assert_eq!(mw.light_lock_thread_id(), 42);
        assert_eq!(mw.light_lock_count(), 7);
    }

    #[test]
    fn heavy_lock_round_trips_monitor_id() {
        let mw = MarkWord::heavy_locked(1234);
        assert_eq!(mw.state(), LockState::HeavyLocked);
        assert_eq!(mw.heavy_lock_monitor_id(), 1234);
    }

    #[test]
    fn forwarding_address_round_trips_through_the_alignment_shift() {
        let target = (0x10_0000usize) as *const u8;
        let mw = MarkWord::forwarded(target);
        assert_eq!(mw.state(), LockState::Forwarded);
        assert_eq!(mw.forwarding_address(), target);
    }

    #[test]
    fn bit_encodings_round_trip_through_raw_bits() {
        let mw = MarkWord::hashed(mask_hash(0xDEAD_BEEF));
        let raw = mw.to_bits();
        let back = MarkWord::from_bits(raw);
        assert_eq!(back.state(), LockState::Hashed);
        assert_eq!(back.hash(), mw.hash());
    }
}
