//! Size-class table for the run-slots allocator (spec §4.4).
//!
//! Grounded on the teacher's `segregated_space/size_class.rs`
//! (`SIZE_STEP`-quantized classes with index<->size conversions),
//! narrowed to the fixed linear range spec §4.4 names (8..256 bytes in
//! 8-byte steps) instead of the teacher's geometric progression, since
//! every class here shares one page layout rather than a precise/small/
//! large split.

use crate::globals::{RUNSLOTS_MAX_SLOT_SIZE, RUNSLOTS_MIN_SLOT_SIZE};

pub const SIZE_STEP: usize = RUNSLOTS_MIN_SLOT_SIZE;
pub const NUM_SIZE_CLASSES: usize = RUNSLOTS_MAX_SLOT_SIZE / SIZE_STEP;

/// Rounds `size` up to its serving size class's slot size. Panics if
/// `size` exceeds [`RUNSLOTS_MAX_SLOT_SIZE`]; callers must route
/// larger requests elsewhere before calling in.
pub fn slot_size_for(size: usize) -> usize {
    debug_assert!(size > 0 && size <= RUNSLOTS_MAX_SLOT_SIZE);
    let steps = (size + SIZE_STEP - 1) / SIZE_STEP;
    steps.max(1) * SIZE_STEP
}

pub fn size_class_to_index(size: usize) -> usize {
    debug_assert_eq!(size % SIZE_STEP, 0);
    size / SIZE_STEP - 1
}

pub fn index_to_size_class(index: usize) -> usize {
    (index + 1) * SIZE_STEP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_size_rounds_up_to_the_nearest_step() {
        assert_eq!(slot_size_for(1), 8);
        assert_eq!(slot_size_for(8), 8);
        assert_eq!(slot_size_for(9), 16);
        assert_eq!(slot_size_for(256), 256);
    }

    #[test]
    fn index_and_size_class_round_trip() {
        for idx in 0..NUM_SIZE_CLASSES {
            let size = index_to_size_class(idx);
            assert_eq!(size_class_to_index(size), idx);
        }
    }
}
