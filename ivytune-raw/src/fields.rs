//! Bit-field extraction and insertion for 64-bit register values
//!
//! Every register layout in this crate is built from the same two
//! primitives: pull a contiguous bit range out of a raw value, or splice
//! a field into one while leaving every other bit untouched. Bit ranges
//! are inclusive on both ends and numbered LSB-first, matching the
//! `[hi:lo]` notation used in Intel's register tables.

/// Extract bits `[hi:lo]` of `value`, shifted down to bit 0.
///
/// `lo <= hi <= 63` is a caller invariant, checked only in debug builds.
pub fn extract(value: u64, hi: u32, lo: u32) -> u64 {
    debug_assert!(lo <= hi && hi <= 63, "invalid bit range [{hi}:{lo}]");
    (value >> lo) & mask(hi, lo)
}

/// Return `value` with bits `[hi:lo]` replaced by `field`.
///
/// Bits of `field` above the range width are silently discarded, the way
/// hardware truncates an oversized write to a fixed-width field.
pub fn insert(value: u64, hi: u32, lo: u32, field: u64) -> u64 {
    debug_assert!(lo <= hi && hi <= 63, "invalid bit range [{hi}:{lo}]");
    let mask = mask(hi, lo);
    (value & !(mask << lo)) | ((field & mask) << lo)
}

/// Low-aligned mask covering the width of `[hi:lo]`.
fn mask(hi: u32, lo: u32) -> u64 {
    let width = hi - lo + 1;
    if width == 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_known_patterns() {
        assert_eq!(extract(0xDEAD_BEEF_0000_0000, 63, 32), 0xDEAD_BEEF);
        assert_eq!(extract(0x0000_0000_0000_1AD0, 15, 4), 0x1AD);
        assert_eq!(extract(1u64 << 38, 38, 38), 1);
        assert_eq!(extract(u64::MAX, 63, 0), u64::MAX);
    }

    #[test]
    fn test_insert_replaces_only_the_range() {
        assert_eq!(insert(u64::MAX, 15, 8, 0), 0xFFFF_FFFF_FFFF_00FF);
        assert_eq!(insert(0, 38, 38, 1), 1u64 << 38);
        assert_eq!(insert(0, 63, 0, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_round_trip_truncates_to_field_width() {
        let value = 0x0123_4567_89AB_CDEF;
        let oversized = u64::MAX;
        for (hi, lo) in [(63, 0), (63, 63), (0, 0), (38, 38), (14, 0), (23, 17), (55, 49)] {
            let updated = insert(value, hi, lo, oversized);
            let width = hi - lo + 1;
            let expect = if width == 64 {
                u64::MAX
            } else {
                (1u64 << width) - 1
            };
            assert_eq!(extract(updated, hi, lo), expect, "range [{hi}:{lo}]");
            // Bits outside the range survive
            if lo > 0 {
                assert_eq!(extract(updated, lo - 1, 0), extract(value, lo - 1, 0));
            }
            if hi < 63 {
                assert_eq!(extract(updated, 63, hi + 1), extract(value, 63, hi + 1));
            }
        }
    }

    #[test]
    fn test_insert_then_extract_returns_field() {
        assert_eq!(extract(insert(0, 23, 17, 0x4A), 23, 17), 0x4A);
        assert_eq!(extract(insert(0xFFFF, 14, 0, 360), 14, 0), 360);
    }
}
