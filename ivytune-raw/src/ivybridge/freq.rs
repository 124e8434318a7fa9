//! Frequency status register definitions for Ivy Bridge
//!
//! Both registers here are read-only status words; only the ratio byte
//! in bits 15:8 is of interest.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 4

use crate::fields;

/// MSR addresses for frequency status
pub mod msr {
    /// Current performance state of the core
    pub const IA32_PERF_STATUS: u64 = 0x198;

    /// Platform frequency information, including the base ratio
    pub const MSR_PLATFORM_INFO: u64 = 0xCE;
}

/// Current frequency ratio from a raw IA32_PERF_STATUS value (bits 15:8).
///
/// Multiply by the bus clock to get the operating frequency; see
/// [`crate::ivybridge::BCLK_MHZ`].
pub fn frequency_ratio(perf_status: u64) -> u8 {
    fields::extract(perf_status, 15, 8) as u8
}

/// Maximum non-turbo ratio from a raw MSR_PLATFORM_INFO value (bits 15:8).
///
/// This is the base frequency multiplier the package settles at with
/// turbo unavailable.
pub fn max_non_turbo_ratio(platform_info: u64) -> u8 {
    fields::extract(platform_info, 15, 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_ratio_uses_bits_15_8() {
        let raw = (34u64 << 8) | 0x21 | (0xABC << 16);
        assert_eq!(frequency_ratio(raw), 34);
    }

    #[test]
    fn test_max_non_turbo_ratio() {
        let raw = (34u64 << 8) | (1 << 28);
        assert_eq!(max_non_turbo_ratio(raw), 34);
    }
}
