//! Turbo boost register definitions for Ivy Bridge
//!
//! Two registers control turbo behaviour: a global disable bit in
//! IA32_MISC_ENABLE, and a table of maximum turbo ratios keyed by the
//! number of active cores in MSR_TURBO_RATIO_LIMIT.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 14.3.2.1: Opportunistic Processor Performance Operation

use thiserror::Error;

use crate::fields;
use crate::register::RegisterLayout;

/// MSR addresses for turbo control
pub mod msr {
    /// Miscellaneous processor features - bit 38 disables turbo
    pub const IA32_MISC_ENABLE: u64 = 0x1A0;

    /// Maximum turbo ratio per number of active cores
    pub const MSR_TURBO_RATIO_LIMIT: u64 = 0x1AD;
}

/// IA32_MISC_ENABLE bit 38: "IDA/Turbo Mode Disable".
///
/// The hardware sense is inverted relative to the user-facing notion of
/// turbo being on: a set bit means turbo is disabled.
pub const TURBO_DISABLE_BIT: u32 = 38;

/// Number of ratio slots in MSR_TURBO_RATIO_LIMIT.
pub const TURBO_TABLE_ENTRIES: usize = 8;

/// Slots that are meaningful on quad-core parts, and the only ones user
/// input may change. Slots beyond these are preserved verbatim on writes.
pub const EDITABLE_RATIOS: usize = 4;

/// Whether turbo boost is enabled in a raw IA32_MISC_ENABLE value.
pub fn turbo_enabled(misc_enable: u64) -> bool {
    fields::extract(misc_enable, TURBO_DISABLE_BIT, TURBO_DISABLE_BIT) == 0
}

/// Return `misc_enable` with the turbo disable bit set to match `enable`.
///
/// All other bits are preserved; IA32_MISC_ENABLE controls many unrelated
/// features and must only ever be read-modify-written.
pub fn with_turbo_enabled(misc_enable: u64, enable: bool) -> u64 {
    let disable = if enable { 0 } else { 1 };
    fields::insert(misc_enable, TURBO_DISABLE_BIT, TURBO_DISABLE_BIT, disable)
}

/// Validation errors for a turbo ratio table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurboTableError {
    #[error("{count}-core ratio {ratio} must be between {min} and {max}")]
    OutOfRange {
        count: usize,
        ratio: u8,
        min: u8,
        max: u8,
    },

    #[error("{count}-core ratio {ratio} must be >= {next_count}-core ratio {next_ratio}")]
    NotOrdered {
        count: usize,
        ratio: u8,
        next_count: usize,
        next_ratio: u8,
    },
}

/// MSR_TURBO_RATIO_LIMIT layout
///
/// Eight one-byte frequency multipliers, one per number of active cores.
/// `ratios[0]` applies when a single core is active, `ratios[7]` when all
/// eight are. A multiplier of 39 means 3.9 GHz at the fixed 100 MHz bus
/// clock.
///
/// ## Register Format
///
/// | Bits   | Field      | Description                        |
/// |--------|------------|------------------------------------|
/// | 0-7    | ratios[0]  | Max turbo ratio, 1 core active     |
/// | 8-15   | ratios[1]  | Max turbo ratio, 2 cores active    |
/// | 16-23  | ratios[2]  | Max turbo ratio, 3 cores active    |
/// | ...    | ...        |                                    |
/// | 56-63  | ratios[7]  | Max turbo ratio, 8 cores active    |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurboTable {
    pub ratios: [u8; TURBO_TABLE_ENTRIES],
}

impl RegisterLayout for TurboTable {
    fn to_msr_value(&self) -> u64 {
        let mut value = 0u64;
        for (i, &ratio) in self.ratios.iter().enumerate() {
            let lo = i as u32 * 8;
            value = fields::insert(value, lo + 7, lo, ratio as u64);
        }
        value
    }

    fn from_msr_value(value: u64) -> Self {
        let mut ratios = [0u8; TURBO_TABLE_ENTRIES];
        for (i, slot) in ratios.iter_mut().enumerate() {
            let lo = i as u32 * 8;
            *slot = fields::extract(value, lo + 7, lo) as u8;
        }
        Self { ratios }
    }
}

impl TurboTable {
    /// Maximum turbo ratio with `active_cores` cores active (1-based).
    pub fn ratio(&self, active_cores: usize) -> u8 {
        self.ratios[active_cores - 1]
    }

    /// Check the editable ratios (1-4 active cores) against the accepted
    /// multiplier range and the ordering rule: fewer active cores may
    /// never boost lower than more active cores.
    pub fn validate_editable(
        &self,
        accepted: &std::ops::RangeInclusive<u8>,
    ) -> Result<(), TurboTableError> {
        for (i, &ratio) in self.ratios[..EDITABLE_RATIOS].iter().enumerate() {
            if !accepted.contains(&ratio) {
                return Err(TurboTableError::OutOfRange {
                    count: i + 1,
                    ratio,
                    min: *accepted.start(),
                    max: *accepted.end(),
                });
            }
        }
        for i in 0..EDITABLE_RATIOS - 1 {
            if self.ratios[i] < self.ratios[i + 1] {
                return Err(TurboTableError::NotOrdered {
                    count: i + 1,
                    ratio: self.ratios[i],
                    next_count: i + 2,
                    next_ratio: self.ratios[i + 1],
                });
            }
        }
        Ok(())
    }
}
