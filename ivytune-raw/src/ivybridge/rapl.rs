//! RAPL (Running Average Power Limit) register definitions for Ivy Bridge
//!
//! RAPL steers the package power budget through two limits: PL1, the
//! sustained limit the package averages towards, and PL2, a higher
//! short-term limit for bursts. Both are expressed in hardware units
//! whose scale is published in MSR_RAPL_POWER_UNIT.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 14.9: Platform Specific Power Management Support

use crate::fields;
use crate::register::RegisterLayout;

/// MSR addresses for RAPL
pub mod msr {
    /// RAPL Power Unit MSR - Defines energy, power, and time units
    pub const MSR_RAPL_POWER_UNIT: u64 = 0x606;

    /// Package Power Limit - Configure package power limits
    pub const MSR_PKG_POWER_LIMIT: u64 = 0x610;
}

/// RAPL Power Unit Register layout
///
/// Defines the units for energy, power, and time measurements. The
/// register is read-only; hardware fixes the exponents at reset.
///
/// ## Register Format
///
/// | Bits   | Field        | Description                           |
/// |--------|--------------|---------------------------------------|
/// | 0-3    | power_units  | Power units (1/2^PU watts)            |
/// | 4-7    | reserved     |                                       |
/// | 8-12   | energy_units | Energy units (1/2^ESU joules)         |
/// | 13-15  | reserved     |                                       |
/// | 16-19  | time_units   | Time units (1/2^TU seconds)           |
/// | 20-63  | reserved     |                                       |
#[derive(Debug, Clone, Copy, Default)]
pub struct RaplPowerUnit {
    /// Power units: watts = value * (1.0 / 2^power_units)
    pub power_units: u8,

    /// Energy units: joules = value * (1.0 / 2^energy_units)
    pub energy_units: u8,

    /// Time units: seconds = value * (1.0 / 2^time_units)
    pub time_units: u8,
}

impl RegisterLayout for RaplPowerUnit {
    fn to_msr_value(&self) -> u64 {
        let mut value = 0u64;
        value = fields::insert(value, 3, 0, self.power_units as u64);
        value = fields::insert(value, 12, 8, self.energy_units as u64);
        value = fields::insert(value, 19, 16, self.time_units as u64);
        value
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            power_units: fields::extract(value, 3, 0) as u8,
            energy_units: fields::extract(value, 12, 8) as u8,
            time_units: fields::extract(value, 19, 16) as u8,
        }
    }
}

impl RaplPowerUnit {
    /// Get power unit multiplier (watts per LSB)
    pub fn power_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.power_units) as f64
    }

    /// Get energy unit multiplier (joules per LSB)
    pub fn energy_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.energy_units) as f64
    }

    /// Get time unit multiplier (seconds per LSB)
    pub fn time_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.time_units) as f64
    }
}

/// Power and time scaling units as floating point multipliers.
///
/// Hardware fixes these at reset, so callers read them once and pass the
/// value around for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct RaplUnits {
    /// Watts represented by one LSB of a power limit field
    pub power_unit_watts: f64,

    /// Seconds represented by one LSB of a time value
    pub time_unit_seconds: f64,
}

impl RaplUnits {
    /// Derive the scaling units from a raw MSR_RAPL_POWER_UNIT value.
    pub fn from_msr_value(value: u64) -> Self {
        let unit = RaplPowerUnit::from_msr_value(value);
        Self {
            power_unit_watts: unit.power_unit_multiplier(),
            time_unit_seconds: unit.time_unit_multiplier(),
        }
    }
}

/// Decode a 7-bit RAPL time window field into seconds.
///
/// The field packs a 5-bit exponent Y (bits 4:0) and a 2-bit fraction Z
/// (bits 6:5); the window is `2^Y * (1 + Z/4) * time_unit`. The fraction
/// gives four sub-steps between each power of two.
pub fn decode_time_window(field: u8, time_unit_seconds: f64) -> f64 {
    let y = fields::extract(field as u64, 4, 0);
    let z = fields::extract(field as u64, 6, 5);
    (1u64 << y) as f64 * (1.0 + z as f64 / 4.0) * time_unit_seconds
}

/// MSR_PKG_POWER_LIMIT layout
///
/// Covers the fields this crate programs; the clamp bits (16 and 48) and
/// reserved ranges are deliberately not represented. Writes go through
/// [`PackagePowerLimit::apply_to`], which patches only the represented
/// fields into a previously read raw value so everything else survives
/// untouched.
///
/// ## Register Format
///
/// | Bits   | Field       | Description                        |
/// |--------|-------------|------------------------------------|
/// | 0-14   | pl1_raw     | PL1 limit in power units           |
/// | 15     | pl1_enable  | Enable PL1                         |
/// | 17-23  | pl1_window  | PL1 time window (encoded)          |
/// | 32-46  | pl2_raw     | PL2 limit in power units           |
/// | 47     | pl2_enable  | Enable PL2                         |
/// | 49-55  | pl2_window  | PL2 time window (encoded)          |
/// | 63     | locked      | Register locked until reset        |
#[derive(Debug, Clone, Copy, Default)]
pub struct PackagePowerLimit {
    /// PL1 (sustained) limit in power units
    pub pl1_raw: u16,

    /// Enable PL1
    pub pl1_enable: bool,

    /// PL1 time window, encoded (see [`decode_time_window`])
    pub pl1_window: u8,

    /// PL2 (burst) limit in power units
    pub pl2_raw: u16,

    /// Enable PL2
    pub pl2_enable: bool,

    /// PL2 time window, encoded
    pub pl2_window: u8,

    /// Firmware locked the register; writes are ignored until reset
    pub locked: bool,
}

impl RegisterLayout for PackagePowerLimit {
    fn to_msr_value(&self) -> u64 {
        self.apply_to(0)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            pl1_raw: fields::extract(value, 14, 0) as u16,
            pl1_enable: fields::extract(value, 15, 15) != 0,
            pl1_window: fields::extract(value, 23, 17) as u8,
            pl2_raw: fields::extract(value, 46, 32) as u16,
            pl2_enable: fields::extract(value, 47, 47) != 0,
            pl2_window: fields::extract(value, 55, 49) as u8,
            locked: fields::extract(value, 63, 63) != 0,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.pl1_raw > 0x7FFF {
            return Err("PL1 must be <= 0x7FFF (15 bits)");
        }
        if self.pl1_window > 127 {
            return Err("PL1 time window must be <= 127 (7 bits)");
        }
        if self.pl2_raw > 0x7FFF {
            return Err("PL2 must be <= 0x7FFF (15 bits)");
        }
        if self.pl2_window > 127 {
            return Err("PL2 time window must be <= 127 (7 bits)");
        }
        Ok(())
    }
}

impl PackagePowerLimit {
    /// Patch this layout's fields into a previously read raw value.
    ///
    /// Bits the layout does not represent (clamp, reserved) pass through
    /// from `raw` unchanged. The lock bit is always written as 0: setting
    /// it would freeze the register until the next reset, and once the
    /// firmware has set it hardware ignores the write anyway.
    pub fn apply_to(&self, raw: u64) -> u64 {
        let mut value = raw;
        value = fields::insert(value, 14, 0, self.pl1_raw as u64);
        value = fields::insert(value, 15, 15, self.pl1_enable as u64);
        value = fields::insert(value, 23, 17, self.pl1_window as u64);
        value = fields::insert(value, 46, 32, self.pl2_raw as u64);
        value = fields::insert(value, 47, 47, self.pl2_enable as u64);
        value = fields::insert(value, 55, 49, self.pl2_window as u64);
        fields::insert(value, 63, 63, 0)
    }
}
