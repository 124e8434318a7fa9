//! Package power limit (RAPL) control
//!
//! PL1 is the sustained limit the package averages towards, PL2 the
//! short-term burst limit. User input arrives in watts; hardware wants
//! multiples of the power unit published in MSR_RAPL_POWER_UNIT. The
//! unit is fixed at reset, so it is read once when the limiter is built
//! and carried for the life of the process.

use serde::Serialize;

use ivytune_raw::ivybridge::rapl::{
    self,
    msr::{MSR_PKG_POWER_LIMIT, MSR_RAPL_POWER_UNIT},
    PackagePowerLimit, RaplUnits,
};
use ivytune_raw::RegisterLayout;

use crate::common::msr::Msr;
use crate::config;
use crate::error::{Result, TuneError};

/// Package power limits decoded into operator units.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PowerLimits {
    pub pl1_watts: f64,
    pub pl1_enabled: bool,
    pub pl1_window_secs: f64,
    pub pl2_watts: f64,
    pub pl2_enabled: bool,
    pub pl2_window_secs: f64,
    /// Firmware locked the register; hardware ignores writes until the
    /// next reset.
    pub locked: bool,
}

pub struct PowerLimiter {
    msr: Msr,
    units: RaplUnits,
}

impl PowerLimiter {
    pub fn new(msr: Msr) -> Result<Self> {
        let raw = msr.read(msr.first_cpu(), MSR_RAPL_POWER_UNIT)?;
        let units = RaplUnits::from_msr_value(raw);
        tracing::debug!(
            "RAPL units: {} W per LSB, {} s per LSB",
            units.power_unit_watts,
            units.time_unit_seconds
        );
        Ok(Self { msr, units })
    }

    pub fn units(&self) -> RaplUnits {
        self.units
    }

    /// Current package power limits, read from the lowest online CPU.
    pub fn read_limits(&self) -> Result<PowerLimits> {
        let raw = self.msr.read(self.msr.first_cpu(), MSR_PKG_POWER_LIMIT)?;
        let layout = PackagePowerLimit::from_msr_value(raw);
        Ok(PowerLimits {
            pl1_watts: layout.pl1_raw as f64 * self.units.power_unit_watts,
            pl1_enabled: layout.pl1_enable,
            pl1_window_secs: rapl::decode_time_window(
                layout.pl1_window,
                self.units.time_unit_seconds,
            ),
            pl2_watts: layout.pl2_raw as f64 * self.units.power_unit_watts,
            pl2_enabled: layout.pl2_enable,
            pl2_window_secs: rapl::decode_time_window(
                layout.pl2_window,
                self.units.time_unit_seconds,
            ),
            locked: layout.locked,
        })
    }

    /// Apply new wattages for either or both limits.
    ///
    /// Read-modify-write: the register is read once from the lowest
    /// online CPU, the requested fields are patched in (enabling each
    /// limit that is set), and the result is broadcast to every online
    /// CPU. Time windows, clamp bits, and anything else not requested
    /// pass through unchanged, and the lock bit is always written low.
    ///
    /// Out-of-range wattages are rejected before any register is touched.
    pub fn apply(&self, pl1_watts: Option<f64>, pl2_watts: Option<f64>) -> Result<()> {
        for (name, watts) in [("PL1", pl1_watts), ("PL2", pl2_watts)] {
            if let Some(w) = watts {
                if !w.is_finite() || !config::POWER_LIMIT_RANGE_WATTS.contains(&w) {
                    return Err(TuneError::ValidationError(format!(
                        "{name} must be between {:.0} and {:.0} W, got {w}",
                        config::POWER_LIMIT_RANGE_WATTS.start(),
                        config::POWER_LIMIT_RANGE_WATTS.end(),
                    )));
                }
            }
        }

        let raw = self.msr.read(self.msr.first_cpu(), MSR_PKG_POWER_LIMIT)?;
        let mut layout = PackagePowerLimit::from_msr_value(raw);
        if layout.locked {
            tracing::warn!(
                "Package power limit register is locked; hardware will ignore this write until reboot"
            );
        }

        if let Some(w) = pl1_watts {
            layout.pl1_raw = self.to_limit_units("PL1", w)?;
            layout.pl1_enable = true;
        }
        if let Some(w) = pl2_watts {
            layout.pl2_raw = self.to_limit_units("PL2", w)?;
            layout.pl2_enable = true;
        }

        self.msr
            .write_all_cpus(MSR_PKG_POWER_LIMIT, layout.apply_to(raw))?;
        tracing::info!(
            "Power limits applied: PL1 {:?} W, PL2 {:?} W",
            pl1_watts,
            pl2_watts
        );
        Ok(())
    }

    /// Convert watts to power units, rounding to the nearest step.
    fn to_limit_units(&self, name: &str, watts: f64) -> Result<u16> {
        let units = (watts / self.units.power_unit_watts).round();
        if !(0.0..=0x7FFF as f64).contains(&units) {
            return Err(TuneError::ValidationError(format!(
                "{name} of {watts} W does not fit the 15-bit limit field at {} W per unit",
                self.units.power_unit_watts
            )));
        }
        Ok(units as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // power unit 1/8 W, time unit 1/1024 s
    const UNITS_RAW: u64 = 0x000A_0E03;

    fn limit_raw() -> u64 {
        280u64                  // PL1 = 35 W
            | (1 << 15)         // PL1 enabled
            | (1 << 16)         // PL1 clamp
            | (0x4A << 17)      // PL1 window = 1.5 s
            | (360 << 32)       // PL2 = 45 W
            | (1 << 47)         // PL2 enabled
            | (1 << 48)         // PL2 clamp
            | (0x22 << 49)      // PL2 window = 5/1024 s
            | (1 << 63)         // locked
    }

    fn setup(cpus: &[u32]) -> (TempDir, Msr, PowerLimiter) {
        let dir = TempDir::new().unwrap();
        for cpu in cpus {
            let cpu_dir = dir.path().join(cpu.to_string());
            std::fs::create_dir(&cpu_dir).unwrap();
            std::fs::File::create(cpu_dir.join("msr")).unwrap();
        }
        let msr = Msr::with_root(dir.path());
        msr.write(cpus[0], MSR_RAPL_POWER_UNIT, UNITS_RAW).unwrap();
        msr.write_all_cpus(MSR_PKG_POWER_LIMIT, limit_raw()).unwrap();

        let limiter = PowerLimiter::new(msr.clone()).unwrap();
        (dir, msr, limiter)
    }

    #[test]
    fn test_units_read_once_at_construction() {
        let (_dir, _msr, limiter) = setup(&[0]);
        assert_eq!(limiter.units().power_unit_watts, 0.125);
        assert_eq!(limiter.units().time_unit_seconds, 1.0 / 1024.0);
    }

    #[test]
    fn test_read_limits_decodes_operator_units() {
        let (_dir, _msr, limiter) = setup(&[0]);
        let limits = limiter.read_limits().unwrap();

        assert_eq!(limits.pl1_watts, 35.0);
        assert!(limits.pl1_enabled);
        assert_eq!(limits.pl1_window_secs, 1.5);
        assert_eq!(limits.pl2_watts, 45.0);
        assert!(limits.pl2_enabled);
        assert_eq!(limits.pl2_window_secs, 5.0 / 1024.0);
        assert!(limits.locked);
    }

    #[test]
    fn test_apply_patches_only_requested_fields() {
        let (_dir, msr, limiter) = setup(&[0]);

        limiter.apply(Some(45.0), None).unwrap();

        let raw = limit_raw();
        // PL1 field becomes 45 / 0.125 = 360, the lock bit drops, and
        // every other bit (PL2 half, windows, clamps) is bit-identical.
        let expected = (raw & !0x7FFF & !(1 << 63)) | 360;
        assert_eq!(msr.read(0, MSR_PKG_POWER_LIMIT).unwrap(), expected);
    }

    #[test]
    fn test_apply_broadcasts_to_all_cpus() {
        let (_dir, msr, limiter) = setup(&[0, 1]);

        limiter.apply(Some(40.0), Some(50.0)).unwrap();

        let first = msr.read(0, MSR_PKG_POWER_LIMIT).unwrap();
        assert_eq!(msr.read(1, MSR_PKG_POWER_LIMIT).unwrap(), first);

        let limits = limiter.read_limits().unwrap();
        assert_eq!(limits.pl1_watts, 40.0);
        assert_eq!(limits.pl2_watts, 50.0);
        assert!(!limits.locked);
    }

    #[test]
    fn test_apply_enables_the_limit_it_sets() {
        let (_dir, msr, limiter) = setup(&[0]);

        // Clear both enable bits first
        let cleared = limit_raw() & !(1 << 15) & !(1 << 47);
        msr.write(0, MSR_PKG_POWER_LIMIT, cleared).unwrap();

        limiter.apply(Some(35.0), None).unwrap();
        let limits = limiter.read_limits().unwrap();
        assert!(limits.pl1_enabled);
        assert!(!limits.pl2_enabled);
    }

    #[test]
    fn test_apply_rejects_out_of_range_watts() {
        let (_dir, msr, limiter) = setup(&[0]);

        for (pl1, pl2) in [
            (Some(10.0), None),
            (Some(61.0), None),
            (None, Some(19.9)),
            (Some(f64::NAN), None),
        ] {
            let err = limiter.apply(pl1, pl2).unwrap_err();
            assert!(matches!(err, TuneError::ValidationError(_)));
        }

        // Hardware untouched by the rejected writes
        assert_eq!(msr.read(0, MSR_PKG_POWER_LIMIT).unwrap(), limit_raw());
    }

    #[test]
    fn test_apply_without_changes_only_clears_lock() {
        let (_dir, msr, limiter) = setup(&[0]);

        limiter.apply(None, None).unwrap();
        assert_eq!(
            msr.read(0, MSR_PKG_POWER_LIMIT).unwrap(),
            limit_raw() & !(1 << 63)
        );
    }
}
