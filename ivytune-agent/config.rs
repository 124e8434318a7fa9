use std::ops::RangeInclusive;
use std::path::PathBuf;

/// Filesystem roots for every kernel interface the agent touches.
///
/// The defaults point at the real device trees; tests substitute
/// temporary directories so the hardware layers can run against plain
/// files.
#[derive(Debug, Clone)]
pub struct HwPaths {
    /// Per-CPU MSR device directories: `<dev_cpu>/<id>/msr`
    pub dev_cpu: PathBuf,

    /// CPU topology root: `<sysfs_cpu>/cpu<id>/topology/core_id`
    pub sysfs_cpu: PathBuf,

    /// Hwmon class directory scanned for the coretemp driver
    pub hwmon: PathBuf,

    /// thinkpad_acpi fan control file
    pub fan: PathBuf,
}

impl Default for HwPaths {
    fn default() -> Self {
        Self {
            dev_cpu: PathBuf::from("/dev/cpu"),
            sysfs_cpu: PathBuf::from("/sys/devices/system/cpu"),
            hwmon: PathBuf::from("/sys/class/hwmon"),
            fan: PathBuf::from("/proc/acpi/ibm/fan"),
        }
    }
}

/// Turbo ratio multipliers accepted from user input
/// (20 = 2.0 GHz, 42 = 4.2 GHz at the fixed 100 MHz bus clock).
pub const TURBO_RATIO_RANGE: RangeInclusive<u8> = 20..=42;

/// Package power limits accepted from user input, in watts.
pub const POWER_LIMIT_RANGE_WATTS: RangeInclusive<f64> = 20.0..=60.0;

/// Fan watchdog timeout handed to the firmware. When the watchdog is not
/// refreshed within this window the firmware falls back to automatic fan
/// control, so a dead process can never strand the fan at a fixed level.
pub const FAN_WATCHDOG_SECS: u32 = 30;

/// Default telemetry poll interval. Must stay well below
/// [`FAN_WATCHDOG_SECS`] so non-auto fan levels survive between
/// refreshes.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
