//! Per-core temperatures from the coretemp hwmon driver
//!
//! The driver directory is found by scanning `/sys/class/hwmon` for the
//! entry whose `name` file reads `coretemp`. Sensors inside it are
//! numbered `temp1_*`, `temp2_*`, ... with no gaps; the scan walks them
//! in order and stops at the first missing input file. Only sensors
//! labelled `Core <n>` are kept, which drops the package-wide sensor
//! that shares the directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CORETEMP_DRIVER: &str = "coretemp";

#[derive(Debug, Clone)]
pub struct CoreTemps {
    hwmon_root: PathBuf,
}

impl CoreTemps {
    pub fn new() -> Self {
        Self::with_root("/sys/class/hwmon")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            hwmon_root: root.into(),
        }
    }

    /// Physical core id to temperature in °C.
    ///
    /// A missing driver, unreadable files, or malformed entries all
    /// degrade to absent map entries; the read path never errors.
    pub fn read(&self) -> HashMap<u32, f64> {
        let Some(dir) = self.find_driver_dir() else {
            return HashMap::new();
        };

        let mut temps = HashMap::new();
        for idx in 1u32.. {
            let input = dir.join(format!("temp{idx}_input"));
            if !input.is_file() {
                break;
            }
            let label = dir.join(format!("temp{idx}_label"));
            if let Some((core, temp)) = read_sensor(&label, &input) {
                temps.insert(core, temp);
            }
        }
        temps
    }

    fn find_driver_dir(&self) -> Option<PathBuf> {
        for entry in fs::read_dir(&self.hwmon_root).ok()?.flatten() {
            let dir = entry.path();
            if let Ok(name) = fs::read_to_string(dir.join("name")) {
                if name.trim() == CORETEMP_DRIVER {
                    return Some(dir);
                }
            }
        }
        None
    }
}

impl Default for CoreTemps {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one label/input pair. Inputs are millidegrees; labels look like
/// `Core 0`. Anything else (package sensors, unreadable files) is
/// dropped.
fn read_sensor(label: &Path, input: &Path) -> Option<(u32, f64)> {
    let label = fs::read_to_string(label).ok()?;
    let core = label.trim().strip_prefix("Core ")?.parse::<u32>().ok()?;
    let millidegrees = fs::read_to_string(input).ok()?.trim().parse::<i64>().ok()?;
    Some((core, millidegrees as f64 / 1000.0))
}
