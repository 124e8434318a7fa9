//! ThinkPad fan control through the thinkpad_acpi procfs interface
//!
//! The control file accepts one command per write: `level <value>` to
//! steer the fan and `watchdog <secs>` to arm a firmware timer that
//! snaps the fan back to automatic control if no further command
//! arrives in time. Reading the file yields colon-separated status
//! lines. The interface only exists when thinkpad_acpi is loaded with
//! `fan_control=1`.
//!
//! Safety model: every transition to a non-auto level arms the
//! watchdog, and the poll loops re-arm it on each tick. If this process
//! dies for any reason, the firmware reverts the fan on its own within
//! the watchdog window.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::config;
use crate::error::{Result, TuneError};

/// Fan operating modes understood by the control file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanLevel {
    /// Firmware-governed control; the safe terminal state.
    Auto,
    /// Fixed firmware level 0 (off) through 7 (highest governed speed).
    Manual(u8),
    /// Maximum rated speed, still firmware-limited.
    FullSpeed,
    /// No firmware speed limit at all. The fan can exceed its rated
    /// maximum, so callers must collect explicit operator confirmation
    /// before requesting this.
    Disengaged,
}

impl FanLevel {
    pub fn is_auto(&self) -> bool {
        matches!(self, FanLevel::Auto)
    }

    /// Value accepted by a `level <value>` command.
    fn command_value(&self) -> String {
        match self {
            FanLevel::Auto => "auto".to_string(),
            FanLevel::Manual(level) => level.to_string(),
            FanLevel::FullSpeed => "full-speed".to_string(),
            FanLevel::Disengaged => "disengaged".to_string(),
        }
    }
}

impl fmt::Display for FanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_value())
    }
}

impl Serialize for FanLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for FanLevel {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(FanLevel::Auto),
            "full-speed" => Ok(FanLevel::FullSpeed),
            "disengaged" => Ok(FanLevel::Disengaged),
            _ => {
                let level = s.parse::<u8>().ok().filter(|&l| l <= 7).ok_or_else(|| {
                    TuneError::ValidationError(format!(
                        "Fan level must be auto, 0-7, full-speed, or disengaged, got {s:?}"
                    ))
                })?;
                Ok(FanLevel::Manual(level))
            }
        }
    }
}

/// One parse of the fan status lines.
#[derive(Debug, Clone, Serialize)]
pub struct FanStatus {
    /// Firmware state, normally `enabled` or `disabled`
    pub status: String,

    /// Current speed; absent when the firmware reports nonsense
    pub rpm: Option<u32>,

    /// Level text as the firmware prints it (`auto`, `0`-`7`, ...)
    pub level: String,
}

impl FanStatus {
    pub fn is_auto(&self) -> bool {
        self.level == "auto"
    }
}

#[derive(Debug, Clone)]
pub struct FanController {
    path: PathBuf,
    watchdog_secs: u32,
}

impl FanController {
    pub fn new() -> Self {
        Self::with_path("/proc/acpi/ibm/fan")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watchdog_secs: config::FAN_WATCHDOG_SECS,
        }
    }

    /// Whether the control file exists at all. Absent on anything that
    /// is not a ThinkPad with fan control enabled.
    pub fn is_available(&self) -> bool {
        self.path.exists()
    }

    /// Parse the current fan status, skipping the `commands:` help lines
    /// the kernel appends.
    pub fn status(&self) -> Result<FanStatus> {
        let content = fs::read_to_string(&self.path)?;
        let mut status = String::new();
        let mut rpm = None;
        let mut level = String::new();

        for line in content.lines() {
            if line.starts_with("commands:") {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "status" => status = value.to_string(),
                "speed" => rpm = value.parse().ok(),
                "level" => level = value.to_string(),
                _ => {}
            }
        }

        Ok(FanStatus { status, rpm, level })
    }

    /// Set the fan level.
    ///
    /// Any non-auto level arms the firmware watchdog immediately after
    /// the level command, so the fan reverts on its own if nobody keeps
    /// [`refresh_watchdog`](Self::refresh_watchdog) running. Requesting
    /// auto disarms the watchdog instead.
    pub fn set_level(&self, level: FanLevel) -> Result<()> {
        if !self.is_available() {
            return Err(TuneError::FanUnavailable(self.path.display().to_string()));
        }
        if let FanLevel::Manual(l) = level {
            if l > 7 {
                return Err(TuneError::ValidationError(format!(
                    "Manual fan level must be 0-7, got {l}"
                )));
            }
        }

        self.write_command(&format!("level {}", level.command_value()))?;
        if level.is_auto() {
            self.write_command("watchdog 0")?;
        } else {
            self.write_command(&format!("watchdog {}", self.watchdog_secs))?;
        }
        tracing::info!("Fan level set to {level}");
        Ok(())
    }

    /// Re-arm the firmware watchdog; the poll loops call this every tick
    /// while a non-auto level is active.
    pub fn refresh_watchdog(&self) -> Result<()> {
        self.write_command(&format!("watchdog {}", self.watchdog_secs))
    }

    /// Best-effort return to automatic control: `level auto` followed by
    /// `watchdog 0`. Failures are logged and swallowed so shutdown paths
    /// never abort on a fan that is already out of reach; the firmware
    /// watchdog covers whatever this could not do.
    pub fn restore_auto(&self) {
        for command in ["level auto", "watchdog 0"] {
            if let Err(e) = self.write_command(command) {
                tracing::warn!("Could not restore automatic fan control ({command}): {e}");
            }
        }
    }

    /// Each write(2) must carry exactly one command; procfs treats the
    /// buffer as the command and ignores the file offset. Append mode
    /// keeps ordinary files usable as stand-ins during tests.
    fn write_command(&self, command: &str) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(format!("{command}\n").as_bytes())?;
        tracing::debug!("Fan command: {command}");
        Ok(())
    }
}

impl Default for FanController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fan_file(content: &str) -> (TempDir, PathBuf, FanController) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fan");
        fs::write(&path, content).unwrap();
        let controller = FanController::with_path(&path);
        (dir, path, controller)
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("auto".parse::<FanLevel>().unwrap(), FanLevel::Auto);
        assert_eq!("0".parse::<FanLevel>().unwrap(), FanLevel::Manual(0));
        assert_eq!("7".parse::<FanLevel>().unwrap(), FanLevel::Manual(7));
        assert_eq!("full-speed".parse::<FanLevel>().unwrap(), FanLevel::FullSpeed);
        assert_eq!("disengaged".parse::<FanLevel>().unwrap(), FanLevel::Disengaged);

        assert!("8".parse::<FanLevel>().is_err());
        assert!("turbo".parse::<FanLevel>().is_err());
        assert!("".parse::<FanLevel>().is_err());
    }

    #[test]
    fn test_status_parses_kernel_format() {
        let (_dir, _path, fan) = fan_file(
            "status:\t\tenabled\n\
             speed:\t\t3542\n\
             level:\t\tauto\n\
             commands:\tlevel <level> (<level> is 0-7, auto, disengaged, full-speed)\n\
             commands:\twatchdog <timeout> (<timeout> is 0 (off), 1-120 (seconds))\n",
        );

        let status = fan.status().unwrap();
        assert_eq!(status.status, "enabled");
        assert_eq!(status.rpm, Some(3542));
        assert_eq!(status.level, "auto");
        assert!(status.is_auto());
    }

    #[test]
    fn test_manual_level_arms_watchdog() {
        let (_dir, path, fan) = fan_file("");
        fan.set_level(FanLevel::Manual(0)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "level 0\nwatchdog 30\n");
    }

    #[test]
    fn test_auto_level_disarms_watchdog() {
        let (_dir, path, fan) = fan_file("");
        fan.set_level(FanLevel::Auto).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "level auto\nwatchdog 0\n");
    }

    #[test]
    fn test_manual_level_out_of_range_writes_nothing() {
        let (_dir, path, fan) = fan_file("");
        assert!(fan.set_level(FanLevel::Manual(8)).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_set_level_without_interface() {
        let fan = FanController::with_path("/nonexistent/fan");
        assert!(!fan.is_available());
        assert!(matches!(
            fan.set_level(FanLevel::Auto),
            Err(TuneError::FanUnavailable(_))
        ));
    }

    #[test]
    fn test_restore_auto_after_disengaged() {
        let (_dir, path, fan) = fan_file("");
        fan.set_level(FanLevel::Disengaged).unwrap();
        fan.restore_auto();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "level disengaged\nwatchdog 30\nlevel auto\nwatchdog 0\n"
        );
    }

    #[test]
    fn test_restore_auto_swallows_failures() {
        let fan = FanController::with_path("/nonexistent/fan");
        // Must not panic or propagate
        fan.restore_auto();
    }

    #[test]
    fn test_refresh_watchdog_rearms() {
        let (_dir, path, fan) = fan_file("");
        fan.refresh_watchdog().unwrap();
        fan.refresh_watchdog().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "watchdog 30\nwatchdog 30\n"
        );
    }
}
