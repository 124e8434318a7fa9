//! MSR (Model-Specific Register) access through `/dev/cpu/*/msr`
//!
//! Every operation opens the device, seeks to the register address, and
//! transfers one little-endian 64-bit value; no handle outlives the call.
//! Writes open with O_SYNC so the register update has reached hardware by
//! the time the call returns.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use crate::error::TuneError;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device for CPU {cpu}: {source}")]
    OpenFailed { cpu: u32, source: std::io::Error },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to seek to MSR 0x{msr:X} on CPU {cpu}: {source}")]
    SeekFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },
}

/// MSR device accessor rooted at a `/dev/cpu`-shaped directory.
#[derive(Debug, Clone)]
pub struct Msr {
    dev_root: PathBuf,
}

impl Msr {
    pub fn new() -> Self {
        Self::with_root("/dev/cpu")
    }

    /// Use a different device root; tests point this at a temporary
    /// directory of ordinary files.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: root.into(),
        }
    }

    /// Path of the register device for one CPU.
    pub fn device_path(&self, cpu: u32) -> PathBuf {
        self.dev_root.join(cpu.to_string()).join("msr")
    }

    /// Online CPU ids, in ascending order.
    ///
    /// The kernel creates one numeric subdirectory per online CPU; any
    /// other entry is ignored. A missing device root yields an empty
    /// list, not an error, so callers degrade the same way they would on
    /// a machine without the msr module loaded.
    pub fn online_cpus(&self) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir(&self.dev_root) else {
            return Vec::new();
        };
        let mut cpus: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        cpus.sort_unstable();
        cpus
    }

    /// Lowest-numbered online CPU; package-scope registers are read
    /// through it. Falls back to CPU 0 when enumeration is empty so a
    /// subsequent open reports the real failure.
    pub fn first_cpu(&self) -> u32 {
        self.online_cpus().first().copied().unwrap_or(0)
    }

    /// Read a 64-bit value from an MSR.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened (requires
    /// root/CAP_SYS_RAWIO), or the register is not readable.
    pub fn read(&self, cpu: u32, msr: u64) -> Result<u64, MsrError> {
        let mut file = File::open(self.device_path(cpu))
            .map_err(|e| MsrError::OpenFailed { cpu, source: e })?;

        file.seek(SeekFrom::Start(msr))
            .map_err(|e| MsrError::SeekFailed {
                cpu,
                msr,
                source: e,
            })?;

        let mut buffer = [0u8; 8];
        file.read_exact(&mut buffer)
            .map_err(|e| MsrError::ReadFailed {
                cpu,
                msr,
                source: e,
            })?;

        let value = u64::from_le_bytes(buffer);
        tracing::debug!("MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}", cpu, msr, value);
        Ok(value)
    }

    /// Write a 64-bit value to an MSR.
    ///
    /// # Safety
    ///
    /// Writing incorrect values to MSRs can cause system instability or
    /// crashes. Callers validate register values before writing.
    pub fn write(&self, cpu: u32, msr: u64, value: u64) -> Result<(), MsrError> {
        let mut file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_SYNC) // Ensure synchronous writes
            .open(self.device_path(cpu))
            .map_err(|e| MsrError::OpenFailed { cpu, source: e })?;

        file.seek(SeekFrom::Start(msr))
            .map_err(|e| MsrError::SeekFailed {
                cpu,
                msr,
                source: e,
            })?;

        file.write_all(&value.to_le_bytes())
            .map_err(|e| MsrError::WriteFailed {
                cpu,
                msr,
                source: e,
            })?;

        tracing::debug!("MSR write: CPU {} MSR 0x{:08x} = 0x{:016x}", cpu, msr, value);
        Ok(())
    }

    /// Write the same value to one MSR on every online CPU, in ascending
    /// CPU order.
    ///
    /// Not transactional: a failure aborts the sweep and CPUs written
    /// earlier keep the new value. The error names the CPU where the
    /// sweep stopped.
    pub fn write_all_cpus(&self, msr: u64, value: u64) -> crate::error::Result<()> {
        for cpu in self.online_cpus() {
            self.write(cpu, msr, value)
                .map_err(|source| TuneError::BroadcastError { msr, cpu, source })?;
        }
        Ok(())
    }
}

impl Default for Msr {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_dev_cpu(cpus: &[u32]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for cpu in cpus {
            let cpu_dir = dir.path().join(cpu.to_string());
            std::fs::create_dir(&cpu_dir).unwrap();
            File::create(cpu_dir.join("msr")).unwrap();
        }
        dir
    }

    #[test]
    fn test_online_cpus_sorted_numeric_only() {
        let dir = fake_dev_cpu(&[2, 0, 5]);
        std::fs::create_dir(dir.path().join("microcode")).unwrap();

        let msr = Msr::with_root(dir.path());
        assert_eq!(msr.online_cpus(), vec![0, 2, 5]);
        assert_eq!(msr.first_cpu(), 0);
    }

    #[test]
    fn test_online_cpus_missing_root_is_empty() {
        let msr = Msr::with_root("/nonexistent/dev/cpu");
        assert!(msr.online_cpus().is_empty());
        assert_eq!(msr.first_cpu(), 0);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = fake_dev_cpu(&[0]);
        let msr = Msr::with_root(dir.path());

        msr.write(0, 0x610, 0x00DD_8160_00DC_8168).unwrap();
        assert_eq!(msr.read(0, 0x610).unwrap(), 0x00DD_8160_00DC_8168);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let dir = fake_dev_cpu(&[0]);
        let msr = Msr::with_root(dir.path());

        // Nothing was ever written at this offset, so the backing file is
        // too short and the 8-byte read cannot complete.
        let err = msr.read(0, 0x1AD).unwrap_err();
        assert!(matches!(err, MsrError::ReadFailed { cpu: 0, msr: 0x1AD, .. }));
    }

    #[test]
    fn test_open_failure_names_the_cpu() {
        let dir = fake_dev_cpu(&[0]);
        let msr = Msr::with_root(dir.path());

        let err = msr.read(7, 0x198).unwrap_err();
        assert!(matches!(err, MsrError::OpenFailed { cpu: 7, .. }));
        assert!(err.to_string().contains("Failed to open MSR device"));
    }

    #[test]
    fn test_broadcast_reports_failing_cpu() {
        let dir = fake_dev_cpu(&[0, 2]);
        // CPU 1 is present but its device cannot be opened for writing
        std::fs::create_dir_all(dir.path().join("1").join("msr")).unwrap();

        let msr = Msr::with_root(dir.path());
        let err = msr.write_all_cpus(0x1AD, 0x2424_2424).unwrap_err();
        match err {
            TuneError::BroadcastError { msr: 0x1AD, cpu: 1, .. } => {}
            other => panic!("unexpected error: {other}"),
        }

        // CPU 0 was written before the failure; CPU 2 was never reached
        assert_eq!(msr.read(0, 0x1AD).unwrap(), 0x2424_2424);
        assert!(msr.read(2, 0x1AD).is_err());
    }

    #[test]
    fn test_device_path_shape() {
        let msr = Msr::with_root("/dev/cpu");
        assert_eq!(msr.device_path(3), PathBuf::from("/dev/cpu/3/msr"));
    }
}
