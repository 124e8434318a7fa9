//! Per-CPU frequency readings
//!
//! IA32_PERF_STATUS reports the ratio a CPU is running at right now,
//! turbo included; MSR_PLATFORM_INFO carries the base (maximum
//! non-turbo) ratio. Frequency is always ratio times the fixed 100 MHz
//! bus clock.

use ivytune_raw::ivybridge::freq::{
    self,
    msr::{IA32_PERF_STATUS, MSR_PLATFORM_INFO},
};
use ivytune_raw::ivybridge::BCLK_MHZ;

use crate::common::msr::Msr;
use crate::error::Result;

pub struct FreqMonitor {
    msr: Msr,
}

impl FreqMonitor {
    pub fn new(msr: Msr) -> Self {
        Self { msr }
    }

    /// Current frequency ratio of one CPU.
    pub fn current_ratio(&self, cpu: u32) -> Result<u8> {
        let raw = self.msr.read(cpu, IA32_PERF_STATUS)?;
        Ok(freq::frequency_ratio(raw))
    }

    /// Current operating frequency of one CPU in MHz.
    pub fn current_mhz(&self, cpu: u32) -> Result<f64> {
        Ok(self.current_ratio(cpu)? as f64 * BCLK_MHZ)
    }

    /// Base (maximum non-turbo) ratio of the package.
    pub fn base_ratio(&self) -> Result<u8> {
        let raw = self.msr.read(self.msr.first_cpu(), MSR_PLATFORM_INFO)?;
        Ok(freq::max_non_turbo_ratio(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_current_ratio_and_mhz() {
        let dir = TempDir::new().unwrap();
        let cpu_dir = dir.path().join("0");
        std::fs::create_dir(&cpu_dir).unwrap();
        std::fs::File::create(cpu_dir.join("msr")).unwrap();

        let msr = Msr::with_root(dir.path());
        msr.write(0, IA32_PERF_STATUS, (34 << 8) | 0x21).unwrap();
        msr.write(0, MSR_PLATFORM_INFO, (26 << 8) | (1 << 28)).unwrap();

        let monitor = FreqMonitor::new(msr);
        assert_eq!(monitor.current_ratio(0).unwrap(), 34);
        assert_eq!(monitor.current_mhz(0).unwrap(), 3400.0);
        assert_eq!(monitor.base_ratio().unwrap(), 26);
    }
}
