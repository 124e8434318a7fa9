//! Turbo boost control: the global enable bit and the ratio limit table
//!
//! Both registers are per-CPU on paper but must agree across the package,
//! so every mutation sweeps all online CPUs. The enable bit lives inside
//! IA32_MISC_ENABLE next to unrelated features and is read-modify-written
//! per CPU; the ratio table is identical everywhere and is broadcast
//! wholesale.

use ivytune_raw::ivybridge::turbo::{
    self,
    msr::{IA32_MISC_ENABLE, MSR_TURBO_RATIO_LIMIT},
    TurboTable, EDITABLE_RATIOS,
};
use ivytune_raw::RegisterLayout;

use crate::common::msr::Msr;
use crate::config;
use crate::error::{Result, TuneError};

pub struct TurboController {
    msr: Msr,
}

impl TurboController {
    pub fn new(msr: Msr) -> Self {
        Self { msr }
    }

    /// Whether turbo boost is enabled, read from the lowest online CPU.
    pub fn is_enabled(&self) -> Result<bool> {
        let raw = self.msr.read(self.msr.first_cpu(), IA32_MISC_ENABLE)?;
        Ok(turbo::turbo_enabled(raw))
    }

    /// Enable or disable turbo boost on every online CPU.
    ///
    /// Each CPU gets its own read-modify-write so the unrelated bits of
    /// its IA32_MISC_ENABLE survive. Not transactional: on failure, CPUs
    /// visited earlier keep the new setting, and callers should re-read
    /// [`is_enabled`](Self::is_enabled) instead of assuming either state.
    pub fn set_enabled(&self, enable: bool) -> Result<()> {
        for cpu in self.msr.online_cpus() {
            let raw = self
                .msr
                .read(cpu, IA32_MISC_ENABLE)
                .map_err(|source| TuneError::BroadcastError {
                    msr: IA32_MISC_ENABLE,
                    cpu,
                    source,
                })?;
            let updated = turbo::with_turbo_enabled(raw, enable);
            self.msr
                .write(cpu, IA32_MISC_ENABLE, updated)
                .map_err(|source| TuneError::BroadcastError {
                    msr: IA32_MISC_ENABLE,
                    cpu,
                    source,
                })?;
        }
        tracing::info!("Turbo boost {}", if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Current ratio limit table, read from the lowest online CPU.
    pub fn read_ratios(&self) -> Result<TurboTable> {
        let raw = self.msr.read(self.msr.first_cpu(), MSR_TURBO_RATIO_LIMIT)?;
        Ok(TurboTable::from_msr_value(raw))
    }

    /// Validate a full ratio table and broadcast it to every online CPU.
    ///
    /// Validation happens before any register is touched; a rejected
    /// table leaves hardware exactly as it was.
    pub fn write_ratios(&self, table: &TurboTable) -> Result<()> {
        table
            .validate_editable(&config::TURBO_RATIO_RANGE)
            .map_err(|e| TuneError::ValidationError(e.to_string()))?;
        self.msr
            .write_all_cpus(MSR_TURBO_RATIO_LIMIT, table.to_msr_value())?;
        tracing::info!("Turbo ratio limits set to {:?}", table.ratios);
        Ok(())
    }

    /// Replace the editable ratios (1-4 active cores) and write the table
    /// back in full, preserving the upper slots exactly as read. Returns
    /// the table that was written.
    pub fn apply_ratios(&self, limits: [u8; EDITABLE_RATIOS]) -> Result<TurboTable> {
        let mut table = self.read_ratios()?;
        table.ratios[..EDITABLE_RATIOS].copy_from_slice(&limits);
        self.write_ratios(&table)?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_dev_cpu(cpus: &[u32]) -> (TempDir, Msr) {
        let dir = TempDir::new().unwrap();
        for cpu in cpus {
            let cpu_dir = dir.path().join(cpu.to_string());
            std::fs::create_dir(&cpu_dir).unwrap();
            std::fs::File::create(cpu_dir.join("msr")).unwrap();
        }
        let msr = Msr::with_root(dir.path());
        (dir, msr)
    }

    #[test]
    fn test_is_enabled_inverts_the_disable_bit() {
        let (_dir, msr) = fake_dev_cpu(&[0]);
        let turbo = TurboController::new(msr.clone());

        msr.write(0, IA32_MISC_ENABLE, 0x85_0089).unwrap();
        assert!(turbo.is_enabled().unwrap());

        msr.write(0, IA32_MISC_ENABLE, 0x85_0089 | (1 << 38)).unwrap();
        assert!(!turbo.is_enabled().unwrap());
    }

    #[test]
    fn test_set_enabled_preserves_per_cpu_bits() {
        let (_dir, msr) = fake_dev_cpu(&[0, 1]);
        let turbo = TurboController::new(msr.clone());

        // Different feature bits per CPU: a broadcast of one value would
        // clobber them, a per-CPU read-modify-write must not.
        msr.write(0, IA32_MISC_ENABLE, 0x85_0089 | (1 << 38)).unwrap();
        msr.write(1, IA32_MISC_ENABLE, 0x85_0082).unwrap();

        turbo.set_enabled(false).unwrap();
        assert_eq!(msr.read(0, IA32_MISC_ENABLE).unwrap(), 0x85_0089 | (1 << 38));
        assert_eq!(msr.read(1, IA32_MISC_ENABLE).unwrap(), 0x85_0082 | (1 << 38));

        turbo.set_enabled(true).unwrap();
        assert_eq!(msr.read(0, IA32_MISC_ENABLE).unwrap(), 0x85_0089);
        assert_eq!(msr.read(1, IA32_MISC_ENABLE).unwrap(), 0x85_0082);
    }

    #[test]
    fn test_apply_ratios_preserves_upper_slots() {
        let (_dir, msr) = fake_dev_cpu(&[0, 1]);
        let turbo = TurboController::new(msr.clone());

        let initial = TurboTable {
            ratios: [39, 38, 37, 36, 34, 34, 34, 34],
        };
        msr.write_all_cpus(MSR_TURBO_RATIO_LIMIT, initial.to_msr_value())
            .unwrap();

        let written = turbo.apply_ratios([42, 41, 40, 39]).unwrap();
        assert_eq!(written.ratios, [42, 41, 40, 39, 34, 34, 34, 34]);

        // Both CPUs carry the new table
        for cpu in [0, 1] {
            let raw = msr.read(cpu, MSR_TURBO_RATIO_LIMIT).unwrap();
            assert_eq!(TurboTable::from_msr_value(raw), written);
        }
    }

    #[test]
    fn test_write_ratios_rejects_before_touching_hardware() {
        let (_dir, msr) = fake_dev_cpu(&[0]);
        let turbo = TurboController::new(msr.clone());

        let initial = TurboTable {
            ratios: [39, 38, 37, 36, 36, 36, 36, 36],
        };
        msr.write(0, MSR_TURBO_RATIO_LIMIT, initial.to_msr_value())
            .unwrap();

        // Out of order: 1-core ratio below the 2-core ratio
        let err = turbo.apply_ratios([30, 32, 28, 26]).unwrap_err();
        assert!(matches!(err, TuneError::ValidationError(_)));

        let raw = msr.read(0, MSR_TURBO_RATIO_LIMIT).unwrap();
        assert_eq!(TurboTable::from_msr_value(raw), initial);
    }

    #[test]
    fn test_ratio_range_bounds() {
        let (_dir, msr) = fake_dev_cpu(&[0]);
        let turbo = TurboController::new(msr.clone());
        msr.write(0, MSR_TURBO_RATIO_LIMIT, 0x2424_2424_2424_2424)
            .unwrap();

        assert!(turbo.apply_ratios([43, 38, 37, 36]).is_err());
        assert!(turbo.apply_ratios([39, 38, 37, 19]).is_err());
        assert!(turbo.apply_ratios([42, 42, 42, 42]).is_ok());
        assert!(turbo.apply_ratios([20, 20, 20, 20]).is_ok());
    }
}
