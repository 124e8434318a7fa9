//! Logical-CPU to physical-core mapping via sysfs
//!
//! With hyper-threading two logical CPUs share one physical core, and the
//! coretemp driver reports one sensor per physical core. This module maps
//! between the two id spaces.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Topology {
    sysfs_root: PathBuf,
}

impl Topology {
    pub fn new() -> Self {
        Self::with_root("/sys/devices/system/cpu")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: root.into(),
        }
    }

    /// Physical core id of a logical CPU.
    ///
    /// Falls back to the logical id itself when the topology file is
    /// missing or unreadable, which degrades to treating every logical
    /// CPU as its own core.
    pub fn core_id(&self, cpu: u32) -> u32 {
        let path = self.sysfs_root.join(format!("cpu{cpu}/topology/core_id"));
        match std::fs::read_to_string(&path) {
            Ok(content) => match content.trim().parse() {
                Ok(core) => core,
                Err(_) => {
                    tracing::debug!("Unparseable core id in {}, using CPU id", path.display());
                    cpu
                }
            },
            Err(e) => {
                tracing::debug!("Cannot read {}: {e}, using CPU id", path.display());
                cpu
            }
        }
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_core_id_reads_sysfs() {
        let dir = TempDir::new().unwrap();
        let topo_dir = dir.path().join("cpu3/topology");
        std::fs::create_dir_all(&topo_dir).unwrap();
        std::fs::write(topo_dir.join("core_id"), "1\n").unwrap();

        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.core_id(3), 1);
    }

    #[test]
    fn test_core_id_falls_back_to_cpu_id() {
        let dir = TempDir::new().unwrap();
        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.core_id(9), 9);
    }

    #[test]
    fn test_core_id_falls_back_on_garbage() {
        let dir = TempDir::new().unwrap();
        let topo_dir = dir.path().join("cpu2/topology");
        std::fs::create_dir_all(&topo_dir).unwrap();
        std::fs::write(topo_dir.join("core_id"), "not-a-number\n").unwrap();

        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.core_id(2), 2);
    }
}
