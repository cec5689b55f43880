//! Host resources used to size build containers and the test pool

use sysinfo::System;
use tracing::debug;

/// Detected host capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    /// Logical CPU cores, at least 1
    pub cpu_cores: usize,
    pub total_ram_bytes: u64,
}

impl HostResources {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let cpu_cores = match sys.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };
        let resources = Self {
            cpu_cores,
            total_ram_bytes: sys.total_memory(),
        };
        debug!(
            cpu_cores = resources.cpu_cores,
            total_ram_gb = resources.total_ram_gb(),
            "Detected host resources"
        );
        resources
    }

    pub fn total_ram_gb(&self) -> f64 {
        self.total_ram_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Logical CPU cores on this host
pub fn cpu_cores() -> usize {
    HostResources::detect().cpu_cores
}
