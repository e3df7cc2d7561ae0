pub use sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;
use sysinfo::System;

/// Sensor id of the CPU usage reading published by the agent
pub const CPU_SENSOR: &str = "CPU_USED";

/// Sensor id of the memory usage reading published by the agent
pub const MEM_SENSOR: &str = "MEM_USED";

/// Samples host-wide CPU and memory usage in percent
pub struct HostSampler {
    sys: System,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    /// Average usage over all cores since the previous call.
    ///
    /// Calls must be at least [`MINIMUM_CPU_UPDATE_INTERVAL`] apart (this
    /// includes the first call after [`HostSampler::new`]) to be meaningful.
    pub fn cpu_percent(&mut self) -> f64 {
        self.sys.refresh_cpu_usage();
        f64::from(self.sys.global_cpu_usage()).clamp(0.0, 100.0)
    }

    pub fn memory_percent(&mut self) -> f64 {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        (self.sys.used_memory() as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}
