use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System as SysinfoSystem};

/// Snapshot of process/host resource usage, refreshed on a timer by
/// [`super::Runtime`] and exposed alongside Prometheus metrics.
pub struct System {
    inner: SysinfoSystem,
}

#[derive(Debug, Clone, Copy)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemMetricsWrapper {
    pub cpu_usage_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

impl From<SystemMetrics> for SystemMetricsWrapper {
    fn from(m: SystemMetrics) -> Self {
        Self {
            cpu_usage_percent: m.cpu_usage_percent,
            memory_used_bytes: m.memory_used_bytes,
            memory_total_bytes: m.memory_total_bytes,
        }
    }
}

impl System {
    pub async fn new() -> Self {
        let refresh = RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut inner = SysinfoSystem::new_with_specifics(refresh);
        inner.refresh_specifics(refresh);
        Self { inner }
    }

    pub fn refresh(&mut self) {
        self.inner.refresh_cpu_usage();
        self.inner.refresh_memory();
    }

    pub fn metrics(&self) -> Result<SystemMetrics, anyhow::Error> {
        let cpu_usage_percent = self.inner.global_cpu_usage();
        Ok(SystemMetrics {
            cpu_usage_percent,
            memory_used_bytes: self.inner.used_memory(),
            memory_total_bytes: self.inner.total_memory(),
        })
    }
}
