//! Metrics - system snapshot for node status
//!
//! External collaborator: the node only reports what the provider returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::sync::Mutex;

/// System snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    /// Root filesystem usage in percent
    pub disk_usage: f32,
    /// CPU temperature in Celsius, if a thermal zone is readable
    pub cpu_temperature: Option<f32>,
    /// Seconds since boot
    pub uptime: u64,
}

#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn snapshot(&self) -> SystemSnapshot;
}

/// sysinfo backed provider
pub struct SysinfoMetrics {
    sys: Mutex<System>,
    thermal_zone: PathBuf,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new_all()),
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
        }
    }

    async fn read_temperature(&self) -> Option<f32> {
        match tokio::fs::read_to_string(&self.thermal_zone).await {
            Ok(raw) => parse_millidegrees(&raw),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read CPU temperature");
                None
            }
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsProvider for SysinfoMetrics {
    async fn snapshot(&self) -> SystemSnapshot {
        let (cpu, memory) = {
            let mut sys = self.sys.lock().await;
            sys.refresh_cpu();
            tokio::time::sleep(Duration::from_millis(200)).await;
            sys.refresh_cpu();
            sys.refresh_memory();

            // Average CPU usage across all cores
            let cpus = sys.cpus();
            let cpu = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
            };
            let memory = if sys.total_memory() > 0 {
                (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
            } else {
                0.0
            };
            (cpu, memory)
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_usage = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space().saturating_sub(d.available_space());
                (used as f32 / d.total_space() as f32) * 100.0
            })
            .unwrap_or(0.0);

        SystemSnapshot {
            cpu_percent: cpu,
            memory_percent: memory,
            disk_usage,
            cpu_temperature: self.read_temperature().await,
            uptime: System::uptime(),
        }
    }
}

fn parse_millidegrees(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().map(|v| v / 1000.0)
}
