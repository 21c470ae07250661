//! Resource usage snapshots and static hardware inventory

use crate::runner::CommandRunner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sysinfo::{Disks, System};

/// Point-in-time CPU/RAM/system-disk usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu_usage_percent: f64,
    pub ram_usage_percent: f64,
    pub disk_usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub device: String,
    pub mount_point: String,
    pub total: String,
    pub used: String,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticInventory {
    pub os: String,
    pub cpu: String,
    pub ram: String,
    pub gpu: String,
    pub disks: Vec<DiskUsage>,
}

pub trait SnapshotSource: Send + Sync {
    fn live_usage(&self) -> SystemSnapshot;
}

pub struct SysinfoMonitor {
    system_volume: String,
    runner: Arc<dyn CommandRunner>,
}

impl SysinfoMonitor {
    pub fn new(system_volume: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            system_volume: system_volume.into(),
            runner,
        }
    }

    /// Identification strings read once at startup.
    pub fn static_inventory(&self) -> StaticInventory {
        let mut sys = System::new_all();
        sys.refresh_all();

        let os = format!(
            "{} {} ({})",
            System::name().unwrap_or_else(|| "Windows".to_string()),
            System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
        );

        let cpu_brand = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let cpu = format!("{} ({} Cores)", cpu_brand, sys.cpus().len());

        let ram = format!("{:.2} GB", sys.total_memory() as f64 / 1_073_741_824.0);

        let gpu = match self
            .runner
            .check("wmic", &["path", "win32_videocontroller", "get", "name"])
        {
            Ok(o) => parse_gpu_name(&o.stdout).unwrap_or_else(|| "Not Found".to_string()),
            Err(e) => {
                log::warn!("Could not get GPU info via WMIC: {}", e);
                "N/A (WMIC check failed)".to_string()
            }
        };

        let disks = Disks::new_with_refreshed_list();
        let disks = disks
            .iter()
            .filter(|d| !d.is_removable() && !d.file_system().is_empty())
            .map(|d| {
                let total = d.total_space();
                let used = total.saturating_sub(d.available_space());
                DiskUsage {
                    device: d.name().to_string_lossy().to_string(),
                    mount_point: d.mount_point().to_string_lossy().to_string(),
                    total: format!("{:.2} GB", total as f64 / 1_073_741_824.0),
                    used: format!("{:.2} GB", used as f64 / 1_073_741_824.0),
                    percent: percent(used, total),
                }
            })
            .collect();

        StaticInventory {
            os,
            cpu,
            ram,
            gpu,
            disks,
        }
    }
}

impl SnapshotSource for SysinfoMonitor {
    fn live_usage(&self) -> SystemSnapshot {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let mounts: Vec<(String, u64, u64)> = disks
            .iter()
            .map(|d| {
                (
                    d.mount_point().to_string_lossy().to_string(),
                    d.total_space(),
                    d.available_space(),
                )
            })
            .collect();
        let disk_usage_percent = system_disk(&mounts, &self.system_volume)
            .map(|(_, total, avail)| percent(total.saturating_sub(*avail), *total))
            .unwrap_or(0.0);

        SystemSnapshot {
            cpu_usage_percent: sys.global_cpu_usage() as f64,
            ram_usage_percent: percent(sys.used_memory(), sys.total_memory()),
            disk_usage_percent,
        }
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// The mount for `volume` (e.g. `C:`), else the root mount, else the first disk.
fn system_disk<'a>(mounts: &'a [(String, u64, u64)], volume: &str) -> Option<&'a (String, u64, u64)> {
    let volume = volume.to_lowercase();
    mounts
        .iter()
        .find(|(mount, ..)| !volume.is_empty() && mount.to_lowercase().starts_with(&volume))
        .or_else(|| mounts.iter().find(|(mount, ..)| mount == "/"))
        .or_else(|| mounts.first())
}

/// First adapter name after the `Name` header of `wmic ... get name`.
pub fn parse_gpu_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
