// System monitor: CPU / memory / disk / battery / temperature, read-only.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;
use sysinfo::{Disks, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use super::runner::{ProcessRunner, ShellRunner};

/// Window between the two CPU samples
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(500);
/// Processes below this memory share are hidden from the process list
const PROCESS_MIN_MEMORY_PERCENT: f32 = 0.5;
/// Thermal zone read for the device temperature (millidegrees Celsius)
const THERMAL_ZONE_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Battery state reported by `termux-battery-status`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatteryStatus {
    pub percentage: Option<u8>,
    pub status: Option<String>,
}

/// Point-in-time system summary for the status view
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    /// Bot uptime
    pub uptime: Duration,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub battery: Option<BatteryStatus>,
    pub temperature_c: Option<f32>,
}

/// One row of the process list
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub memory_percent: f32,
}

/// Read-only access to device counters
pub trait SystemMonitor: Send + Sync + 'static {
    /// Global CPU usage in percent, sampled over a short window
    fn cpu_usage(&self) -> impl Future<Output = f32> + Send;

    fn snapshot(&self) -> impl Future<Output = SystemSnapshot> + Send;

    /// Top processes by memory share (descending), at most `limit`
    fn top_processes(&self, limit: usize) -> impl Future<Output = Vec<ProcessInfo>> + Send;
}

/// sysinfo-backed monitor; battery comes from the Termux API command
pub struct DeviceMonitor {
    sys: Mutex<System>,
    runner: ShellRunner,
    started_at: Instant,
}

impl DeviceMonitor {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
            runner: ShellRunner,
            started_at: Instant::now(),
        }
    }

    async fn battery(&self) -> Option<BatteryStatus> {
        let out = self
            .runner
            .run("termux-battery-status", Duration::from_secs(10))
            .await;
        if !out.success() {
            return None;
        }
        serde_json::from_str(out.text()).ok()
    }
}

impl Default for DeviceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor for DeviceMonitor {
    async fn cpu_usage(&self) -> f32 {
        let mut sys = self.sys.lock().await;
        sys.refresh_cpu_usage();
        tokio::time::sleep(CPU_SAMPLE_WINDOW.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        sys.refresh_cpu_usage();
        sys.global_cpu_usage()
    }

    async fn snapshot(&self) -> SystemSnapshot {
        let cpu_percent = self.cpu_usage().await;

        let memory_percent = {
            let mut sys = self.sys.lock().await;
            sys.refresh_memory();
            percent(sys.used_memory(), sys.total_memory())
        };

        SystemSnapshot {
            uptime: self.started_at.elapsed(),
            cpu_percent,
            memory_percent,
            disk_percent: root_disk_percent(),
            battery: self.battery().await,
            temperature_c: read_temperature(Path::new(THERMAL_ZONE_PATH)),
        }
    }

    async fn top_processes(&self, limit: usize) -> Vec<ProcessInfo> {
        let mut sys = self.sys.lock().await;
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let total = sys.total_memory();

        let procs = sys
            .processes()
            .values()
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                memory_percent: percent(p.memory(), total),
            })
            .collect();
        rank_processes(procs, limit)
    }
}

/// Keep processes above the memory floor, sorted by memory share descending.
pub fn rank_processes(mut procs: Vec<ProcessInfo>, limit: usize) -> Vec<ProcessInfo> {
    procs.retain(|p| p.memory_percent > PROCESS_MIN_MEMORY_PERCENT);
    procs.sort_by(|a, b| {
        b.memory_percent
            .partial_cmp(&a.memory_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    procs.truncate(limit);
    procs
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

/// Usage of the disk mounted at `/` (or the largest disk if `/` is not listed, as on Android)
fn root_disk_percent() -> f32 {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()));
    match disk {
        Some(d) => percent(d.total_space().saturating_sub(d.available_space()), d.total_space()),
        None => 0.0,
    }
}

fn read_temperature(path: &Path) -> Option<f32> {
    let raw = std::fs::read_to_string(path).ok()?;
    parse_millidegrees(&raw)
}

fn parse_millidegrees(raw: &str) -> Option<f32> {
    let value: f32 = raw.trim().parse().ok()?;
    // Some kernels report whole degrees instead of millidegrees
    if value.abs() > 1000.0 {
        Some(value / 1000.0)
    } else {
        Some(value)
    }
}
