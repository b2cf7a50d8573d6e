// Health watchdog: connectivity failover across the configured Wi-Fi networks
// and high-CPU alerts to the admin chat. Runs until the shutdown signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::{BotConfig, WifiCredential};
use crate::system::network;
use crate::system::{ProcessRunner, SystemMonitor};
use crate::{ulog_debug, ulog_info, ulog_warn};

use super::adapter::ChatAdapter;

/// Poll interval (seconds)
const WATCHDOG_INTERVAL_SECS: u64 = 10;
/// CPU percentage that triggers an alert
pub const CPU_ALERT_THRESHOLD: f32 = 90.0;
/// Minimum spacing between two CPU alerts
pub const CPU_ALERT_COOLDOWN: Duration = Duration::from_secs(300);

/// Rate limit for CPU alerts: at most one per cooldown window, no matter how
/// many polls exceed the threshold.
#[derive(Debug, Clone)]
pub struct CpuAlertGate {
    threshold: f32,
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl Default for CpuAlertGate {
    fn default() -> Self {
        Self::new(CPU_ALERT_THRESHOLD, CPU_ALERT_COOLDOWN)
    }
}

impl CpuAlertGate {
    pub fn new(threshold: f32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            last_alert: None,
        }
    }

    /// Record a CPU sample taken at `now`; true when an alert should go out
    pub fn should_alert(&mut self, cpu_percent: f32, now: Instant) -> bool {
        if cpu_percent <= self.threshold {
            return false;
        }
        if let Some(last) = self.last_alert {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_alert = Some(now);
        true
    }
}

pub struct HealthWatchdog<A, R, M> {
    adapter: Arc<A>,
    runner: Arc<R>,
    monitor: Arc<M>,
    admin_id: Option<i64>,
    wifi_networks: Vec<WifiCredential>,
    auto_wifi_switch: bool,
    cpu_gate: CpuAlertGate,
}

impl<A, R, M> HealthWatchdog<A, R, M>
where
    A: ChatAdapter,
    R: ProcessRunner,
    M: SystemMonitor,
{
    pub fn new(config: &BotConfig, adapter: Arc<A>, runner: Arc<R>, monitor: Arc<M>) -> Self {
        Self {
            adapter,
            runner,
            monitor,
            admin_id: config.admin_id,
            wifi_networks: config.wifi_networks.clone(),
            auto_wifi_switch: config.auto_wifi_switch,
            cpu_gate: CpuAlertGate::default(),
        }
    }

    /// Main loop. Runs until shutdown signal.
    pub async fn run_loop(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(WATCHDOG_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        ulog_info!(
            "[watchdog] Started (interval={}s, wifi failover={}, networks={})",
            WATCHDOG_INTERVAL_SECS,
            self.auto_wifi_switch,
            self.wifi_networks.len()
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        ulog_info!("[watchdog] Shutdown signal received, exiting");
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.run_once(Instant::now()).await;
                }
            }
        }
    }

    /// One poll: connectivity first, then CPU
    pub async fn run_once(&mut self, now: Instant) {
        if self.auto_wifi_switch && !self.wifi_networks.is_empty() {
            self.check_connectivity().await;
        }

        let cpu = self.monitor.cpu_usage().await;
        if self.cpu_gate.should_alert(cpu, now) {
            ulog_warn!("[watchdog] High CPU usage: {:.1}%", cpu);
            self.notify(&format!("⚠️ *High CPU usage*: {:.1}%", cpu)).await;
        }
    }

    async fn check_connectivity(&self) {
        if network::check_internet(self.runner.as_ref()).await {
            return;
        }
        ulog_warn!("[watchdog] Internet unreachable, trying configured Wi-Fi networks");

        for cred in &self.wifi_networks {
            ulog_info!("[watchdog] Trying Wi-Fi '{}'", cred.ssid);
            if network::connect_wifi(self.runner.as_ref(), cred).await {
                ulog_info!("[watchdog] Switched to Wi-Fi '{}'", cred.ssid);
                self.notify(&format!("🔄 Network recovered, switched to Wi-Fi: {}", cred.ssid))
                    .await;
                return;
            }
        }
        ulog_warn!("[watchdog] No configured Wi-Fi network could be joined");
    }

    async fn notify(&self, text: &str) {
        let Some(admin_id) = self.admin_id else {
            ulog_debug!("[watchdog] No ADMIN_ID, dropping notification");
            return;
        };
        if let Err(e) = self.adapter.send_message(admin_id, text).await {
            ulog_warn!("[watchdog] Failed to notify admin: {}", e);
        }
    }
}
