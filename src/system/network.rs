// Network helpers: connectivity probe, Wi-Fi via the Termux API commands, IP lookups.

use std::net::UdpSocket;
use std::time::Duration;

use serde::Deserialize;

use super::runner::{shell_quote, ProcessRunner};
use crate::config::WifiCredential;

/// Well-known address pinged for connectivity (AliDNS)
pub const PING_TARGET: &str = "223.5.5.5";
/// Connection-info polls after a connect request
const CONNECT_POLL_ATTEMPTS: u32 = 5;
const CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Networks shown in a scan result
const SCAN_RESULT_LIMIT: usize = 10;

/// Current Wi-Fi association
#[derive(Debug, Clone, PartialEq)]
pub struct WifiInfo {
    pub ssid: String,
    pub ip: String,
}

/// One network from `termux-wifi-scaninfo`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WifiNetwork {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ConnectionInfo {
    ssid: Option<String>,
    ip: Option<String>,
}

/// One ping to the fixed target
pub async fn check_internet<R: ProcessRunner>(runner: &R) -> bool {
    runner
        .run(
            &format!("ping -c 1 -W 2 {} > /dev/null 2>&1", PING_TARGET),
            Duration::from_secs(5),
        )
        .await
        .success()
}

/// SSID and IP of the current Wi-Fi connection, `None` if unavailable
pub async fn wifi_info<R: ProcessRunner>(runner: &R) -> Option<WifiInfo> {
    let out = runner
        .run("termux-wifi-connectioninfo", Duration::from_secs(10))
        .await;
    parse_connection_info(out.text())
}

fn parse_connection_info(json: &str) -> Option<WifiInfo> {
    let info: ConnectionInfo = serde_json::from_str(json).ok()?;
    Some(WifiInfo {
        ssid: info.ssid.unwrap_or_else(|| "not connected".to_string()),
        ip: info.ip.unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Ask Android to join `cred`, then poll until the SSID matches or attempts run out.
pub async fn connect_wifi<R: ProcessRunner>(runner: &R, cred: &WifiCredential) -> bool {
    let command = format!(
        "termux-wifi-connect -s {} -p {}",
        shell_quote(&cred.ssid),
        shell_quote(&cred.password)
    );
    runner.run(&command, Duration::from_secs(15)).await;

    for _ in 0..CONNECT_POLL_ATTEMPTS {
        tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        if let Some(info) = wifi_info(runner).await {
            if info.ssid == cred.ssid {
                return true;
            }
        }
    }
    false
}

/// Nearby networks (first few), or the raw command output as error
pub async fn scan_wifi<R: ProcessRunner>(runner: &R) -> Result<Vec<WifiNetwork>, String> {
    let out = runner
        .run("termux-wifi-scaninfo", Duration::from_secs(30))
        .await;
    parse_scan(out.text())
}

fn parse_scan(json: &str) -> Result<Vec<WifiNetwork>, String> {
    let mut networks: Vec<WifiNetwork> =
        serde_json::from_str(json).map_err(|e| format!("{} ({})", e, first_line(json)))?;
    networks.truncate(SCAN_RESULT_LIMIT);
    Ok(networks)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Public IP as seen by ifconfig.me
pub async fn public_ip(client: &reqwest::Client) -> Option<String> {
    let resp = client
        .get("http://ifconfig.me/ip")
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .ok()?;
    let text = resp.text().await.ok()?;
    let ip = text.trim();
    if ip.is_empty() {
        None
    } else {
        Some(ip.to_string())
    }
}

/// LAN address of the default route interface (no packets are sent)
pub fn lan_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
