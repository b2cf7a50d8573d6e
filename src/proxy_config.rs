//! Proxy configuration for outbound Telegram traffic
//!
//! Termux frequently cannot resolve api.telegram.org directly (DNS inside the
//! Android sandbox). Two sources, in order:
//! 1. `PROXY_URL` from the env file, validated
//! 2. Auto-detection: probe the HTTP ports used by common Android proxy apps
//!    (Clash 7890, V2RayNG 10809, NekoBox 2080, Surfboard 25500, ...)
//!
//! Note: Localhost connections always bypass proxy (Alist lives on 127.0.0.1).

use std::time::Duration;

use crate::{ulog_info, ulog_warn};

/// Endpoint used to test reachability
const TELEGRAM_PROBE_URL: &str = "https://api.telegram.org";
/// Local HTTP proxy ports tried during auto-detection
const COMMON_PROXY_PORTS: [u16; 7] = [7890, 10809, 2080, 25500, 8080, 1080, 8234];
/// Timeout for the direct probe (seconds)
const DIRECT_PROBE_TIMEOUT_SECS: u64 = 3;
/// Timeout for each proxy probe (seconds)
const PROXY_PROBE_TIMEOUT_SECS: u64 = 2;
/// Loopback addresses excluded from the proxy
const NO_PROXY_LIST: &str = "localhost,localhost.localdomain,127.0.0.1,127.0.0.0/8,::1,[::1]";

/// Validate a configured proxy URL.
/// Accepts `http`, `https` and `socks5` with an explicit non-zero port.
pub fn validate_proxy_url(url: &str) -> Result<String, String> {
    let (protocol, rest) = url
        .split_once("://")
        .ok_or_else(|| format!("Invalid proxy URL '{}': missing protocol", url))?;

    if !["http", "https", "socks5"].contains(&protocol) {
        return Err(format!(
            "Invalid proxy protocol '{}'. Supported: http, https, socks5",
            protocol
        ));
    }

    let host_port = rest.trim_end_matches('/');
    let (host, port) = host_port
        .rsplit_once(':')
        .ok_or_else(|| format!("Invalid proxy URL '{}': missing port", url))?;
    if host.is_empty() {
        return Err(format!("Invalid proxy URL '{}': missing host", url));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| format!("Invalid proxy port '{}'", port))?;
    if port == 0 {
        return Err(format!(
            "Invalid proxy port: {}. Port must be between 1 and 65535",
            port
        ));
    }

    Ok(format!("{}://{}:{}", protocol, host, port))
}

/// Candidate proxy URLs for auto-detection, in probe order
pub fn candidate_proxy_urls() -> Vec<String> {
    COMMON_PROXY_PORTS
        .iter()
        .map(|port| format!("http://127.0.0.1:{}", port))
        .collect()
}

/// Decide which proxy (if any) the Telegram client should use.
/// Returns `None` for a direct connection.
pub async fn resolve_proxy(configured: Option<&str>) -> Option<String> {
    if let Some(url) = configured {
        match validate_proxy_url(url) {
            Ok(url) => {
                ulog_info!("[proxy_config] Using configured proxy: {}", url);
                return Some(url);
            }
            Err(e) => {
                ulog_warn!("[proxy_config] {}. Falling back to auto-detection.", e);
            }
        }
    }

    if probe(None, DIRECT_PROBE_TIMEOUT_SECS).await {
        ulog_info!("[proxy_config] Telegram reachable directly, no proxy needed");
        return None;
    }

    ulog_warn!("[proxy_config] Telegram API not reachable directly, probing local proxy ports...");
    for candidate in candidate_proxy_urls() {
        if probe(Some(&candidate), PROXY_PROBE_TIMEOUT_SECS).await {
            ulog_info!("[proxy_config] Auto-detected local proxy: {}", candidate);
            return Some(candidate);
        }
    }

    ulog_warn!(
        "[proxy_config] No working proxy found. If a VPN app is running, enable its TUN/route mode."
    );
    None
}

/// One reachability probe, optionally through a proxy
async fn probe(proxy: Option<&str>, timeout_secs: u64) -> bool {
    let builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs));
    let client = match apply_proxy(builder, proxy).and_then(|b| {
        b.build()
            .map_err(|e| format!("[proxy_config] Failed to build HTTP client: {}", e))
    }) {
        Ok(c) => c,
        Err(_) => return false,
    };
    client.get(TELEGRAM_PROBE_URL).send().await.is_ok()
}

fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: Option<&str>,
) -> Result<reqwest::ClientBuilder, String> {
    match proxy {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| format!("[proxy_config] Failed to create proxy: {}", e))?
                .no_proxy(reqwest::NoProxy::from_string(NO_PROXY_LIST));
            Ok(builder.proxy(proxy))
        }
        None => Ok(builder.no_proxy()),
    }
}

/// Build a reqwest client with the resolved proxy
/// - `Some(url)`: route external requests through it, loopback excluded
/// - `None`: direct connection (system proxy ignored)
pub fn build_client_with_proxy(
    builder: reqwest::ClientBuilder,
    proxy: Option<&str>,
) -> Result<reqwest::Client, String> {
    apply_proxy(builder, proxy)?
        .build()
        .map_err(|e| format!("[proxy_config] Failed to build HTTP client: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_proxy_url_http() {
        let result = validate_proxy_url("http://127.0.0.1:7890");
        assert_eq!(result.unwrap(), "http://127.0.0.1:7890");
    }

    #[test]
    fn test_validate_proxy_url_socks5_trailing_slash() {
        let result = validate_proxy_url("socks5://192.168.1.1:1080/");
        assert_eq!(result.unwrap(), "socks5://192.168.1.1:1080");
    }

    #[test]
    fn test_validate_proxy_url_invalid_protocol() {
        let result = validate_proxy_url("ftp://127.0.0.1:21");
        assert!(result.unwrap_err().contains("Invalid proxy protocol"));
    }

    #[test]
    fn test_validate_proxy_url_zero_port() {
        let result = validate_proxy_url("http://127.0.0.1:0");
        assert!(result.unwrap_err().contains("Invalid proxy port"));
    }

    #[test]
    fn test_validate_proxy_url_missing_port() {
        assert!(validate_proxy_url("http://proxy.example.com").is_err());
        assert!(validate_proxy_url("127.0.0.1:7890").is_err());
    }

    #[test]
    fn test_candidate_order_starts_with_clash() {
        let candidates = candidate_proxy_urls();
        assert_eq!(candidates.len(), 7);
        assert_eq!(candidates[0], "http://127.0.0.1:7890");
        assert_eq!(candidates[1], "http://127.0.0.1:10809");
    }
}
