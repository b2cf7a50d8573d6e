// Bot configuration: key=value environment file (`.env`) next to the install root.
//
// The file is parsed without touching the process environment, so it can be
// re-read at any time. ALIST_TOKEN is re-read on every privileged call to pick
// up token rotation done outside the bot (e.g. after a password reset).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::ulog_warn;

/// Default Alist address (local Termux install)
pub const DEFAULT_ALIST_URL: &str = "http://127.0.0.1:5244";
/// Default transcoder binary
pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";

/// One Wi-Fi network the watchdog may fail over to
#[derive(Debug, Clone, PartialEq)]
pub struct WifiCredential {
    pub ssid: String,
    pub password: String,
}

/// Static bot configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    /// Admin Telegram user id. `None` rejects every sender.
    pub admin_id: Option<i64>,
    /// Default relay destination (used by the stream console)
    pub rtmp_url: Option<String>,
    pub alist_url: String,
    pub ffmpeg_bin: String,
    pub wifi_networks: Vec<WifiCredential>,
    pub auto_wifi_switch: bool,
    pub proxy_url: Option<String>,
    /// Path of the env file, kept for lazy re-reads
    env_path: PathBuf,
    /// Token as loaded at startup (fallback if the file disappears)
    initial_alist_token: String,
    /// ADMIN_ID was explicitly 0
    admin_id_zero: bool,
}

impl BotConfig {
    /// Load configuration from `env_path`, falling back to the process environment
    /// for keys missing from the file.
    pub fn load(env_path: &Path) -> Result<Self, String> {
        let vars = read_env_file(env_path);
        let config = Self::from_vars(&vars, env_path);
        if config.bot_token.is_empty() {
            return Err(format!(
                "BOT_TOKEN is not set (looked in {} and the process environment)",
                env_path.display()
            ));
        }
        Ok(config)
    }

    /// Build a config from already-parsed variables.
    pub fn from_vars(vars: &HashMap<String, String>, env_path: &Path) -> Self {
        let get = |key: &str| -> Option<String> {
            vars.get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let admin_id_raw = get("ADMIN_ID");
        let admin_id_zero = admin_id_raw.as_deref() == Some("0");
        let admin_id = match admin_id_raw {
            Some(raw) => match raw.parse::<i64>() {
                Ok(0) => {
                    ulog_warn!("[config] ADMIN_ID=0 does not allow everyone, it rejects every sender");
                    None
                }
                Ok(id) => Some(id),
                Err(e) => {
                    ulog_warn!("[config] Invalid ADMIN_ID '{}': {}", raw, e);
                    None
                }
            },
            None => None,
        };

        let auto_wifi_switch = get("AUTO_WIFI_SWITCH")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        Self {
            bot_token: get("BOT_TOKEN").unwrap_or_default(),
            admin_id,
            rtmp_url: get("RTMP_URL"),
            alist_url: get("ALIST_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ALIST_URL.to_string()),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or_else(|| DEFAULT_FFMPEG_BIN.to_string()),
            wifi_networks: get("WIFI_NETWORKS")
                .map(|raw| parse_wifi_networks(&raw))
                .unwrap_or_default(),
            auto_wifi_switch,
            proxy_url: get("PROXY_URL"),
            env_path: env_path.to_path_buf(),
            initial_alist_token: get("ALIST_TOKEN").unwrap_or_default(),
            admin_id_zero,
        }
    }

    /// Startup warning when no sender can ever be authorized
    pub fn admin_warning(&self) -> Option<&'static str> {
        match self.admin_id {
            Some(_) => None,
            None if self.admin_id_zero => Some(
                "ADMIN_ID=0 no longer means \"allow everyone\": every sender is rejected until a real admin id is set",
            ),
            None => Some("ADMIN_ID is not set: every sender will be rejected"),
        }
    }

    /// Current Alist token. Re-reads the env file so an externally rotated token
    /// is used without restarting the bot.
    pub fn alist_token(&self) -> String {
        let vars = read_env_file(&self.env_path);
        match vars.get("ALIST_TOKEN").map(|t| t.trim()) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => self.initial_alist_token.clone(),
        }
    }

    /// Env file this config was loaded from
    pub fn env_path(&self) -> &Path {
        &self.env_path
    }
}

/// Parse the env file into a map. Missing file → empty map; malformed lines are skipped.
fn read_env_file(path: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return vars,
        Err(e) => {
            ulog_warn!("[config] Failed to open env file {}: {}", path.display(), e);
            return vars;
        }
    };
    for item in iter {
        match item {
            Ok((key, value)) => {
                vars.insert(key, value);
            }
            Err(e) => ulog_warn!("[config] Skipping malformed line in {}: {}", path.display(), e),
        }
    }
    vars
}

/// Parse `ssid:password;ssid2:password2`. The password may itself contain ':'.
pub fn parse_wifi_networks(raw: &str) -> Vec<WifiCredential> {
    raw.split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (ssid, password) = pair.split_once(':').unwrap_or((pair, ""));
            let ssid = ssid.trim();
            if ssid.is_empty() {
                return None;
            }
            Some(WifiCredential {
                ssid: ssid.to_string(),
                password: password.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_env(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(".env");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_basic_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_env(
            dir.path(),
            "BOT_TOKEN=123:abc\nADMIN_ID=42\nRTMP_URL=rtmps://dc5-1.rtmp.t.me/s/key\n# comment\nALIST_TOKEN=tok1\n",
        );
        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.admin_id, Some(42));
        assert_eq!(config.rtmp_url.as_deref(), Some("rtmps://dc5-1.rtmp.t.me/s/key"));
        assert_eq!(config.alist_url, DEFAULT_ALIST_URL);
        assert_eq!(config.alist_token(), "tok1");
        assert!(config.auto_wifi_switch);
    }

    #[test]
    fn test_admin_id_zero_rejects_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_env(dir.path(), "BOT_TOKEN=t\nADMIN_ID=0\n");
        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.admin_id, None);
        assert!(config.admin_warning().unwrap().starts_with("ADMIN_ID=0"));
    }

    #[test]
    fn test_admin_warning_for_missing_and_set_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = HashMap::new();
        vars.insert("BOT_TOKEN".to_string(), "t".to_string());
        vars.insert("ADMIN_ID".to_string(), "abc".to_string());
        let invalid = BotConfig::from_vars(&vars, &dir.path().join(".env"));
        assert_eq!(
            invalid.admin_warning(),
            Some("ADMIN_ID is not set: every sender will be rejected")
        );

        vars.insert("ADMIN_ID".to_string(), "42".to_string());
        let set = BotConfig::from_vars(&vars, &dir.path().join(".env"));
        assert_eq!(set.admin_warning(), None);
    }

    #[test]
    fn test_alist_token_reread_after_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_env(dir.path(), "BOT_TOKEN=t\nALIST_TOKEN=old\n");
        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.alist_token(), "old");

        write_env(dir.path(), "BOT_TOKEN=t\nALIST_TOKEN=new\n");
        assert_eq!(config.alist_token(), "new");
    }

    #[test]
    fn test_parse_wifi_networks() {
        let nets = parse_wifi_networks("home:pa:ss; office:secret ;;:nossid");
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].ssid, "home");
        assert_eq!(nets[0].password, "pa:ss");
        assert_eq!(nets[1].ssid, "office");
        assert_eq!(nets[1].password, "secret");
    }

    #[test]
    fn test_auto_switch_disabled() {
        let mut vars = HashMap::new();
        vars.insert("BOT_TOKEN".to_string(), "t".to_string());
        vars.insert("AUTO_WIFI_SWITCH".to_string(), "off".to_string());
        let config = BotConfig::from_vars(&vars, Path::new("/nonexistent/.env"));
        assert!(!config.auto_wifi_switch);
    }
}
