// Stream key store: named relay destinations persisted as a pretty JSON object.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{ulog_debug, ulog_info, ulog_warn};

/// Ingest prefix applied to bare stream keys
pub const TELEGRAM_INGEST_PREFIX: &str = "rtmps://dc5-1.rtmp.t.me/s/";
/// Key names travel inside 64-byte callback data
pub const MAX_KEY_NAME_LEN: usize = 32;

/// Turn a raw key or URL into a full endpoint. Values already starting with
/// `rtmp` (covers `rtmp://` and `rtmps://`) are kept as-is.
pub fn normalize_endpoint(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("rtmp") {
        raw.to_string()
    } else {
        format!("{}{}", TELEGRAM_INGEST_PREFIX, raw)
    }
}

/// Validate and trim a key name
pub fn validate_key_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Key name must not be empty".to_string());
    }
    if name.len() > MAX_KEY_NAME_LEN {
        return Err(format!(
            "Key name too long ({} bytes, max {})",
            name.len(),
            MAX_KEY_NAME_LEN
        ));
    }
    if name.chars().any(char::is_whitespace) {
        return Err("Key name must not contain spaces".to_string());
    }
    Ok(name.to_string())
}

pub struct StreamKeyStore {
    keys: BTreeMap<String, String>,
    persist_path: PathBuf,
}

impl StreamKeyStore {
    /// Load keys from `path`. A missing or unparsable file yields an empty store.
    pub fn load_from_disk(path: &Path) -> Self {
        let keys = if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                    Ok(keys) => {
                        ulog_info!("[stream-keys] Loaded {} keys", keys.len());
                        keys
                    }
                    Err(e) => {
                        ulog_warn!("[stream-keys] Failed to parse {}: {}", path.display(), e);
                        BTreeMap::new()
                    }
                },
                Err(e) => {
                    ulog_warn!("[stream-keys] Failed to read {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Self {
            keys,
            persist_path: path.to_path_buf(),
        }
    }

    /// Normalize `raw` and upsert it under `name`. Persists before returning;
    /// returns the stored endpoint.
    pub fn add(&mut self, name: &str, raw: &str) -> Result<String, String> {
        let name = validate_key_name(name)?;
        if raw.trim().is_empty() {
            return Err("Stream key must not be empty".to_string());
        }
        let endpoint = normalize_endpoint(raw);

        let previous = self.keys.insert(name.clone(), endpoint.clone());
        if let Err(e) = self.save_to_disk() {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => self.keys.insert(name, old),
                None => self.keys.remove(&name),
            };
            return Err(e);
        }
        ulog_info!("[stream-keys] Saved key '{}'", name);
        Ok(endpoint)
    }

    /// Remove `name`. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> Result<bool, String> {
        let Some(old) = self.keys.remove(name) else {
            return Ok(false);
        };
        if let Err(e) = self.save_to_disk() {
            self.keys.insert(name.to_string(), old);
            return Err(e);
        }
        ulog_info!("[stream-keys] Removed key '{}'", name);
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.keys.get(name).cloned()
    }

    pub fn list(&self) -> BTreeMap<String, String> {
        self.keys.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Rewrite the whole file through a temp file + rename
    fn save_to_disk(&self) -> Result<(), String> {
        let json = serde_json::to_string_pretty(&self.keys)
            .map_err(|e| format!("Serialize error: {}", e))?;

        if let Some(parent) = self.persist_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create key store dir: {}", e))?;
        }

        let tmp = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| format!("Failed to write key store: {}", e))?;
        std::fs::rename(&tmp, &self.persist_path)
            .map_err(|e| format!("Failed to replace key store: {}", e))?;

        ulog_debug!("[stream-keys] Persisted {} keys", self.keys.len());
        Ok(())
    }
}
