// Alist file-service client
// Lists directories, resolves direct links, reports storage mounts and version,
// and removes entries (two-step delete flow). Token re-read on every privileged call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::BotConfig;
use crate::ulog_warn;

/// Timeout for directory listing (seconds)
const LIST_TIMEOUT_SECS: u64 = 10;
/// Timeout for other privileged calls (seconds)
const CALL_TIMEOUT_SECS: u64 = 5;
/// Timeout for the unauthenticated version probe (seconds)
const VERSION_TIMEOUT_SECS: u64 = 2;

/// One directory-listing record
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes (files only)
    pub size: Option<u64>,
}

impl Entry {
    pub fn dir(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_dir: true,
            size: None,
        }
    }

    pub fn file(name: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            is_dir: false,
            size: Some(size),
        }
    }
}

/// Storage mount and its health
#[derive(Debug, Clone, PartialEq)]
pub struct StorageMount {
    pub mount_path: String,
    pub working: bool,
}

/// Alist API errors
#[derive(Debug, Clone, PartialEq)]
pub enum AlistError {
    /// ALIST_TOKEN not configured
    MissingToken,
    /// Token rejected (expired / password reset)
    Unauthorized(String),
    /// API returned a non-200 code
    Api { code: i64, message: String },
    /// Transport error (connection refused, timeout)
    Http(String),
    /// Response body was not the expected JSON
    Parse(String),
}

impl std::fmt::Display for AlistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(
                f,
                "ALIST_TOKEN is not configured. Add it to the .env file."
            ),
            Self::Unauthorized(msg) => write!(
                f,
                "API error (401): {}\nThe Alist token has expired (password reset?). Fetch a new token and update ALIST_TOKEN.",
                msg
            ),
            Self::Api { code, message } => write!(f, "API error ({}): {}", code, message),
            Self::Http(e) => write!(f, "Request failed: {}", e),
            Self::Parse(body) => write!(f, "API parse error: {}", body),
        }
    }
}

impl std::error::Error for AlistError {}

/// Remote file service (Alist-like)
pub trait FileService: Send + Sync + 'static {
    fn list(&self, path: &str) -> impl Future<Output = Result<Vec<Entry>, AlistError>> + Send;

    /// Direct (raw) URL of a file, `None` when unavailable
    fn download_url(&self, path: &str) -> impl Future<Output = Option<String>> + Send;

    fn storage_status(&self) -> impl Future<Output = Result<Vec<StorageMount>, AlistError>> + Send;

    /// Server version, `None` when offline
    fn version(&self) -> impl Future<Output = Option<String>> + Send;

    /// Remove `names` from directory `dir`
    fn remove(
        &self,
        dir: &str,
        names: &[String],
    ) -> impl Future<Output = Result<(), AlistError>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    is_dir: bool,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    mount_path: String,
    #[serde(default)]
    status: String,
}

/// HTTP client for a local Alist instance
pub struct AlistClient {
    config: Arc<BotConfig>,
    http_client: Client,
}

impl AlistClient {
    pub fn new(config: Arc<BotConfig>) -> Result<Self, String> {
        let http_client = Client::builder()
            .no_proxy() // Alist runs on loopback
            .build()
            .map_err(|e| format!("Failed to create Alist HTTP client: {}", e))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.alist_url, path)
    }

    fn token(&self) -> Result<String, AlistError> {
        let token = self.config.alist_token();
        if token.is_empty() {
            Err(AlistError::MissingToken)
        } else {
            Ok(token)
        }
    }

    /// Authenticated POST with JSON body, returning `data` on code 200
    async fn post(&self, path: &str, body: &Value, timeout_secs: u64) -> Result<Value, AlistError> {
        let token = self.token()?;
        let resp = self
            .http_client
            .post(self.url(path))
            .header("Authorization", token)
            .json(body)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| AlistError::Http(e.to_string()))?;
        parse_envelope(resp).await
    }

    /// Authenticated GET, returning `data` on code 200
    async fn get(&self, path: &str, timeout_secs: u64) -> Result<Value, AlistError> {
        let token = self.token()?;
        let resp = self
            .http_client
            .get(self.url(path))
            .header("Authorization", token)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| AlistError::Http(e.to_string()))?;
        parse_envelope(resp).await
    }
}

async fn parse_envelope(resp: reqwest::Response) -> Result<Value, AlistError> {
    let body = resp
        .text()
        .await
        .map_err(|e| AlistError::Http(e.to_string()))?;
    decode_envelope(&body)
}

/// Decode Alist's `{code, message, data}` envelope
fn decode_envelope(body: &str) -> Result<Value, AlistError> {
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|_| AlistError::Parse(body.chars().take(100).collect()))?;
    match envelope.code {
        200 => Ok(envelope.data),
        401 => Err(AlistError::Unauthorized(envelope.message)),
        code => Err(AlistError::Api {
            code,
            message: envelope.message,
        }),
    }
}

fn decode_listing(data: &Value) -> Result<Vec<Entry>, AlistError> {
    // `content` is null for empty directories
    let content = match data.get("content") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(c) => c.clone(),
    };
    let raw: Vec<RawEntry> =
        serde_json::from_value(content).map_err(|e| AlistError::Parse(e.to_string()))?;
    Ok(raw
        .into_iter()
        .map(|r| Entry {
            size: if r.is_dir { None } else { Some(r.size) },
            name: r.name,
            is_dir: r.is_dir,
        })
        .collect())
}

fn decode_storage(data: &Value) -> Result<Vec<StorageMount>, AlistError> {
    let content = match data.get("content") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(c) => c.clone(),
    };
    let raw: Vec<RawStorage> =
        serde_json::from_value(content).map_err(|e| AlistError::Parse(e.to_string()))?;
    Ok(raw
        .into_iter()
        .map(|s| StorageMount {
            working: s.status == "work",
            mount_path: s.mount_path,
        })
        .collect())
}

impl FileService for AlistClient {
    async fn list(&self, path: &str) -> Result<Vec<Entry>, AlistError> {
        let data = self
            .post(
                "/api/fs/list",
                &json!({ "path": path, "refresh": true }),
                LIST_TIMEOUT_SECS,
            )
            .await?;
        decode_listing(&data)
    }

    async fn download_url(&self, path: &str) -> Option<String> {
        match self
            .post("/api/fs/get", &json!({ "path": path }), CALL_TIMEOUT_SECS)
            .await
        {
            Ok(data) => data["raw_url"]
                .as_str()
                .filter(|u| !u.is_empty())
                .map(|u| u.to_string()),
            Err(e) => {
                ulog_warn!("[alist] fs/get failed for {}: {}", path, e);
                None
            }
        }
    }

    async fn storage_status(&self) -> Result<Vec<StorageMount>, AlistError> {
        let data = self
            .get("/api/admin/storage/list", CALL_TIMEOUT_SECS)
            .await?;
        decode_storage(&data)
    }

    async fn version(&self) -> Option<String> {
        let resp = self
            .http_client
            .get(self.url("/api/public/settings"))
            .timeout(Duration::from_secs(VERSION_TIMEOUT_SECS))
            .send()
            .await
            .ok()?;
        let body = resp.text().await.ok()?;
        let data = decode_envelope(&body).ok()?;
        data["version"].as_str().map(|v| v.to_string())
    }

    async fn remove(&self, dir: &str, names: &[String]) -> Result<(), AlistError> {
        self.post(
            "/api/fs/remove",
            &json!({ "dir": dir, "names": names }),
            CALL_TIMEOUT_SECS,
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_listing() {
        let body = r#"{"code":200,"message":"success","data":{"content":[
            {"name":"clip.mp4","is_dir":false,"size":2048},
            {"name":"sub","is_dir":true,"size":0}
        ],"total":2}}"#;
        let data = decode_envelope(body).unwrap();
        let entries = decode_listing(&data).unwrap();
        assert_eq!(entries, vec![Entry::file("clip.mp4", 2048), Entry::dir("sub")]);
    }

    #[test]
    fn test_decode_listing_null_content() {
        let data = decode_envelope(r#"{"code":200,"data":{"content":null}}"#).unwrap();
        assert!(decode_listing(&data).unwrap().is_empty());
    }

    #[test]
    fn test_decode_envelope_unauthorized_has_hint() {
        let err = decode_envelope(r#"{"code":401,"message":"token is expired","data":null}"#)
            .unwrap_err();
        assert_eq!(err, AlistError::Unauthorized("token is expired".to_string()));
        assert!(err.to_string().contains("ALIST_TOKEN"));
    }

    #[test]
    fn test_decode_envelope_not_json() {
        let err = decode_envelope("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, AlistError::Parse(ref b) if b.contains("502")));
    }

    #[test]
    fn test_decode_storage() {
        let data = decode_envelope(
            r#"{"code":200,"data":{"content":[
                {"mount_path":"/local","status":"work"},
                {"mount_path":"/cloud","status":"failed to refresh token"}
            ]}}"#,
        )
        .unwrap();
        let mounts = decode_storage(&data).unwrap();
        assert!(mounts[0].working);
        assert!(!mounts[1].working);
        assert_eq!(mounts[1].mount_path, "/cloud");
    }
}
