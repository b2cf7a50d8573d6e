// Telegram Bot API adapter
// Handles long-polling, admin filtering, message sending (split + markdown fallback),
// inline keyboards, callback answers and rate limit handling.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::action::BOT_COMMANDS;
use super::adapter::{AdapterResult, ChatAdapter, MenuAdapter};
use super::types::{ButtonKind, CallbackQuery, InboundEvent, InboundMessage, TelegramError, View};
use super::util::split_message;
use crate::{proxy_config, ulog_debug, ulog_error, ulog_info, ulog_warn};

/// Telegram long-poll timeout (seconds)
const LONG_POLL_TIMEOUT: u64 = 30;
/// Max retries for transient errors before giving up on a call
const MAX_TRANSIENT_RETRIES: u32 = 3;
/// Initial backoff for reconnect (seconds)
const INITIAL_BACKOFF_SECS: u64 = 1;
/// Max backoff for reconnect (seconds)
const MAX_BACKOFF_SECS: u64 = 30;
/// Telegram message length limit
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram Bot API adapter
pub struct TelegramAdapter {
    bot_token: String,
    /// Only this user may talk to the bot. `None` rejects everyone.
    admin_id: Option<i64>,
    client: Client,
    /// Handed to the listen loop, which drops it on exit so the dispatch side
    /// sees a closed queue
    event_tx: Mutex<Option<mpsc::Sender<InboundEvent>>>,
}

impl TelegramAdapter {
    pub fn new(
        bot_token: &str,
        admin_id: Option<i64>,
        proxy: Option<&str>,
        event_tx: mpsc::Sender<InboundEvent>,
    ) -> Result<Self, String> {
        let client_builder = Client::builder().timeout(Duration::from_secs(LONG_POLL_TIMEOUT + 10));
        let client = match proxy_config::build_client_with_proxy(client_builder, proxy) {
            Ok(c) => c,
            Err(e) => {
                ulog_warn!("[telegram] Failed to build client with proxy: {}, falling back to direct", e);
                Client::builder()
                    .timeout(Duration::from_secs(LONG_POLL_TIMEOUT + 10))
                    .build()
                    .map_err(|e| format!("Failed to create HTTP client: {}", e))?
            }
        };

        Ok(Self {
            bot_token: bot_token.to_string(),
            admin_id,
            client,
            event_tx: Mutex::new(Some(event_tx)),
        })
    }

    // ===== Telegram Bot API endpoints =====

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    /// Generic API call with rate limit and error handling
    async fn api_call(&self, method: &str, body: &Value) -> Result<Value, TelegramError> {
        let mut retries = 0;

        loop {
            let resp = self
                .client
                .post(self.api_url(method))
                .json(body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TelegramError::NetworkTimeout
                    } else {
                        TelegramError::Other(format!("HTTP error: {}", e))
                    }
                })?;

            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                let retry_after = serde_json::from_str::<Value>(&body_text)
                    .ok()
                    .and_then(|v| v["parameters"]["retry_after"].as_u64())
                    .unwrap_or(5);
                ulog_warn!(
                    "[telegram] Rate limited on {}, retry after {}s",
                    method,
                    retry_after
                );
                sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            let json: Value = serde_json::from_str(&body_text)
                .map_err(|e| TelegramError::Other(format!("JSON parse error: {}", e)))?;

            if json["ok"].as_bool() == Some(true) {
                return Ok(json["result"].clone());
            }

            let description = json["description"].as_str().unwrap_or("");
            let error_code = json["error_code"].as_i64().unwrap_or(0);

            match classify_error(error_code, description) {
                Some(e) => return Err(e),
                None => {
                    retries += 1;
                    if retries >= MAX_TRANSIENT_RETRIES {
                        return Err(TelegramError::Other(format!(
                            "API error {}: {}",
                            error_code, description
                        )));
                    }
                    ulog_warn!(
                        "[telegram] Transient error on {} (attempt {}): {}",
                        method,
                        retries,
                        description
                    );
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Verify bot token and get bot info
    pub async fn get_me(&self) -> Result<Value, TelegramError> {
        self.api_call("getMe", &json!({})).await
    }

    /// Drop any webhook so getUpdates works
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        self.api_call("deleteWebhook", &json!({ "drop_pending_updates": false }))
            .await?;
        Ok(())
    }

    /// Register bot commands with Telegram
    pub async fn set_my_commands(&self) -> Result<(), TelegramError> {
        let commands: Vec<Value> = BOT_COMMANDS
            .iter()
            .map(|(command, description)| json!({ "command": command, "description": description }))
            .collect();
        self.api_call("setMyCommands", &json!({ "commands": commands }))
            .await?;
        Ok(())
    }

    /// Get updates via long-polling
    async fn get_updates(&self, offset: i64) -> Result<Vec<Value>, TelegramError> {
        let body = json!({
            "offset": offset,
            "limit": 100,
            "timeout": LONG_POLL_TIMEOUT,
            "allowed_updates": ["message", "callback_query"]
        });
        let result = self.api_call("getUpdates", &body).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    /// Send message with Markdown, auto-split if needed. The keyboard (if any)
    /// is attached to the last chunk.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&Value>,
    ) -> Result<i64, TelegramError> {
        let chunks = split_message(text, MAX_MESSAGE_LENGTH);
        let total = chunks.len();
        let mut last_message_id = 0;

        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_markup = if i + 1 == total { markup } else { None };
            last_message_id = self.send_single_message(chat_id, chunk, chunk_markup).await?;
        }

        Ok(last_message_id)
    }

    /// Send a single message, trying Markdown first then falling back to plain text
    async fn send_single_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&Value>,
    ) -> Result<i64, TelegramError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(m) = markup {
            body["reply_markup"] = m.clone();
        }

        match self.api_call("sendMessage", &body).await {
            Ok(result) => return Ok(result["message_id"].as_i64().unwrap_or(0)),
            Err(TelegramError::MarkdownParseError) => {
                ulog_debug!("[telegram] Markdown parse failed, falling back to plain text");
            }
            Err(e) => return Err(e),
        }

        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        let result = self.api_call("sendMessage", &body).await?;
        Ok(result["message_id"].as_i64().unwrap_or(0))
    }

    /// Edit an existing message's text and keyboard
    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&Value>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(m) = markup {
            body["reply_markup"] = m.clone();
        }

        match self.api_call("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(TelegramError::MarkdownParseError) => {
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("parse_mode");
                }
                match self.api_call("editMessageText", &body).await {
                    Ok(_) | Err(TelegramError::MessageNotModified) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(TelegramError::MessageNotModified) => Ok(()), // Safe to ignore
            Err(e) => Err(e),
        }
    }

    /// Answer a callback query (otherwise the button keeps spinning)
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TelegramError> {
        let mut body = json!({
            "callback_query_id": callback_id,
            "show_alert": show_alert
        });
        if let Some(t) = text {
            body["text"] = json!(t);
        }
        match self.api_call("answerCallbackQuery", &body).await {
            Ok(_) | Err(TelegramError::QueryTooOld) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ===== Long-polling loop =====

    /// Main listen loop: runs until shutdown, emitting InboundEvents to event_tx.
    /// Handles reconnection with exponential backoff. The event sender goes
    /// away with the loop, whatever the reason it stopped.
    pub async fn listen_loop(&self, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        let Some(event_tx) = self.event_tx.lock().ok().and_then(|mut slot| slot.take()) else {
            ulog_warn!("[telegram] Listen loop already ran, not starting again");
            return;
        };
        let mut offset: i64 = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        ulog_info!("[telegram] Starting long-poll loop");

        loop {
            if *shutdown_rx.borrow() {
                ulog_info!("[telegram] Shutdown signal received, stopping listen loop");
                break;
            }

            // Wrap getUpdates in select! so shutdown can interrupt the 30s long-poll
            let result = tokio::select! {
                result = self.get_updates(offset) => result,
                _ = shutdown_rx.changed() => {
                    ulog_info!("[telegram] Shutdown during long-poll, exiting");
                    break;
                }
            };

            match result {
                Ok(updates) => {
                    backoff_secs = INITIAL_BACKOFF_SECS;

                    for update in updates {
                        if let Some(update_id) = update["update_id"].as_i64() {
                            offset = update_id + 1;
                        }

                        let Some(event) = parse_update(&update) else {
                            continue;
                        };

                        let sender = match &event {
                            InboundEvent::Message(m) => m.sender_id,
                            InboundEvent::Callback(c) => c.sender_id,
                        };
                        if !is_authorized(self.admin_id, sender) {
                            ulog_warn!(
                                "[telegram] Unauthorized sender {} in chat {}, dropping",
                                sender,
                                event.chat_id()
                            );
                            continue;
                        }

                        if event_tx.send(event).await.is_err() {
                            ulog_error!("[telegram] Event channel closed");
                            return;
                        }
                    }
                }
                Err(TelegramError::TokenUnauthorized) => {
                    ulog_error!("[telegram] Bot token is unauthorized, stopping");
                    break;
                }
                Err(e) => {
                    ulog_warn!(
                        "[telegram] Long-poll error: {}, retrying in {}s",
                        e,
                        backoff_secs
                    );

                    tokio::select! {
                        _ = sleep(Duration::from_secs(backoff_secs)) => {}
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                ulog_info!("[telegram] Shutdown during backoff");
                                break;
                            }
                        }
                    }

                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }

        ulog_info!("[telegram] Listen loop exited");
    }
}

/// Map a non-ok API response to a typed error. `None` means transient (retry).
fn classify_error(error_code: i64, description: &str) -> Option<TelegramError> {
    match error_code {
        400 if description.contains("can't parse entities") => Some(TelegramError::MarkdownParseError),
        400 if description.contains("message is not modified") => Some(TelegramError::MessageNotModified),
        400 if description.contains("MESSAGE_TOO_LONG") || description.contains("message is too long") => {
            Some(TelegramError::MessageTooLong)
        }
        400 if description.contains("query is too old") => Some(TelegramError::QueryTooOld),
        400 => Some(TelegramError::Other(format!("Bad request: {}", description))),
        403 => Some(TelegramError::BotBlocked),
        401 => Some(TelegramError::TokenUnauthorized),
        409 => Some(TelegramError::Conflict),
        _ => None,
    }
}

/// Single-admin check. No admin configured means nobody is allowed.
pub fn is_authorized(admin_id: Option<i64>, sender_id: i64) -> bool {
    admin_id == Some(sender_id)
}

/// Decode a raw update into an event. Non-text messages are ignored.
fn parse_update(update: &Value) -> Option<InboundEvent> {
    if let Some(cq) = update.get("callback_query") {
        let message = cq.get("message")?;
        return Some(InboundEvent::Callback(CallbackQuery {
            id: cq["id"].as_str()?.to_string(),
            chat_id: message["chat"]["id"].as_i64()?,
            message_id: message["message_id"].as_i64()?,
            sender_id: cq["from"]["id"].as_i64()?,
            data: cq["data"].as_str().unwrap_or("").to_string(),
        }));
    }

    let message = update.get("message")?;
    let text = message["text"].as_str()?;
    let from = &message["from"];
    Some(InboundEvent::Message(InboundMessage {
        chat_id: message["chat"]["id"].as_i64()?,
        message_id: message["message_id"].as_i64()?,
        sender_id: from["id"].as_i64()?,
        sender_name: from["username"]
            .as_str()
            .or_else(|| from["first_name"].as_str())
            .map(|s| s.to_string()),
        text: text.to_string(),
    }))
}

/// `reply_markup` for a view, `None` when the view has no buttons
fn keyboard_markup(view: &View) -> Option<Value> {
    if view.keyboard.is_empty() {
        return None;
    }
    let rows: Vec<Vec<Value>> = view
        .keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| match &b.kind {
                    ButtonKind::Callback(data) => json!({ "text": b.text, "callback_data": data }),
                    ButtonKind::Url(url) => json!({ "text": b.text, "url": url }),
                })
                .collect()
        })
        .collect();
    Some(json!({ "inline_keyboard": rows }))
}

// ── Adapter trait implementations ─────────────────────────

impl ChatAdapter for TelegramAdapter {
    async fn verify_connection(&self) -> AdapterResult<String> {
        let result = self.get_me().await.map_err(|e| e.to_string())?;
        let username = result["username"].as_str().unwrap_or("unknown").to_string();
        if let Err(e) = self.delete_webhook().await {
            ulog_warn!("[telegram] deleteWebhook failed: {}", e);
        }
        Ok(format!("@{}", username))
    }

    async fn register_commands(&self) -> AdapterResult<()> {
        self.set_my_commands().await.map_err(|e| e.to_string())
    }

    async fn listen_loop(&self, shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        self.listen_loop(shutdown_rx).await;
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> AdapterResult<()> {
        self.send_message(chat_id, text, None)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl MenuAdapter for TelegramAdapter {
    async fn send_view(&self, chat_id: i64, view: &View) -> AdapterResult<i64> {
        let markup = keyboard_markup(view);
        self.send_message(chat_id, &view.text, markup.as_ref())
            .await
            .map_err(|e| e.to_string())
    }

    async fn edit_view(&self, chat_id: i64, message_id: i64, view: &View) -> AdapterResult<()> {
        let markup = keyboard_markup(view);
        match self
            .edit_message(chat_id, message_id, &view.text, markup.as_ref())
            .await
        {
            Ok(()) => Ok(()),
            Err(TelegramError::MessageTooLong) => {
                // Too long to edit in place: send as new message(s)
                self.send_message(chat_id, &view.text, markup.as_ref())
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, alert: bool) -> AdapterResult<()> {
        self.answer_callback_query(callback_id, text, alert)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::types::Button;

    #[tokio::test]
    async fn test_listen_loop_exit_closes_event_queue() {
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let adapter = TelegramAdapter::new("123:abc", Some(42), None, event_tx).unwrap();
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(true);

        adapter.listen_loop(shutdown_rx.clone()).await;
        assert!(event_rx.recv().await.is_none());

        // A second run has nothing to feed and returns at once
        adapter.listen_loop(shutdown_rx).await;
    }

    #[test]
    fn test_is_authorized() {
        assert!(is_authorized(Some(42), 42));
        assert!(!is_authorized(Some(42), 7));
        assert!(!is_authorized(None, 42));
    }

    #[test]
    fn test_parse_text_message() {
        let update = json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "chat": { "id": 100, "type": "private" },
                "from": { "id": 42, "username": "admin" },
                "text": "/menu"
            }
        });
        assert_eq!(
            parse_update(&update),
            Some(InboundEvent::Message(InboundMessage {
                chat_id: 100,
                message_id: 5,
                sender_id: 42,
                sender_name: Some("admin".to_string()),
                text: "/menu".to_string(),
            }))
        );
    }

    #[test]
    fn test_parse_callback_query() {
        let update = json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 42 },
                "data": "fm_home",
                "message": { "message_id": 9, "chat": { "id": 100 } }
            }
        });
        let Some(InboundEvent::Callback(cq)) = parse_update(&update) else {
            panic!("expected callback");
        };
        assert_eq!(cq.data, "fm_home");
        assert_eq!(cq.message_id, 9);
        assert_eq!(cq.chat_id, 100);
    }

    #[test]
    fn test_parse_ignores_non_text() {
        let update = json!({
            "update_id": 12,
            "message": {
                "message_id": 6,
                "chat": { "id": 100 },
                "from": { "id": 42 },
                "photo": []
            }
        });
        assert_eq!(parse_update(&update), None);
    }

    #[test]
    fn test_keyboard_markup() {
        let view = View::text("hi")
            .row(vec![Button::callback("A", "noop"), Button::url("B", "http://x")]);
        let markup = keyboard_markup(&view).unwrap();
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], "noop");
        assert_eq!(markup["inline_keyboard"][0][1]["url"], "http://x");
        assert_eq!(keyboard_markup(&View::text("plain")), None);
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error(400, "Bad Request: can't parse entities: ..."),
            Some(TelegramError::MarkdownParseError)
        ));
        assert!(matches!(
            classify_error(400, "Bad Request: message is not modified"),
            Some(TelegramError::MessageNotModified)
        ));
        assert!(matches!(classify_error(401, "Unauthorized"), Some(TelegramError::TokenUnauthorized)));
        assert!(matches!(classify_error(409, "Conflict"), Some(TelegramError::Conflict)));
        assert!(classify_error(502, "Bad Gateway").is_none());
    }
}
