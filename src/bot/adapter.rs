//! Abstract chat adapter traits.
//!
//! The dispatch loop and the controller only talk to these traits, so the
//! menu state machine can be driven by an in-memory fake in tests.

use super::types::View;

/// Result alias with plain String error (platform error types are mapped to
/// String at the impl boundary).
pub type AdapterResult<T> = Result<T, String>;

pub trait ChatAdapter: Send + Sync + 'static {
    /// Verify the bot connection and return a human-readable identifier
    /// (e.g. `@bot_username`).
    fn verify_connection(
        &self,
    ) -> impl std::future::Future<Output = AdapterResult<String>> + Send;

    /// Register the slash-command menu.
    fn register_commands(
        &self,
    ) -> impl std::future::Future<Output = AdapterResult<()>> + Send;

    /// Receive loop (long polling). Blocks until `shutdown_rx` signals `true`.
    fn listen_loop(
        &self,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> impl std::future::Future<Output = ()> + Send;

    /// Send a text message to the given chat.
    fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> impl std::future::Future<Output = AdapterResult<()>> + Send;
}

/// Inline-keyboard surface used by the menu controller.
pub trait MenuAdapter: ChatAdapter {
    /// Send a view as a new message and return its ID.
    fn send_view(
        &self,
        chat_id: i64,
        view: &View,
    ) -> impl std::future::Future<Output = AdapterResult<i64>> + Send;

    /// Replace text and keyboard of an existing message.
    fn edit_view(
        &self,
        chat_id: i64,
        message_id: i64,
        view: &View,
    ) -> impl std::future::Future<Output = AdapterResult<()>> + Send;

    /// Answer a button press. `text` shows as a toast (or a dialog when `alert`).
    fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> impl std::future::Future<Output = AdapterResult<()>> + Send;
}
