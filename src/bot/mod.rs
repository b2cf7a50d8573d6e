// Telegram bot runtime
// Wires configuration and device collaborators to the Telegram adapter and runs
// the single dispatch task until shutdown.

pub mod action;
pub mod adapter;
pub mod controller;
pub mod session;
pub mod telegram;
#[cfg(all(test, unix))]
pub(crate) mod test_support;
pub mod types;
pub mod util;
pub mod views;
pub mod watchdog;

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use tokio::sync::{mpsc, watch};

use crate::alist::{AlistClient, FileService};
use crate::config::BotConfig;
use crate::proxy_config;
use crate::stream::StreamSupervisor;
use crate::stream_keys::StreamKeyStore;
use crate::system::{DeviceMonitor, ProcessRunner, ShellRunner, SystemMonitor};
use crate::{ulog_error, ulog_info, ulog_warn};

use adapter::{ChatAdapter, MenuAdapter};
use controller::{ControllerSettings, MenuController};
use telegram::TelegramAdapter;
use types::InboundEvent;
use watchdog::HealthWatchdog;

/// Inbound queue between the poll loop and the dispatch task
const EVENT_QUEUE_CAPACITY: usize = 256;
/// Pause after a panicking event before taking the next one
const PANIC_COOLDOWN: Duration = Duration::from_secs(15);
/// Timeout for the public IP lookup client
const LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Stream key file under the install root
pub fn stream_keys_path(root: &Path) -> std::path::PathBuf {
    root.join("data").join("stream_keys.json")
}

/// Start the bot and block until `shutdown_rx` signals `true`.
pub async fn run_bot(
    config: Arc<BotConfig>,
    root: &Path,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), String> {
    let proxy = proxy_config::resolve_proxy(config.proxy_url.as_deref()).await;

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let adapter = Arc::new(TelegramAdapter::new(
        &config.bot_token,
        config.admin_id,
        proxy.as_deref(),
        event_tx,
    )?);

    match adapter.verify_connection().await {
        Ok(display_name) => ulog_info!("[bot] Bot verified: {}", display_name),
        Err(e) => return Err(format!("Bot connection verification failed: {}", e)),
    }
    if let Err(e) = adapter.register_commands().await {
        ulog_warn!("[bot] Failed to register bot commands: {}", e);
    }
    if let Some(warning) = config.admin_warning() {
        ulog_warn!("[bot] {}", warning);
    }

    // Long-poll loop (producer)
    let poll_adapter = Arc::clone(&adapter);
    let poll_shutdown_rx = shutdown_rx.clone();
    let poll_handle = tokio::spawn(async move {
        poll_adapter.listen_loop(poll_shutdown_rx).await;
    });

    let runner = Arc::new(ShellRunner);
    let monitor = Arc::new(DeviceMonitor::new());
    let files = Arc::new(AlistClient::new(Arc::clone(&config))?);

    let watchdog = HealthWatchdog::new(
        &config,
        Arc::clone(&adapter),
        Arc::clone(&runner),
        Arc::clone(&monitor),
    );
    let watchdog_handle = tokio::spawn(watchdog.run_loop(shutdown_rx.clone()));

    let lookup_client = proxy_config::build_client_with_proxy(
        Client::builder().timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS)),
        proxy.as_deref(),
    )
    .unwrap_or_default();

    let controller = MenuController::new(
        adapter,
        files,
        runner,
        monitor,
        lookup_client,
        ControllerSettings {
            default_destination: config.rtmp_url.clone(),
            alist_url: config.alist_url.clone(),
        },
        StreamKeyStore::load_from_disk(&stream_keys_path(root)),
        StreamSupervisor::new(&config.ffmpeg_bin),
    );

    dispatch_loop(controller, event_rx, shutdown_rx).await;

    let _ = tokio::time::timeout(Duration::from_secs(5), poll_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), watchdog_handle).await;
    ulog_info!("[bot] Stopped");
    Ok(())
}

/// Process inbound events one at a time, in arrival order.
///
/// A failing event is logged and dropped; a panicking event is logged and
/// followed by a cooldown. The loop itself only ends on shutdown (or when the
/// producer side of the queue is gone).
pub async fn dispatch_loop<A, F, R, M>(
    mut controller: MenuController<A, F, R, M>,
    mut event_rx: mpsc::Receiver<InboundEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    A: MenuAdapter,
    F: FileService,
    R: ProcessRunner,
    M: SystemMonitor,
{
    loop {
        tokio::select! {
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else {
                    ulog_warn!("[bot] Event queue closed");
                    break;
                };
                let chat_id = event.chat_id();
                match AssertUnwindSafe(controller.handle_event(event)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        ulog_warn!("[bot] Failed to handle event in chat {}: {}", chat_id, e);
                    }
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        ulog_error!(
                            "[bot] Dispatch panicked in chat {}: {}. Cooling down {}s",
                            chat_id,
                            reason,
                            PANIC_COOLDOWN.as_secs()
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(PANIC_COOLDOWN) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    ulog_info!("[bot] Shutdown signal received, stopping dispatch");
                    break;
                }
            }
        }
    }
    controller.shutdown();
}
