// Termux control bot
// Entry point with startup, signal handling and graceful shutdown

pub mod alist;
pub mod args;
pub mod bot;
pub mod config;
pub mod logger;
pub mod proxy_config;
pub mod stream;
pub mod stream_keys;
pub mod system;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use args::Args;
use config::BotConfig;
use system::{ProcessRunner, ShellRunner};

/// Run the bot until SIGINT / SIGTERM.
pub async fn run(args: Args) -> Result<(), String> {
    logger::init_logs_dir(&args.root);

    let env_path = args.env_path();
    let config = Arc::new(BotConfig::load(&env_path)?);
    ulog_info!(
        "[app] Starting (root={}, env={}, alist={})",
        args.root.display(),
        env_path.display(),
        config.alist_url
    );

    // Keep Android from suspending the CPU while the bot runs
    let wake_lock = ShellRunner
        .run("termux-wake-lock", Duration::from_secs(10))
        .await;
    if !wake_lock.success() {
        ulog_warn!("[app] termux-wake-lock unavailable: {}", wake_lock.text().trim());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        ulog_info!("[app] Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    bot::run_bot(config, &args.root, shutdown_rx).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            ulog_warn!("[app] Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
