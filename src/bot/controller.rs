// Menu controller: the single state machine behind every command and button.
//
// Inbound callback data is decoded into an `Action` once; each action mutates
// the session / key store / supervisor, calls at most a few collaborators and
// renders a view that either edits the pressed message or is sent as a new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::alist::{Entry, FileService};
use crate::logger;
use crate::stream::{StreamSupervisor, StreamTarget};
use crate::stream_keys::{validate_key_name, StreamKeyStore};
use crate::system::network;
use crate::system::runner::DEFAULT_COMMAND_TIMEOUT_SECS;
use crate::system::{ProcessRunner, SystemMonitor};
use crate::{ulog_debug, ulog_info, ulog_warn};

use super::action::{Action, Command, ItemRef};
use super::adapter::{AdapterResult, MenuAdapter};
use super::session::{join_path, parent_path, SessionStore};
use super::types::{CallbackQuery, InboundEvent, InboundMessage, View};
use super::util::{code_block, truncate_output, MAX_OUTPUT_CHARS};
use super::views::{self, DEFAULT_KEY_NAME};

/// Toast shown when a button refers to an older listing
pub const STALE_SELECTION: &str = "Selection expired, refresh and retry";
/// Processes shown in the process view
const TOP_PROCESS_COUNT: usize = 10;
/// Lines of each log shown in the logs view
const LOG_TAIL_LINES: usize = 15;
/// speedtest-cli can take a while on slow links
const SPEED_TEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Pause between stopping Alist and resetting its admin password
const ALIST_STOP_SETTLE: Duration = Duration::from_secs(2);

/// What the next free-text message from a chat continues
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    AwaitStreamSource,
    AwaitKeyName,
    AwaitKeyValue { name: String },
}

/// How to answer the pressed button
#[derive(Debug, Clone, PartialEq)]
enum Answer {
    Silent,
    Toast(String),
    Alert(String),
    /// Answered early by the handler (slow actions)
    Done,
}

/// Controller settings taken from the bot configuration
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// RTMP_URL: target of the stream console and of the `default` key
    pub default_destination: Option<String>,
    pub alist_url: String,
}

pub struct MenuController<A, F, R, M> {
    adapter: Arc<A>,
    files: Arc<F>,
    runner: Arc<R>,
    monitor: Arc<M>,
    http_client: reqwest::Client,
    settings: ControllerSettings,
    sessions: SessionStore,
    keys: StreamKeyStore,
    supervisor: StreamSupervisor,
    pending: HashMap<i64, Continuation>,
}

impl<A, F, R, M> MenuController<A, F, R, M>
where
    A: MenuAdapter,
    F: FileService,
    R: ProcessRunner,
    M: SystemMonitor,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<A>,
        files: Arc<F>,
        runner: Arc<R>,
        monitor: Arc<M>,
        http_client: reqwest::Client,
        settings: ControllerSettings,
        keys: StreamKeyStore,
        supervisor: StreamSupervisor,
    ) -> Self {
        Self {
            adapter,
            files,
            runner,
            monitor,
            http_client,
            settings,
            sessions: SessionStore::new(),
            keys,
            supervisor,
            pending: HashMap::new(),
        }
    }

    /// Pending continuation for a chat (if any)
    pub fn pending(&self, chat_id: i64) -> Option<&Continuation> {
        self.pending.get(&chat_id)
    }

    /// Whether the relay is alive, and what it relays
    pub fn stream_status(&mut self) -> (bool, Option<StreamTarget>) {
        (self.supervisor.is_running(), self.supervisor.target().cloned())
    }

    /// Stop any running relay (shutdown path)
    pub fn shutdown(&mut self) {
        if self.supervisor.stop() {
            ulog_info!("[controller] Relay stopped on shutdown");
        }
    }

    pub async fn handle_event(&mut self, event: InboundEvent) -> AdapterResult<()> {
        match event {
            InboundEvent::Message(msg) => self.handle_message(msg).await,
            InboundEvent::Callback(cq) => self.handle_callback(cq).await,
        }
    }

    // ===== Text messages =====

    async fn handle_message(&mut self, msg: InboundMessage) -> AdapterResult<()> {
        let chat_id = msg.chat_id;
        let text = msg.text.trim();

        if let Some(command) = Command::parse(text) {
            // A known command abandons a half-finished input flow
            if self.pending.remove(&chat_id).is_some() {
                ulog_debug!("[controller] Pending input cancelled by command in chat {}", chat_id);
            }
            return self.handle_command(chat_id, command).await;
        }

        // Unknown slash text (e.g. a local path) still completes a pending input
        match self.pending.remove(&chat_id) {
            Some(continuation) => self.continue_input(chat_id, continuation, text).await,
            None if text.starts_with('/') => {
                self.adapter
                    .send_message(chat_id, "Unknown command. Send /help for the list.")
                    .await
            }
            None => {
                self.adapter
                    .send_message(chat_id, "Use /menu to open the control panel.")
                    .await
            }
        }
    }

    async fn handle_command(&mut self, chat_id: i64, command: Command) -> AdapterResult<()> {
        ulog_info!("[controller] Command {:?} in chat {}", command, chat_id);
        match command {
            Command::Menu => {
                let snapshot = self.monitor.snapshot().await;
                self.adapter
                    .send_view(chat_id, &views::main_menu(&snapshot))
                    .await
                    .map(|_| ())
            }
            Command::Status => {
                let snapshot = self.monitor.snapshot().await;
                self.adapter
                    .send_message(chat_id, &views::status_text(&snapshot))
                    .await
            }
            Command::Stream => {
                let view = self.stream_console_view();
                self.adapter.send_view(chat_id, &view).await.map(|_| ())
            }
            Command::Keys => {
                let view = views::key_menu(&self.keys.list());
                self.adapter.send_view(chat_id, &view).await.map(|_| ())
            }
            Command::Cmd(None) => {
                self.adapter
                    .send_message(chat_id, "Usage: /cmd <command>")
                    .await
            }
            Command::Cmd(Some(command)) => self.run_shell(chat_id, &command).await,
            Command::Help => self.adapter.send_message(chat_id, &views::help_text()).await,
        }
    }

    async fn run_shell(&mut self, chat_id: i64, command: &str) -> AdapterResult<()> {
        self.adapter
            .send_message(chat_id, &format!("⏳ Running: {}...", command))
            .await?;
        let output = self
            .runner
            .run(command, Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS))
            .await;
        let text = truncate_output(output.text(), MAX_OUTPUT_CHARS);
        self.adapter.send_message(chat_id, &code_block(&text)).await
    }

    /// Consume a pending continuation with the text that completes it
    async fn continue_input(
        &mut self,
        chat_id: i64,
        continuation: Continuation,
        text: &str,
    ) -> AdapterResult<()> {
        match continuation {
            Continuation::AwaitStreamSource => {
                if text.is_empty() {
                    return self.adapter.send_message(chat_id, "❌ Empty source URL, cancelled.").await;
                }
                let Some(destination) = self.settings.default_destination.clone() else {
                    return self
                        .adapter
                        .send_message(
                            chat_id,
                            "❌ RTMP_URL is not configured. Set it in .env or relay a file through a stream key.",
                        )
                        .await;
                };
                self.adapter.send_message(chat_id, "🚀 Starting relay...").await?;
                match self.supervisor.start(text, &destination) {
                    Ok(_) => {
                        let view = self.stream_console_view();
                        self.adapter.send_view(chat_id, &view).await.map(|_| ())
                    }
                    Err(e) => self.adapter.send_message(chat_id, &format!("❌ {}", e)).await,
                }
            }
            Continuation::AwaitKeyName => match validate_key_name(text) {
                Ok(name) => {
                    let prompt = format!(
                        "Now send the stream key or a full rtmp(s):// URL for `{}`:",
                        name
                    );
                    self.pending
                        .insert(chat_id, Continuation::AwaitKeyValue { name });
                    self.adapter.send_message(chat_id, &prompt).await
                }
                Err(e) => self.adapter.send_message(chat_id, &format!("❌ {}", e)).await,
            },
            Continuation::AwaitKeyValue { name } => match self.keys.add(&name, text) {
                Ok(_) => {
                    self.adapter
                        .send_message(chat_id, &format!("✅ Saved key `{}`", name))
                        .await?;
                    let view = views::key_menu(&self.keys.list());
                    self.adapter.send_view(chat_id, &view).await.map(|_| ())
                }
                Err(e) => self.adapter.send_message(chat_id, &format!("❌ {}", e)).await,
            },
        }
    }

    // ===== Button presses =====

    async fn handle_callback(&mut self, cq: CallbackQuery) -> AdapterResult<()> {
        let action = match cq.data.parse::<Action>() {
            Ok(action) => action,
            Err(e) => {
                ulog_debug!("[controller] {}", e);
                return self
                    .adapter
                    .answer_callback(&cq.id, Some("Unknown action"), false)
                    .await;
            }
        };

        if !action.keeps_delete_armed() {
            self.sessions.disarm_delete(cq.chat_id);
        }

        let answer = match self.apply(&cq, action).await {
            Ok(answer) => answer,
            Err(e) => {
                ulog_warn!("[controller] Action '{}' failed: {}", cq.data, e);
                Answer::Toast("Failed to update the message".to_string())
            }
        };

        match answer {
            Answer::Done => Ok(()),
            Answer::Silent => self.adapter.answer_callback(&cq.id, None, false).await,
            Answer::Toast(text) => self.adapter.answer_callback(&cq.id, Some(&text), false).await,
            Answer::Alert(text) => self.adapter.answer_callback(&cq.id, Some(&text), true).await,
        }
    }

    async fn apply(&mut self, cq: &CallbackQuery, action: Action) -> AdapterResult<Answer> {
        let chat_id = cq.chat_id;
        match action {
            Action::Noop => Ok(Answer::Silent),
            Action::MainMenu => {
                let snapshot = self.monitor.snapshot().await;
                self.edit(cq, &views::main_menu(&snapshot)).await
            }

            // File manager
            Action::OpenRoot | Action::BackToListing | Action::RefreshListing => {
                let view = self.render_listing(chat_id).await;
                self.edit(cq, &view).await
            }
            Action::GoUp => {
                let parent = parent_path(&self.sessions.path(chat_id));
                self.sessions.set_path(chat_id, &parent);
                let view = self.render_listing(chat_id).await;
                self.edit(cq, &view).await
            }
            Action::ChangePage(page) => {
                self.sessions.set_page(chat_id, page);
                let view = self.render_cached_listing(chat_id);
                self.edit(cq, &view).await
            }
            Action::EnterDirectory(item) | Action::SelectFile(item) => {
                let Some(entry) = self.sessions.resolve_index(chat_id, item) else {
                    return Ok(stale());
                };
                if entry.is_dir {
                    let path = join_path(&self.sessions.path(chat_id), &entry.name);
                    self.sessions.set_path(chat_id, &path);
                    let view = self.render_listing(chat_id).await;
                    self.edit(cq, &view).await
                } else {
                    self.edit(cq, &views::file_options(&entry, item)).await
                }
            }
            Action::RelayPicker(item) => {
                let Some(entry) = self.resolve_file(chat_id, item) else {
                    return Ok(stale());
                };
                let view = views::relay_picker(
                    &entry,
                    item,
                    &self.keys.list(),
                    self.settings.default_destination.is_some(),
                );
                self.edit(cq, &view).await
            }
            Action::Relay { item, key } => self.relay(chat_id, item, &key).await,
            Action::DirectLink(item) => {
                let Some(entry) = self.resolve_file(chat_id, item) else {
                    return Ok(stale());
                };
                let path = join_path(&self.sessions.path(chat_id), &entry.name);
                match self.files.download_url(&path).await {
                    Some(url) => {
                        self.adapter
                            .send_message(chat_id, &format!("🔗 *{}* direct link:\n`{}`", entry.name, url))
                            .await?;
                        Ok(Answer::Toast("Link sent".to_string()))
                    }
                    None => Ok(no_direct_link()),
                }
            }
            Action::DeleteConfirm(item) => {
                let Some(entry) = self.sessions.resolve_index(chat_id, item) else {
                    return Ok(stale());
                };
                self.sessions.arm_delete(chat_id, item);
                self.edit(cq, &views::delete_confirm(&entry, item)).await
            }
            Action::DeleteExec(item) => self.delete(cq, item).await,

            // System
            Action::Processes => {
                let procs = self.monitor.top_processes(TOP_PROCESS_COUNT).await;
                self.edit(cq, &views::processes(&procs)).await
            }
            Action::NetworkMenu => {
                let wifi = network::wifi_info(self.runner.as_ref()).await;
                self.edit(cq, &views::network_menu(wifi.as_ref())).await
            }
            Action::ScanWifi => {
                self.adapter
                    .answer_callback(&cq.id, Some("Scanning Wi-Fi..."), false)
                    .await?;
                let text = match network::scan_wifi(self.runner.as_ref()).await {
                    Ok(networks) => views::wifi_scan_text(&networks),
                    Err(e) => format!("❌ Scan failed: {}", e),
                };
                self.adapter.send_message(chat_id, &text).await?;
                Ok(Answer::Done)
            }
            Action::SpeedTest => {
                self.adapter
                    .answer_callback(&cq.id, Some("Running speed test, please wait..."), false)
                    .await?;
                self.adapter.send_message(chat_id, "🚀 Running speedtest...").await?;
                self.spawn_speed_test(chat_id);
                Ok(Answer::Done)
            }
            Action::PublicIp => {
                let ip = network::public_ip(&self.http_client)
                    .await
                    .unwrap_or_else(|| "lookup failed".to_string());
                Ok(Answer::Alert(format!("IP: {}", ip)))
            }
            Action::Logs => {
                let bot_log = logger::tail_log(LOG_TAIL_LINES)
                    .unwrap_or_else(|| "(no log file yet)".to_string());
                let alist_log = self
                    .runner
                    .run(
                        &format!("pm2 logs alist --lines {} --nostream --no-color", LOG_TAIL_LINES),
                        Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
                    )
                    .await;
                let text = format!(
                    "📝 *Bot logs*\n{}\n\n📝 *Alist logs*\n{}",
                    code_block(&truncate_output(&bot_log, MAX_OUTPUT_CHARS / 2)),
                    code_block(&truncate_output(alist_log.text(), MAX_OUTPUT_CHARS / 2))
                );
                self.adapter.send_message(chat_id, &text).await?;
                Ok(Answer::Silent)
            }

            // Alist
            Action::AlistMenu => {
                let version = self.files.version().await;
                let view = views::alist_menu(
                    version.as_deref(),
                    &network::lan_ip(),
                    &self.settings.alist_url,
                );
                self.edit(cq, &view).await
            }
            Action::AlistStorage => {
                let text = match self.files.storage_status().await {
                    Ok(mounts) => views::storage_text(&mounts),
                    Err(e) => format!("❌ {}", e),
                };
                self.adapter.send_message(chat_id, &text).await?;
                Ok(Answer::Silent)
            }
            Action::AlistResetPassword => {
                self.adapter
                    .answer_callback(&cq.id, Some("Resetting Alist password..."), true)
                    .await?;
                self.reset_alist_password(chat_id).await?;
                Ok(Answer::Done)
            }
            Action::AlistLogs => {
                let log = self
                    .runner
                    .run(
                        "pm2 logs alist --lines 20 --nostream --no-color",
                        Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
                    )
                    .await;
                let text = format!(
                    "📝 *Alist logs*\n{}",
                    code_block(&truncate_output(log.text(), MAX_OUTPUT_CHARS))
                );
                self.adapter.send_message(chat_id, &text).await?;
                Ok(Answer::Silent)
            }

            // Stream console and keys
            Action::StreamConsole => {
                let view = self.stream_console_view();
                self.edit(cq, &view).await
            }
            Action::StreamInput => {
                self.pending.insert(chat_id, Continuation::AwaitStreamSource);
                self.adapter
                    .send_message(chat_id, "🔗 Reply with the source URL:")
                    .await?;
                Ok(Answer::Silent)
            }
            Action::StopStream => {
                let stopped = self.supervisor.stop();
                let view = self.stream_console_view();
                self.edit(cq, &view).await?;
                let toast = if stopped { "Stopped" } else { "Nothing is streaming" };
                Ok(Answer::Toast(toast.to_string()))
            }
            Action::KeyMenu => {
                let view = views::key_menu(&self.keys.list());
                self.edit(cq, &view).await
            }
            Action::KeyAdd => {
                self.pending.insert(chat_id, Continuation::AwaitKeyName);
                self.adapter
                    .send_message(
                        chat_id,
                        "🔑 Send a name for the new key (no spaces, up to 32 characters):",
                    )
                    .await?;
                Ok(Answer::Silent)
            }
            Action::KeyDelete(name) => {
                let answer = match self.keys.remove(&name) {
                    Ok(true) => Answer::Toast(format!("Removed {}", name)),
                    Ok(false) => Answer::Toast(format!("No key named {}", name)),
                    Err(e) => Answer::Alert(e),
                };
                let view = views::key_menu(&self.keys.list());
                self.edit(cq, &view).await?;
                Ok(answer)
            }
        }
    }

    async fn edit(&self, cq: &CallbackQuery, view: &View) -> AdapterResult<Answer> {
        self.adapter.edit_view(cq.chat_id, cq.message_id, view).await?;
        Ok(Answer::Silent)
    }

    /// Re-list the current path and render page `page` of it
    async fn render_listing(&mut self, chat_id: i64) -> View {
        let path = self.sessions.path(chat_id);
        match self.files.list(&path).await {
            Ok(items) => {
                let generation = self.sessions.record_listing(chat_id, items);
                views::file_listing(
                    &path,
                    self.sessions.items(chat_id),
                    generation,
                    self.sessions.page(chat_id),
                )
            }
            Err(e) => {
                ulog_warn!("[controller] Listing {} failed: {}", path, e);
                // Buttons from the previous listing must not resolve anymore
                self.sessions.record_listing(chat_id, Vec::new());
                views::listing_error(&path, &e.to_string())
            }
        }
    }

    /// Render the stored listing without re-fetching (paging keeps refs valid)
    fn render_cached_listing(&mut self, chat_id: i64) -> View {
        let path = self.sessions.path(chat_id);
        views::file_listing(
            &path,
            self.sessions.items(chat_id),
            self.sessions.generation(chat_id),
            self.sessions.page(chat_id),
        )
    }

    fn resolve_file(&self, chat_id: i64, item: ItemRef) -> Option<Entry> {
        self.sessions
            .resolve_index(chat_id, item)
            .filter(|e| !e.is_dir)
    }

    /// Named key, or RTMP_URL for `default` when no key has that name
    fn resolve_key(&self, key: &str) -> Option<String> {
        self.keys.get(key).or_else(|| {
            if key == DEFAULT_KEY_NAME {
                self.settings.default_destination.clone()
            } else {
                None
            }
        })
    }

    async fn relay(&mut self, chat_id: i64, item: ItemRef, key: &str) -> AdapterResult<Answer> {
        let Some(entry) = self.resolve_file(chat_id, item) else {
            return Ok(stale());
        };
        let Some(destination) = self.resolve_key(key) else {
            return Ok(Answer::Alert(format!("Unknown stream key '{}'", key)));
        };
        let path = join_path(&self.sessions.path(chat_id), &entry.name);
        let Some(url) = self.files.download_url(&path).await else {
            return Ok(no_direct_link());
        };

        match self.supervisor.start(&url, &destination) {
            Ok(pid) => {
                ulog_info!("[controller] Relaying {} via key '{}' (pid {})", path, key, pid);
                let view = self.stream_console_view();
                self.adapter.send_view(chat_id, &view).await?;
                Ok(Answer::Toast("Preparing relay...".to_string()))
            }
            Err(e) => Ok(Answer::Alert(e)),
        }
    }

    async fn delete(&mut self, cq: &CallbackQuery, item: ItemRef) -> AdapterResult<Answer> {
        let chat_id = cq.chat_id;
        if self.sessions.take_armed_delete(chat_id) != Some(item) {
            return Ok(Answer::Toast(
                "Delete was not confirmed, select the file again".to_string(),
            ));
        }
        let Some(entry) = self.sessions.resolve_index(chat_id, item) else {
            return Ok(stale());
        };

        let dir = self.sessions.path(chat_id);
        if let Err(e) = self.files.remove(&dir, &[entry.name.clone()]).await {
            return Ok(Answer::Alert(format!("Delete failed: {}", e)));
        }
        ulog_info!("[controller] Deleted {}", join_path(&dir, &entry.name));

        let view = self.render_listing(chat_id).await;
        self.edit(cq, &view).await?;
        Ok(Answer::Toast(format!("Deleted {}", entry.name)))
    }

    fn stream_console_view(&mut self) -> View {
        let (running, target) = self.stream_status();
        views::stream_console(running, target.as_ref())
    }

    /// Fire-and-forget: the result arrives later as a new message
    fn spawn_speed_test(&self, chat_id: i64) {
        let adapter = Arc::clone(&self.adapter);
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let output = runner.run("speedtest-cli --simple", SPEED_TEST_TIMEOUT).await;
            let text = format!("📊 *Speed test*\n{}", code_block(output.text()));
            if let Err(e) = adapter.send_message(chat_id, &text).await {
                ulog_warn!("[controller] Failed to deliver speed test result: {}", e);
            }
        });
    }

    async fn reset_alist_password(&self, chat_id: i64) -> AdapterResult<()> {
        let timeout = Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS);
        // Stop first to release the database lock
        self.runner.run("pm2 stop alist", timeout).await;
        tokio::time::sleep(ALIST_STOP_SETTLE).await;
        let result = self.runner.run("alist admin set admin", timeout).await;
        self.runner.run("pm2 restart alist", timeout).await;

        let text = format!(
            "✅ *Password reset result*\n{}\nDefault password: `admin`\nWait a few seconds before logging in.\n\n\
             ⚠️ The old token is now invalid. Fetch a new token and update ALIST_TOKEN, otherwise the file manager stops working.",
            code_block(result.text())
        );
        self.adapter.send_message(chat_id, &text).await
    }
}

fn stale() -> Answer {
    Answer::Toast(STALE_SELECTION.to_string())
}

fn no_direct_link() -> Answer {
    Answer::Alert("Could not get a direct link, check the Alist configuration".to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::bot::test_support::*;

    /// Open the file manager and enter /movies; returns the listing generation
    async fn open_movies(h: &mut Harness) -> u32 {
        h.controller.handle_event(press("fm_home")).await.unwrap();
        let root = h.adapter.last_edit().unwrap();
        let cd = root
            .callback_data()
            .into_iter()
            .find(|d| d.starts_with("fm_cd_"))
            .unwrap()
            .to_string();
        h.controller.handle_event(press(&cd)).await.unwrap();
        h.controller.sessions.generation(CHAT)
    }

    #[tokio::test]
    async fn test_relay_scenario_tracks_one_process() {
        let mut h = harness(movies_files(), None);
        h.controller.keys.add("chan1", "rtmps://x/y").unwrap();

        let g = open_movies(&mut h).await;
        assert_eq!(h.controller.sessions.path(CHAT), "/movies");

        h.controller.handle_event(press(&format!("fm_opt_{}.0", g))).await.unwrap();
        let options = h.adapter.last_edit().unwrap();
        assert!(options.callback_data().contains(&format!("fm_stream_{}.0", g).as_str()));

        h.controller
            .handle_event(press(&format!("stream_exec_{}.0_chan1", g)))
            .await
            .unwrap();

        let (running, target) = h.controller.stream_status();
        assert!(running);
        let target = target.unwrap();
        assert_eq!(target.destination, "rtmps://x/y");
        assert_eq!(target.source, "http://127.0.0.1:5244/d/movies/clip.mp4");
        h.controller.shutdown();
    }

    #[tokio::test]
    async fn test_relay_unknown_key_alerts_without_state_change() {
        let mut h = harness(movies_files(), None);
        let g = open_movies(&mut h).await;
        h.adapter.take();

        h.controller
            .handle_event(press(&format!("stream_exec_{}.0_nokey", g)))
            .await
            .unwrap();
        assert_eq!(h.adapter.answers(), vec![(Some("Unknown stream key 'nokey'".to_string()), true)]);
        assert_eq!(h.controller.stream_status(), (false, None));
    }

    #[tokio::test]
    async fn test_default_key_uses_rtmp_url() {
        let mut h = harness(movies_files(), Some("rtmps://dc5-1.rtmp.t.me/s/main"));
        let g = open_movies(&mut h).await;
        h.controller
            .handle_event(press(&format!("stream_exec_{}.0_default", g)))
            .await
            .unwrap();
        let (_, target) = h.controller.stream_status();
        assert_eq!(target.unwrap().destination, "rtmps://dc5-1.rtmp.t.me/s/main");
        h.controller.shutdown();
    }

    #[tokio::test]
    async fn test_stale_button_after_refresh() {
        let mut h = harness(movies_files(), None);
        let g = open_movies(&mut h).await;
        h.controller.handle_event(press("fm_refresh")).await.unwrap();
        h.adapter.take();

        h.controller.handle_event(press(&format!("fm_cd_{}.1", g))).await.unwrap();
        assert_eq!(h.adapter.answers(), vec![(Some(STALE_SELECTION.to_string()), false)]);
        assert_eq!(h.controller.sessions.path(CHAT), "/movies");
    }

    #[tokio::test]
    async fn test_go_up_stops_at_root() {
        let mut h = harness(movies_files(), None);
        open_movies(&mut h).await;
        h.controller.handle_event(press("fm_up")).await.unwrap();
        assert_eq!(h.controller.sessions.path(CHAT), "/");
        h.controller.handle_event(press("fm_up")).await.unwrap();
        assert_eq!(h.controller.sessions.path(CHAT), "/");
    }

    #[tokio::test]
    async fn test_delete_confirm_then_other_transition_deletes_nothing() {
        let mut h = harness(movies_files(), None);
        let g = open_movies(&mut h).await;

        h.controller.handle_event(press(&format!("fm_del_{}.0", g))).await.unwrap();
        h.controller.handle_event(press("fm_up")).await.unwrap();
        // Stale exec from the confirmation message
        h.controller.handle_event(press(&format!("fm_delx_{}.0", g))).await.unwrap();
        assert!(h.files.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_exec_after_confirm_deletes() {
        let mut h = harness(movies_files(), None);
        let g = open_movies(&mut h).await;

        // Exec without confirm does nothing
        h.controller.handle_event(press(&format!("fm_delx_{}.0", g))).await.unwrap();
        assert!(h.files.removed.lock().unwrap().is_empty());

        h.controller.handle_event(press(&format!("fm_del_{}.0", g))).await.unwrap();
        h.controller.handle_event(press(&format!("fm_delx_{}.0", g))).await.unwrap();
        assert_eq!(
            *h.files.removed.lock().unwrap(),
            vec![("/movies".to_string(), vec!["clip.mp4".to_string()])]
        );
        // Listing re-rendered without the file
        let view = h.adapter.last_edit().unwrap();
        assert!(!view.keyboard.iter().flatten().any(|b| b.text.contains("clip.mp4")));
    }

    #[tokio::test]
    async fn test_sessions_isolated_between_chats() {
        let mut h = harness(movies_files(), None);
        open_movies(&mut h).await;
        h.controller.handle_event(press_in(200, "fm_home")).await.unwrap();
        assert_eq!(h.controller.sessions.path(200), "/");
        assert_eq!(h.controller.sessions.path(CHAT), "/movies");
    }

    #[tokio::test]
    async fn test_key_add_flow() {
        let mut h = harness(movies_files(), None);
        h.controller.handle_event(press("key_add")).await.unwrap();
        assert_eq!(h.controller.pending(CHAT), Some(&Continuation::AwaitKeyName));

        h.controller.handle_event(say("chan2")).await.unwrap();
        assert_eq!(
            h.controller.pending(CHAT),
            Some(&Continuation::AwaitKeyValue {
                name: "chan2".to_string()
            })
        );

        h.controller.handle_event(say("abcd-1234")).await.unwrap();
        assert_eq!(h.controller.pending(CHAT), None);
        assert_eq!(
            h.controller.keys.get("chan2").as_deref(),
            Some("rtmps://dc5-1.rtmp.t.me/s/abcd-1234")
        );
    }

    #[tokio::test]
    async fn test_invalid_key_name_clears_continuation() {
        let mut h = harness(movies_files(), None);
        h.controller.handle_event(press("key_add")).await.unwrap();
        h.controller.handle_event(say("two words")).await.unwrap();
        assert_eq!(h.controller.pending(CHAT), None);
        assert!(h.controller.keys.is_empty());
    }

    #[tokio::test]
    async fn test_command_cancels_continuation() {
        let mut h = harness(movies_files(), None);
        h.controller.handle_event(press("stream_input")).await.unwrap();
        assert_eq!(h.controller.pending(CHAT), Some(&Continuation::AwaitStreamSource));
        h.controller.handle_event(say("/help")).await.unwrap();
        assert_eq!(h.controller.pending(CHAT), None);
    }

    #[tokio::test]
    async fn test_local_path_source_completes_stream_input() {
        let mut h = harness(movies_files(), Some("rtmp://live/app/key"));
        h.controller.handle_event(press("stream_input")).await.unwrap();
        h.controller
            .handle_event(say("/sdcard/Movies/clip.mp4"))
            .await
            .unwrap();

        assert_eq!(h.controller.pending(CHAT), None);
        let (running, target) = h.controller.stream_status();
        assert!(running);
        assert_eq!(target.unwrap().source, "/sdcard/Movies/clip.mp4");
        assert!(!h.adapter.messages().iter().any(|m| m.starts_with("Unknown command")));
        h.controller.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_command_without_pending_input() {
        let mut h = harness(movies_files(), None);
        h.controller.handle_event(say("/reboot")).await.unwrap();
        assert_eq!(
            h.adapter.take(),
            vec![Sent::Message(
                CHAT,
                "Unknown command. Send /help for the list.".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_stream_input_without_rtmp_url() {
        let mut h = harness(movies_files(), None);
        h.controller.handle_event(press("stream_input")).await.unwrap();
        h.adapter.take();
        h.controller.handle_event(say("http://src/live.m3u8")).await.unwrap();
        let sent = h.adapter.take();
        assert!(matches!(&sent[0], Sent::Message(_, t) if t.contains("RTMP_URL")));
        assert_eq!(h.controller.stream_status(), (false, None));
    }

    #[tokio::test]
    async fn test_stream_input_then_stop() {
        let mut h = harness(movies_files(), Some("rtmp://live/app/key"));
        h.controller.handle_event(press("stream_input")).await.unwrap();
        h.controller.handle_event(say("http://src/live.m3u8")).await.unwrap();
        let (running, target) = h.controller.stream_status();
        assert!(running);
        assert_eq!(target.unwrap().source, "http://src/live.m3u8");

        h.adapter.take();
        h.controller.handle_event(press("stop_stream")).await.unwrap();
        assert_eq!(h.controller.stream_status(), (false, None));
        assert_eq!(h.adapter.answers(), vec![(Some("Stopped".to_string()), false)]);
    }

    #[tokio::test]
    async fn test_cmd_output_truncated() {
        let mut h = harness(movies_files(), None);
        let long = "y".repeat(3200);
        h.controller
            .handle_event(say(&format!("/cmd echo {}", long)))
            .await
            .unwrap();
        let sent = h.adapter.take();
        let Some(Sent::Message(_, reply)) = sent.last() else {
            panic!("expected a reply");
        };
        assert!(reply.contains(&"y".repeat(3000)));
        assert!(!reply.contains(&"y".repeat(3001)));
        assert!(reply.contains("(truncated)"));
        assert_eq!(h.runner.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cmd_without_argument_shows_usage() {
        let mut h = harness(movies_files(), None);
        h.controller.handle_event(say("/cmd")).await.unwrap();
        assert_eq!(
            h.adapter.take(),
            vec![Sent::Message(CHAT, "Usage: /cmd <command>".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unknown_callback_is_answered() {
        let mut h = harness(movies_files(), None);
        h.controller.handle_event(press("fm_cd_bogus")).await.unwrap();
        assert_eq!(h.adapter.answers(), vec![(Some("Unknown action".to_string()), false)]);
    }

    #[tokio::test]
    async fn test_listing_error_invalidates_old_refs() {
        let mut h = harness(movies_files(), None);
        let g = open_movies(&mut h).await;
        h.files.listings.lock().unwrap().remove("/movies");
        h.controller.handle_event(press("fm_refresh")).await.unwrap();
        let view = h.adapter.last_edit().unwrap();
        assert!(view.text.contains("object not found"));

        h.adapter.take();
        h.controller.handle_event(press(&format!("fm_opt_{}.0", g))).await.unwrap();
        assert_eq!(h.adapter.answers(), vec![(Some(STALE_SELECTION.to_string()), false)]);
    }

    #[tokio::test]
    async fn test_paging_keeps_refs_valid() {
        let mut files = movies_files();
        let many: Vec<Entry> = (0..25).map(|i| Entry::file(&format!("f{}.mp4", i), 1)).collect();
        files.listings.get_mut().unwrap().insert("/".to_string(), many);
        let mut h = harness(files, None);

        h.controller.handle_event(press("fm_home")).await.unwrap();
        let g = h.controller.sessions.generation(CHAT);
        h.controller.handle_event(press("fm_page_1")).await.unwrap();
        let page = h.adapter.last_edit().unwrap();
        assert!(page.callback_data().contains(&format!("fm_opt_{}.24", g).as_str()));

        h.controller.handle_event(press(&format!("fm_opt_{}.24", g))).await.unwrap();
        let options = h.adapter.last_edit().unwrap();
        assert!(options.text.contains("f24.mp4"));
    }
}
