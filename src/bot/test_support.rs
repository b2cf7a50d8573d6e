// In-memory collaborators for driving the controller and dispatch loop in tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alist::{AlistError, Entry, FileService, StorageMount};
use crate::stream::StreamSupervisor;
use crate::stream_keys::StreamKeyStore;
use crate::system::{CommandOutput, ProcessInfo, ProcessRunner, SystemMonitor, SystemSnapshot};

use super::adapter::{AdapterResult, ChatAdapter, MenuAdapter};
use super::controller::{ControllerSettings, MenuController};
use super::types::{CallbackQuery, InboundEvent, InboundMessage, View};

pub(crate) const CHAT: i64 = 100;
/// Shell command that makes `FakeRunner` panic
pub(crate) const CRASHING_COMMAND: &str = "crash";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Message(i64, String),
    View(i64, View),
    Edit(i64, i64, View),
    Answer(String, Option<String>, bool),
}

#[derive(Default)]
pub(crate) struct FakeAdapter {
    pub(crate) sent: Mutex<Vec<Sent>>,
}

impl FakeAdapter {
    pub(crate) fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Message(_, text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn last_edit(&self) -> Option<View> {
        self.sent.lock().unwrap().iter().rev().find_map(|s| match s {
            Sent::Edit(_, _, v) => Some(v.clone()),
            _ => None,
        })
    }

    pub(crate) fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Answer(_, text, alert) => Some((text.clone(), *alert)),
                _ => None,
            })
            .collect()
    }
}

impl ChatAdapter for FakeAdapter {
    async fn verify_connection(&self) -> AdapterResult<String> {
        Ok("@fake".to_string())
    }
    async fn register_commands(&self) -> AdapterResult<()> {
        Ok(())
    }
    async fn listen_loop(&self, _shutdown_rx: tokio::sync::watch::Receiver<bool>) {}
    async fn send_message(&self, chat_id: i64, text: &str) -> AdapterResult<()> {
        self.sent.lock().unwrap().push(Sent::Message(chat_id, text.to_string()));
        Ok(())
    }
}

impl MenuAdapter for FakeAdapter {
    async fn send_view(&self, chat_id: i64, view: &View) -> AdapterResult<i64> {
        self.sent.lock().unwrap().push(Sent::View(chat_id, view.clone()));
        Ok(1)
    }
    async fn edit_view(&self, chat_id: i64, message_id: i64, view: &View) -> AdapterResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Edit(chat_id, message_id, view.clone()));
        Ok(())
    }
    async fn answer_callback(&self, id: &str, text: Option<&str>, alert: bool) -> AdapterResult<()> {
        self.sent.lock().unwrap().push(Sent::Answer(
            id.to_string(),
            text.map(|t| t.to_string()),
            alert,
        ));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeFiles {
    pub(crate) listings: Mutex<HashMap<String, Vec<Entry>>>,
    pub(crate) urls: HashMap<String, String>,
    pub(crate) removed: Mutex<Vec<(String, Vec<String>)>>,
}

impl FileService for FakeFiles {
    async fn list(&self, path: &str) -> Result<Vec<Entry>, AlistError> {
        self.listings
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(AlistError::Api {
                code: 500,
                message: "object not found".to_string(),
            })
    }
    async fn download_url(&self, path: &str) -> Option<String> {
        self.urls.get(path).cloned()
    }
    async fn storage_status(&self) -> Result<Vec<StorageMount>, AlistError> {
        Ok(Vec::new())
    }
    async fn version(&self) -> Option<String> {
        Some("v3.0.0".to_string())
    }
    async fn remove(&self, dir: &str, names: &[String]) -> Result<(), AlistError> {
        self.removed
            .lock()
            .unwrap()
            .push((dir.to_string(), names.to_vec()));
        if let Some(items) = self.listings.lock().unwrap().get_mut(dir) {
            items.retain(|e| !names.contains(&e.name));
        }
        Ok(())
    }
}

/// `echo X` prints X, `crash` panics, anything else succeeds silently
#[derive(Default)]
pub(crate) struct FakeRunner {
    pub(crate) commands: Mutex<Vec<String>>,
}

impl ProcessRunner for FakeRunner {
    async fn run(&self, command: &str, _timeout: Duration) -> CommandOutput {
        if command == CRASHING_COMMAND {
            panic!("runner crashed on '{}'", command);
        }
        self.commands.lock().unwrap().push(command.to_string());
        CommandOutput::Completed {
            text: if command.starts_with("echo ") {
                command[5..].to_string()
            } else {
                String::new()
            },
            success: true,
        }
    }
}

pub(crate) struct FakeMonitor;

impl SystemMonitor for FakeMonitor {
    async fn cpu_usage(&self) -> f32 {
        10.0
    }
    async fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            uptime: Duration::from_secs(60),
            cpu_percent: 10.0,
            memory_percent: 40.0,
            disk_percent: 50.0,
            battery: None,
            temperature_c: None,
        }
    }
    async fn top_processes(&self, _limit: usize) -> Vec<ProcessInfo> {
        Vec::new()
    }
}

pub(crate) type TestController = MenuController<FakeAdapter, FakeFiles, FakeRunner, FakeMonitor>;

pub(crate) struct Harness {
    pub(crate) controller: TestController,
    pub(crate) adapter: Arc<FakeAdapter>,
    pub(crate) files: Arc<FakeFiles>,
    pub(crate) runner: Arc<FakeRunner>,
    pub(crate) _dir: tempfile::TempDir,
}

pub(crate) fn harness(files: FakeFiles, default_destination: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakeAdapter::default());
    let files = Arc::new(files);
    let runner = Arc::new(FakeRunner::default());
    let keys = StreamKeyStore::load_from_disk(&dir.path().join("data").join("stream_keys.json"));
    let supervisor = StreamSupervisor::new(&crate::stream::fake_transcoder(dir.path()));
    let controller = MenuController::new(
        Arc::clone(&adapter),
        Arc::clone(&files),
        Arc::clone(&runner),
        Arc::new(FakeMonitor),
        reqwest::Client::builder().build().unwrap(),
        ControllerSettings {
            default_destination: default_destination.map(|s| s.to_string()),
            alist_url: "http://127.0.0.1:5244".to_string(),
        },
        keys,
        supervisor,
    );
    Harness {
        controller,
        adapter,
        files,
        runner,
        _dir: dir,
    }
}

pub(crate) fn movies_files() -> FakeFiles {
    let mut listings = HashMap::new();
    listings.insert("/".to_string(), vec![Entry::dir("movies")]);
    listings.insert(
        "/movies".to_string(),
        vec![Entry::file("clip.mp4", 2048), Entry::dir("sub")],
    );
    listings.insert("/movies/sub".to_string(), vec![]);
    let mut urls = HashMap::new();
    urls.insert(
        "/movies/clip.mp4".to_string(),
        "http://127.0.0.1:5244/d/movies/clip.mp4".to_string(),
    );
    FakeFiles {
        listings: Mutex::new(listings),
        urls,
        removed: Mutex::new(Vec::new()),
    }
}

pub(crate) fn press(data: &str) -> InboundEvent {
    press_in(CHAT, data)
}

pub(crate) fn press_in(chat_id: i64, data: &str) -> InboundEvent {
    InboundEvent::Callback(CallbackQuery {
        id: format!("cb-{}", data),
        chat_id,
        message_id: 7,
        sender_id: 42,
        data: data.to_string(),
    })
}

pub(crate) fn say(text: &str) -> InboundEvent {
    InboundEvent::Message(InboundMessage {
        chat_id: CHAT,
        message_id: 1,
        sender_id: 42,
        sender_name: None,
        text: text.to_string(),
    })
}
