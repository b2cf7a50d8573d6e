// Callback data and slash commands, decoded once at the boundary.
//
// Listing buttons carry an `ItemRef` (`<generation>.<index>`) so a press on a
// button rendered from an older listing never resolves to a different entry.

use std::fmt;
use std::str::FromStr;

/// Telegram limit on callback_data
pub const MAX_CALLBACK_DATA_LEN: usize = 64;

/// Index into a specific listing generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub generation: u32,
    pub index: usize,
}

impl ItemRef {
    pub fn new(generation: u32, index: usize) -> Self {
        Self { generation, index }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.generation, self.index)
    }
}

impl FromStr for ItemRef {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, index) = s.split_once('.').ok_or(())?;
        Ok(Self {
            generation: generation.parse().map_err(|_| ())?,
            index: index.parse().map_err(|_| ())?,
        })
    }
}

/// Inline-button action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Noop,
    MainMenu,
    // File manager
    OpenRoot,
    GoUp,
    BackToListing,
    RefreshListing,
    ChangePage(usize),
    EnterDirectory(ItemRef),
    SelectFile(ItemRef),
    RelayPicker(ItemRef),
    Relay { item: ItemRef, key: String },
    DirectLink(ItemRef),
    DeleteConfirm(ItemRef),
    DeleteExec(ItemRef),
    // System
    Processes,
    NetworkMenu,
    ScanWifi,
    SpeedTest,
    PublicIp,
    Logs,
    // Alist
    AlistMenu,
    AlistStorage,
    AlistResetPassword,
    AlistLogs,
    // Stream console and keys
    StreamConsole,
    StreamInput,
    StopStream,
    KeyMenu,
    KeyAdd,
    KeyDelete(String),
}

impl Action {
    /// Wire form for callback_data
    pub fn encode(&self) -> String {
        match self {
            Self::Noop => "noop".to_string(),
            Self::MainMenu => "main_menu".to_string(),
            Self::OpenRoot => "fm_home".to_string(),
            Self::GoUp => "fm_up".to_string(),
            Self::BackToListing => "fm_back".to_string(),
            Self::RefreshListing => "fm_refresh".to_string(),
            Self::ChangePage(page) => format!("fm_page_{}", page),
            Self::EnterDirectory(item) => format!("fm_cd_{}", item),
            Self::SelectFile(item) => format!("fm_opt_{}", item),
            Self::RelayPicker(item) => format!("fm_stream_{}", item),
            Self::Relay { item, key } => format!("stream_exec_{}_{}", item, key),
            Self::DirectLink(item) => format!("fm_link_{}", item),
            Self::DeleteConfirm(item) => format!("fm_del_{}", item),
            Self::DeleteExec(item) => format!("fm_delx_{}", item),
            Self::Processes => "menu_proc".to_string(),
            Self::NetworkMenu => "menu_net".to_string(),
            Self::ScanWifi => "scan_wifi".to_string(),
            Self::SpeedTest => "net_speed".to_string(),
            Self::PublicIp => "check_ip".to_string(),
            Self::Logs => "menu_logs".to_string(),
            Self::AlistMenu => "menu_alist".to_string(),
            Self::AlistStorage => "alist_storage".to_string(),
            Self::AlistResetPassword => "alist_reset_pwd".to_string(),
            Self::AlistLogs => "alist_logs".to_string(),
            Self::StreamConsole => "menu_stream".to_string(),
            Self::StreamInput => "stream_input".to_string(),
            Self::StopStream => "stop_stream".to_string(),
            Self::KeyMenu => "key_menu".to_string(),
            Self::KeyAdd => "key_add".to_string(),
            Self::KeyDelete(name) => format!("key_del_{}", name),
        }
    }

    /// Whether this action leaves an armed delete armed
    pub fn keeps_delete_armed(&self) -> bool {
        matches!(self, Self::DeleteExec(_) | Self::Noop)
    }
}

/// Callback data that no action matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown callback data '{}'", self.0)
    }
}

impl std::error::Error for UnknownAction {}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownAction(data.to_string());
        let item = |raw: &str| raw.parse::<ItemRef>().map_err(|_| unknown());

        let action = match data {
            "noop" => Self::Noop,
            "main_menu" | "refresh_main" => Self::MainMenu,
            "fm_home" => Self::OpenRoot,
            "fm_up" => Self::GoUp,
            "fm_back" => Self::BackToListing,
            "fm_refresh" => Self::RefreshListing,
            "menu_proc" => Self::Processes,
            "menu_net" | "refresh_net" => Self::NetworkMenu,
            "scan_wifi" => Self::ScanWifi,
            "net_speed" => Self::SpeedTest,
            "check_ip" => Self::PublicIp,
            "menu_logs" => Self::Logs,
            "menu_alist" => Self::AlistMenu,
            "alist_storage" => Self::AlistStorage,
            "alist_reset_pwd" => Self::AlistResetPassword,
            "alist_logs" => Self::AlistLogs,
            "menu_stream" => Self::StreamConsole,
            "stream_input" => Self::StreamInput,
            "stop_stream" => Self::StopStream,
            "key_menu" => Self::KeyMenu,
            "key_add" => Self::KeyAdd,
            _ => {
                if let Some(rest) = data.strip_prefix("fm_page_") {
                    Self::ChangePage(rest.parse().map_err(|_| unknown())?)
                } else if let Some(rest) = data.strip_prefix("fm_cd_") {
                    Self::EnterDirectory(item(rest)?)
                } else if let Some(rest) = data.strip_prefix("fm_opt_") {
                    Self::SelectFile(item(rest)?)
                } else if let Some(rest) = data.strip_prefix("fm_stream_") {
                    Self::RelayPicker(item(rest)?)
                } else if let Some(rest) = data.strip_prefix("fm_link_") {
                    Self::DirectLink(item(rest)?)
                } else if let Some(rest) = data.strip_prefix("fm_delx_") {
                    Self::DeleteExec(item(rest)?)
                } else if let Some(rest) = data.strip_prefix("fm_del_") {
                    Self::DeleteConfirm(item(rest)?)
                } else if let Some(rest) = data.strip_prefix("stream_exec_") {
                    // Key names may contain '_', the ref never does
                    let (raw_item, key) = rest.split_once('_').ok_or_else(unknown)?;
                    if key.is_empty() {
                        return Err(unknown());
                    }
                    Self::Relay {
                        item: item(raw_item)?,
                        key: key.to_string(),
                    }
                } else if let Some(name) = data.strip_prefix("key_del_") {
                    if name.is_empty() {
                        return Err(unknown());
                    }
                    Self::KeyDelete(name.to_string())
                } else {
                    return Err(unknown());
                }
            }
        };
        Ok(action)
    }
}

/// Slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Menu,
    Status,
    Stream,
    Keys,
    Cmd(Option<String>),
    Help,
}

impl Command {
    /// Parse `/name[@bot] [args]`. Returns `None` for plain text and unknown commands.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head);

        let command = match name.to_ascii_lowercase().as_str() {
            "start" | "menu" => Self::Menu,
            "status" => Self::Status,
            "stream" => Self::Stream,
            "keys" => Self::Keys,
            "cmd" => Self::Cmd(if args.is_empty() {
                None
            } else {
                Some(args.to_string())
            }),
            "help" => Self::Help,
            _ => return None,
        };
        Some(command)
    }
}

/// Commands registered with BotFather: (command, description)
pub const BOT_COMMANDS: &[(&str, &str)] = &[
    ("menu", "Open the control panel"),
    ("status", "Show system status"),
    ("stream", "Live relay console"),
    ("keys", "Manage stream keys"),
    ("cmd", "Run a shell command: /cmd <command>"),
    ("help", "Show help"),
];
