// Bot-side types: inbound events, rendered views, Telegram errors

/// Text message from an authorized sender
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    pub text: String,
}

/// Inline-button press from an authorized sender
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub chat_id: i64,
    /// Message carrying the pressed keyboard (edited in place)
    pub message_id: i64,
    pub sender_id: i64,
    pub data: String,
}

/// Event handed from the long-poll loop to the dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(InboundMessage),
    Callback(CallbackQuery),
}

impl InboundEvent {
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::Message(m) => m.chat_id,
            Self::Callback(c) => c.chat_id,
        }
    }
}

/// What a button does when pressed
#[derive(Debug, Clone, PartialEq)]
pub enum ButtonKind {
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub text: String,
    pub kind: ButtonKind,
}

impl Button {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ButtonKind::Callback(data.into()),
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ButtonKind::Url(url.into()),
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        match &self.kind {
            ButtonKind::Callback(data) => Some(data),
            ButtonKind::Url(_) => None,
        }
    }
}

/// Message text plus inline keyboard rows
#[derive(Debug, Clone, PartialEq, Default)]
pub struct View {
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
}

impl View {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.keyboard.push(buttons);
        self
    }

    /// All callback data in the keyboard, row-major
    pub fn callback_data(&self) -> Vec<&str> {
        self.keyboard
            .iter()
            .flatten()
            .filter_map(|b| b.callback_data())
            .collect()
    }
}

/// Telegram API error types
#[derive(Debug)]
pub enum TelegramError {
    /// Network timeout during API call
    NetworkTimeout,
    /// Markdown parsing failed (should retry as plain text)
    MarkdownParseError,
    /// Message content didn't change (safe to ignore)
    MessageNotModified,
    /// Message exceeds 4096 char limit
    MessageTooLong,
    /// Callback query is too old to answer
    QueryTooOld,
    /// Bot was blocked by the user
    BotBlocked,
    /// Bot token is invalid
    TokenUnauthorized,
    /// Another getUpdates consumer is running with the same token
    Conflict,
    /// Other API error
    Other(String),
}

impl std::fmt::Display for TelegramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkTimeout => write!(f, "Network timeout"),
            Self::MarkdownParseError => write!(f, "Markdown parse error"),
            Self::MessageNotModified => write!(f, "Message not modified"),
            Self::MessageTooLong => write!(f, "Message too long"),
            Self::QueryTooOld => write!(f, "Callback query too old"),
            Self::BotBlocked => write!(f, "Bot blocked by user"),
            Self::TokenUnauthorized => write!(f, "Token unauthorized"),
            Self::Conflict => write!(f, "Another instance is polling with this token"),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TelegramError {}
