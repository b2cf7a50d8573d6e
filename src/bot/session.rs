// Per-chat navigation state (in memory, process lifetime)

use std::collections::HashMap;

use crate::alist::Entry;

use super::action::ItemRef;

/// Entries shown per listing page
pub const PAGE_SIZE: usize = 20;

#[derive(Debug, Clone)]
pub struct Session {
    pub current_path: String,
    /// Last listing, display order
    pub listed_items: Vec<Entry>,
    pub page: usize,
    /// Bumped on every listing; selections from older listings no longer resolve
    pub generation: u32,
    pub armed_delete: Option<ItemRef>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            current_path: "/".to_string(),
            listed_items: Vec::new(),
            page: 0,
            generation: 0,
            armed_delete: None,
        }
    }
}

/// Chat id → session. Sessions are created lazily and never shared.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<i64, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_mut(&mut self, chat_id: i64) -> &mut Session {
        self.sessions.entry(chat_id).or_default()
    }

    /// Current path, creating the session at `/` if needed
    pub fn path(&mut self, chat_id: i64) -> String {
        self.session_mut(chat_id).current_path.clone()
    }

    /// Overwrite the current path (always succeeds). Resets paging.
    pub fn set_path(&mut self, chat_id: i64, path: &str) -> bool {
        let session = self.session_mut(chat_id);
        session.current_path = path.to_string();
        session.page = 0;
        true
    }

    /// Replace the listing. Every previously issued ItemRef stops resolving.
    pub fn record_listing(&mut self, chat_id: i64, items: Vec<Entry>) -> u32 {
        let session = self.session_mut(chat_id);
        session.listed_items = items;
        session.generation = session.generation.wrapping_add(1);
        session.armed_delete = None;
        let pages = page_count(session.listed_items.len());
        if session.page >= pages {
            session.page = pages.saturating_sub(1);
        }
        session.generation
    }

    /// Bounds- and generation-checked lookup
    pub fn resolve_index(&self, chat_id: i64, item: ItemRef) -> Option<Entry> {
        let session = self.sessions.get(&chat_id)?;
        if session.generation != item.generation {
            return None;
        }
        session.listed_items.get(item.index).cloned()
    }

    pub fn generation(&self, chat_id: i64) -> u32 {
        self.sessions.get(&chat_id).map(|s| s.generation).unwrap_or(0)
    }

    pub fn items(&self, chat_id: i64) -> &[Entry] {
        self.sessions
            .get(&chat_id)
            .map(|s| s.listed_items.as_slice())
            .unwrap_or(&[])
    }

    pub fn page(&self, chat_id: i64) -> usize {
        self.sessions.get(&chat_id).map(|s| s.page).unwrap_or(0)
    }

    /// Move to `page`, clamped to the last page of the current listing
    pub fn set_page(&mut self, chat_id: i64, page: usize) -> usize {
        let session = self.session_mut(chat_id);
        let last = page_count(session.listed_items.len()).saturating_sub(1);
        session.page = page.min(last);
        session.page
    }

    pub fn arm_delete(&mut self, chat_id: i64, item: ItemRef) {
        self.session_mut(chat_id).armed_delete = Some(item);
    }

    pub fn disarm_delete(&mut self, chat_id: i64) {
        if let Some(session) = self.sessions.get_mut(&chat_id) {
            session.armed_delete = None;
        }
    }

    /// Take the armed ref (disarming in the process)
    pub fn take_armed_delete(&mut self, chat_id: i64) -> Option<ItemRef> {
        self.sessions.get_mut(&chat_id)?.armed_delete.take()
    }
}

/// Number of pages for `len` entries (at least one)
pub fn page_count(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE).max(1)
}

/// Parent of `path`, string-level: split on the last `/`. `/` stays `/`.
pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// Append `name` as a path segment
pub fn join_path(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}
