use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use chrono::Utc;

use super::error::TetherError;
use super::persistence::KeyValueStore;
use super::persistence::CURRENT_SESSION_KEY;
use super::persistence::SESSIONS_KEY;
use super::state::Message;
use super::state::ResumeMetadata;
use super::state::Role;
use super::state::Session;

pub const TITLE_MAX_CHARS: usize = 50;

/// Sessions and their transcripts, plus the current-session pointer.
///
/// Only `sessions` and `current_session_id` survive a restart. Turn diffs are
/// an ephemeral per-session slot for summary display.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    sessions: Vec<Session>,
    current_session_id: Option<String>,
    turn_diffs: HashMap<String, String>,
}

impl ConversationStore {
    pub fn create_session(&mut self, project_path: Option<PathBuf>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert_session(Session::new(id.clone(), project_path));
        id
    }

    /// Adds a session loaded from elsewhere (history, another store). An
    /// existing session with the same id is replaced.
    pub fn insert_session(&mut self, session: Session) {
        if let Some(existing) = self.sessions.iter_mut().find(|s| s.id == session.id) {
            *existing = session;
        } else {
            self.sessions.push(session);
        }
    }

    /// Adds a session recovered from backend history unless it is already
    /// known, either by id or as the backend session behind a chat.
    pub fn import_session(&mut self, session: Session) -> bool {
        let backend_id = session.resume.backend_session_id.as_deref();
        let known = self.sessions.iter().any(|existing| {
            existing.id == session.id
                || (backend_id.is_some()
                    && existing.resume.backend_session_id.as_deref() == backend_id)
        });
        if known {
            return false;
        }
        self.sessions.push(session);
        true
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|session| session.id == id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|session| session.id == id)
    }

    pub fn require_session(&self, id: &str) -> Result<&Session, TetherError> {
        self.session(id)
            .ok_or_else(|| TetherError::UnknownSession(id.to_string()))
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session_id
            .as_deref()
            .and_then(|id| self.session(id))
    }

    pub fn set_current_session(&mut self, id: Option<&str>) -> bool {
        match id {
            Some(id) if self.session(id).is_none() => false,
            _ => {
                self.current_session_id = id.map(str::to_string);
                true
            }
        }
    }

    /// Sessions belonging to `project`, newest activity first. `None` lists
    /// every session.
    pub fn list_sessions(&self, project: Option<&Path>) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self
            .sessions
            .iter()
            .filter(|session| match project {
                Some(project) => session.project_path.as_deref() == Some(project),
                None => true,
            })
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub fn append_message(&mut self, session_id: &str, message: Message) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            tracing::warn!(session_id, "append to unknown session");
            return false;
        };
        if !session.title_locked && message.role == Role::User {
            session.title = Some(derive_title(&message.content));
            session.title_locked = true;
        }
        session.messages.push(message);
        session.updated_at = Utc::now();
        true
    }

    pub fn update_message(
        &mut self,
        session_id: &str,
        message_id: &str,
        update: impl FnOnce(&mut Message),
    ) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        update(message);
        session.updated_at = Utc::now();
        true
    }

    /// Drops `message_id` and everything after it. Returns how many entries
    /// were removed.
    pub fn truncate_from(&mut self, session_id: &str, message_id: &str) -> usize {
        let Some(session) = self.session_mut(session_id) else {
            return 0;
        };
        let Some(idx) = session.messages.iter().position(|m| m.id == message_id) else {
            return 0;
        };
        let removed = session.messages.len() - idx;
        session.messages.truncate(idx);
        session.updated_at = Utc::now();
        removed
    }

    /// Clears the streaming flag on every entry of the session.
    pub fn settle_streaming(&mut self, session_id: &str) {
        if let Some(session) = self.session_mut(session_id) {
            for message in session.messages.iter_mut().filter(|m| m.is_streaming) {
                message.is_streaming = false;
            }
        }
    }

    pub fn set_loading(&mut self, session_id: &str, loading: bool) {
        if let Some(session) = self.session_mut(session_id) {
            session.loading = loading;
        }
    }

    pub fn is_loading(&self, session_id: &str) -> bool {
        self.session(session_id).is_some_and(|session| session.loading)
    }

    pub fn update_resume(&mut self, session_id: &str, update: impl FnOnce(&mut ResumeMetadata)) {
        if let Some(session) = self.session_mut(session_id) {
            update(&mut session.resume);
        }
    }

    pub fn rename_session(&mut self, session_id: &str, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        session.title = Some(title.to_string());
        session.title_locked = true;
        true
    }

    pub fn delete_session(&mut self, session_id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|session| session.id != session_id);
        self.turn_diffs.remove(session_id);
        if self.current_session_id.as_deref() == Some(session_id) {
            self.current_session_id = None;
        }
        self.sessions.len() != before
    }

    pub fn publish_turn_diff(&mut self, session_id: &str, diff: &str) {
        self.turn_diffs
            .insert(session_id.to_string(), diff.to_string());
    }

    pub fn turn_diff(&self, session_id: &str) -> Option<&str> {
        self.turn_diffs.get(session_id).map(String::as_str)
    }

    pub fn persist(&self, kv: &mut dyn KeyValueStore) -> Result<(), TetherError> {
        kv.set_many(vec![
            (SESSIONS_KEY, serde_json::to_string(&self.sessions)?),
            (
                CURRENT_SESSION_KEY,
                serde_json::to_string(&self.current_session_id)?,
            ),
        ])
    }

    pub fn restore(kv: &dyn KeyValueStore) -> Result<Self, TetherError> {
        let sessions: Vec<Session> = match kv.get(SESSIONS_KEY)? {
            Some(encoded) => serde_json::from_str(&encoded)?,
            None => Vec::new(),
        };
        let current: Option<String> = match kv.get(CURRENT_SESSION_KEY)? {
            Some(encoded) => serde_json::from_str(&encoded)?,
            None => None,
        };
        let mut store = Self {
            sessions,
            current_session_id: None,
            turn_diffs: HashMap::new(),
        };
        if !store.set_current_session(current.as_deref()) {
            tracing::warn!(?current, "persisted current session no longer exists");
        }
        Ok(store)
    }
}

pub fn derive_title(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() <= TITLE_MAX_CHARS {
        return content.to_string();
    }
    let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
    format!("{truncated}...")
}
