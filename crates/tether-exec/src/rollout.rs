use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use tether_core::conversation::derive_title;
use tether_core::Message;
use tether_core::ResumeMetadata;
use tether_core::Role;
use tether_core::Session;

/// Resolves the codex home directory: explicit override, then `CODEX_HOME`,
/// then `~/.codex`.
pub fn codex_home(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(path.to_path_buf());
    }
    if let Some(home) = std::env::var_os("CODEX_HOME").filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|home| home.join(".codex"))
}

/// Every rollout file under `<codex home>/sessions/YYYY/MM/DD/`, newest
/// first. File names start with the session timestamp, so name order is
/// creation order.
pub fn list_rollouts(codex_home: &Path) -> std::io::Result<Vec<PathBuf>> {
    let sessions_dir = codex_home.join("sessions");
    if !sessions_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut rollouts = Vec::new();
    let mut stack = vec![sessions_dir];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), %err, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file()
                && path.extension().is_some_and(|ext| ext == "jsonl")
            {
                rollouts.push(path);
            }
        }
    }
    rollouts.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(rollouts)
}

/// Finds the rollout file of a backend session, named
/// `rollout-<timestamp>-<uuid>.jsonl`.
pub fn find_rollout_path(
    codex_home: &Path,
    backend_session_id: &str,
) -> std::io::Result<Option<PathBuf>> {
    let needle = format!("-{backend_session_id}.jsonl");
    Ok(list_rollouts(codex_home)?.into_iter().find(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(&needle))
    }))
}

/// User turns codex injects ahead of the real prompt.
const INJECTED_PREFIXES: [&str; 2] = ["<environment_context>", "<user_instructions>"];

/// Rebuilds the transcript of one rollout file. Returns `None` for files
/// without session metadata or without any conversation.
pub fn load_rollout(path: &Path) -> std::io::Result<Option<Session>> {
    let contents = std::fs::read_to_string(path)?;
    let mut meta: Option<RolloutMeta> = None;
    let mut messages = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            if !line.trim().is_empty() {
                tracing::debug!(path = %path.display(), line = index + 1, "skipping bad rollout line");
            }
            continue;
        };
        let timestamp = record
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        match record.get("type").and_then(Value::as_str) {
            Some("session_meta") => {
                if let Some(payload) = record.get("payload") {
                    meta = meta.or_else(|| RolloutMeta::from_value(payload));
                }
            }
            Some("response_item") => {
                if let Some(message) = record.get("payload").and_then(|item| to_message(item, timestamp)) {
                    messages.push(message);
                }
            }
            Some("message") => {
                if let Some(message) = to_message(&record, timestamp) {
                    messages.push(message);
                }
            }
            Some(_) => {}
            None if index == 0 => meta = RolloutMeta::from_value(&record),
            None => {}
        }
    }

    let Some(meta) = meta else {
        tracing::debug!(path = %path.display(), "rollout without session metadata");
        return Ok(None);
    };
    if messages.is_empty() {
        return Ok(None);
    }

    let mut session = Session::new(meta.id.clone(), meta.cwd);
    session.title = messages
        .iter()
        .find(|message| message.role == Role::User)
        .map(|message| derive_title(&message.content));
    session.resume = ResumeMetadata {
        backend_session_id: Some(meta.id),
        rollout_path: Some(path.to_path_buf()),
    };
    let first = messages.first().map(|message| message.timestamp);
    let last = messages.last().map(|message| message.timestamp);
    if let Some(created) = meta.timestamp.or(first) {
        session.created_at = created;
    }
    if let Some(updated) = last {
        session.updated_at = updated.max(session.created_at);
    }
    session.messages = messages;
    Ok(Some(session))
}

/// Loads every readable rollout under `codex_home`, newest first.
pub fn load_history(codex_home: &Path) -> std::io::Result<Vec<Session>> {
    let mut sessions = Vec::new();
    for path in list_rollouts(codex_home)? {
        match load_rollout(&path) {
            Ok(Some(session)) => sessions.push(session),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "skipping unreadable rollout");
            }
        }
    }
    tracing::info!(sessions = sessions.len(), "history loaded");
    Ok(sessions)
}

struct RolloutMeta {
    id: String,
    cwd: Option<PathBuf>,
    timestamp: Option<DateTime<Utc>>,
}

impl RolloutMeta {
    fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id").and_then(Value::as_str)?.to_string();
        Some(Self {
            id,
            cwd: value.get("cwd").and_then(Value::as_str).map(PathBuf::from),
            timestamp: value
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn to_message(item: &Value, timestamp: Option<DateTime<Utc>>) -> Option<Message> {
    if item.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    let role = match item.get("role").and_then(Value::as_str)? {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };
    let text: Vec<&str> = item
        .get("content")
        .and_then(Value::as_array)?
        .iter()
        .filter(|part| {
            matches!(
                part.get("type").and_then(Value::as_str),
                Some("input_text" | "output_text" | "text")
            )
        })
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    let text = text.join("\n");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if role == Role::User && INJECTED_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix)) {
        return None;
    }
    let mut message = Message::synthetic(role, trimmed);
    if let Some(timestamp) = timestamp {
        message.timestamp = timestamp;
    }
    Some(message)
}
