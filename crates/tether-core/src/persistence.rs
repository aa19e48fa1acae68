use std::collections::BTreeMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::error::TetherError;

pub const SESSIONS_KEY: &str = "sessions";
pub const CURRENT_SESSION_KEY: &str = "current_session_id";

/// String-valued storage the conversation store persists into.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, TetherError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), TetherError>;

    /// Writes several keys as one update.
    fn set_many(&mut self, entries: Vec<(&str, String)>) -> Result<(), TetherError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, TetherError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), TetherError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// A single JSON object on disk, one member per key. Every `set` rewrites the
/// file through a sibling temp file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TetherError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = if path.exists() {
            let bytes = std::fs::read(&path)?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), TetherError> {
        let encoded = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, &encoded)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, TetherError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), TetherError> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn set_many(&mut self, entries: Vec<(&str, String)>) -> Result<(), TetherError> {
        for (key, value) in entries {
            self.entries.insert(key.to_string(), value);
        }
        self.flush()
    }
}

/// One inbound backend payload as it arrived, tagged with the frontend session
/// it was routed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: u64,
    pub ts_ms: i64,
    pub session_id: String,
    pub raw: Value,
}

/// Append-only JSONL log of inbound payloads, used to replay a session
/// through the pipeline offline.
#[derive(Debug)]
pub struct RecordedEventLog {
    path: PathBuf,
    next_seq: u64,
}

impl RecordedEventLog {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let next_seq = load_records(path.as_path())?
            .iter()
            .map(|record| record.seq)
            .max()
            .map_or(1, |seq| seq.saturating_add(1));
        Ok(Self { path, next_seq })
    }

    pub fn append(&mut self, session_id: &str, raw: &Value) -> std::io::Result<u64> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        let record = RecordedEvent {
            seq,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            session_id: session_id.to_string(),
            raw: raw.clone(),
        };
        let line = serde_json::to_string(&record)
            .map_err(|err| std::io::Error::other(format!("serialize: {err}")))?;
        append_line(self.path.as_path(), line.as_str())?;
        Ok(seq)
    }

    pub fn load(&self) -> std::io::Result<Vec<RecordedEvent>> {
        load_records(self.path.as_path())
    }

    pub fn load_session(&self, session_id: &str) -> std::io::Result<Vec<RecordedEvent>> {
        let mut records: Vec<RecordedEvent> = self
            .load()?
            .into_iter()
            .filter(|record| record.session_id == session_id)
            .collect();
        records.sort_by_key(|record| record.seq);
        Ok(records)
    }
}

fn load_records(path: &Path) -> std::io::Result<Vec<RecordedEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RecordedEvent>(&line) {
            Ok(record) => records.push(record),
            Err(err) => tracing::debug!(%err, "skipping unreadable event log line"),
        }
    }
    Ok(records)
}

fn private_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = private_options().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = private_options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}
