//! Durable per-channel progress cursors.
//!
//! Persisted as a single JSON document `{ "<channel>": { "last_id": N } }`,
//! rewritten wholesale (temp file + rename) on every update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CheckpointError;
use crate::source::MessageId;

/// Stored state for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_id: MessageId,
}

/// Cursor persistence. Writes never move a cursor backwards.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Current cursor, `0` for an unknown channel.
    async fn get_cursor(&self, channel: &str) -> Result<MessageId, CheckpointError>;

    /// Persist `id` if it exceeds the stored cursor. Returns whether it was written.
    async fn set_cursor(&self, channel: &str, id: MessageId) -> Result<bool, CheckpointError>;

    /// All known cursors.
    async fn snapshot(&self) -> Result<BTreeMap<String, Checkpoint>, CheckpointError>;
}

/// JSON file-backed store.
///
/// The in-memory map is the source of truth once opened; the mutex
/// serializes read-modify-write across channel loops sharing the file.
pub struct FileCheckpointStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, Checkpoint>>,
}

impl FileCheckpointStore {
    /// Open the store at `path`. A missing file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let state = Self::read(&path).await?;
        tracing::debug!(path = %path.display(), channels = state.len(), "Checkpoint store opened");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(path: &Path) -> Result<BTreeMap<String, Checkpoint>, CheckpointError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(BTreeMap::new());
        }
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CheckpointError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data).map_err(|e| CheckpointError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn write_failed(&self, reason: impl std::fmt::Display) -> CheckpointError {
        CheckpointError::WriteFailed {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn write(&self, state: &BTreeMap<String, Checkpoint>) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_failed(e))?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|e| self.write_failed(e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|e| self.write_failed(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.write_failed(e))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get_cursor(&self, channel: &str) -> Result<MessageId, CheckpointError> {
        let state = self.state.lock().await;
        Ok(state.get(channel).map(|c| c.last_id).unwrap_or(0))
    }

    async fn set_cursor(&self, channel: &str, id: MessageId) -> Result<bool, CheckpointError> {
        let mut state = self.state.lock().await;
        let current = state.get(channel).map(|c| c.last_id).unwrap_or(0);
        if id <= current {
            tracing::debug!(channel, current, requested = id, "Cursor not advanced");
            return Ok(false);
        }

        let mut next = state.clone();
        next.insert(channel.to_string(), Checkpoint { last_id: id });
        self.write(&next).await?;
        *state = next;
        Ok(true)
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, Checkpoint>, CheckpointError> {
        Ok(self.state.lock().await.clone())
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<BTreeMap<String, Checkpoint>>,
    history: Mutex<Vec<(String, MessageId)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cursor without recording it as a write.
    pub async fn seed(&self, channel: &str, id: MessageId) {
        self.state
            .lock()
            .await
            .insert(channel.to_string(), Checkpoint { last_id: id });
    }

    /// Every successful write, in order.
    pub async fn history(&self) -> Vec<(String, MessageId)> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_cursor(&self, channel: &str) -> Result<MessageId, CheckpointError> {
        Ok(self
            .state
            .lock()
            .await
            .get(channel)
            .map(|c| c.last_id)
            .unwrap_or(0))
    }

    async fn set_cursor(&self, channel: &str, id: MessageId) -> Result<bool, CheckpointError> {
        let mut state = self.state.lock().await;
        let entry = state.entry(channel.to_string()).or_default();
        if id <= entry.last_id {
            return Ok(false);
        }
        entry.last_id = id;
        self.history.lock().await.push((channel.to_string(), id));
        Ok(true)
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, Checkpoint>, CheckpointError> {
        Ok(self.state.lock().await.clone())
    }
}
