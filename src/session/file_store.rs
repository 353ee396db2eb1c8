//! Directory-backed checkpoint store.
//!
//! Each thread is one JSON file named after its (escaped) key. Writes go to a
//! temporary file first and are renamed into place, so a crash leaves either
//! the old or the new history on disk, never a torn one.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use super::checkpoint::{CheckpointStore, ConversationState};
use super::keys::ThreadKey;
use crate::error::{OracleError, Result};
use crate::llm::Message;

/// On-disk record of one thread.
#[derive(Debug, Serialize, Deserialize)]
struct StoredThread {
    thread_key: ThreadKey,
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    state: ConversationState,
}

/// Checkpoint store persisting each thread as a JSON file in a directory.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles across keys.
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create checkpoint directory {}", dir.display()))
            .map_err(OracleError::Checkpoint)?;

        tracing::info!(dir = %dir.display(), "File checkpoint store opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the file holding `key`.
    #[must_use]
    pub fn path_for(&self, key: &ThreadKey) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key.as_str())))
    }

    async fn read(&self, key: &ThreadKey) -> anyhow::Result<Option<StoredThread>> {
        let path = self.path_for(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        let stored = serde_json::from_slice(&raw)
            .with_context(|| format!("corrupt checkpoint file {}", path.display()))?;
        Ok(Some(stored))
    }

    async fn write(&self, stored: &StoredThread) -> anyhow::Result<()> {
        let path = self.path_for(&stored.thread_key);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(stored)?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move checkpoint into {}", path.display()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, key: &ThreadKey) -> Result<Option<ConversationState>> {
        let stored = self.read(key).await.map_err(OracleError::Checkpoint)?;
        Ok(stored.map(|s| s.state))
    }

    async fn append(&self, key: &ThreadKey, messages: &[Message]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut state = self
            .read(key)
            .await
            .map_err(OracleError::Checkpoint)?
            .map(|s| s.state)
            .unwrap_or_default();
        state.append(messages.iter().cloned());

        let stored = StoredThread {
            thread_key: key.clone(),
            updated_at: Utc::now(),
            state,
        };
        self.write(&stored).await.map_err(OracleError::Checkpoint)?;

        tracing::debug!(
            thread_key = %key,
            message_count = stored.state.len(),
            "Thread checkpoint written"
        );
        Ok(())
    }
}

/// File-name-safe form of a key: ASCII alphanumerics, `-` and `_` pass
/// through, every other byte becomes `%XX`.
fn file_stem(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
