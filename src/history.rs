//! Conversation history persistence (JSONL, one file per channel).

use crate::error::{Result, StorageError};
use crate::message::Message;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

/// Append-only ordered log of messages for one channel.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a message. The record is written before this returns Ok.
    async fn append(&self, message: &Message) -> Result<()>;

    /// Last `n` messages in insertion order. Malformed persisted entries are
    /// skipped, never propagated.
    async fn load_tail(&self, n: usize) -> Result<Vec<Message>>;
}

/// Creates a history store scoped to one channel.
pub type HistoryFactory = Arc<dyn Fn(&str) -> Arc<dyn HistoryStore> + Send + Sync>;

/// JSONL-backed history store.
///
/// One JSON-encoded message per line, trailing newline per record. Writes are
/// serialized behind a mutex so concurrent appends never interleave bytes;
/// each record goes out as a single append write.
pub struct JsonlHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Factory producing per-channel stores as `<root>/<channel>.jsonl`.
    ///
    /// Channel ids are sanitized into file names; anything outside
    /// `[A-Za-z0-9._-]` becomes `_` so a channel id can never escape the root.
    pub fn factory(root: impl Into<PathBuf>) -> HistoryFactory {
        let root = root.into();
        Arc::new(move |channel_id: &str| {
            let file = format!("{}.jsonl", sanitize_file_stem(channel_id));
            Arc::new(JsonlHistoryStore::new(root.join(file))) as Arc<dyn HistoryStore>
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, message: &Message) -> Result<()> {
        let mut line = serde_json::to_string(message).map_err(|source| StorageError::Encode {
            id: message.id.clone(),
            source,
        })?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Append {
                    path: self.path.display().to_string(),
                    source,
                })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| StorageError::Append {
                path: self.path.display().to_string(),
                source,
            })?;

        // One write per record: the line lands whole or not at all.
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| StorageError::Append {
                path: self.path.display().to_string(),
                source,
            })?;
        file.flush().await.map_err(|source| StorageError::Append {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }

    async fn load_tail(&self, n: usize) -> Result<Vec<Message>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StorageError::Read {
                    path: self.path.display().to_string(),
                    source,
                }
                .into());
            }
        };

        let mut messages = Vec::new();
        for (line_number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => messages.push(message),
                Err(error) => {
                    tracing::debug!(
                        path = %self.path.display(),
                        line = line_number + 1,
                        %error,
                        "skipping malformed history line"
                    );
                }
            }
        }

        if messages.len() > n {
            messages.drain(..messages.len() - n);
        }
        Ok(messages)
    }
}

fn sanitize_file_stem(value: &str) -> String {
    let stem: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.trim_matches(['.', '_']).is_empty() {
        "default".to_string()
    } else {
        stem
    }
}
