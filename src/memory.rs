//! Long-term memory: a channel-independent fact log on disk.
//!
//! Facts accumulate in `memory.md` under the store root, one `- fact` line
//! each. An optional per-day sibling log keeps dated notes in
//! `YYYY-MM-DD.md` files next to it.

use crate::error::{Result, StorageError};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

const MEMORY_FILE: &str = "memory.md";
const FALLBACK_DAILY_FILE: &str = "default.md";

/// File-backed long-term memory store.
pub struct MemoryStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append a one-line fact to the memory file.
    pub async fn remember(&self, fact: &str) -> Result<()> {
        let line = format!("- {}\n", fact.trim_end_matches('\n'));
        self.append_line(&self.root.join(MEMORY_FILE), &line).await
    }

    /// The concatenated memory. Missing file is empty memory, not an error.
    pub async fn load(&self) -> Result<String> {
        let path = self.root.join(MEMORY_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(StorageError::Read {
                path: path.display().to_string(),
                source,
            }
            .into()),
        }
    }

    /// Append a note to the dated log for `year-month-day`.
    ///
    /// Components that are not plain digit strings fall back to
    /// `default.md`, so upstream values can never name a path outside the
    /// store root.
    pub async fn append_daily(&self, year: &str, month: &str, day: &str, text: &str) -> Result<()> {
        let file = daily_file_name(year, month, day);
        let line = format!("{}\n", text.trim_end_matches('\n'));
        self.append_line(&self.root.join(file), &line).await
    }

    async fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Append {
                path: path.display().to_string(),
                source,
            })?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| StorageError::Append {
                path: path.display().to_string(),
                source,
            })?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|source| StorageError::Append {
                path: path.display().to_string(),
                source,
            })?;
        file.flush().await.map_err(|source| StorageError::Append {
            path: path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Build the dated file name, falling back on any component that is not a
/// fixed-width digit string.
fn daily_file_name(year: &str, month: &str, day: &str) -> String {
    let valid = |value: &str, width: usize| {
        value.len() == width && value.bytes().all(|b| b.is_ascii_digit())
    };
    if valid(year, 4) && valid(month, 2) && valid(day, 2) {
        format!("{year}-{month}-{day}.md")
    } else {
        FALLBACK_DAILY_FILE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn remember_appends_dash_lines() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());

        store.remember("the deploy window is Friday").await.unwrap();
        store.remember("prefers terse answers").await.unwrap();

        let memory = store.load().await.unwrap();
        assert_eq!(
            memory,
            "- the deploy window is Friday\n- prefers terse answers\n"
        );
    }

    #[tokio::test]
    async fn load_of_absent_memory_is_empty() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path().join("never-created"));
        assert_eq!(store.load().await.unwrap(), "");
    }

    #[tokio::test]
    async fn daily_log_writes_dated_file() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());

        store
            .append_daily("2026", "08", "01", "shipped the release")
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join("2026-08-01.md"))
            .await
            .unwrap();
        assert_eq!(contents, "shipped the release\n");
    }

    #[tokio::test]
    async fn bad_date_components_fall_back_to_default() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path());

        store.append_daily("..", "08", "01", "first").await.unwrap();
        store
            .append_daily("/etc", "0/", "x1", "second")
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join("default.md"))
            .await
            .unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn daily_file_name_validation() {
        assert_eq!(daily_file_name("2026", "08", "01"), "2026-08-01.md");
        assert_eq!(daily_file_name("..", "08", "01"), "default.md");
        assert_eq!(daily_file_name("2026", "8", "01"), "default.md");
        assert_eq!(daily_file_name("/abs", "08", "01"), "default.md");
        assert_eq!(daily_file_name("20a6", "08", "01"), "default.md");
    }
}
