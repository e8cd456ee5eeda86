//! Durable per-case chat history cache.
//!
//! Lets a reopened case show its conversation before the server fetch
//! completes. Server history always wins once it arrives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::sync::chat::ChatMessage;

#[async_trait]
pub trait ChatHistoryCache: Send + Sync {
    /// Cached history for a case. A missing entry is an empty history.
    async fn load(&self, case_id: &str) -> Result<Vec<ChatMessage>, CacheError>;

    async fn store(&self, case_id: &str, messages: &[ChatMessage]) -> Result<(), CacheError>;

    async fn remove(&self, case_id: &str) -> Result<(), CacheError>;
}

pub fn cache_key(case_id: &str) -> String {
    format!("chat_history_{case_id}")
}

/// One JSON file per case under a cache directory.
pub struct FileChatCache {
    dir: PathBuf,
}

impl FileChatCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Percent-encoding keeps distinct case ids in distinct files and
    /// keeps path separators out of the file name.
    fn path_for(&self, case_id: &str) -> PathBuf {
        let name = urlencoding::encode(&cache_key(case_id)).into_owned();
        self.dir.join(format!("{name}.json"))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ChatHistoryCache for FileChatCache {
    async fn load(&self, case_id: &str) -> Result<Vec<ChatMessage>, CacheError> {
        let path = self.path_for(case_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupt {
            key: cache_key(case_id),
            reason: e.to_string(),
        })
    }

    async fn store(&self, case_id: &str, messages: &[ChatMessage]) -> Result<(), CacheError> {
        let path = self.path_for(case_id);
        let body = serde_json::to_vec(messages).map_err(|e| CacheError::Corrupt {
            key: cache_key(case_id),
            reason: e.to_string(),
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        // Write-then-rename so a crash never leaves a half-written entry.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn remove(&self, case_id: &str) -> Result<(), CacheError> {
        let path = self.path_for(case_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

/// In-process cache for tests and for runs without a cache directory.
#[derive(Default)]
pub struct MemoryChatCache {
    entries: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl MemoryChatCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<ChatMessage>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatHistoryCache for MemoryChatCache {
    async fn load(&self, case_id: &str) -> Result<Vec<ChatMessage>, CacheError> {
        Ok(self
            .entries()
            .get(&cache_key(case_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn store(&self, case_id: &str, messages: &[ChatMessage]) -> Result<(), CacheError> {
        self.entries()
            .insert(cache_key(case_id), messages.to_vec());
        Ok(())
    }

    async fn remove(&self, case_id: &str) -> Result<(), CacheError> {
        self.entries().remove(&cache_key(case_id));
        Ok(())
    }
}
