//! Checkpoint persistence

use crate::checkpoint::{Checkpoint, CheckpointSummary};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("checkpoint {id} is corrupt: checksum mismatch")]
    Corrupt { id: String },

    #[error("invalid checkpoint id: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Storage for immutable checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
    /// Load and verify a checkpoint
    async fn load(&self, id: &str) -> Result<Checkpoint, StoreError>;
    /// Summaries, oldest first
    async fn list(&self) -> Result<Vec<CheckpointSummary>, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

fn check_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

fn sort_summaries(list: &mut [CheckpointSummary]) {
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// One JSON document per checkpoint in a directory
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        check_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let path = self.path_for(&checkpoint.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Checkpoint, StoreError> {
        let path = self.path_for(id)?;
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&body)?;
        if !checkpoint.verify() {
            return Err(StoreError::Corrupt { id: id.to_string() });
        }
        Ok(checkpoint)
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(StoreError::from)
                .and_then(|body| {
                    serde_json::from_slice::<Checkpoint>(&body).map_err(StoreError::from)
                });
            match parsed {
                Ok(checkpoint) => out.push(checkpoint.summary()),
                Err(e) => {
                    tracing::warn!("Skipping unreadable checkpoint {}: {}", path.display(), e)
                }
            }
        }
        sort_summaries(&mut out);
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        check_id(&checkpoint.id)?;
        self.checkpoints.write().insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Checkpoint, StoreError> {
        let checkpoint = self
            .checkpoints
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !checkpoint.verify() {
            return Err(StoreError::Corrupt { id: id.to_string() });
        }
        Ok(checkpoint)
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, StoreError> {
        let mut out: Vec<_> = self.checkpoints.read().values().map(Checkpoint::summary).collect();
        sort_summaries(&mut out);
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.checkpoints
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostState;

    fn checkpoint(id: &str) -> Checkpoint {
        let mut state = HostState::default();
        state.sysctl.insert("net.core.somaxconn".into(), "4096".into());
        Checkpoint::new(id.to_string(), Some("test".into()), state, vec![])
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path().join("checkpoints"));

        store.save(&checkpoint("ckpt-a")).await.unwrap();
        store.save(&checkpoint("ckpt-b")).await.unwrap();

        let loaded = store.load("ckpt-a").await.unwrap();
        assert_eq!(loaded.state.sysctl["net.core.somaxconn"], "4096");

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);

        store.delete("ckpt-a").await.unwrap();
        assert!(matches!(store.load("ckpt-a").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete("ckpt-a").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fs_store_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        store.save(&checkpoint("ckpt-x")).await.unwrap();

        let path = dir.path().join("ckpt-x.json");
        let body = std::fs::read_to_string(&path).unwrap().replace("\"4096\"", "\"8192\"");
        std::fs::write(&path, body).unwrap();

        assert!(matches!(store.load("ckpt-x").await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        assert!(matches!(store.load("../etc/passwd").await, Err(StoreError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = InMemoryCheckpointStore::new();
        store.save(&checkpoint("ckpt-1")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        store.delete("ckpt-1").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
