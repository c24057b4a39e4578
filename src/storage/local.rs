// src/storage/local.rs

//! Single-file JSON state store.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::ProductRecord;
use crate::storage::{ProductStore, RecordMap};

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    groups: RecordMap,
}

/// Filesystem-backed store keeping all product state in one JSON file,
/// written atomically (temp file, then rename).
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the state file; a missing file is an empty state.
    async fn read_state(&self) -> Result<StateFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Write atomically: temp file, flush, rename.
    async fn write_state(&self, state: &StateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(state)?;

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for LocalStore {
    async fn load_all(&self) -> Result<RecordMap> {
        Ok(self.read_state().await?.groups)
    }

    async fn upsert(&self, group: &str, record: &ProductRecord) -> Result<()> {
        let mut state = self.read_state().await?;
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(record.canonical_url.clone(), record.clone());
        state.updated_at = Some(Utc::now());
        self.write_state(&state).await
    }

    async fn remove(&self, group: &str, canonical_url: &str) -> Result<()> {
        let mut state = self.read_state().await?;
        if let Some(records) = state.groups.get_mut(group) {
            records.remove(canonical_url);
            if records.is_empty() {
                state.groups.remove(group);
            }
        }
        state.updated_at = Some(Utc::now());
        self.write_state(&state).await
    }
}
