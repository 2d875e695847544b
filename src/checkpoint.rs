//! Persistence of the sync checkpoint.
//!
//! The checkpoint is a single `YYYY-MM-DDTHH:MM:SSZ` string. It lives either
//! in the `sync_state` table of the clip database (see
//! [`crate::state::SqliteClipStore`]) or in a plain text file handled here.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::state::error::StateError;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Read/write access to the single checkpoint value.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The stored checkpoint, or `None` if nothing has been written yet.
    async fn read(&self) -> Result<Option<String>, CheckpointError>;

    /// Replace the checkpoint. Readers observe either the old or the new
    /// value, never a partial write.
    async fn write(&self, value: &str) -> Result<(), CheckpointError>;

    /// Forget the checkpoint so the next run starts from the epoch.
    async fn clear(&self) -> Result<(), CheckpointError>;
}

/// Checkpoint kept in a text file, replaced via write-to-temp-then-rename.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn read(&self) -> Result<Option<String>, CheckpointError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let value = contents.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }

    async fn write(&self, value: &str) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }

        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| self.io_err(e))?;
        file.write_all(value.as_bytes())
            .await
            .map_err(|e| self.io_err(e))?;
        file.sync_all().await.map_err(|e| self.io_err(e))?;
        drop(file);

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        tracing::debug!(path = %self.path.display(), checkpoint = value, "Checkpoint written");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}
