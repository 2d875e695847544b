//! Exclusive advisory lock that keeps two daemons off one clip store.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use super::error::StateError;

/// Holds `<db>.lock` locked until dropped.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock the file next to `db_path`, failing fast if another process
    /// already holds it.
    pub async fn acquire(db_path: &Path) -> Result<Self, StateError> {
        let path = lock_path(db_path);
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StateError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let file = File::create(&path).map_err(|e| StateError::LockFile {
                path: path.clone(),
                source: e,
            })?;
            file.try_lock_exclusive()
                .map_err(|_| StateError::Locked(path.clone()))?;
            tracing::debug!(path = %path.display(), "Acquired instance lock");
            Ok(Self { _file: file, path })
        })
        .await?
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "clipsync.db".into());
    name.push(".lock");
    db_path.with_file_name(name)
}
