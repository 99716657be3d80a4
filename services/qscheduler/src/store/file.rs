use std::path::{Path, PathBuf};

use async_trait::async_trait;
use qs_id::PoolId;
use tracing::{debug, warn};

use super::{PoolStore, StoreError};
use crate::pool::PoolState;

const EXTENSION: &str = "json";

/// Stores each pool as `<dir>/<pool_id>.json`.
///
/// Writes go to a temporary file that is renamed over the old one, so a
/// crash never leaves a half-written pool behind.
#[derive(Debug, Clone)]
pub struct FilePoolStore {
    dir: PathBuf,
}

impl FilePoolStore {
    /// Opens a store in `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &PoolId) -> Result<PathBuf, StoreError> {
        if !is_storable(id.as_str()) {
            return Err(StoreError::UnsupportedId(id.clone()));
        }
        Ok(self.dir.join(format!("{}.{EXTENSION}", id.as_str())))
    }
}

/// Pool ids map directly to file names, so only a conservative character
/// set is accepted.
fn is_storable(id: &str) -> bool {
    !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl PoolStore for FilePoolStore {
    async fn load(&self, id: &PoolId) -> Result<Option<PoolState>, StoreError> {
        let path = self.path_for(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, pool: &PoolState) -> Result<(), StoreError> {
        let path = self.path_for(&pool.id)?;
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        let bytes = serde_json::to_vec(pool)?;
        tokio::fs::write(&tmp, &bytes).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(io_error(&path))?;
        debug!(pool_id = %pool.id, bytes = bytes.len(), "Saved pool");
        Ok(())
    }

    async fn delete(&self, id: &PoolId) -> Result<bool, StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn list(&self) -> Result<Vec<PoolId>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match PoolId::new(stem) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unexpected file in state dir"
                ),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use chrono::DateTime;

    fn pool(id: &str) -> PoolState {
        let now = DateTime::from_timestamp(0, 0).unwrap();
        PoolState::new(PoolId::new(id).unwrap(), PoolConfig::default(), now).unwrap()
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePoolStore::open(dir.path().join("pools")).await.unwrap();
        let p = pool("main");

        assert!(store.load(&p.id).await.unwrap().is_none());
        store.save(&p).await.unwrap();
        assert_eq!(store.load(&p.id).await.unwrap(), Some(p.clone()));
        assert_eq!(store.list().await.unwrap(), vec![p.id.clone()]);

        assert!(store.delete(&p.id).await.unwrap());
        assert!(!store.delete(&p.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePoolStore::open(dir.path()).await.unwrap();

        for id in ["../escape", "a/b", ".hidden"] {
            let err = store.load(&PoolId::new(id).unwrap()).await.unwrap_err();
            assert!(matches!(err, StoreError::UnsupportedId(_)), "{id}");
        }
    }
}
