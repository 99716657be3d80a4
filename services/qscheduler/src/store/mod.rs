//! Pool persistence.
//!
//! A [`PoolStore`] loads and saves whole [`PoolState`] aggregates. Stores do
//! no locking of their own: callers serialize transactions per pool (see
//! [`crate::state::AppState::with_pool`]).

mod file;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use qs_id::PoolId;
use thiserror::Error;

use crate::pool::PoolState;

pub use file::FilePoolStore;
pub use memory::MemoryPoolStore;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The pool id cannot be used as a file name.
    #[error("pool id not storable: {0}")]
    UnsupportedId(PoolId),
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn load(&self, id: &PoolId) -> Result<Option<PoolState>, StoreError>;

    /// Inserts or replaces a pool.
    async fn save(&self, pool: &PoolState) -> Result<(), StoreError>;

    /// Returns false if the pool did not exist.
    async fn delete(&self, id: &PoolId) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<PoolId>, StoreError>;
}
