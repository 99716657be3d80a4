use std::collections::BTreeMap;

use async_trait::async_trait;
use qs_id::PoolId;
use tokio::sync::RwLock;

use super::{PoolStore, StoreError};
use crate::pool::PoolState;

/// Keeps pools in process memory. Everything is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPoolStore {
    pools: RwLock<BTreeMap<PoolId, PoolState>>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn load(&self, id: &PoolId) -> Result<Option<PoolState>, StoreError> {
        Ok(self.pools.read().await.get(id).cloned())
    }

    async fn save(&self, pool: &PoolState) -> Result<(), StoreError> {
        self.pools
            .write()
            .await
            .insert(pool.id.clone(), pool.clone());
        Ok(())
    }

    async fn delete(&self, id: &PoolId) -> Result<bool, StoreError> {
        Ok(self.pools.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<PoolId>, StoreError> {
        Ok(self.pools.read().await.keys().cloned().collect())
    }
}
