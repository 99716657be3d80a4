//! Application state shared across request handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use qs_id::PoolId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use crate::pool::{PoolConfig, PoolError, PoolState};
use crate::store::PoolStore;

type LockTable = StdMutex<HashMap<PoolId, Arc<Mutex<()>>>>;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn PoolStore>,

    /// One lock per pool with a transaction in flight. An entry lives as
    /// long as someone holds or waits on it.
    locks: Arc<LockTable>,
}

/// Exclusive access to one pool. Releases the table entry on drop once no
/// other task holds or waits on it.
struct PoolGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
    id: PoolId,
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl AppState {
    /// Create a new application state.
    pub fn new(store: Arc<dyn PoolStore>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                locks: Arc::new(StdMutex::new(HashMap::new())),
            }),
        }
    }

    pub fn store(&self) -> &dyn PoolStore {
        self.inner.store.as_ref()
    }

    async fn lock_pool(&self, id: &PoolId) -> PoolGuard {
        let lock = {
            let mut locks = self
                .inner
                .locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.clone()).or_default().clone()
        };
        PoolGuard {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.inner.locks),
            id: id.clone(),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs `f` as a read-modify-write transaction on one pool.
    ///
    /// The pool is saved only if `f` succeeds. Transactions on the same pool
    /// never overlap.
    #[instrument(skip(self, f), fields(pool_id = %id))]
    pub async fn with_pool<T, F>(&self, id: &PoolId, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(&mut PoolState) -> Result<T, PoolError>,
    {
        let _guard = self.lock_pool(id).await;

        let mut pool = self
            .store()
            .load(id)
            .await?
            .ok_or_else(|| PoolError::NotFound(id.clone()))?;
        let out = f(&mut pool)?;
        self.store().save(&pool).await?;
        Ok(out)
    }

    /// Loads a pool without modifying it.
    pub async fn read_pool(&self, id: &PoolId) -> Result<PoolState, PoolError> {
        let _guard = self.lock_pool(id).await;
        self.store()
            .load(id)
            .await?
            .ok_or_else(|| PoolError::NotFound(id.clone()))
    }

    pub async fn create_pool(
        &self,
        id: PoolId,
        config: PoolConfig,
        now: DateTime<Utc>,
    ) -> Result<PoolState, PoolError> {
        let _guard = self.lock_pool(&id).await;
        if self.store().load(&id).await?.is_some() {
            return Err(PoolError::AlreadyExists(id));
        }
        let pool = PoolState::new(id, config, now)?;
        self.store().save(&pool).await?;
        Ok(pool)
    }

    pub async fn delete_pool(&self, id: &PoolId) -> Result<(), PoolError> {
        let _guard = self.lock_pool(id).await;
        if !self.store().delete(id).await? {
            return Err(PoolError::NotFound(id.clone()));
        }
        Ok(())
    }

    pub async fn list_pools(&self) -> Result<Vec<PoolId>, PoolError> {
        Ok(self.store().list().await?)
    }
}
