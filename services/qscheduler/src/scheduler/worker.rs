//! Balance refresh worker.
//!
//! Advances every pool's scheduler clock on a periodic interval, so account
//! balances refill and running tasks are charged even when no executor
//! traffic arrives.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::pool::PoolError;
use crate::state::AppState;

/// Worker that periodically updates the time of every pool.
pub struct BalanceWorker {
    state: AppState,
    interval: Duration,
}

/// Result of one refresh pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub pools_updated: usize,
    pub pools_failed: usize,
}

impl BalanceWorker {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    /// Run the worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting balance worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.refresh_all().await {
                        Ok(stats) if stats.pools_failed > 0 => {
                            warn!(
                                updated = stats.pools_updated,
                                failed = stats.pools_failed,
                                "Balance refresh incomplete"
                            );
                        }
                        Ok(stats) => {
                            debug!(updated = stats.pools_updated, "Balance refresh complete")
                        }
                        Err(e) => error!(error = %e, "Balance refresh failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Balance worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Advances every pool to the current time.
    pub async fn refresh_all(&self) -> Result<RefreshStats, PoolError> {
        let mut stats = RefreshStats::default();
        for pool_id in self.state.list_pools().await? {
            let now = Utc::now();
            let result = self
                .state
                .with_pool(&pool_id, |pool| Ok(pool.scheduler.update_time(now)?))
                .await;
            match result {
                Ok(()) => stats.pools_updated += 1,
                // Deleted since listing.
                Err(PoolError::NotFound(_)) => {}
                Err(e) => {
                    warn!(pool_id = %pool_id, error = %e, "Failed to refresh pool balances");
                    stats.pools_failed += 1;
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use qs_id::{AccountId, PoolId};
    use qs_scheduler::AccountConfig;

    use super::*;
    use crate::pool::PoolConfig;
    use crate::store::MemoryPoolStore;

    #[tokio::test]
    async fn test_refresh_recharges_balances() {
        let state = AppState::new(Arc::new(MemoryPoolStore::new()));
        let pool_id = PoolId::new("p").unwrap();
        let start = DateTime::from_timestamp(0, 0).unwrap();
        state
            .create_pool(pool_id.clone(), PoolConfig::default(), start)
            .await
            .unwrap();
        let account = AccountId::new("a").unwrap();
        let config = AccountConfig {
            charge_rate: vec![1.0],
            max_charge_seconds: 10.0,
            ..Default::default()
        };
        state
            .with_pool(&pool_id, |pool| {
                Ok(pool.scheduler.add_account(account.clone(), config, &[])?)
            })
            .await
            .unwrap();

        let worker = BalanceWorker::new(state.clone(), Duration::from_secs(1));
        let stats = worker.refresh_all().await.unwrap();

        assert_eq!(stats, RefreshStats { pools_updated: 1, pools_failed: 0 });
        let pool = state.read_pool(&pool_id).await.unwrap();
        // Decades have passed since the epoch; the bucket is full.
        assert_eq!(pool.scheduler.balance(&account).unwrap().get(0), 10.0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let state = AppState::new(Arc::new(MemoryPoolStore::new()));
        let worker = BalanceWorker::new(state, Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
