//! Per-pool aggregate.

use chrono::{DateTime, Utc};
use qs_id::PoolId;
use qs_reconcile::Reconciler;
use qs_scheduler::{Config, Scheduler, SchedulerError, DEFAULT_PREEMPTION_MARGIN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Pool-wide scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub disable_preemption: bool,
    pub preemption_margin: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            disable_preemption: false,
            preemption_margin: DEFAULT_PREEMPTION_MARGIN,
        }
    }
}

/// Everything persisted for one pool. Loaded, mutated and saved as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub id: PoolId,
    pub created_at: DateTime<Utc>,
    pub scheduler: Scheduler,
    pub reconciler: Reconciler,
}

impl PoolState {
    pub fn new(id: PoolId, config: PoolConfig, now: DateTime<Utc>) -> Result<Self, PoolError> {
        let scheduler = Scheduler::with_config(
            now,
            Config {
                disable_preemption: config.disable_preemption,
                preemption_margin: config.preemption_margin,
                ..Default::default()
            },
        )?;
        Ok(Self {
            id,
            created_at: now,
            scheduler,
            reconciler: Reconciler::new(),
        })
    }

    pub fn config(&self) -> PoolConfig {
        let config = self.scheduler.config();
        PoolConfig {
            disable_preemption: config.disable_preemption,
            preemption_margin: config.preemption_margin,
        }
    }
}

/// Errors from pool transactions.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool not found: {0}")]
    NotFound(PoolId),

    #[error("pool already exists: {0}")]
    AlreadyExists(PoolId),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
