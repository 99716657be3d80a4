//! # qs-scheduler
//!
//! Quota-based task scheduler.
//!
//! The [`Scheduler`] owns, for one pool of workers:
//! - the queue of waiting task requests
//! - the workers, and the task each is running
//! - the per-priority quota balance of every configured account
//!
//! Each account earns quota in a number of priority buckets at a configured
//! rate and spends it while its tasks run. A waiting task runs at the
//! highest priority its account can currently afford; tasks of accounts that
//! afford nothing, or that have no account, run in the free bucket, on
//! otherwise idle workers only.
//!
//! ## Usage
//!
//! All operations are synchronous, in-memory and deterministic. The
//! scheduler is not thread-safe; callers serialize access per pool (the
//! service does so with one lock per pool).
//!
//! ```ignore
//! let mut s = Scheduler::new(now);
//! s.add_account(account, AccountConfig { charge_rate: vec![1.0], ..Default::default() }, &[])?;
//! s.notify_task_waiting(request, now, &tags, &mut events);
//! s.update_time(later)?;
//! let assignments = s.assign_tasks(&idle_workers, later, &mut events);
//! ```

mod assignment;
mod balance;
mod config;
mod error;
mod fanout;
mod labels;
mod request;
mod run;
mod state;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use qs_events::EventSink;
use qs_id::{AccountId, RequestId, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub use assignment::{Assignment, AssignmentKind};
pub use balance::{next_balance, Balance};
pub use config::{AccountConfig, Config, DEFAULT_PREEMPTION_MARGIN};
pub use error::SchedulerError;
pub use labels::LabelSet;
pub use request::{Displaced, IdleWorker, QueuedRequest, TaskRequest, TaskRun, Worker};
pub use run::{DEMOTE_THRESHOLD, PROMOTE_THRESHOLD};

use run::SchedulerRun;
use state::State;

/// Number of charged priority buckets. Priority 0 is the highest.
pub const NUM_PRIORITIES: usize = 3;

/// Priority of tasks that run without charge, on otherwise idle workers.
pub const FREE_BUCKET: Priority = NUM_PRIORITIES;

/// A priority bucket index, in `0..=FREE_BUCKET`.
pub type Priority = usize;

/// Quota scheduler for one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheduler {
    state: State,
    config: Config,
}

impl Scheduler {
    /// Creates an empty scheduler whose clock starts at `t`.
    pub fn new(t: DateTime<Utc>) -> Self {
        Self {
            state: State::new(t),
            config: Config::default(),
        }
    }

    /// Creates an empty scheduler with the given configuration.
    ///
    /// Accounts in `config` start with a zero balance.
    pub fn with_config(t: DateTime<Utc>, config: Config) -> Result<Self, SchedulerError> {
        config.validate()?;
        let mut state = State::new(t);
        for account in config.account_configs.keys() {
            state.balances.insert(account.clone(), Balance::ZERO);
        }
        Ok(Self { state, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Changes the preemption policy of the pool.
    pub fn set_preemption_policy(
        &mut self,
        disable_preemption: bool,
        preemption_margin: usize,
    ) -> Result<(), SchedulerError> {
        let candidate = Config {
            account_configs: Default::default(),
            disable_preemption,
            preemption_margin,
        };
        candidate.validate()?;
        self.config.disable_preemption = disable_preemption;
        self.config.preemption_margin = preemption_margin;
        Ok(())
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Adds or replaces an account, resetting its balance to
    /// `initial_balance` (missing buckets are zero).
    pub fn add_account(
        &mut self,
        id: AccountId,
        config: AccountConfig,
        initial_balance: &[f64],
    ) -> Result<(), SchedulerError> {
        config.validate(&id)?;
        if initial_balance.len() > NUM_PRIORITIES {
            return Err(SchedulerError::InvalidBalance {
                account: id,
                message: format!(
                    "{} values given, at most {} priorities exist",
                    initial_balance.len(),
                    NUM_PRIORITIES
                ),
            });
        }
        if initial_balance.iter().any(|v| !v.is_finite()) {
            return Err(SchedulerError::InvalidBalance {
                account: id,
                message: "balance values must be finite".to_string(),
            });
        }
        self.state
            .balances
            .insert(id.clone(), Balance::from_slice(initial_balance));
        self.config.account_configs.insert(id, config);
        Ok(())
    }

    /// Removes an account and its balance. Its tasks keep running, and new
    /// ones run in the free bucket. Returns false if the account was unknown.
    pub fn remove_account(&mut self, id: &AccountId) -> bool {
        self.state.balances.remove(id);
        self.config.account_configs.remove(id).is_some()
    }

    pub fn account_config(&self, id: &AccountId) -> Option<&AccountConfig> {
        self.config.account_configs.get(id)
    }

    pub fn balance(&self, id: &AccountId) -> Option<&Balance> {
        self.state.balances.get(id)
    }

    pub fn balances(&self) -> impl Iterator<Item = (&AccountId, &Balance)> {
        self.state.balances.iter()
    }

    // =========================================================================
    // Time
    // =========================================================================

    /// Advances the scheduler clock to `t`, recharging account balances and
    /// charging running tasks for the elapsed time.
    ///
    /// Moving the clock backwards fails and leaves the state untouched.
    pub fn update_time(&mut self, t: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.state.update_time(t, &self.config)
    }

    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.state.last_update_time
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Records that a worker was idle at `t` with the given labels.
    ///
    /// If the worker was believed to be running a task, that task is
    /// considered finished.
    pub fn mark_idle(
        &mut self,
        worker_id: &WorkerId,
        labels: LabelSet,
        t: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) {
        self.state.mark_idle(worker_id, labels, t, events);
    }

    /// Records that a task was waiting at `t`.
    ///
    /// A task already waiting is only confirmed; its recorded details are not
    /// overwritten. A task believed to be running is re-enqueued if the
    /// notification is newer than everything known about the run.
    pub fn notify_task_waiting(
        &mut self,
        request: TaskRequest,
        t: DateTime<Utc>,
        tags: &[String],
        events: &mut dyn EventSink,
    ) {
        self.state.add_request(request, t, tags, events);
    }

    /// Records that a task was running on a worker at `t`.
    ///
    /// A waiting task moves onto the worker. A task believed to run elsewhere
    /// moves, keeping its accrued cost. Whatever the worker was believed to be
    /// running instead is evicted and returned; pass it to
    /// [`Scheduler::requeue`] to keep it schedulable. Notifications older
    /// than the known state are ignored.
    #[instrument(skip(self, events))]
    pub fn notify_task_running(
        &mut self,
        request_id: &RequestId,
        worker_id: &WorkerId,
        t: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) -> Vec<Displaced> {
        let displaced = self
            .state
            .notify_task_running(request_id, worker_id, t, events);
        if !displaced.is_empty() {
            debug!(count = displaced.len(), "running notification displaced tasks");
        }
        displaced
    }

    /// Records that a task no longer exists (finished, cancelled or expired)
    /// as of `t`. Unknown tasks are ignored.
    pub fn notify_task_absent(
        &mut self,
        request_id: &RequestId,
        t: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) {
        self.state.notify_task_absent(request_id, t, events);
    }

    /// Returns a displaced task to the waiting queue, unless it has been
    /// seen again since it was displaced.
    pub fn requeue(&mut self, displaced: Displaced, events: &mut dyn EventSink) {
        self.state.requeue(displaced, events);
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Runs one scheduling pass over all known idle workers and waiting
    /// requests, applying and returning the resulting assignments.
    pub fn run_once(&mut self, events: &mut dyn EventSink) -> Vec<Assignment> {
        SchedulerRun::new(&mut self.state, &self.config).run(events)
    }

    /// Marks the given workers idle at `now`, then runs a scheduling pass.
    ///
    /// Does not advance the clock; call [`Scheduler::update_time`] first.
    #[instrument(skip(self, idle_workers, events), fields(idle = idle_workers.len()))]
    pub fn assign_tasks(
        &mut self,
        idle_workers: &[IdleWorker],
        now: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) -> Vec<Assignment> {
        for worker in idle_workers {
            self.state
                .mark_idle(&worker.id, worker.labels.clone(), now, events);
        }
        let assignments = self.run_once(events);
        debug!(assigned = assignments.len(), "scheduling pass complete");
        assignments
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Looks up a waiting or running request.
    pub fn get_request(&self, id: &RequestId) -> Option<&Arc<TaskRequest>> {
        self.state.get_request(id)
    }

    /// True if `request_id` is believed to be running on `worker_id`.
    pub fn is_assigned(&self, request_id: &RequestId, worker_id: &WorkerId) -> bool {
        self.running_on(worker_id)
            .is_some_and(|run| run.request_id() == request_id)
    }

    pub fn is_queued(&self, request_id: &RequestId) -> bool {
        self.state.queued.contains_key(request_id)
    }

    /// The task believed to be running on a worker.
    pub fn running_on(&self, worker_id: &WorkerId) -> Option<&TaskRun> {
        self.state.workers.get(worker_id)?.running.as_ref()
    }

    pub fn worker(&self, id: &WorkerId) -> Option<&Worker> {
        self.state.workers.get(id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.state.workers.values()
    }

    pub fn queued_requests(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.state.queued.values()
    }

    pub fn queued_len(&self) -> usize {
        self.state.queued.len()
    }

    pub fn running_len(&self) -> usize {
        self.state.running.len()
    }
}
