//! Scheduler state and the bookkeeping that keeps it consistent with
//! executor notifications.
//!
//! Every queued request, run and worker remembers the latest time the
//! executor confirmed it. A notification older than what we already know is
//! ignored, which makes delivery order between different tasks irrelevant.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use qs_events::{CompletionReason, EventFields, EventSink, TaskEvent, TaskEventDetails};
use qs_id::{AccountId, RequestId, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::balance::next_balance;
use crate::{
    Assignment, AssignmentKind, Balance, Config, Displaced, LabelSet, Priority, QueuedRequest,
    SchedulerError, TaskRequest, TaskRun, Worker, FREE_BUCKET, NUM_PRIORITIES,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StateRepr")]
pub(crate) struct State {
    /// Requests waiting for a worker.
    pub(crate) queued: BTreeMap<RequestId, QueuedRequest>,

    /// Balances of configured accounts.
    pub(crate) balances: BTreeMap<AccountId, Balance>,

    pub(crate) workers: BTreeMap<WorkerId, Worker>,

    pub(crate) last_update_time: DateTime<Utc>,

    /// Inverse of `workers` for running tasks. `workers` is authoritative.
    #[serde(skip)]
    pub(crate) running: BTreeMap<RequestId, WorkerId>,
}

#[derive(Deserialize)]
struct StateRepr {
    #[serde(default)]
    queued: BTreeMap<RequestId, QueuedRequest>,
    #[serde(default)]
    balances: BTreeMap<AccountId, Balance>,
    #[serde(default)]
    workers: BTreeMap<WorkerId, Worker>,
    last_update_time: DateTime<Utc>,
}

impl From<StateRepr> for State {
    fn from(repr: StateRepr) -> Self {
        let running = repr
            .workers
            .values()
            .filter_map(|w| {
                w.running
                    .as_ref()
                    .map(|run| (run.request_id().clone(), w.id.clone()))
            })
            .collect();
        Self {
            queued: repr.queued,
            balances: repr.balances,
            workers: repr.workers,
            last_update_time: repr.last_update_time,
            running,
        }
    }
}

impl State {
    pub(crate) fn new(t: DateTime<Utc>) -> Self {
        Self {
            queued: BTreeMap::new(),
            balances: BTreeMap::new(),
            workers: BTreeMap::new(),
            last_update_time: t,
            running: BTreeMap::new(),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Looks up a request among queued and running tasks.
    pub(crate) fn get_request(&self, id: &RequestId) -> Option<&Arc<TaskRequest>> {
        if let Some(run) = self.run_of(id) {
            return Some(&run.request);
        }
        self.queued.get(id).map(|q| &q.request)
    }

    fn run_of(&self, id: &RequestId) -> Option<&TaskRun> {
        let worker_id = self.running.get(id)?;
        self.workers.get(worker_id)?.running.as_ref()
    }

    fn request_confirmed_time(&self, id: &RequestId) -> Option<DateTime<Utc>> {
        if let Some(run) = self.run_of(id) {
            return Some(run.confirmed_time);
        }
        self.queued.get(id).map(|q| q.confirmed_time)
    }

    /// Priority a new run of a task from `account` starts at.
    pub(crate) fn priority_for(&self, account: Option<&AccountId>) -> Priority {
        account
            .and_then(|a| self.balances.get(a))
            .map(Balance::best_priority)
            .unwrap_or(FREE_BUCKET)
    }

    pub(crate) fn event(
        &self,
        request: &TaskRequest,
        worker: Option<&WorkerId>,
        t: DateTime<Utc>,
        details: TaskEventDetails,
    ) -> TaskEvent {
        TaskEvent {
            time: t,
            task_id: request.id.clone(),
            account_id: request.account_id.clone(),
            account_balance: request
                .account_id
                .as_ref()
                .and_then(|a| self.balances.get(a))
                .map(Balance::to_vec),
            worker_id: worker.cloned(),
            base_labels: request.base_labels.to_vec(),
            provisionable_labels: request.provisionable_labels.to_vec(),
            fields: EventFields::default(),
            details,
        }
    }

    fn completed(
        &self,
        request: &TaskRequest,
        worker: Option<&WorkerId>,
        t: DateTime<Utc>,
        reason: CompletionReason,
    ) -> TaskEvent {
        self.event(
            request,
            worker,
            t,
            TaskEventDetails::Completed {
                reason,
                other_worker: None,
                other_task: None,
            },
        )
    }

    // =========================================================================
    // Time and balances
    // =========================================================================

    /// Advances time, accruing cost on running tasks and recomputing the
    /// balance of every configured account.
    pub(crate) fn update_time(
        &mut self,
        t: DateTime<Utc>,
        config: &Config,
    ) -> Result<(), SchedulerError> {
        let previous = self.last_update_time;
        if t < previous {
            return Err(SchedulerError::UpdateOrder { previous, next: t });
        }
        let elapsed_secs = (t - previous).num_milliseconds() as f64 / 1000.0;

        let mut running_per_account: BTreeMap<AccountId, [usize; NUM_PRIORITIES]> =
            BTreeMap::new();
        for worker in self.workers.values_mut() {
            let Some(run) = worker.running.as_mut() else {
                continue;
            };
            if run.priority >= FREE_BUCKET {
                continue;
            }
            run.cost[run.priority] += elapsed_secs;
            if let Some(account) = &run.request.account_id {
                running_per_account.entry(account.clone()).or_default()[run.priority] += 1;
            }
        }

        let no_running = [0; NUM_PRIORITIES];
        self.balances = config
            .account_configs
            .iter()
            .map(|(account, account_config)| {
                let before = self.balances.get(account).copied().unwrap_or_default();
                let running = running_per_account.get(account).unwrap_or(&no_running);
                let after = next_balance(&before, account_config, elapsed_secs, running);
                (account.clone(), after)
            })
            .collect();

        self.last_update_time = t;
        Ok(())
    }

    fn refund(&mut self, account: Option<&AccountId>, cost: &Balance) {
        if let Some(balance) = account.and_then(|a| self.balances.get_mut(a)) {
            *balance += *cost;
        }
    }

    fn charge(&mut self, account: Option<&AccountId>, cost: &Balance) {
        if let Some(balance) = account.and_then(|a| self.balances.get_mut(a)) {
            *balance -= *cost;
        }
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Enqueues a request, or confirms that a known request is still waiting.
    pub(crate) fn add_request(
        &mut self,
        request: TaskRequest,
        t: DateTime<Utc>,
        tags: &[String],
        events: &mut dyn EventSink,
    ) {
        if let Some(worker_id) = self.running.get(&request.id).cloned() {
            let newer = self.workers.get(&worker_id).is_some_and(|w| {
                let run_confirmed = w
                    .running
                    .as_ref()
                    .map_or(w.confirmed_time, |r| r.confirmed_time);
                t >= run_confirmed && t >= w.confirmed_time
            });
            if newer {
                // The task went back to waiting; whatever the worker is doing
                // now is unknown until it reports again.
                self.delete_worker(&worker_id);
                self.add_new_request(Arc::new(request), t, tags, events);
            }
            return;
        }

        if let Some(queued) = self.queued.get_mut(&request.id) {
            if t > queued.confirmed_time {
                queued.confirmed_time = t;
            }
            return;
        }

        self.add_new_request(Arc::new(request), t, tags, events);
    }

    fn add_new_request(
        &mut self,
        request: Arc<TaskRequest>,
        t: DateTime<Utc>,
        tags: &[String],
        events: &mut dyn EventSink,
    ) {
        events.add_event(self.event(
            &request,
            None,
            t,
            TaskEventDetails::Enqueued {
                tags: tags.to_vec(),
            },
        ));
        self.queued.insert(
            request.id.clone(),
            QueuedRequest {
                request,
                confirmed_time: t,
            },
        );
    }

    /// Puts a displaced task back in the queue, unless it reappeared since.
    pub(crate) fn requeue(&mut self, displaced: Displaced, events: &mut dyn EventSink) {
        if self.get_request(&displaced.request.id).is_some() {
            return;
        }
        let t = displaced.confirmed_time;
        self.add_new_request(displaced.request, t, &[], events);
    }

    pub(crate) fn mark_idle(
        &mut self,
        worker_id: &WorkerId,
        labels: LabelSet,
        t: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) {
        let modified = self.last_update_time;
        let Some(worker) = self.workers.get_mut(worker_id) else {
            self.workers.insert(
                worker_id.clone(),
                Worker {
                    id: worker_id.clone(),
                    labels,
                    running: None,
                    confirmed_time: t,
                    modified_time: modified,
                },
            );
            return;
        };

        if t < worker.latest_confirmed_time() {
            if t >= worker.confirmed_time {
                // Idle report from before a task we matched to this worker
                // was confirmed; a later report will settle it.
                debug!(
                    worker_id = %worker_id,
                    time = %t,
                    "ignoring idle report older than running task"
                );
            }
            return;
        }

        if worker.labels != labels {
            worker.labels = labels;
            worker.modified_time = modified;
        }
        worker.confirm(t);

        let Some(run) = worker.running.take() else {
            return;
        };
        worker.modified_time = modified;
        self.running.remove(run.request_id());
        let event = self.completed(&run.request, Some(worker_id), t, CompletionReason::BotIdle);
        events.add_event(event);
    }

    /// Records that `request_id` is running on `worker_id`.
    ///
    /// Returns the tasks evicted from workers whose state contradicted the
    /// notification.
    pub(crate) fn notify_task_running(
        &mut self,
        request_id: &RequestId,
        worker_id: &WorkerId,
        t: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) -> Vec<Displaced> {
        let Some(request_confirmed) = self.request_confirmed_time(request_id) else {
            return self.delete_inconsistent_worker_if_older(worker_id, t, request_id, events);
        };
        if t < request_confirmed {
            debug!(request_id = %request_id, time = %t, "ignoring stale running notification");
            return Vec::new();
        }

        let alleged = self.running.get(request_id).cloned();
        if alleged.as_ref() == Some(worker_id) {
            if let Some(worker) = self.workers.get_mut(worker_id) {
                worker.confirm(t);
                if let Some(run) = worker.running.as_mut() {
                    if t > run.confirmed_time {
                        run.confirmed_time = t;
                    }
                }
            }
            return Vec::new();
        }

        if self
            .workers
            .get(worker_id)
            .is_some_and(|w| t < w.latest_confirmed_time())
        {
            debug!(
                worker_id = %worker_id,
                time = %t,
                "ignoring running notification older than worker state"
            );
            return Vec::new();
        }

        let run = match &alleged {
            Some(other_worker) => {
                let run = self
                    .delete_worker(other_worker)
                    .and_then(|w| w.running);
                if let Some(run) = &run {
                    let event = self.event(
                        &run.request,
                        Some(other_worker),
                        t,
                        TaskEventDetails::Completed {
                            reason: CompletionReason::InconsistentBotForTask,
                            other_worker: Some(worker_id.clone()),
                            other_task: None,
                        },
                    );
                    events.add_event(event);
                }
                run
            }
            None => self.queued.remove(request_id).map(|queued| TaskRun {
                priority: self.priority_for(queued.request.account_id.as_ref()),
                request: queued.request,
                cost: Balance::ZERO,
                confirmed_time: t,
            }),
        };
        let Some(mut run) = run else {
            return Vec::new();
        };
        run.confirmed_time = t;

        let modified = self.last_update_time;
        let worker = self
            .workers
            .entry(worker_id.clone())
            .or_insert_with(|| Worker {
                id: worker_id.clone(),
                labels: LabelSet::new(),
                running: None,
                confirmed_time: t,
                modified_time: modified,
            });
        worker.confirm(t);
        let evicted = worker.running.replace(run);
        self.running.insert(request_id.clone(), worker_id.clone());

        let Some(evicted) = evicted else {
            return Vec::new();
        };
        self.running.remove(evicted.request_id());
        let event = self.event(
            &evicted.request,
            Some(worker_id),
            t,
            TaskEventDetails::Completed {
                reason: CompletionReason::InconsistentTaskForBot,
                other_worker: None,
                other_task: Some(request_id.clone()),
            },
        );
        events.add_event(event);
        vec![Displaced {
            request: evicted.request,
            worker_id: worker_id.clone(),
            confirmed_time: evicted.confirmed_time,
        }]
    }

    /// Deletes a worker whose state is older than `t`, because the executor
    /// reported it running `cause`, which we do not know about.
    fn delete_inconsistent_worker_if_older(
        &mut self,
        worker_id: &WorkerId,
        t: DateTime<Utc>,
        cause: &RequestId,
        events: &mut dyn EventSink,
    ) -> Vec<Displaced> {
        let older = self
            .workers
            .get(worker_id)
            .is_some_and(|w| t >= w.latest_confirmed_time());
        if !older {
            return Vec::new();
        }
        let Some(run) = self.delete_worker(worker_id).and_then(|w| w.running) else {
            return Vec::new();
        };
        let event = self.event(
            &run.request,
            Some(worker_id),
            t,
            TaskEventDetails::Completed {
                reason: CompletionReason::InconsistentTaskForBot,
                other_worker: None,
                other_task: Some(cause.clone()),
            },
        );
        events.add_event(event);
        vec![Displaced {
            request: run.request,
            worker_id: worker_id.clone(),
            confirmed_time: run.confirmed_time,
        }]
    }

    pub(crate) fn notify_task_absent(
        &mut self,
        request_id: &RequestId,
        t: DateTime<Utc>,
        events: &mut dyn EventSink,
    ) {
        if let Some(worker_id) = self.running.get(request_id).cloned() {
            let Some(worker) = self.workers.get(&worker_id) else {
                return;
            };
            let Some(run) = worker.running.as_ref() else {
                return;
            };
            if t >= worker.confirmed_time && t >= run.confirmed_time {
                let event = self.completed(
                    &run.request,
                    Some(&worker_id),
                    t,
                    CompletionReason::RunningTaskAbsent,
                );
                events.add_event(event);
                self.delete_worker(&worker_id);
            }
            return;
        }

        let Some(queued) = self.queued.get(request_id) else {
            return;
        };
        if t >= queued.confirmed_time {
            let event = self.completed(&queued.request, None, t, CompletionReason::IdleTaskAbsent);
            events.add_event(event);
            self.queued.remove(request_id);
        }
    }

    // =========================================================================
    // Assignments
    // =========================================================================

    /// Applies a scheduler decision. Panics if the decision does not fit the
    /// current state.
    pub(crate) fn apply_assignment(&mut self, assignment: &Assignment) {
        self.validate_assignment(assignment);

        let mut cost = Balance::ZERO;
        if assignment.kind == AssignmentKind::PreemptWorker {
            let preempted = self
                .workers
                .get_mut(&assignment.worker_id)
                .and_then(|w| w.running.take());
            if let Some(preempted) = preempted {
                cost = preempted.cost;
                self.running.remove(preempted.request_id());
                self.refund(preempted.request.account_id.as_ref(), &cost);
                let preempting_account = self
                    .queued
                    .get(&assignment.request_id)
                    .and_then(|q| q.request.account_id.clone());
                self.charge(preempting_account.as_ref(), &cost);
            }
        }

        self.start_running(
            &assignment.request_id,
            &assignment.worker_id,
            assignment.priority,
            cost,
        );
    }

    fn validate_assignment(&self, assignment: &Assignment) {
        assert!(
            self.queued.contains_key(&assignment.request_id),
            "no queued request with id {}",
            assignment.request_id
        );
        let Some(worker) = self.workers.get(&assignment.worker_id) else {
            panic!("no worker with id {}", assignment.worker_id);
        };
        match (assignment.kind, &worker.running) {
            (AssignmentKind::IdleWorker, None) => {}
            (AssignmentKind::IdleWorker, Some(run)) => panic!(
                "worker {} is not idle, it is running task {}",
                assignment.worker_id,
                run.request_id()
            ),
            (AssignmentKind::PreemptWorker, None) => panic!(
                "worker {} is idle, expected it to be running {:?}",
                assignment.worker_id, assignment.task_to_abort
            ),
            (AssignmentKind::PreemptWorker, Some(run)) => assert!(
                assignment.task_to_abort.as_ref() == Some(run.request_id()),
                "worker {} is running task {}, expected {:?}",
                assignment.worker_id,
                run.request_id(),
                assignment.task_to_abort
            ),
        }
        assert!(
            assignment.priority <= FREE_BUCKET,
            "priority {} out of range",
            assignment.priority
        );
    }

    fn start_running(
        &mut self,
        request_id: &RequestId,
        worker_id: &WorkerId,
        priority: Priority,
        cost: Balance,
    ) {
        let Some(queued) = self.queued.remove(request_id) else {
            return;
        };
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.running = Some(TaskRun {
                request: queued.request,
                cost,
                priority,
                confirmed_time: queued.confirmed_time,
            });
            self.running.insert(request_id.clone(), worker_id.clone());
        }
    }

    /// Removes a worker, and with it any task it was running.
    fn delete_worker(&mut self, worker_id: &WorkerId) -> Option<Worker> {
        let worker = self.workers.remove(worker_id)?;
        if let Some(run) = &worker.running {
            self.running.remove(run.request_id());
        }
        Some(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qs_events::{BufferedEventSink, EventKind, NullEventSink};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn rid(id: &str) -> RequestId {
        RequestId::new(id).unwrap()
    }

    fn wid(id: &str) -> WorkerId {
        WorkerId::new(id).unwrap()
    }

    fn request(id: &str, tm: DateTime<Utc>) -> TaskRequest {
        TaskRequest::new(rid(id), None, tm, LabelSet::new(), LabelSet::new())
    }

    fn run_on(state: &mut State, request_id: &str, worker_id: &str, tm: DateTime<Utc>) {
        state.add_request(request(request_id, tm), tm, &[], &mut NullEventSink);
        state.mark_idle(&wid(worker_id), LabelSet::new(), tm, &mut NullEventSink);
        state.apply_assignment(&Assignment {
            kind: AssignmentKind::IdleWorker,
            worker_id: wid(worker_id),
            request_id: rid(request_id),
            task_to_abort: None,
            priority: 0,
            time: tm,
            provision_required: false,
        });
    }

    #[test]
    fn test_add_request_enqueues_once() {
        let mut state = State::new(t(0));
        let mut sink = BufferedEventSink::new();
        state.add_request(request("r1", t(0)), t(0), &["a:b".into()], &mut sink);
        state.add_request(request("r1", t(0)), t(1), &[], &mut sink);

        assert_eq!(state.queued.len(), 1);
        assert_eq!(state.queued[&rid("r1")].confirmed_time, t(1));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].kind(), EventKind::Enqueued);
    }

    #[test]
    fn test_mark_idle_completes_running_task() {
        let mut state = State::new(t(0));
        run_on(&mut state, "r1", "w1", t(0));

        let mut sink = BufferedEventSink::new();
        state.mark_idle(&wid("w1"), LabelSet::new(), t(1), &mut sink);

        assert!(state.workers[&wid("w1")].is_idle());
        assert!(state.get_request(&rid("r1")).is_none());
        assert!(matches!(
            sink.events()[0].details,
            TaskEventDetails::Completed {
                reason: CompletionReason::BotIdle,
                ..
            }
        ));
    }

    #[test]
    fn test_mark_idle_ignores_stale_report() {
        let mut state = State::new(t(0));
        run_on(&mut state, "r1", "w1", t(5));

        state.mark_idle(&wid("w1"), LabelSet::new(), t(2), &mut NullEventSink);
        assert!(!state.workers[&wid("w1")].is_idle());
    }

    #[test]
    fn test_running_notification_moves_queued_request() {
        let mut state = State::new(t(0));
        state.add_request(request("r1", t(0)), t(0), &[], &mut NullEventSink);

        let displaced =
            state.notify_task_running(&rid("r1"), &wid("w1"), t(1), &mut NullEventSink);

        assert!(displaced.is_empty());
        assert!(state.queued.is_empty());
        assert_eq!(state.running[&rid("r1")], wid("w1"));
        assert_eq!(state.workers[&wid("w1")].running.as_ref().unwrap().priority, FREE_BUCKET);
    }

    #[test]
    fn test_running_notification_displaces_other_task() {
        let mut state = State::new(t(0));
        run_on(&mut state, "r1", "w1", t(0));
        state.add_request(request("r2", t(0)), t(0), &[], &mut NullEventSink);

        let mut sink = BufferedEventSink::new();
        let displaced = state.notify_task_running(&rid("r2"), &wid("w1"), t(1), &mut sink);

        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].request.id, rid("r1"));
        assert!(state.is_consistent());
        assert!(state.get_request(&rid("r1")).is_none());
        assert_eq!(sink.events()[0].kind(), EventKind::Completed);

        state.requeue(displaced.into_iter().next().unwrap(), &mut sink);
        assert!(state.queued.contains_key(&rid("r1")));
    }

    #[test]
    fn test_running_notification_for_unknown_request_evicts_worker() {
        let mut state = State::new(t(0));
        run_on(&mut state, "r1", "w1", t(0));

        let displaced =
            state.notify_task_running(&rid("ghost"), &wid("w1"), t(1), &mut NullEventSink);

        assert_eq!(displaced.len(), 1);
        assert!(!state.workers.contains_key(&wid("w1")));
        assert!(state.running.is_empty());
    }

    #[test]
    fn test_absent_notification_respects_confirmed_time() {
        let mut state = State::new(t(0));
        state.add_request(request("r1", t(0)), t(5), &[], &mut NullEventSink);

        state.notify_task_absent(&rid("r1"), t(4), &mut NullEventSink);
        assert!(state.queued.contains_key(&rid("r1")));

        state.notify_task_absent(&rid("r1"), t(5), &mut NullEventSink);
        assert!(state.queued.is_empty());
    }

    #[test]
    fn test_update_time_rejects_backwards() {
        let mut state = State::new(t(100));
        let err = state.update_time(t(0), &Config::default()).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::UpdateOrder {
                previous: t(100),
                next: t(0)
            }
        );
        assert_eq!(state.last_update_time, t(100));
        assert!(state.update_time(t(101), &Config::default()).is_ok());
    }

    #[test]
    fn test_serde_rebuilds_running_index() {
        let mut state = State::new(t(0));
        run_on(&mut state, "r1", "w1", t(0));

        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("running").is_none());
        let decoded: State = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.running[&rid("r1")], wid("w1"));
        assert_eq!(decoded, state);
    }

    #[test]
    #[should_panic(expected = "no queued request")]
    fn test_apply_assignment_panics_on_unknown_request() {
        let mut state = State::new(t(0));
        state.mark_idle(&wid("w1"), LabelSet::new(), t(0), &mut NullEventSink);
        state.apply_assignment(&Assignment {
            kind: AssignmentKind::IdleWorker,
            worker_id: wid("w1"),
            request_id: rid("missing"),
            task_to_abort: None,
            priority: 0,
            time: t(0),
            provision_required: false,
        });
    }

    impl State {
        fn is_consistent(&self) -> bool {
            let rebuilt: BTreeMap<_, _> = self
                .workers
                .values()
                .filter_map(|w| w.running.as_ref().map(|r| (r.request_id().clone(), w.id.clone())))
                .collect();
            rebuilt == self.running
                && self.queued.keys().all(|id| !self.running.contains_key(id))
        }
    }
}
