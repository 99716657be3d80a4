//! A single scheduling pass.
//!
//! The pass walks priorities from highest (0) to lowest. At each level it
//! matches waiting requests to idle workers, first where no provisioning is
//! needed and then anywhere the base labels fit, adjusts the priority of
//! running tasks to what their accounts can sustain, and preempts cheaper
//! lower-priority work. Requests throttled by a fanout limit fall through to
//! the free bucket, which is matched last.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use qs_events::{EventSink, TaskEventDetails};
use qs_id::{AccountId, WorkerId};

use crate::fanout::FanoutCounter;
use crate::state::State;
use crate::{
    Assignment, AssignmentKind, Config, LabelSet, Priority, TaskRequest, FREE_BUCKET,
    NUM_PRIORITIES,
};

/// Running tasks are demoted out of a level when their account's balance
/// there drops below this.
pub const DEMOTE_THRESHOLD: f64 = -5.0;

/// Running tasks are promoted into a level when their account's balance
/// there rises above this.
pub const PROMOTE_THRESHOLD: f64 = 5.0;

struct Matchable {
    request: Arc<TaskRequest>,
    already_matched: bool,
    /// The account opted out of free-bucket scheduling.
    disable_if_free: bool,
}

#[derive(Debug, Clone, Copy)]
struct Match {
    item: usize,
    /// Number of base labels; more specific requests win ties for a worker.
    quality: usize,
    provision_match: bool,
}

pub(crate) struct SchedulerRun<'a> {
    state: &'a mut State,
    config: &'a Config,
    idle_workers: BTreeSet<WorkerId>,
    items: Vec<Matchable>,
    /// Indices into `items`, per priority, in FIFO order.
    per_priority: [Vec<usize>; NUM_PRIORITIES + 1],
    fanout: FanoutCounter,
}

impl<'a> SchedulerRun<'a> {
    pub(crate) fn new(state: &'a mut State, config: &'a Config) -> Self {
        let mut fanout = FanoutCounter::new(config);
        let mut idle_workers = BTreeSet::new();
        for worker in state.workers.values() {
            match &worker.running {
                None => {
                    idle_workers.insert(worker.id.clone());
                }
                Some(run) => fanout.count(&run.request),
            }
        }

        let mut queued: Vec<&Arc<TaskRequest>> =
            state.queued.values().map(|q| &q.request).collect();
        queued.sort_by(|a, b| {
            a.enqueue_time
                .cmp(&b.enqueue_time)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut items = Vec::with_capacity(queued.len());
        let mut per_priority: [Vec<usize>; NUM_PRIORITIES + 1] = Default::default();
        for request in queued {
            let disable_if_free = request
                .account_id
                .as_ref()
                .and_then(|a| config.account_configs.get(a))
                .is_some_and(|c| c.disable_free_tasks);

            let mut priority = state.priority_for(request.account_id.as_ref());
            if priority < FREE_BUCKET && fanout.is_throttled(request) {
                priority = FREE_BUCKET;
            }
            if priority == FREE_BUCKET && disable_if_free {
                continue;
            }

            per_priority[priority].push(items.len());
            items.push(Matchable {
                request: Arc::clone(request),
                already_matched: false,
                disable_if_free,
            });
        }

        Self {
            state,
            config,
            idle_workers,
            items,
            per_priority,
            fanout,
        }
    }

    pub(crate) fn run(mut self, events: &mut dyn EventSink) -> Vec<Assignment> {
        let mut output = Vec::new();
        for priority in 0..NUM_PRIORITIES {
            let matches = self.compute_idle_worker_matches(priority);
            output.extend(self.assign_to_idle_workers(priority, &matches, true, events));
            output.extend(self.assign_to_idle_workers(priority, &matches, false, events));
            self.reprioritize_running_tasks(priority, events);
            if !self.config.disable_preemption {
                output.extend(self.preempt_running_tasks(priority, events));
            }
            self.move_throttled_requests(priority);
        }

        let matches = self.compute_idle_worker_matches(FREE_BUCKET);
        output.extend(self.assign_to_idle_workers(FREE_BUCKET, &matches, true, events));
        output.extend(self.assign_to_idle_workers(FREE_BUCKET, &matches, false, events));
        output
    }

    // =========================================================================
    // Matching
    // =========================================================================

    fn compute_match_list(&self, labels: &LabelSet, priority: Priority) -> Vec<Match> {
        let mut matches: Vec<Match> = self.per_priority[priority]
            .iter()
            .filter_map(|&item| {
                let request = &self.items[item].request;
                labels.contains_all(&request.base_labels).then(|| Match {
                    item,
                    quality: request.base_labels.len(),
                    provision_match: labels.contains_all(&request.provisionable_labels),
                })
            })
            .collect();
        matches.sort_by(|a, b| b.quality.cmp(&a.quality));
        matches
    }

    fn compute_idle_worker_matches(&self, priority: Priority) -> BTreeMap<WorkerId, Vec<Match>> {
        self.idle_workers
            .iter()
            .filter_map(|id| {
                let worker = self.state.workers.get(id)?;
                Some((id.clone(), self.compute_match_list(&worker.labels, priority)))
            })
            .collect()
    }

    fn is_throttled(&self, item: usize) -> bool {
        self.fanout.is_throttled(&self.items[item].request)
    }

    fn should_skip(&self, item: usize, priority: Priority) -> bool {
        if priority != FREE_BUCKET {
            return self.is_throttled(item);
        }
        self.items[item].disable_if_free
    }

    fn assign_to_idle_workers(
        &mut self,
        priority: Priority,
        matches_per_worker: &BTreeMap<WorkerId, Vec<Match>>,
        require_provision_match: bool,
        events: &mut dyn EventSink,
    ) -> Vec<Assignment> {
        let mut output = Vec::new();
        let idle: Vec<WorkerId> = self.idle_workers.iter().cloned().collect();
        for worker_id in idle {
            let Some(matches) = matches_per_worker.get(&worker_id) else {
                continue;
            };
            let chosen = matches.iter().find(|m| {
                !self.items[m.item].already_matched
                    && !self.should_skip(m.item, priority)
                    && (!require_provision_match || m.provision_match)
            });
            let Some(chosen) = chosen.copied() else {
                continue;
            };

            let request = Arc::clone(&self.items[chosen.item].request);
            let assignment = Assignment {
                kind: AssignmentKind::IdleWorker,
                worker_id: worker_id.clone(),
                request_id: request.id.clone(),
                task_to_abort: None,
                priority,
                time: self.state.last_update_time,
                provision_required: !chosen.provision_match,
            };
            self.mark_matched(&worker_id, chosen.item);
            self.state.apply_assignment(&assignment);
            events.add_event(self.state.event(
                &request,
                Some(&worker_id),
                assignment.time,
                TaskEventDetails::Assigned {
                    preempting: false,
                    preemption_cost: Vec::new(),
                    preempted_task_id: None,
                    priority,
                    provision_required: assignment.provision_required,
                },
            ));
            output.push(assignment);
        }
        output
    }

    fn mark_matched(&mut self, worker_id: &WorkerId, item: usize) {
        self.idle_workers.remove(worker_id);
        self.fanout.count(&self.items[item].request);
        self.items[item].already_matched = true;
    }

    // =========================================================================
    // Reprioritization
    // =========================================================================

    /// Demotes running tasks out of `priority` (to `priority + 1`) for
    /// accounts that are overdrawn there and run more than they earn, and
    /// promotes tasks into `priority` for accounts with spare quota and
    /// charge rate.
    fn reprioritize_running_tasks(&mut self, priority: Priority, events: &mut dyn EventSink) {
        let mut by_account: BTreeMap<&AccountId, (Vec<WorkerId>, Vec<WorkerId>)> = BTreeMap::new();
        for worker in self.state.workers.values() {
            let Some(run) = &worker.running else { continue };
            let Some(account) = &run.request.account_id else {
                continue;
            };
            let (at, below) = by_account.entry(account).or_default();
            if run.priority == priority {
                at.push(worker.id.clone());
            } else if run.priority > priority {
                below.push(worker.id.clone());
            }
        }

        let mut changes: Vec<(WorkerId, Priority)> = Vec::new();
        for (account, balance) in &self.state.balances {
            let Some(account_config) = self.config.account_configs.get(account) else {
                continue;
            };
            let balance = balance[priority];
            let demote = balance < DEMOTE_THRESHOLD;
            let promote = balance > PROMOTE_THRESHOLD;
            if !demote && !promote {
                continue;
            }

            let none: &[WorkerId] = &[];
            let (at, below) = by_account
                .get(account)
                .map(|(at, below)| (at.as_slice(), below.as_slice()))
                .unwrap_or((none, none));
            let spare_rate = account_config.charge_rate_at(priority) - at.len() as f64;

            if demote && spare_rate < 0.0 {
                let mut candidates = at.to_vec();
                self.sort_by_cost(&mut candidates);
                let count = candidates.len().min((-spare_rate).ceil() as usize);
                changes.extend(candidates.into_iter().take(count).map(|w| (w, priority + 1)));
            } else if promote && spare_rate > 0.0 {
                let mut candidates = below.to_vec();
                self.sort_by_cost(&mut candidates);
                candidates.reverse();
                let count = candidates.len().min(spare_rate.ceil() as usize);
                changes.extend(candidates.into_iter().take(count).map(|w| (w, priority)));
            }
        }

        for (worker_id, new_priority) in changes {
            let Some(run) = self
                .state
                .workers
                .get_mut(&worker_id)
                .and_then(|w| w.running.as_mut())
            else {
                continue;
            };
            let old_priority = run.priority;
            run.priority = new_priority;
            let request = Arc::clone(&run.request);
            events.add_event(self.state.event(
                &request,
                Some(&worker_id),
                self.state.last_update_time,
                TaskEventDetails::Reprioritized {
                    old_priority,
                    new_priority,
                },
            ));
        }
    }

    /// Sorts running workers by ascending cost of their task. Ties keep
    /// worker order.
    fn sort_by_cost(&self, workers: &mut [WorkerId]) {
        let cost = |id: &WorkerId| {
            self.state
                .workers
                .get(id)
                .and_then(|w| w.running.as_ref())
                .map(|r| r.cost)
                .unwrap_or_default()
        };
        workers.sort_by(|a, b| cost(a).cmp_cost(&cost(b)));
    }

    // =========================================================================
    // Preemption
    // =========================================================================

    /// Replaces running tasks at least `preemption_margin` levels below
    /// `priority` with waiting requests at `priority`, cheapest victims first.
    fn preempt_running_tasks(
        &mut self,
        priority: Priority,
        events: &mut dyn EventSink,
    ) -> Vec<Assignment> {
        let mut output = Vec::new();

        // An account already running work below this level may not preempt
        // at it; otherwise an account that cannot afford to promote its own
        // tasks would thrash by preempting others.
        let mut banned: BTreeSet<Option<AccountId>> = BTreeSet::new();
        let mut candidates = Vec::new();
        for worker in self.state.workers.values() {
            let Some(run) = &worker.running else { continue };
            if run.priority > priority {
                banned.insert(run.request.account_id.clone());
            }
            if run.priority >= priority + self.config.preemption_margin {
                candidates.push(worker.id.clone());
            }
        }
        self.sort_by_cost(&mut candidates);

        for worker_id in candidates {
            let Some(worker) = self.state.workers.get(&worker_id) else {
                continue;
            };
            let Some(run) = &worker.running else { continue };
            let victim = Arc::clone(&run.request);
            let victim_priority = run.priority;
            let cost = run.cost;

            let matches = self.compute_match_list(&worker.labels, priority);
            let chosen = matches.into_iter().find(|m| {
                let item = &self.items[m.item];
                if item.already_matched || banned.contains(&item.request.account_id) {
                    return false;
                }
                if self.is_throttled(m.item) {
                    return false;
                }
                let balance = item
                    .request
                    .account_id
                    .as_ref()
                    .and_then(|a| self.state.balances.get(a))
                    .copied()
                    .unwrap_or_default();
                cost.less(&balance)
            });
            let Some(chosen) = chosen else { continue };

            let request = Arc::clone(&self.items[chosen.item].request);
            let assignment = Assignment {
                kind: AssignmentKind::PreemptWorker,
                worker_id: worker_id.clone(),
                request_id: request.id.clone(),
                task_to_abort: Some(victim.id.clone()),
                priority,
                time: self.state.last_update_time,
                provision_required: !chosen.provision_match,
            };
            self.mark_matched(&worker_id, chosen.item);
            events.add_event(self.state.event(
                &request,
                Some(&worker_id),
                assignment.time,
                TaskEventDetails::Assigned {
                    preempting: true,
                    preemption_cost: cost.to_vec(),
                    preempted_task_id: Some(victim.id.clone()),
                    priority,
                    provision_required: assignment.provision_required,
                },
            ));
            events.add_event(self.state.event(
                &victim,
                Some(&worker_id),
                assignment.time,
                TaskEventDetails::Preempted {
                    preempting_account_id: request.account_id.clone(),
                    preempting_priority: priority,
                    preempting_task_id: request.id.clone(),
                    priority: victim_priority,
                },
            ));
            self.state.apply_assignment(&assignment);
            output.push(assignment);
        }
        output
    }

    /// Gives requests throttled at `priority` a second chance in the free
    /// bucket pass.
    fn move_throttled_requests(&mut self, priority: Priority) {
        let throttled: Vec<usize> = self.per_priority[priority]
            .iter()
            .copied()
            .filter(|&item| {
                let m = &self.items[item];
                !m.already_matched && !m.disable_if_free && self.is_throttled(item)
            })
            .collect();
        self.per_priority[FREE_BUCKET].extend(throttled);
    }
}
