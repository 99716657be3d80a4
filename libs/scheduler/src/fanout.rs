//! Per-account fanout limits.

use std::collections::BTreeMap;

use qs_id::AccountId;

use crate::{Config, LabelSet, TaskRequest};

type FanoutGroup = (AccountId, LabelSet);

/// Tracks how many more tasks each fanout group may start before it is
/// throttled.
///
/// A group is an account together with one set of provisionable labels, so
/// a limit of N allows N concurrent tasks per distinct image, not N in total.
/// Tasks without an account are never throttled.
#[derive(Debug, Clone)]
pub(crate) struct FanoutCounter {
    limits: BTreeMap<AccountId, u32>,
    remaining: BTreeMap<FanoutGroup, i64>,
}

impl FanoutCounter {
    pub(crate) fn new(config: &Config) -> Self {
        let limits = config
            .account_configs
            .iter()
            .filter(|(_, c)| c.max_fanout > 0)
            .map(|(id, c)| (id.clone(), c.max_fanout))
            .collect();
        Self {
            limits,
            remaining: BTreeMap::new(),
        }
    }

    /// Remaining starts for the request's group, or `None` if unlimited.
    pub(crate) fn remaining(&self, request: &TaskRequest) -> Option<i64> {
        let group = request.fanout_group()?;
        let limit = *self.limits.get(&group.0)?;
        Some(
            self.remaining
                .get(&group)
                .copied()
                .unwrap_or_else(|| i64::from(limit)),
        )
    }

    pub(crate) fn is_throttled(&self, request: &TaskRequest) -> bool {
        self.remaining(request).is_some_and(|r| r <= 0)
    }

    /// Counts one more running task against the request's group.
    pub(crate) fn count(&mut self, request: &TaskRequest) {
        let Some(remaining) = self.remaining(request) else {
            return;
        };
        if let Some(group) = request.fanout_group() {
            self.remaining.insert(group, remaining - 1);
        }
    }
}
