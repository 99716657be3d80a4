//! Per-priority quota vectors.
//!
//! A [`Balance`] is either an account's available quota per priority bucket,
//! or the cost a running task has accrued per bucket. It always has
//! `NUM_PRIORITIES + 1` slots; the last one is the free bucket, which is
//! never charged or recharged.

use std::ops::{Add, AddAssign, Index, IndexMut, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::{AccountConfig, Priority, FREE_BUCKET, NUM_PRIORITIES};

/// Quota vector indexed by priority bucket.
///
/// Indexing performs no clamping: callers must pass a priority in
/// `0..=NUM_PRIORITIES`, anything else panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance([f64; NUM_PRIORITIES + 1]);

impl Balance {
    /// A balance with every bucket at zero.
    pub const ZERO: Balance = Balance([0.0; NUM_PRIORITIES + 1]);

    /// Builds a balance from the leading values of `values`.
    ///
    /// Missing buckets are zero. Values past the charged buckets are ignored,
    /// so the free bucket always starts at zero.
    pub fn from_slice(values: &[f64]) -> Self {
        let mut balance = Self::ZERO;
        for (slot, value) in balance.0[..NUM_PRIORITIES].iter_mut().zip(values) {
            *slot = *value;
        }
        balance
    }

    pub fn get(&self, priority: Priority) -> f64 {
        self.0[priority]
    }

    pub fn set(&mut self, priority: Priority, value: f64) {
        self.0[priority] = value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    /// Lexicographic comparison, highest priority bucket first.
    ///
    /// A task cost is "less than" an account balance when the account has
    /// more quota at the first bucket where the two differ.
    pub fn less(&self, other: &Balance) -> bool {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            if a < b {
                return true;
            }
            if a > b {
                return false;
            }
        }
        false
    }

    /// Total ordering used to sort running tasks by cost.
    pub fn cmp_cost(&self, other: &Balance) -> std::cmp::Ordering {
        if self.less(other) {
            std::cmp::Ordering::Less
        } else if other.less(self) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    }

    /// Highest priority bucket with positive quota, or the free bucket.
    pub fn best_priority(&self) -> Priority {
        self.0[..NUM_PRIORITIES]
            .iter()
            .position(|v| *v > 0.0)
            .unwrap_or(FREE_BUCKET)
    }
}

impl Add for Balance {
    type Output = Balance;

    fn add(mut self, rhs: Balance) -> Balance {
        self += rhs;
        self
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Balance) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

impl Sub for Balance {
    type Output = Balance;

    fn sub(mut self, rhs: Balance) -> Balance {
        self -= rhs;
        self
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Balance) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a -= b;
        }
    }
}

impl Index<Priority> for Balance {
    type Output = f64;

    fn index(&self, priority: Priority) -> &f64 {
        &self.0[priority]
    }
}

impl IndexMut<Priority> for Balance {
    fn index_mut(&mut self, priority: Priority) -> &mut f64 {
        &mut self.0[priority]
    }
}

/// Computes an account's balance after `elapsed_secs` seconds.
///
/// Each charged bucket recharges at the account's charge rate, saturating at
/// `charge_rate * max_charge_seconds` (a bucket already above that cap is left
/// alone), and is then debited one unit per second for every task the account
/// ran at that priority.
pub fn next_balance(
    before: &Balance,
    config: &AccountConfig,
    elapsed_secs: f64,
    running: &[usize; NUM_PRIORITIES],
) -> Balance {
    let mut after = *before;
    for priority in 0..NUM_PRIORITIES {
        let rate = config.charge_rate_at(priority);
        let max_charge = rate * config.max_charge_seconds;
        let mut value = before[priority];
        if value < max_charge {
            value = (value + elapsed_secs * rate).min(max_charge);
        }
        value -= elapsed_secs * running[priority] as f64;
        after[priority] = value;
    }
    after
}
