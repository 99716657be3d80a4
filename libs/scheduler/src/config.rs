//! Scheduler and account configuration.

use std::collections::BTreeMap;

use qs_id::AccountId;
use serde::{Deserialize, Serialize};

use crate::{Priority, SchedulerError, NUM_PRIORITIES};

/// Default number of priority levels a waiting task must be above a running
/// one in order to preempt it.
pub const DEFAULT_PREEMPTION_MARGIN: usize = 1;

/// Quota policy of a single account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Quota earned per second, per priority bucket. Missing buckets earn
    /// nothing.
    pub charge_rate: Vec<f64>,

    /// How many seconds of charge a bucket can bank before saturating.
    pub max_charge_seconds: f64,

    /// Maximum number of concurrently running tasks per fanout group.
    /// Zero means unlimited.
    pub max_fanout: u32,

    /// Never run this account's tasks at free-bucket priority.
    pub disable_free_tasks: bool,
}

impl AccountConfig {
    /// Charge rate at `priority`, zero for buckets without one.
    pub fn charge_rate_at(&self, priority: Priority) -> f64 {
        self.charge_rate.get(priority).copied().unwrap_or(0.0)
    }

    pub(crate) fn validate(&self, account: &AccountId) -> Result<(), SchedulerError> {
        let invalid = |message: String| SchedulerError::InvalidAccountConfig {
            account: account.clone(),
            message,
        };
        if self.charge_rate.len() > NUM_PRIORITIES {
            return Err(invalid(format!(
                "{} charge rates given, at most {} priorities exist",
                self.charge_rate.len(),
                NUM_PRIORITIES
            )));
        }
        if let Some(rate) = self.charge_rate.iter().find(|r| !r.is_finite() || **r < 0.0) {
            return Err(invalid(format!("charge rate {rate} must be finite and non-negative")));
        }
        if !self.max_charge_seconds.is_finite() || self.max_charge_seconds < 0.0 {
            return Err(invalid(format!(
                "max_charge_seconds {} must be finite and non-negative",
                self.max_charge_seconds
            )));
        }
        Ok(())
    }
}

/// Pool-wide scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account policies, keyed by account.
    pub account_configs: BTreeMap<AccountId, AccountConfig>,

    /// Never preempt running tasks.
    pub disable_preemption: bool,

    /// A waiting task at priority `p` may preempt a running task at priority
    /// `q` only if `q >= p + preemption_margin`.
    pub preemption_margin: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_configs: BTreeMap::new(),
            disable_preemption: false,
            preemption_margin: DEFAULT_PREEMPTION_MARGIN,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.preemption_margin == 0 || self.preemption_margin > NUM_PRIORITIES {
            return Err(SchedulerError::InvalidConfig(format!(
                "preemption_margin must be between 1 and {NUM_PRIORITIES}, got {}",
                self.preemption_margin
            )));
        }
        for (account, config) in &self.account_configs {
            config.validate(account)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> AccountId {
        AccountId::new(id).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.preemption_margin, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_margin_rejected() {
        let config = Config {
            preemption_margin: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_account_config_validation() {
        let too_many = AccountConfig {
            charge_rate: vec![1.0; NUM_PRIORITIES + 1],
            ..Default::default()
        };
        assert!(too_many.validate(&account("a")).is_err());

        let negative = AccountConfig {
            charge_rate: vec![-1.0],
            ..Default::default()
        };
        assert!(negative.validate(&account("a")).is_err());

        let ok = AccountConfig {
            charge_rate: vec![1.0, 0.5],
            max_charge_seconds: 60.0,
            max_fanout: 3,
            disable_free_tasks: true,
        };
        assert!(ok.validate(&account("a")).is_ok());
        assert_eq!(ok.charge_rate_at(1), 0.5);
        assert_eq!(ok.charge_rate_at(2), 0.0);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str(r#"{"disable_preemption": true}"#).unwrap();
        assert!(config.disable_preemption);
        assert_eq!(config.preemption_margin, DEFAULT_PREEMPTION_MARGIN);
        assert!(config.account_configs.is_empty());
    }
}
