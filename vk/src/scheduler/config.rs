//! Scheduler configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::packer::CostRule;
use crate::api::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_TRANSIENT_CODES, RetryPolicy};

/// Insufficient rights / access denied on the unprivileged credential
pub const DEFAULT_AUTH_ERROR_CODES: [i64; 5] = [15, 30, 200, 201, 203];

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Service-lane worker count
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Pause after every private-lane dispatch, in milliseconds
    #[serde(rename = "cooldown-ms", default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Attempts per call, including the first
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before retrying a transient backend error, in milliseconds
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Backend codes that move a service-lane call to the private lane
    #[serde(rename = "auth-error-codes", default = "default_auth_error_codes")]
    pub auth_error_codes: Vec<i64>,

    /// Backend codes retried after `retry-delay-ms`
    #[serde(rename = "transient-error-codes", default = "default_transient_error_codes")]
    pub transient_error_codes: Vec<i64>,

    /// Batch packing
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_threads() -> usize {
    10
}

fn default_cooldown_ms() -> u64 {
    340
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_auth_error_codes() -> Vec<i64> {
    DEFAULT_AUTH_ERROR_CODES.to_vec()
}

fn default_transient_error_codes() -> Vec<i64> {
    DEFAULT_TRANSIENT_CODES.to_vec()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            cooldown_ms: default_cooldown_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            auth_error_codes: default_auth_error_codes(),
            transient_error_codes: default_transient_error_codes(),
            batch: BatchConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Get the private-lane cool-down as a Duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Retry policy handed to every worker
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_millis(self.retry_delay_ms),
            transient_codes: self.transient_error_codes.clone(),
        }
    }
}

/// Weight budget and per-method cost table for `execute` batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Total estimated cost one batch may carry
    #[serde(default = "default_budget")]
    pub budget: u32,

    /// Cost of calls that must never be batched; must exceed `budget`
    #[serde(rename = "unbatchable-cost", default = "default_unbatchable_cost")]
    pub unbatchable_cost: u32,

    /// Cost rules by method name; methods not listed are never batched
    #[serde(default = "default_costs")]
    pub costs: BTreeMap<String, CostRule>,
}

fn default_budget() -> u32 {
    100
}

fn default_unbatchable_cost() -> u32 {
    101
}

fn default_costs() -> BTreeMap<String, CostRule> {
    BTreeMap::from([
        (
            "friends.get".to_string(),
            CostRule::Fixed {
                cost: 14,
                unless: vec!["fields".to_string()],
            },
        ),
        (
            "users.get".to_string(),
            CostRule::PerItem {
                base: 40,
                per_item: 8,
                param: "fields".to_string(),
            },
        ),
    ])
}

impl BatchConfig {
    /// Unbatchable calls must never fit a batch, so their cost has to exceed the budget
    pub fn validate(&self) -> Result<(), String> {
        if self.unbatchable_cost <= self.budget {
            return Err(format!(
                "batch unbatchable-cost ({}) must exceed budget ({})",
                self.unbatchable_cost, self.budget
            ));
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            unbatchable_cost: default_unbatchable_cost(),
            costs: default_costs(),
        }
    }
}
