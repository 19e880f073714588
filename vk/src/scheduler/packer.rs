//! Weight packer - folds pending private-lane calls into one `execute` call
//!
//! Every call gets an estimated cost against the backend's per-request
//! complexity budget. The packer takes calls from the head of the private
//! queue while they fit the budget and wraps them into a VKScript program
//! returning an array of their results, one element per call, in order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::BatchConfig;
use super::queue::RequestQueue;
use crate::domain::{Call, CallResult, Params};

/// Method name of the backend's script endpoint
pub const EXECUTE_METHOD: &str = "execute";

/// How to estimate the cost of one method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CostRule {
    /// Constant cost; unbatchable when any param in `unless` is present
    Fixed {
        cost: u32,
        #[serde(default)]
        unless: Vec<String>,
    },
    /// `base` plus `per_item` for every comma-separated entry of `param`
    PerItem {
        base: u32,
        #[serde(rename = "per-item")]
        per_item: u32,
        param: String,
    },
}

impl CostRule {
    /// Estimated cost, or `None` if these params make the call unbatchable
    pub fn cost(&self, params: &Params) -> Option<u32> {
        match self {
            CostRule::Fixed { cost, unless } => {
                if unless.iter().any(|p| params.contains(p)) {
                    None
                } else {
                    Some(*cost)
                }
            }
            CostRule::PerItem { base, per_item, param } => {
                let items = params.get(param).map(|v| v.item_count()).unwrap_or(0);
                let items = u32::try_from(items).unwrap_or(u32::MAX);
                Some(base.saturating_add(per_item.saturating_mul(items)))
            }
        }
    }

    /// Lowest cost this rule can produce
    pub fn min_cost(&self) -> u32 {
        match self {
            CostRule::Fixed { cost, .. } => *cost,
            CostRule::PerItem { base, .. } => *base,
        }
    }
}

/// Selects and merges private-lane calls under the batch budget
#[derive(Debug, Clone)]
pub struct WeightPacker {
    config: BatchConfig,
    min_cost: u32,
}

impl WeightPacker {
    /// Build a packer; an `unbatchable_cost` within the budget is raised above it
    pub fn new(mut config: BatchConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "WeightPacker::new: raising unbatchable cost above budget");
            config.unbatchable_cost = config.budget.saturating_add(1);
        }
        let min_cost = config
            .costs
            .values()
            .map(CostRule::min_cost)
            .min()
            .unwrap_or(config.unbatchable_cost);
        debug!(budget = config.budget, min_cost, "WeightPacker::new: called");
        Self { config, min_cost }
    }

    pub fn budget(&self) -> u32 {
        self.config.budget
    }

    /// Cheapest cost any batchable call can have
    pub fn min_cost(&self) -> u32 {
        self.min_cost
    }

    /// Estimated cost of `call`
    pub fn cost(&self, call: &Call) -> u32 {
        self.batchable_cost(call).unwrap_or(self.config.unbatchable_cost)
    }

    /// Cost of a call that may join a batch; `None` for batches, calls
    /// recovered from a failed batch, and methods without a cost rule
    fn batchable_cost(&self, call: &Call) -> Option<u32> {
        if call.is_batch() || call.batch_ineligible {
            return None;
        }
        self.config.costs.get(&call.method).and_then(|rule| rule.cost(&call.params))
    }

    /// Merge calls from the head of `queue` into one batch call
    ///
    /// Returns the number of calls merged when a batch was pushed. With fewer
    /// than two candidates the queue is left as it was.
    pub fn pack(&self, queue: &mut RequestQueue) -> Option<usize> {
        debug!(pending = queue.len(), "WeightPacker::pack: called");
        if queue.is_closed() {
            return None;
        }

        let budget = self.config.budget;
        let mut selected = Vec::new();
        let mut set_aside = Vec::new();
        let mut total: u32 = 0;

        while total.saturating_add(self.min_cost) <= budget {
            let Some(call) = queue.pop() else {
                break;
            };
            match self.batchable_cost(&call) {
                Some(cost) if total.saturating_add(cost) <= budget => {
                    total += cost;
                    selected.push(call);
                }
                _ => set_aside.push(call),
            }
        }

        for call in set_aside {
            requeue(queue, call);
        }

        match selected.len() {
            0 => None,
            1 => {
                debug!("WeightPacker::pack: single candidate, left unbatched");
                selected.into_iter().for_each(|call| requeue(queue, call));
                None
            }
            n => {
                let code = script(&selected);
                debug!(calls = n, total, %code, "WeightPacker::pack: built batch");
                let batch = Call::batch(EXECUTE_METHOD, Params::new().with("code", code), selected);
                requeue(queue, batch);
                Some(n)
            }
        }
    }

    /// Fan a batch result out to its members
    ///
    /// On success returns how many members were settled. If the batch failed,
    /// or answered with something other than an array, the members are not
    /// settled; they come back boosted and marked unbatchable for the caller
    /// to requeue.
    pub fn settle_batch(&self, members: Vec<Call>, result: CallResult) -> Result<usize, Vec<Call>> {
        debug!(members = members.len(), ok = result.is_ok(), "WeightPacker::settle_batch: called");
        match result {
            Ok(Value::Array(results)) => {
                let settled = members.len();
                let mut results = results.into_iter();
                for call in members {
                    let value = results.next().unwrap_or(Value::Null);
                    if let Some(nested) = call.settle(Ok(value)) {
                        warn!(calls = nested.len(), "nested batch inside a batch, dropping");
                    }
                }
                Ok(settled)
            }
            Ok(other) => {
                warn!(kind = %json_kind(&other), "batch answered with a non-array payload, retrying members alone");
                Err(degrade(members))
            }
            Err(e) => {
                info!(error = %e, members = members.len(), "batch failed, retrying members alone");
                Err(degrade(members))
            }
        }
    }
}

/// Push back a call the packer took out; the queue is locked by the packer, so it is still open
fn requeue(queue: &mut RequestQueue, call: Call) {
    if let Err(call) = queue.push(call) {
        warn!(method = %call.method, "queue closed while packing");
    }
}

/// Boost and mark the members of a failed batch so they run alone next time
fn degrade(members: Vec<Call>) -> Vec<Call> {
    members
        .into_iter()
        .map(|mut call| {
            call.priority = call.priority.boosted();
            call.batch_ineligible = true;
            call
        })
        .collect()
}

/// VKScript program calling each method in order and returning all results
pub fn script(calls: &[Call]) -> String {
    let body = calls
        .iter()
        .map(|call| format!("API.{}({})", call.method, call.params.to_json()))
        .collect::<Vec<_>>()
        .join(",");
    format!("return [{}];", body)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
