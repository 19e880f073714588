//! Call - one logical remote method invocation awaiting dispatch

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{Params, Priority};
use crate::api::ApiError;

/// Outcome delivered to whoever awaits a call
pub type CallResult = Result<Value, ApiError>;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Scheduling track a call runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Unprivileged, parallel, service credential
    Service,
    /// Privileged, strictly serial, access credential
    Private,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// Where the result of a call goes
#[derive(Debug)]
pub enum Completion {
    /// An application caller awaiting the paired receiver
    Caller(oneshot::Sender<CallResult>),
    /// Calls packed into a synthetic `execute` batch, in script order
    Batch(Vec<Call>),
}

/// A pending remote call
///
/// Ordered by priority, then by sequence number so that among equal
/// priorities the earlier call wins. The sequence number is assigned once
/// and survives requeueing.
#[derive(Debug)]
pub struct Call {
    pub method: String,
    pub params: Params,
    pub priority: Priority,
    /// Set once the call was part of a failed batch; it is dispatched alone from then on
    pub batch_ineligible: bool,
    seq: u64,
    completion: Completion,
}

impl Call {
    /// Create a call for an application caller, returning the receiving half of its completion
    pub fn new(
        method: impl Into<String>,
        params: Params,
        priority: Priority,
    ) -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            method: method.into(),
            params,
            priority,
            batch_ineligible: false,
            seq: NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            completion: Completion::Caller(tx),
        };
        (call, rx)
    }

    /// Create a synthetic batch call wrapping `calls`
    pub fn batch(method: impl Into<String>, params: Params, calls: Vec<Call>) -> Self {
        Self {
            method: method.into(),
            params,
            priority: Priority::BATCH,
            batch_ineligible: true,
            seq: NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            completion: Completion::Batch(calls),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self.completion, Completion::Batch(_))
    }

    /// Number of application calls this call settles
    pub fn weight_in_calls(&self) -> usize {
        match &self.completion {
            Completion::Caller(_) => 1,
            Completion::Batch(calls) => calls.len(),
        }
    }

    /// Consume the call, handing back its completion
    pub fn into_completion(self) -> Completion {
        self.completion
    }

    /// Settle a caller-owned call. Consuming `self` makes settlement happen at most once.
    ///
    /// Returns the batch members untouched if this is a batch call.
    pub fn settle(self, result: CallResult) -> Option<Vec<Call>> {
        match self.completion {
            Completion::Caller(tx) => {
                // Receiver may be gone if the caller stopped waiting
                let _ = tx.send(result);
                None
            }
            Completion::Batch(calls) => Some(calls),
        }
    }
}

impl Eq for Call {}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for Call {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Call {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
