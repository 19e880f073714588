//! Queue types for the scheduler

use std::collections::BinaryHeap;

use serde::Serialize;

use crate::domain::Call;

/// Priority queue of pending calls for one lane
///
/// Highest priority first; among equal priorities, the call enqueued first.
/// A closed queue refuses new calls and hands them back to the caller.
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: BinaryHeap<Call>,
    closed: bool,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a call, or give it back if the queue is closed
    pub fn push(&mut self, call: Call) -> Result<(), Call> {
        if self.closed {
            return Err(call);
        }
        self.heap.push(call);
        Ok(())
    }

    /// Remove and return the highest-priority call
    pub fn pop(&mut self) -> Option<Call> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&Call> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the queue, returning everything still pending
    pub fn close(&mut self) -> Vec<Call> {
        self.closed = true;
        self.heap.drain().collect()
    }
}

/// Counters and gauges for one lane
#[derive(Debug, Default, Clone, Serialize)]
pub struct LaneStats {
    /// Calls waiting in the queue (a batch counts once)
    pub pending: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Application calls settled by this lane, batch members included
    pub completed: u64,
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, Serialize)]
pub struct SchedulerStats {
    pub service: LaneStats,
    pub private: LaneStats,
    pub batches_dispatched: u64,
    pub batch_failures: u64,
    pub escalations: u64,
}
