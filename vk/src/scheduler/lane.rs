//! Per-lane queue, wake-up and gauges

use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use super::queue::{LaneStats, RequestQueue};
use crate::api::ApiError;
use crate::domain::{Call, Lane};

/// Shared state of one lane
///
/// The queue is only touched by `enqueue` and by the lane's own workers. The
/// lock is never held across an await point.
pub(crate) struct LaneState {
    lane: Lane,
    queue: Mutex<RequestQueue>,
    wake: Notify,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicU64,
}

impl LaneState {
    pub(crate) fn new(lane: Lane) -> Self {
        Self {
            lane,
            queue: Mutex::new(RequestQueue::new()),
            wake: Notify::new(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        }
    }

    pub(crate) fn lane(&self) -> Lane {
        self.lane
    }

    pub(crate) fn queue(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a call and wake an idle worker; a closed lane settles it with `Closed`
    pub(crate) fn push(&self, call: Call) {
        debug!(lane = %self.lane, method = %call.method, priority = %call.priority, "LaneState::push: called");
        let refused = self.queue().push(call).err();
        match refused {
            None => self.wake(),
            Some(call) => {
                debug!(lane = %self.lane, "LaneState::push: lane closed");
                reject_closed(call);
            }
        }
    }

    /// Wake one idle worker; harmless when nobody is idle
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    /// Next call to dispatch, waiting while the lane is empty
    ///
    /// Returns `None` once the lane is closed.
    pub(crate) async fn next(&self) -> Option<Call> {
        loop {
            let mut notified = pin!(self.wake.notified());
            notified.as_mut().enable();
            {
                let mut queue = self.queue();
                if let Some(call) = queue.pop() {
                    return Some(call);
                }
                if queue.is_closed() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the lane, settling everything still queued with `Closed`
    pub(crate) fn close(&self) {
        let drained = self.queue().close();
        debug!(lane = %self.lane, drained = drained.len(), "LaneState::close: called");
        drained.into_iter().for_each(reject_closed);
        self.wake.notify_waiters();
    }

    pub(crate) fn begin_dispatch(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn end_dispatch(&self, settled: usize) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(settled as u64, Ordering::SeqCst);
    }

    pub(crate) fn stats(&self) -> LaneStats {
        LaneStats {
            pending: self.queue().len(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }
}

/// Settle a call (and batch members, if any) with `ApiError::Closed`
pub(crate) fn reject_closed(call: Call) {
    if let Some(members) = call.settle(Err(ApiError::Closed)) {
        members.into_iter().for_each(reject_closed);
    }
}
