//! Lane workers
//!
//! The service lane runs a fixed pool of identical workers. The private lane
//! runs exactly one worker that cools down after every dispatch and packs the
//! queue before picking up the next call.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use super::core::Shared;
use super::lane::{LaneState, reject_closed};
use crate::domain::{Call, Completion};

/// Private worker state, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Dispatching,
    CoolingDown,
}

/// Service-lane worker loop; exits when the lane closes
pub(crate) async fn run_service_worker(shared: Arc<Shared>, id: usize) {
    debug!(id, "run_service_worker: started");
    while let Some(call) = shared.service.next().await {
        dispatch(&shared, &shared.service, call).await;
    }
    debug!(id, "run_service_worker: lane closed, exiting");
}

/// Private-lane worker loop; exits when the lane closes
///
/// A call picked up from idle is dispatched as is. After every dispatch the
/// worker sleeps for the cool-down, packs the queue, and then takes the head.
pub(crate) async fn run_private_worker(shared: Arc<Shared>) {
    let cooldown = shared.config.cooldown();
    let mut state = WorkerState::Idle;
    debug!(?cooldown, ?state, "run_private_worker: started");

    while let Some(call) = shared.private.next().await {
        state = WorkerState::Dispatching;
        debug!(?state, method = %call.method, priority = %call.priority, "run_private_worker: dispatching");
        dispatch(&shared, &shared.private, call).await;

        state = WorkerState::CoolingDown;
        debug!(?state, "run_private_worker: cooling down");
        tokio::time::sleep(cooldown).await;

        let packed = shared.packer.pack(&mut shared.private.queue());
        if let Some(calls) = packed {
            debug!(calls, "run_private_worker: packed batch");
        }
        state = WorkerState::Idle;
    }
    debug!(?state, "run_private_worker: lane closed, exiting");
}

/// Execute one call on `lane` and settle it
async fn dispatch(shared: &Shared, lane: &LaneState, call: Call) {
    let token = shared.credentials.for_lane(lane.lane());
    let is_batch = call.is_batch();
    if is_batch {
        shared.counters.batches.fetch_add(1, Ordering::SeqCst);
        info!(calls = call.weight_in_calls(), "dispatching batch");
    }

    lane.begin_dispatch();
    let result = shared
        .retry
        .request(shared.transport.as_ref(), &call.method, &call.params, token)
        .await;

    let method = call.method.clone();
    match call.into_completion() {
        Completion::Caller(tx) => {
            if let Err(e) = &result {
                debug!(lane = %lane.lane(), %method, error = %e, "dispatch: call failed");
            }
            lane.end_dispatch(1);
            // Receiver may be gone if the caller stopped waiting
            let _ = tx.send(result);
        }
        Completion::Batch(members) => match shared.packer.settle_batch(members, result) {
            Ok(settled) => lane.end_dispatch(settled),
            Err(retry) => {
                lane.end_dispatch(0);
                shared.counters.batch_failures.fetch_add(1, Ordering::SeqCst);
                requeue(lane, retry);
            }
        },
    }
}

/// Put calls recovered from a failed batch back on the lane and wake its worker
fn requeue(lane: &LaneState, calls: Vec<Call>) {
    debug!(lane = %lane.lane(), calls = calls.len(), "requeue: called");
    let refused: Vec<Call> = {
        let mut queue = lane.queue();
        calls.into_iter().filter_map(|call| queue.push(call).err()).collect()
    };
    if !refused.is_empty() {
        warn!(lane = %lane.lane(), calls = refused.len(), "lane closed, dropping recovered calls");
        refused.into_iter().for_each(reject_closed);
    }
    lane.wake();
}

