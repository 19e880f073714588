//! Scheduler implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SchedulerConfig;
use super::lane::LaneState;
use super::packer::WeightPacker;
use super::queue::SchedulerStats;
use super::worker::{run_private_worker, run_service_worker};
use crate::api::{ApiError, Credentials, RetryPolicy, Transport};
use crate::domain::{Call, CallResult, Lane, Params, Priority};

/// Options for a single [`Scheduler::enqueue`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// Skip the service lane and use the access credential right away
    pub force_private: bool,
}

impl EnqueueOptions {
    pub fn with_priority(priority: impl Into<Priority>) -> Self {
        Self {
            priority: priority.into(),
            ..Default::default()
        }
    }

    pub fn private() -> Self {
        Self {
            force_private: true,
            ..Default::default()
        }
    }
}

/// Counters not owned by a single lane
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) batches: AtomicU64,
    pub(crate) batch_failures: AtomicU64,
    pub(crate) escalations: AtomicU64,
}

/// State shared by the facade and every worker
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) credentials: Credentials,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) retry: RetryPolicy,
    pub(crate) packer: WeightPacker,
    pub(crate) service: LaneState,
    pub(crate) private: LaneState,
    pub(crate) counters: Counters,
}

impl Shared {
    fn lane(&self, lane: Lane) -> &LaneState {
        match lane {
            Lane::Service => &self.service,
            Lane::Private => &self.private,
        }
    }

    fn close(&self) {
        self.service.close();
        self.private.close();
    }
}

/// The Scheduler turns independent calls into a rate-limited stream of
/// requests over two lanes.
///
/// The service lane runs `threads` calls at a time with the service
/// credential. The private lane runs one call at a time with the access
/// credential, pauses for the cool-down after each, and merges cheap calls
/// into `execute` batches. Calls the service credential is not allowed to
/// make are moved to the private lane once.
///
/// Dropping the scheduler closes both lanes; calls still queued resolve with
/// [`ApiError::Closed`].
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Create a scheduler and spawn its workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SchedulerConfig, credentials: Credentials, transport: Arc<dyn Transport>) -> Self {
        debug!(?config, ?credentials, "Scheduler::new: called");
        if credentials.is_empty() {
            warn!("no credentials configured, every call goes out unauthenticated");
        }

        let threads = if config.threads == 0 {
            warn!("threads is 0, using a single service worker");
            1
        } else {
            config.threads
        };

        let shared = Arc::new(Shared {
            retry: config.retry_policy(),
            packer: WeightPacker::new(config.batch.clone()),
            config,
            credentials,
            transport,
            service: LaneState::new(Lane::Service),
            private: LaneState::new(Lane::Private),
            counters: Counters::default(),
        });

        let mut workers: Vec<JoinHandle<()>> = (0..threads)
            .map(|id| tokio::spawn(run_service_worker(shared.clone(), id)))
            .collect();
        workers.push(tokio::spawn(run_private_worker(shared.clone())));

        info!(threads, "Scheduler started");
        Self { shared, workers }
    }

    /// Schedule one call and wait for its result
    ///
    /// Lane choice: `force_private` or a missing service credential sends the
    /// call to the private lane; a missing access credential keeps it on the
    /// service lane. Otherwise the service lane goes first, and an
    /// authorization failure there resubmits the call once to the private
    /// lane at `priority + 1`.
    pub async fn enqueue(&self, method: &str, params: Params, options: EnqueueOptions) -> CallResult {
        debug!(%method, ?options, "Scheduler::enqueue: called");
        let credentials = &self.shared.credentials;

        if options.force_private || (credentials.service.is_none() && credentials.access.is_some()) {
            debug!(%method, "Scheduler::enqueue: private lane");
            return self.submit(Lane::Private, method, params, options.priority).await;
        }

        if credentials.access.is_none() {
            debug!(%method, "Scheduler::enqueue: service lane only");
            return self.submit(Lane::Service, method, params, options.priority).await;
        }

        match self.submit(Lane::Service, method, params.clone(), options.priority).await {
            Err(e) if e.is_authorization(&self.shared.config.auth_error_codes) => {
                info!(%method, error = %e, "service credential rejected, escalating to private lane");
                self.shared.counters.escalations.fetch_add(1, Ordering::SeqCst);
                self.submit(Lane::Private, method, params, options.priority.escalated())
                    .await
            }
            other => other,
        }
    }

    /// Push a call onto `lane` and await its settlement
    async fn submit(&self, lane: Lane, method: &str, params: Params, priority: Priority) -> CallResult {
        let (call, rx) = Call::new(method, params, priority);
        self.shared.lane(lane).push(call);
        rx.await.unwrap_or(Err(ApiError::Closed))
    }

    /// Snapshot of queue depths and counters
    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.shared.counters;
        SchedulerStats {
            service: self.shared.service.stats(),
            private: self.shared.private.stats(),
            batches_dispatched: counters.batches.load(Ordering::SeqCst),
            batch_failures: counters.batch_failures.load(Ordering::SeqCst),
            escalations: counters.escalations.load(Ordering::SeqCst),
        }
    }

    /// Close both lanes; queued calls resolve with `Closed`, in-flight calls finish
    pub fn close(&self) {
        debug!("Scheduler::close: called");
        self.shared.close();
    }

    /// Close both lanes and wait for every worker to exit
    pub async fn shutdown(mut self) {
        debug!("Scheduler::shutdown: called");
        self.shared.close();
        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker task failed");
            }
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.close();
    }
}
