//! Integration tests for vkapi
//!
//! These tests drive the public scheduler API against an in-process backend.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use vkapi::config::Config;
use vkapi::{
    ApiError, Credentials, EnqueueOptions, FetchOptions, Params, Priority, Scheduler, SchedulerConfig, Token,
    Transport,
};

const LATENCY: Duration = Duration::from_millis(20);

// =============================================================================
// Backend stub
// =============================================================================

/// One request seen by the backend
#[derive(Debug, Clone)]
struct Seen {
    method: String,
    token: Option<String>,
    started: Instant,
}

type Handler = dyn Fn(&str, &Params, Option<&str>, usize) -> Result<Value, ApiError> + Send + Sync;

/// In-process backend; `handler` gets the attempt number per method
struct Backend {
    handler: Box<Handler>,
    seen: Mutex<Vec<Seen>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Backend {
    fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &Params, Option<&str>, usize) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn requests(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for Backend {
    async fn send(&self, method: &str, params: &Params, token: Option<&Token>) -> Result<Value, ApiError> {
        let attempt = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(Seen {
                method: method.to_string(),
                token: token.map(|t| t.expose().to_string()),
                started: Instant::now(),
            });
            seen.iter().filter(|s| s.method == method).count()
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(LATENCY).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(method, params, token.map(Token::expose), attempt)
    }
}

/// Run an `execute` script made of `API.method({...})` calls, echoing each
fn run_script(params: &Params) -> Value {
    let code = params.get("code").map(|c| c.to_string()).unwrap_or_default();
    let results = code
        .split("API.")
        .skip(1)
        .map(|segment| {
            let open = segment.find('(').unwrap();
            let close = segment.rfind(')').unwrap();
            let args: Value = serde_json::from_str(&segment[open + 1..close]).unwrap();
            json!({ "method": &segment[..open], "user_id": args["user_id"] })
        })
        .collect();
    Value::Array(results)
}

fn both_tokens() -> Credentials {
    Credentials::new(Some(Token::new("access-token")), Some(Token::new("service-token")))
}

fn access_token_only() -> Credentials {
    Credentials::new(Some(Token::new("access-token")), None)
}

fn api_error(code: i64) -> ApiError {
    ApiError::Api {
        code,
        message: format!("stub error {}", code),
    }
}

// =============================================================================
// Private lane and batching
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_private_calls_are_batched_and_spaced() {
    let backend = Backend::new(|method, params, _, _| match method {
        "execute" => Ok(run_script(params)),
        _ => Ok(json!({ "method": method, "user_id": params.to_json()["user_id"] })),
    });
    let scheduler = Scheduler::new(SchedulerConfig::default(), access_token_only(), backend.clone());

    let calls = (0..25).map(|id| {
        scheduler.enqueue(
            "friends.get",
            Params::new().with("user_id", id),
            EnqueueOptions::default(),
        )
    });
    let results = futures::future::join_all(calls).await;

    for (id, result) in results.into_iter().enumerate() {
        let value = result.expect("call should succeed");
        assert_eq!(value["user_id"], json!(id), "each caller gets its own result");
    }

    // 14 per friends.get, budget 100: seven calls fit per batch
    let seen = backend.seen();
    assert!(seen.len() < 25, "expected batching, saw {} requests", seen.len());
    assert!(seen.iter().any(|s| s.method == "execute"));
    assert!(seen.iter().all(|s| s.token.as_deref() == Some("access-token")));

    for pair in seen.windows(2) {
        let gap = pair[1].started - pair[0].started;
        assert!(gap >= Duration::from_millis(340), "private dispatches {:?} apart", gap);
    }

    let stats = scheduler.stats();
    assert_eq!(stats.private.completed, 25);
    assert!(stats.batches_dispatched >= 1);
    assert_eq!(stats.batch_failures, 0);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_falls_back_to_single_calls() {
    let backend = Backend::new(|method, params, _, _| match method {
        "execute" => Err(api_error(13)),
        _ => Ok(json!({ "user_id": params.to_json()["user_id"] })),
    });
    let scheduler = Scheduler::new(SchedulerConfig::default(), access_token_only(), backend.clone());

    let results = futures::future::join_all((0..5).map(|id| {
        scheduler.enqueue("friends.get", Params::new().with("user_id", id), EnqueueOptions::private())
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    let stats = scheduler.stats();
    assert!(stats.batch_failures >= 1);
    assert_eq!(stats.private.completed, 5);
    scheduler.shutdown().await;
}

// =============================================================================
// Lane fallback and retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_service_auth_failure_escalates_once() {
    let backend = Backend::new(|method, _, token, _| match token {
        Some("service-token") => Err(api_error(15)),
        _ => Ok(json!({ "method": method, "lane": "private" })),
    });
    let scheduler = Scheduler::new(SchedulerConfig::default(), both_tokens(), backend.clone());

    let value = scheduler
        .enqueue("wall.get", Params::new().with("owner_id", -1), EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(value["lane"], "private");
    let tokens: Vec<_> = backend.seen().into_iter().map(|s| s.token).collect();
    assert_eq!(
        tokens,
        vec![Some("service-token".to_string()), Some("access-token".to_string())]
    );
    assert_eq!(scheduler.stats().escalations, 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_auth_error_is_surfaced_without_escalation() {
    let backend = Backend::new(|_, _, _, _| Err(api_error(18)));
    let scheduler = Scheduler::new(SchedulerConfig::default(), both_tokens(), backend.clone());

    let err = scheduler
        .enqueue("users.get", Params::new(), EnqueueOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(18));
    assert_eq!(backend.requests(), 1);
    assert_eq!(scheduler.stats().escalations, 0);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried_with_delay() {
    let backend = Backend::new(|_, _, _, attempt| if attempt < 3 { Err(api_error(6)) } else { Ok(json!(1)) });
    let scheduler = Scheduler::new(SchedulerConfig::default(), both_tokens(), backend.clone());

    let start = Instant::now();
    let value = scheduler
        .enqueue("users.get", Params::new(), EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(value, json!(1));
    assert_eq!(backend.requests(), 3);
    assert!(start.elapsed() >= Duration::from_millis(2000));
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_give_up_after_max_retries() {
    let backend = Backend::new(|_, _, _, _| Err(api_error(10)));
    let config = SchedulerConfig {
        max_retries: 3,
        retry_delay_ms: 10,
        ..Default::default()
    };
    let scheduler = Scheduler::new(config, both_tokens(), backend.clone());

    let err = scheduler
        .enqueue("users.get", Params::new(), EnqueueOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(10));
    assert_eq!(backend.requests(), 3);
    scheduler.shutdown().await;
}

// =============================================================================
// Service lane
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_service_lane_respects_thread_count_from_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "scheduler:\n  threads: 2").unwrap();
    let config = Config::load(Some(&file.path().to_path_buf())).unwrap();

    let backend = Backend::new(|_, _, _, _| Ok(json!([])));
    let scheduler = Scheduler::new(config.scheduler, both_tokens(), backend.clone());

    let results = futures::future::join_all(
        (0..10).map(|_| scheduler.enqueue("users.get", Params::new(), EnqueueOptions::default())),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    assert!(backend.seen().iter().all(|s| s.token.as_deref() == Some("service-token")));
    assert_eq!(scheduler.stats().service.completed, 10);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_higher_priority_runs_first() {
    let backend = Backend::new(|method, _, _, _| Ok(json!(method)));
    let config = SchedulerConfig {
        threads: 1,
        ..Default::default()
    };
    let scheduler = Arc::new(Scheduler::new(config, both_tokens(), backend.clone()));

    // Occupy the single worker, then queue a low and a high priority call
    let busy = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.enqueue("first", Params::new(), EnqueueOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    let low = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.enqueue("low", Params::new(), EnqueueOptions::with_priority(1)).await }
    });
    let high = tokio::spawn({
        let scheduler = scheduler.clone();
        async move {
            scheduler
                .enqueue("high", Params::new(), EnqueueOptions::with_priority(Priority::BATCH))
                .await
        }
    });

    for handle in [busy, low, high] {
        handle.await.unwrap().unwrap();
    }
    let order: Vec<_> = backend.seen().into_iter().map(|s| s.method).collect();
    assert_eq!(order, vec!["first", "high", "low"]);
}

// =============================================================================
// Pagination and shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fetch_collects_all_pages() {
    let backend = Backend::new(|_, params, _, _| {
        let offset = params.get("offset").and_then(|v| v.as_usize()).unwrap_or(0);
        let items: Vec<Value> = (offset..57.min(offset + 20)).map(|i| json!(i)).collect();
        Ok(json!({ "count": 57, "items": items }))
    });
    let scheduler = Scheduler::new(SchedulerConfig::default(), both_tokens(), backend.clone());

    let items = scheduler
        .fetch("wall.get", Params::new().with("count", 20), FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(items.len(), 57);
    assert_eq!(items.last(), Some(&json!(56)));
    assert_eq!(backend.requests(), 3);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_rejects_queued_calls() {
    let backend = Backend::new(|_, _, _, _| Ok(json!(null)));
    let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default(), access_token_only(), backend));

    let pending: Vec<_> = (0..3)
        .map(|i| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .enqueue("wall.get", Params::new().with("owner_id", i), EnqueueOptions::default())
                    .await
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(1)).await;
    scheduler.close();

    let mut closed = 0;
    for handle in pending {
        if let Err(ApiError::Closed) = handle.await.unwrap() {
            closed += 1;
        }
    }
    // The call already on the wire finishes; the queued ones do not
    assert!(closed >= 1, "expected queued calls to be rejected");

    let after = scheduler
        .enqueue("wall.get", Params::new(), EnqueueOptions::default())
        .await;
    assert!(matches!(after, Err(ApiError::Closed)));
}
