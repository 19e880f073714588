//! vkapi - rate-limited, credential-aware VK API client
//!
//! Independent API calls are funnelled through a [`Scheduler`] that keeps the
//! backend's rate limits and picks the right credential for each call.
//!
//! # Core Concepts
//!
//! - **Two lanes**: a parallel service lane with the unprivileged token and a
//!   strictly serial private lane with the user access token
//! - **Fallback**: calls the service token may not make move to the private
//!   lane once
//! - **Batching**: cheap private calls are merged into `execute` requests
//! - **Retry**: transient backend errors are retried with a fixed delay
//!
//! # Modules
//!
//! - [`domain`] - Calls, parameters and priorities
//! - [`api`] - Transport trait, HTTP client, errors and retry policy
//! - [`scheduler`] - Lanes, workers, batching and pagination
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod scheduler;

// Re-export commonly used types
pub use api::{ApiError, Credentials, HttpTransport, RetryPolicy, Token, Transport};
pub use config::{ApiConfig, Config};
pub use domain::{CallResult, Lane, ParamValue, Params, Priority};
pub use scheduler::{
    BatchConfig, CostRule, EnqueueOptions, FetchOptions, LaneStats, Scheduler, SchedulerConfig, SchedulerStats,
};
