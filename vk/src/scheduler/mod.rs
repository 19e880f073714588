//! Scheduler for remote calls
//!
//! Two lanes of work in a single component: a parallel service lane using the
//! unprivileged credential, and a strictly serial private lane using the
//! access credential, with cool-down throttling and `execute` batching.

mod config;
mod core;
mod lane;
mod packer;
mod pagination;
mod queue;
mod worker;

pub use config::{BatchConfig, DEFAULT_AUTH_ERROR_CODES, SchedulerConfig};
pub use self::core::{EnqueueOptions, Scheduler};
pub use packer::{CostRule, EXECUTE_METHOD, WeightPacker};
pub use pagination::FetchOptions;
pub use queue::{LaneStats, RequestQueue, SchedulerStats};
