//! API client module
//!
//! The transport boundary: one physical call per [`Transport::send`], with
//! bounded retries layered on top by [`RetryPolicy`].

mod error;
mod http;
mod retry;
mod transport;

pub use error::ApiError;
pub use http::HttpTransport;
pub use retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_TRANSIENT_CODES, RetryPolicy};
pub use transport::{Credentials, Token, Transport};

#[cfg(test)]
pub use transport::mock;
