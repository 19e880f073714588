//! Transport trait and credentials

use async_trait::async_trait;
use serde_json::Value;

use super::ApiError;
use crate::domain::{Lane, Params};

/// Opaque authorization token presented to the backend
///
/// Never printed in full: `Debug` shows only the last four characters.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Build a token from an optional string, treating blank values as absent
    pub fn from_optional(token: Option<String>) -> Option<Self> {
        token.filter(|t| !t.trim().is_empty()).map(Self)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        write!(f, "Token(***{})", tail)
    }
}

/// Credentials of one scheduler instance
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Privileged per-user token; used by the private lane
    pub access: Option<Token>,
    /// Shared low-privilege token; used by the service lane
    pub service: Option<Token>,
}

impl Credentials {
    pub fn new(access: Option<Token>, service: Option<Token>) -> Self {
        Self { access, service }
    }

    pub fn for_lane(&self, lane: Lane) -> Option<&Token> {
        match lane {
            Lane::Service => self.service.as_ref(),
            Lane::Private => self.access.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.service.is_none()
    }
}

/// One physical remote call
///
/// Implementations perform exactly one request and decode exactly one
/// response. Retrying is layered on top by [`super::RetryPolicy`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Call `method` with `params`, authenticating with `token` if given
    ///
    /// Returns the unwrapped response payload, or `ApiError::Api` when the
    /// backend answered with an error object.
    async fn send(&self, method: &str, params: &Params, token: Option<&Token>) -> Result<Value, ApiError>;
}
