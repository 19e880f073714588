//! API error types

use thiserror::Error;

/// Errors that can occur while executing a remote call
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scheduler closed before the call settled")]
    Closed,
}

impl ApiError {
    /// Backend error code, if the backend answered with an error object
    pub fn code(&self) -> Option<i64> {
        match self {
            ApiError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Failure below the API layer: the request or its response never made it intact
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::InvalidResponse(_) | ApiError::Json(_)
        )
    }

    /// Backend error whose code is in the given transient set
    pub fn is_transient(&self, transient_codes: &[i64]) -> bool {
        self.code().is_some_and(|code| transient_codes.contains(&code))
    }

    /// Backend error whose code is in the given authorization-failure set
    pub fn is_authorization(&self, auth_codes: &[i64]) -> bool {
        self.code().is_some_and(|code| auth_codes.contains(&code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: i64) -> ApiError {
        ApiError::Api {
            code,
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_code() {
        assert_eq!(api(6).code(), Some(6));
        assert_eq!(ApiError::Closed.code(), None);
    }

    #[test]
    fn test_is_transient() {
        let transient = [1, 6, 9, 10, 29];
        assert!(api(6).is_transient(&transient));
        assert!(api(29).is_transient(&transient));
        assert!(!api(15).is_transient(&transient));
        assert!(!ApiError::InvalidResponse("x".to_string()).is_transient(&transient));
    }

    #[test]
    fn test_is_authorization() {
        let auth = [15, 30, 200, 201, 203];
        assert!(api(200).is_authorization(&auth));
        assert!(!api(6).is_authorization(&auth));
        assert!(!ApiError::Closed.is_authorization(&auth));
    }

    #[test]
    fn test_is_transport() {
        assert!(ApiError::InvalidResponse("truncated".to_string()).is_transport());
        assert!(!api(1).is_transport());
        assert!(!ApiError::Closed.is_transport());
    }

    #[test]
    fn test_display() {
        assert_eq!(api(15).to_string(), "API error 15: test");
    }
}
