use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No active session - please log in")]
    NoSession,

    #[error("Enrollment rejected: {0}")]
    EnrollmentRejected(String),

    /// The session was torn down; the caller has been logged out.
    #[error("Session ended: {0}")]
    SessionEnded(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Credential storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Map a rejected enrollment. Client errors mean the service refused the
    /// credentials; anything else is reported as-is.
    pub fn from_enroll_status(status: u16, body: &str) -> Self {
        match status {
            400..=499 if status != 429 => {
                let truncated = Self::truncate_body(body);
                if truncated.is_empty() {
                    ApiError::EnrollmentRejected(format!("status {}", status))
                } else {
                    ApiError::EnrollmentRejected(truncated)
                }
            }
            _ => Self::from_status(status, body),
        }
    }

    /// True when the failure logged the user out, as opposed to a failure
    /// of this particular request.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, ApiError::SessionEnded(_) | ApiError::NoSession)
    }

    /// True for failures that may succeed if the caller tries again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::NetworkError(_)
                | ApiError::Timeout(_)
                | ApiError::RateLimited
                | ApiError::ServerError(_)
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}
