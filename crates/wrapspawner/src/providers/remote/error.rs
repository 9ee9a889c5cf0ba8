//! Remote profile service error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for hub and profile service calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while talking to the hub or the profile service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The server rejected the credentials.
    #[error("unauthorized ({status}): {body}")]
    Unauthorized { status: StatusCode, body: String },

    /// Any other non-success response.
    #[error("unexpected response ({status}): {body}")]
    Status { status: StatusCode, body: String },

    /// No user token is available for the request.
    #[error("no user token available")]
    MissingToken,

    /// Hub API URL is not configured.
    #[error("hub API URL is not configured")]
    MissingHubUrl,

    /// Hub API URL cannot carry a path.
    #[error("invalid hub API URL {0}")]
    InvalidUrl(String),

    /// Failed to parse response.
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl RemoteError {
    /// Whether a fresh token might make the call succeed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::MissingToken)
    }

    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized { status, .. } | Self::Status { status, .. } => Some(*status),
            Self::RequestFailed(e) => e.status(),
            _ => None,
        }
    }
}
