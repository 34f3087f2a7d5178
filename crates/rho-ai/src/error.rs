//! Error types for rho-ai

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using rho-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a model endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// The response could not be interpreted at all
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Coarse cause class surfaced to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transport,
    Auth,
    Protocol,
    /// The tool layer cannot serve calls at all
    Tool,
    Cancelled,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Transport => "transport",
            ErrorClass::Auth => "auth",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Tool => "tool",
            ErrorClass::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl ErrorClass {
    /// Short fix users can apply before retrying, where one exists
    pub fn remediation_hint(&self) -> Option<&'static str> {
        match self {
            ErrorClass::Auth => Some(
                "check that the API key is set (api_key in config or OPENAI_API_KEY) and valid for this endpoint",
            ),
            _ => None,
        }
    }
}

impl Error {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Error::Api { status, message } => {
                let msg = message.to_lowercase();
                *status >= 500
                    || *status == 429
                    || msg.contains("overloaded")
                    || msg.contains("rate limit")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Map this error to its cause class
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Auth(_) | Error::InvalidApiKey => ErrorClass::Auth,
            Error::Api { status, .. } if *status == 401 || *status == 403 => ErrorClass::Auth,
            Error::Aborted => ErrorClass::Cancelled,
            Error::Json(_) | Error::UnexpectedResponse(_) => ErrorClass::Protocol,
            Error::Http(_) | Error::Api { .. } | Error::RateLimited { .. } | Error::Sse(_) => {
                ErrorClass::Transport
            }
        }
    }

    /// Short fix for auth-style failures
    pub fn remediation_hint(&self) -> Option<&'static str> {
        self.class().remediation_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_retryable_server_errors() {
        assert!(Error::api(500, "internal").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(Error::api(429, "slow down").is_retryable());
    }

    #[test]
    fn test_retryable_overloaded_message() {
        assert!(Error::api(400, "The server is overloaded").is_retryable());
    }

    #[test]
    fn test_not_retryable_client_errors() {
        assert!(!Error::api(400, "bad request").is_retryable());
        assert!(!Error::api(401, "unauthorized").is_retryable());
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::UnexpectedResponse("garbage".into()).is_retryable());
    }

    #[test]
    fn test_class_mapping() {
        assert_eq!(Error::api(401, "nope").class(), ErrorClass::Auth);
        assert_eq!(Error::Auth("expired".into()).class(), ErrorClass::Auth);
        assert_eq!(Error::api(502, "bad gateway").class(), ErrorClass::Transport);
        assert_eq!(
            Error::UnexpectedResponse("x".into()).class(),
            ErrorClass::Protocol
        );
        assert_eq!(Error::Aborted.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn test_remediation_only_for_auth() {
        assert!(Error::InvalidApiKey.remediation_hint().is_some());
        assert!(Error::api(500, "boom").remediation_hint().is_none());
    }

    #[test]
    fn test_class_display() {
        assert_eq!(ErrorClass::Protocol.to_string(), "protocol");
    }
}
