/*
[INPUT]:  Error sources (HTTP, API, serialization, WebSocket, configuration)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the marketwire crate
#[derive(Error, Debug)]
pub enum MarketwireError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Stream name failed validation
    #[error("Invalid stream name: {0}")]
    InvalidStream(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimit { retry_after: u64 },

    /// Connection timeout
    #[error("Connection timeout after {duration}s")]
    Timeout { duration: u64 },
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketwireError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketwireError::WebSocket(err.to_string())
    }
}

impl MarketwireError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketwireError::Http(_)
                | MarketwireError::RateLimit { .. }
                | MarketwireError::Timeout { .. }
                | MarketwireError::WebSocket(_)
                | MarketwireError::InvalidResponse(_)
        )
    }

    /// Get retry delay in seconds (if retryable)
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            MarketwireError::RateLimit { retry_after } => Some(*retry_after),
            MarketwireError::Timeout { .. } => Some(1),
            _ => None,
        }
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        MarketwireError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }
}

/// Result type alias for marketwire operations
pub type Result<T> = std::result::Result<T, MarketwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_err = MarketwireError::Timeout { duration: 30 };
        assert!(timeout_err.is_retryable());
        assert_eq!(timeout_err.retry_delay(), Some(1));

        let stream_err = MarketwireError::InvalidStream("btc".to_string());
        assert!(!stream_err.is_retryable());
        assert_eq!(stream_err.retry_delay(), None);
    }

    #[test]
    fn test_websocket_error_conversion() {
        let err = MarketwireError::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, MarketwireError::WebSocket(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("WebSocket error: "));
    }

    #[test]
    fn test_api_error_creation() {
        let err = MarketwireError::api_error(StatusCode::BAD_REQUEST, "Invalid symbol");
        match err {
            MarketwireError::Api { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "Invalid symbol");
            }
            _ => panic!("Expected Api error variant"),
        }
    }
}
