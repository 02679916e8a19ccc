use thiserror::Error;

/// Error taxonomy for remote connector calls.
///
/// The batch executor retries anything `is_retryable`; adapters classify
/// HTTP outcomes into these kinds so retry behavior stays uniform.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by service")]
    RateLimited,

    #[error("transient service error: {0}")]
    Transient(String),

    #[error("permanent service error: {0}")]
    Permanent(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ConnectorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Timeout | ConnectorError::RateLimited | ConnectorError::Transient(_)
        )
    }

    /// Classify an HTTP status: 429 and 5xx are transient, other 4xx are
    /// permanent.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ConnectorError::RateLimited
        } else if status.is_server_error() {
            ConnectorError::Transient(format!("{context}: HTTP {status}"))
        } else {
            ConnectorError::Permanent(format!("{context}: HTTP {status}"))
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectorError::Timeout
        } else if err.is_connect() || err.is_request() {
            ConnectorError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            ConnectorError::from_status(status, "request failed")
        } else {
            ConnectorError::Transient(err.to_string())
        }
    }
}
