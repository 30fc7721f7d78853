//! Typed errors for gateway calls
//!
//! Stages apply a uniform fallback policy on any gateway failure, but the
//! gateway itself needs to distinguish failure modes to decide what is worth
//! retrying without string matching.

use thiserror::Error;

/// Gateway call errors with typed variants
///
/// - `Unauthorized` (401) - key rejected; not retryable here
/// - `RateLimited` (429) - quota exceeded; retryable after a delay
/// - `BadRequest` (400) - malformed request; caller error
/// - `ServiceError` (5xx) - server-side issue; retryable
/// - `Network` - connection/timeout; retryable
/// - `Malformed` - response body did not contain a usable completion
/// - `Other` - catch-all for unhandled errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Authentication key is invalid or expired (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Malformed request (HTTP 400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Server-side error (HTTP 5xx)
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Network connectivity issue (connection refused, timeout, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Response parsed but carried no completion text
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Other errors not fitting the above categories
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Check if another attempt against the same endpoint may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited(_) | GatewayError::ServiceError(_) | GatewayError::Network(_)
        )
    }

    /// Convert HTTP status code and error text into a typed GatewayError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 => GatewayError::Unauthorized(error_text),
            429 => GatewayError::RateLimited(error_text),
            400 => GatewayError::BadRequest(error_text),
            500..=599 => GatewayError::ServiceError(error_text),
            _ => GatewayError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into a typed GatewayError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            GatewayError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            let error_text = e.to_string();
            Self::from_http_status(status, error_text)
        } else {
            GatewayError::Other(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_is_retryable() {
        let err = GatewayError::RateLimited("quota exceeded".to_string());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unauthorized_not_retryable() {
        let err = GatewayError::Unauthorized("key rejected".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_bad_request_not_retryable() {
        let err = GatewayError::BadRequest("invalid parameter".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_malformed_not_retryable() {
        let err = GatewayError::Malformed("empty choices".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_http_status() {
        let err = GatewayError::from_http_status(
            reqwest::StatusCode::UNAUTHORIZED,
            "Invalid key".to_string(),
        );
        assert!(matches!(err, GatewayError::Unauthorized(_)));

        let err = GatewayError::from_http_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded".to_string(),
        );
        assert!(matches!(err, GatewayError::RateLimited(_)));

        let err = GatewayError::from_http_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "Server error".to_string(),
        );
        assert!(matches!(err, GatewayError::ServiceError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::ServiceError("upstream unavailable".to_string());
        assert_eq!(err.to_string(), "Service error: upstream unavailable");
    }
}
