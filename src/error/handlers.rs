//! Standardized classification of transport and HTTP failures

use crate::error::ExportError;
use std::time::Duration;

/// HTTP status classification for registry and storage responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Map a non-OK registry status to the protocol error
    pub fn handle_registry_status(status: reqwest::StatusCode, operation: &str) -> ExportError {
        ExportError::HttpStatus {
            operation: operation.to_string(),
            status: status.as_u16(),
        }
    }

    /// Short human hint for a status, used in log lines only
    pub fn describe_status(status: u16) -> &'static str {
        match status {
            401 => "unauthorized, the bearer token was rejected",
            403 => "forbidden, insufficient permissions",
            404 => "not found",
            429 => "rate limited",
            500 => "registry server error",
            502 | 503 => "registry unavailable",
            504 => "gateway timeout",
            _ => "unexpected status",
        }
    }

    /// Throttling and server-side failures are worth another attempt, other 4xx are not
    pub fn is_retryable_status(status: u16) -> bool {
        status == 408 || status == 429 || (500..600).contains(&status)
    }

    /// Capped exponential backoff: base * 2^attempt, never above max
    pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.min(16));
        base.saturating_mul(multiplier).min(max)
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize a reqwest failure, tagging it with the operation that produced it
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> ExportError {
        if error.is_timeout() {
            ExportError::Timeout(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            ExportError::Network {
                message: format!("Connection error during {}: {}", context, error),
                retryable: true,
            }
        } else if error.is_decode() || error.is_builder() {
            ExportError::Network {
                message: format!("{} failed: {}", context, error),
                retryable: false,
            }
        } else {
            ExportError::Network {
                message: format!("{} network error: {}", context, error),
                retryable: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);
        assert_eq!(HttpErrorHandler::retry_delay(0, base, max), base);
        assert_eq!(
            HttpErrorHandler::retry_delay(2, base, max),
            Duration::from_millis(400)
        );
        assert_eq!(HttpErrorHandler::retry_delay(10, base, max), max);
        assert_eq!(HttpErrorHandler::retry_delay(u32::MAX, base, max), max);
    }

    #[test]
    fn test_client_errors_are_final() {
        for status in [400, 401, 403, 404, 405] {
            assert!(!HttpErrorHandler::is_retryable_status(status));
        }
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(HttpErrorHandler::is_retryable_status(status));
        }
    }
}
