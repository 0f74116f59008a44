use std::time::Duration;

use thiserror::Error;

/// Errors produced by a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The receiver did not answer in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (DNS, refused, reset, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The receiver answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The receiver answered but refused the operation.
    #[error("Rejected by receiver ({code}): {message}")]
    Rejected {
        code: String,
        message: String,
        permanent: bool,
    },

    /// The receiver answered with a body that could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built locally.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Whether retrying the same request can never succeed.
    ///
    /// 408 and 429 are transient; every other 4xx is permanent.
    pub fn is_permanent(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => is_permanent_status(*status),
            TransportError::Rejected { permanent, .. } => *permanent,
            TransportError::Timeout(_)
            | TransportError::Network(_)
            | TransportError::InvalidResponse(_)
            | TransportError::Configuration(_) => false,
        }
    }

    /// `error_kind` label on `delivery_send_failures_total`.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Network(_) => "network",
            TransportError::Status { .. } => "status",
            TransportError::Rejected { .. } => "rejected",
            TransportError::InvalidResponse(_) => "invalid_response",
            TransportError::Configuration(_) => "configuration",
        }
    }
}

fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> TransportError {
        TransportError::Status {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(!status(500).is_permanent());
        assert!(!status(503).is_permanent());
    }

    #[test]
    fn client_errors_are_permanent_except_timeout_and_throttle() {
        assert!(status(400).is_permanent());
        assert!(status(404).is_permanent());
        assert!(status(422).is_permanent());
        assert!(!status(408).is_permanent());
        assert!(!status(429).is_permanent());
    }

    #[test]
    fn rejection_carries_its_own_permanence() {
        let rejected = |permanent| TransportError::Rejected {
            code: "DUPLICATE".to_string(),
            message: "already posted".to_string(),
            permanent,
        };
        assert!(rejected(true).is_permanent());
        assert!(!rejected(false).is_permanent());
    }

    #[test]
    fn kinds_label_each_failure_class() {
        assert_eq!(TransportError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(status(503).kind(), "status");
        assert_eq!(
            TransportError::InvalidResponse("not json".to_string()).kind(),
            "invalid_response"
        );
    }

    #[test]
    fn network_failures_are_transient() {
        assert!(!TransportError::Timeout(Duration::from_secs(15)).is_permanent());
        assert!(!TransportError::Network("connection refused".to_string()).is_permanent());
    }
}
