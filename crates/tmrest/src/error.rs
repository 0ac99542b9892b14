//! Mapping of HTTP failures onto transport errors.
//!
//! Failures are categorized so that reads can be retried on transient
//! conditions while everything else surfaces immediately.

use reconcile::TransportError;
use std::fmt;

/// Categories of transport failures for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection, TLS or timeout problems (transient, retryable).
    Network,
    /// The device is busy or restarting (transient, retryable).
    Unavailable,
    /// Resource or transaction does not exist.
    NotFound,
    /// Credentials rejected.
    Auth,
    /// The device rejected the request.
    Rejected,
}

impl ErrorCategory {
    /// Whether this category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Unavailable)
    }

    /// Categorize a transport error by its status.
    #[must_use]
    pub fn of(err: &TransportError) -> Self {
        match err.status {
            None => Self::Network,
            Some(401 | 403) => Self::Auth,
            Some(404) => Self::NotFound,
            Some(429 | 502 | 503 | 504) => Self::Unavailable,
            Some(_) => Self::Rejected,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::Network => "network connectivity issue",
            Self::Unavailable => "device unavailable",
            Self::NotFound => "not found",
            Self::Auth => "authentication failed",
            Self::Rejected => "request rejected",
        };
        f.write_str(description)
    }
}

/// Convert a ureq failure.
pub fn from_ureq(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::StatusCode(code) => TransportError::new(format!("HTTP {code}"), Some(code)),
        other => TransportError::new(other.to_string(), None),
    }
}

/// Error for a non-success response, keeping the device's message when present.
///
/// The management API reports failures as `{"code": 400, "message": "..."}`.
pub fn from_status(status: u16, body: &str) -> TransportError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        TransportError::new(format!("HTTP {status}"), Some(status))
    } else {
        TransportError::new(format!("HTTP {status}: {message}"), Some(status))
    }
}

/// Whether a failed read is worth retrying.
#[must_use]
pub fn is_retryable(err: &TransportError) -> bool {
    ErrorCategory::of(err).is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let of = |status| ErrorCategory::of(&TransportError::new("x", status));
        assert_eq!(of(None), ErrorCategory::Network);
        assert_eq!(of(Some(401)), ErrorCategory::Auth);
        assert_eq!(of(Some(404)), ErrorCategory::NotFound);
        assert_eq!(of(Some(503)), ErrorCategory::Unavailable);
        assert_eq!(of(Some(400)), ErrorCategory::Rejected);
    }

    #[test]
    fn test_retryable() {
        assert!(is_retryable(&TransportError::new("reset", None)));
        assert!(is_retryable(&TransportError::new("busy", Some(503))));
        assert!(!is_retryable(&TransportError::new("gone", Some(404))));
        assert!(!is_retryable(&TransportError::new("bad", Some(400))));
    }

    #[test]
    fn test_from_status_uses_device_message() {
        let err = from_status(400, r#"{"code":400,"message":"01020036:3: pool not found"}"#);
        assert_eq!(err.status, Some(400));
        assert_eq!(err.message, "HTTP 400: 01020036:3: pool not found");

        let err = from_status(502, "");
        assert_eq!(err.message, "HTTP 502");

        let err = from_status(500, "upstream exploded\n");
        assert_eq!(err.message, "HTTP 500: upstream exploded");
    }

    #[test]
    fn test_from_ureq_status() {
        let err = from_ureq(ureq::Error::StatusCode(404));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Auth.to_string(), "authentication failed");
    }
}
