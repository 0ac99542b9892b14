//! Error types for reconciliation.
//!
//! Snapshot and flattening errors abort a whole planning call. Transaction
//! and partition errors end a single device's branch in the deployer.

use std::fmt;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a device transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// Error message.
    pub message: String,
    /// HTTP status code if available.
    pub status: Option<u16>,
}

impl TransportError {
    /// Create a transport error.
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    /// Whether the device answered "not found".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// Step of the transaction protocol that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStage {
    /// Sending a request outside the transaction (uploads).
    Direct { request: String },
    /// Opening the transaction.
    Begin,
    /// Queueing a request into the transaction.
    Submit { request: String },
    /// Committing the transaction.
    Commit,
}

impl fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { request } => write!(f, "direct request {request}"),
            Self::Begin => f.write_str("begin"),
            Self::Submit { request } => write!(f, "submit {request}"),
            Self::Commit => f.write_str("commit"),
        }
    }
}

/// Errors that can occur while planning or applying a reconciliation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Listing partitions or live resources failed, or the listing was malformed.
    #[error("failed to retrieve live resources: {0}")]
    Retrieval(String),

    /// A resource kind whose root namespace cannot be handled.
    #[error("not supported kind: {0}")]
    UnsupportedKind(String),

    /// A config tree entry that cannot be turned into a request.
    #[error("malformed config: {0}")]
    MalformedConfig(String),

    /// Opening, filling or committing the device transaction failed.
    #[error("transaction failed at {stage}: {source}")]
    Transaction {
        /// Step that failed.
        stage: TransactionStage,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// Creating or removing a partition failed.
    #[error("partition {partition} lifecycle failed: {source}")]
    PartitionLifecycle {
        /// Partition involved.
        partition: String,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// Loading or storing persisted state failed.
    #[error("persisted state error: {0}")]
    Persistence(String),

    /// Any other device call failure.
    #[error("device request failed: {0}")]
    Transport(#[from] TransportError),

    /// Invalid resource ordering pattern.
    #[error("invalid ordering pattern {pattern}: {message}")]
    InvalidOrder {
        /// Offending pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },

    /// The deployer could not start its worker thread or pool.
    #[error("failed to start deployer: {0}")]
    Worker(String),

    /// The deployer stopped before the request was processed.
    #[error("deployer stopped before the request was processed")]
    DeployerStopped,
}

impl Error {
    /// Create a retrieval error.
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval(message.into())
    }

    /// Create a partition lifecycle error.
    pub fn partition(partition: impl Into<String>, source: TransportError) -> Self {
        Self::PartitionLifecycle {
            partition: partition.into(),
            source,
        }
    }

    /// Create a transaction error.
    pub fn transaction(stage: TransactionStage, source: TransportError) -> Self {
        Self::Transaction { stage, source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_not_found() {
        assert!(TransportError::new("gone", Some(404)).is_not_found());
        assert!(!TransportError::new("boom", Some(500)).is_not_found());
        assert!(!TransportError::new("reset", None).is_not_found());
    }

    #[test]
    fn test_transaction_display() {
        let err = Error::transaction(
            TransactionStage::Submit {
                request: "POST ltm/pool /t/p1".to_string(),
            },
            TransportError::new("HTTP 400", Some(400)),
        );
        let display = err.to_string();
        assert!(display.contains("submit POST ltm/pool /t/p1"));
        assert!(display.contains("HTTP 400"));
    }

    #[test]
    fn test_partition_display() {
        let err = Error::partition("tenant", TransportError::new("denied", Some(401)));
        assert_eq!(
            err.to_string(),
            "partition tenant lifecycle failed: denied"
        );
    }

    #[test]
    fn test_from_transport_error() {
        let err: Error = TransportError::new("timeout", None).into();
        assert!(matches!(err, Error::Transport(_)));
    }
}
