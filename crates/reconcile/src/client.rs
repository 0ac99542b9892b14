//! Device client trait
//!
//! The engine talks to an appliance only through this trait, so it can be
//! used with the HTTP transport, an in-memory mock, or anything else that
//! speaks the management API.

use crate::error::TransportError;
use crate::types::{ResourceKey, RestRequest};
use serde_json::{Map, Value};
use std::fmt;

/// Result of a single device call
pub type CallResult<T> = std::result::Result<T, TransportError>;

/// Identifier of an open device transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Management API of one appliance
///
/// Implementations handle addressing, authentication and wire-level retries.
pub trait DeviceClient: Send + Sync {
    /// Base URL identifying this device
    fn url(&self) -> &str;

    /// List every resource of `kind`, optionally filtered by partition
    ///
    /// The response is the raw collection document (`{"items": [...]}`).
    fn list(&self, kind: &str, partition: Option<&str>) -> CallResult<Value>;

    /// Fetch one resource, `None` when it does not exist
    fn fetch(&self, kind: &str, key: &ResourceKey) -> CallResult<Option<Map<String, Value>>>;

    /// Create a resource outside any transaction
    fn create(&self, kind: &str, body: &Value) -> CallResult<()>;

    /// Update a resource outside any transaction
    fn update(&self, kind: &str, key: &ResourceKey, body: &Value) -> CallResult<()>;

    /// Remove a resource outside any transaction
    fn remove(&self, kind: &str, key: &ResourceKey) -> CallResult<()>;

    /// Open a transaction
    fn begin_transaction(&self) -> CallResult<TransactionId>;

    /// Send a request, queued into `transaction` when given
    fn send(&self, request: &RestRequest, transaction: Option<TransactionId>) -> CallResult<()>;

    /// Commit a transaction
    fn commit_transaction(&self, transaction: TransactionId) -> CallResult<()>;

    /// Run a tmsh command and return the raw response
    fn run_command(&self, command: &str) -> CallResult<Value>;
}
