//! # Reconcile
//!
//! Declarative reconciliation for REST managed load-balancer appliances.
//!
//! Given the configuration applied last, the desired configuration and the
//! live state of a partition, this crate computes the minimal batch of
//! create/update/delete requests in dependency order and applies it to one
//! or more devices, inside one transaction per device.
//!
//! ## Core Concepts
//!
//! - **ConfigTree**: folder -> `kind/name` -> body, the declarative input
//! - **RestRequest**: one intended change to one device resource
//! - **ExistenceSnapshot**: live resources of a partition, captured per call
//! - **ResourceOrder**: ordered kind patterns encoding dependencies
//! - **Deployer**: serializes requests and fans them out to the fleet
//!
//! ## Example
//!
//! ```
//! use reconcile::{ConfigTree, ExistenceSnapshot, ResourceOrder, plan_requests};
//! use serde_json::json;
//!
//! let desired: ConfigTree = serde_json::from_value(json!({
//!     "app": {"ltm/pool/web": {"members": ["10.0.0.1:80"]}}
//! }))
//! .unwrap();
//!
//! let batch = plan_requests(
//!     "tenant",
//!     None,
//!     Some(&desired),
//!     &ExistenceSnapshot::empty(),
//!     &ResourceOrder::default(),
//! )
//! .unwrap();
//!
//! let labels: Vec<String> = batch.iter().map(|r| r.label()).collect();
//! assert_eq!(labels, ["POST sys/folder /tenant/app", "POST ltm/pool /tenant/app/web"]);
//! ```
//!
//! ## Device access
//!
//! The engine only talks to devices through the [`DeviceClient`] trait.
//! [`mock::MockDevice`] is an in-memory implementation for tests and
//! offline runs.

pub mod client;
pub mod deployer;
pub mod diff;
pub mod document;
pub mod error;
pub mod executor;
pub mod flatten;
pub mod mock;
pub mod order;
pub mod partition;
pub mod persist;
pub mod planner;
pub mod snapshot;
pub mod types;

// Re-export main types at crate root
pub use client::{CallResult, DeviceClient, TransactionId};
pub use deployer::{
    DEFAULT_QUEUE_CAPACITY, DeployOptions, DeployReport, DeployRequest, DeployTicket, Deployer,
    DeviceOutcome, deploy_device,
};
pub use diff::{Sweep, sweep};
pub use document::{deep_equal, fields_satisfied};
pub use error::{Error, Result, TransactionStage, TransportError};
pub use executor::execute;
pub use flatten::{Synthesized, synthesize};
pub use order::{DEFAULT_ORDER, ResourceOrder};
pub use partition::{ensure_partition, list_partitions, remove_partition, save_sys_config};
pub use persist::{PersistedConfig, StateRecord, StateStore};
pub use planner::{gen_rest_requests, plan_requests};
pub use snapshot::{ExistenceSnapshot, gather_kinds};
pub use types::{
    ConfigTree, ExecuteSummary, KindMap, Method, Operation, Payload, ResourceKey, RestRequest,
    Schedule,
};
