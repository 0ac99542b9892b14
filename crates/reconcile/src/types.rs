//! Core types for appliance reconciliation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Partition that always exists on the device and is never created or removed
pub const DEFAULT_PARTITION: &str = "Common";

/// Kind used for partitions and subfolders
pub const FOLDER_KIND: &str = "sys/folder";

/// Kind for raw file uploads
pub const UPLOAD_KIND: &str = "shared/file-transfer/uploads";

/// Kind of virtual servers
pub const VIRTUAL_KIND: &str = "ltm/virtual";

/// Kind of virtual addresses
pub const VIRTUAL_ADDRESS_KIND: &str = "ltm/virtual-address";

/// A configuration tree: folder name ("" for the partition root) to
/// type path (`kind/name`) to resource body.
pub type ConfigTree = BTreeMap<String, BTreeMap<String, Value>>;

/// Requests grouped by resource kind
pub type KindMap = BTreeMap<String, Vec<RestRequest>>;

/// HTTP method a request resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Placeholder: no live counterpart, nothing to send
    Noop,
    /// Create
    Post,
    /// Update in place
    Patch,
    /// Remove
    Delete,
}

impl Method {
    /// Resolve the method for an operation given whether the resource is live
    pub fn resolve(operation: Operation, live: bool) -> Self {
        match (operation, live) {
            (Operation::Deploy, true) => Self::Patch,
            (Operation::Deploy, false) => Self::Post,
            (Operation::Delete, true) => Self::Delete,
            (Operation::Delete, false) => Self::Noop,
        }
    }

    /// HTTP verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a reconciliation a config tree is flattened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create or update what the tree declares
    Deploy,
    /// Remove what the tree declares
    Delete,
}

/// Identity of a resource within one kind
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub partition: String,
    pub subfolder: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        partition: impl Into<String>,
        subfolder: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            subfolder: subfolder.into(),
            name: name.into(),
        }
    }

    /// URI form used to address a single resource, e.g. `~tenant~app~pool1`
    pub fn tilde_path(&self) -> String {
        [&self.partition, &self.subfolder, &self.name]
            .iter()
            .filter(|s| !s.is_empty())
            .fold(String::new(), |mut acc, s| {
                acc.push('~');
                acc.push_str(s);
                acc
            })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in [&self.partition, &self.subfolder, &self.name] {
            if !segment.is_empty() {
                write!(f, "/{segment}")?;
            }
        }
        Ok(())
    }
}

/// Body of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Structured JSON document
    Json(Value),
    /// Raw bytes sent as-is (file uploads)
    Raw(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Raw(_) => None,
        }
    }
}

/// Marker for requests handed to an out-of-band synchronizer instead of
/// the transaction batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Never,
}

/// One intended change to one device resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestRequest {
    pub method: Method,
    pub body: Payload,
    pub uri: String,
    pub kind: String,
    pub name: String,
    pub partition: String,
    pub subfolder: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub with_trans: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

impl RestRequest {
    /// A transactional request against `/mgmt/tm/<kind>` with an unresolved method
    pub fn managed(
        kind: &str,
        name: &str,
        partition: &str,
        subfolder: &str,
        body: Value,
    ) -> Self {
        Self {
            method: Method::Noop,
            body: Payload::Json(body),
            uri: format!("/mgmt/tm/{kind}"),
            kind: kind.to_string(),
            name: name.to_string(),
            partition: partition.to_string(),
            subfolder: subfolder.to_string(),
            headers: BTreeMap::new(),
            with_trans: true,
            schedule: None,
        }
    }

    /// Identity used to match the two sides of a diff
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.partition, &self.subfolder, &self.name)
    }

    /// Short human readable label, e.g. `POST ltm/pool /tenant/pool1`
    pub fn label(&self) -> String {
        format!("{} {} {}", self.method, self.kind, self.key())
    }
}

/// Summary of one executed batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub uploaded: usize,
    /// Whether a transaction was opened and committed
    pub committed: bool,
}

impl ExecuteSummary {
    /// Total number of requests sent
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.uploaded
    }

    /// Count one successfully sent request
    pub fn record(&mut self, request: &RestRequest) {
        if request.kind == UPLOAD_KIND {
            self.uploaded += 1;
            return;
        }
        match request.method {
            Method::Post => self.created += 1,
            Method::Patch => self.updated += 1,
            Method::Delete => self.deleted += 1,
            Method::Noop => {}
        }
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.uploaded += other.uploaded;
        self.committed |= other.committed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_resolve() {
        assert_eq!(Method::resolve(Operation::Deploy, true), Method::Patch);
        assert_eq!(Method::resolve(Operation::Deploy, false), Method::Post);
        assert_eq!(Method::resolve(Operation::Delete, true), Method::Delete);
        assert_eq!(Method::resolve(Operation::Delete, false), Method::Noop);
    }

    #[test]
    fn test_key_display_skips_empty_subfolder() {
        assert_eq!(ResourceKey::new("t", "", "p1").to_string(), "/t/p1");
        assert_eq!(ResourceKey::new("t", "app", "p1").to_string(), "/t/app/p1");
    }

    #[test]
    fn test_key_tilde_path() {
        assert_eq!(ResourceKey::new("t", "app", "p1").tilde_path(), "~t~app~p1");
        assert_eq!(ResourceKey::new("", "", "tenant").tilde_path(), "~tenant");
    }

    #[test]
    fn test_managed_request() {
        let r = RestRequest::managed("ltm/pool", "p1", "t", "", json!({"a": 1}));
        assert_eq!(r.uri, "/mgmt/tm/ltm/pool");
        assert_eq!(r.method, Method::Noop);
        assert!(r.with_trans);
        assert_eq!(r.label(), "NOOP ltm/pool /t/p1");
    }

    #[test]
    fn test_method_serializes_as_verb() {
        assert_eq!(serde_json::to_string(&Method::Patch).unwrap(), "\"PATCH\"");
    }

    #[test]
    fn test_summary_counts_by_method() {
        let mut summary = ExecuteSummary::default();
        let mut r = RestRequest::managed("ltm/pool", "p1", "t", "", json!({}));
        for method in [Method::Post, Method::Patch, Method::Patch, Method::Delete, Method::Noop] {
            r.method = method;
            summary.record(&r);
        }
        assert_eq!((summary.created, summary.updated, summary.deleted), (1, 2, 1));
        assert_eq!(summary.total(), 4);

        let mut other = ExecuteSummary {
            uploaded: 2,
            committed: true,
            ..ExecuteSummary::default()
        };
        other.merge(&summary);
        assert_eq!(other.total(), 6);
        assert!(other.committed);
    }
}
