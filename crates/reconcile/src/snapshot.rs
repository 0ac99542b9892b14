//! Existence snapshot: live resources of one partition, keyed by identity

use crate::client::DeviceClient;
use crate::error::{Error, Result};
use crate::partition::list_partitions;
use crate::types::{ConfigTree, FOLDER_KIND, ResourceKey};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Kind roots whose resources are looked up on the device
pub const QUERIED_ROOTS: [&str; 3] = ["sys", "ltm", "net"];

/// Whether live resources of `kind` are part of the snapshot
pub fn is_queried(kind: &str) -> bool {
    kind.split('/')
        .next()
        .is_some_and(|root| QUERIED_ROOTS.contains(&root))
}

/// Live resources of one partition
///
/// Built fresh for every planning call and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExistenceSnapshot {
    kinds: BTreeMap<String, BTreeMap<ResourceKey, Map<String, Value>>>,
}

impl ExistenceSnapshot {
    /// An empty snapshot, as if nothing existed on the device
    pub fn empty() -> Self {
        Self::default()
    }

    /// Query the device for live resources of `kinds` in `partition`
    ///
    /// Returns an empty snapshot when the partition does not exist.
    pub fn capture(client: &dyn DeviceClient, partition: &str, kinds: &[String]) -> Result<Self> {
        let partitions = list_partitions(client)?;
        if !partitions.iter().any(|p| p == partition) {
            log::debug!(
                "partition {partition} not found on {}, nothing exists yet",
                client.url()
            );
            return Ok(Self::empty());
        }

        let mut snapshot = Self::empty();
        for kind in kinds.iter().filter(|k| is_queried(k)) {
            let resp = client.list(kind, Some(partition)).map_err(|e| {
                Error::retrieval(format!("failed to list '{kind}' of {partition}: {e}"))
            })?;
            snapshot.absorb(kind, partition, &resp)?;
        }
        log::debug!(
            "captured {} live resources of {partition} from {}",
            snapshot.len(),
            client.url()
        );
        Ok(snapshot)
    }

    /// Build a snapshot from saved listings (`kind -> {"items": [...]}`)
    pub fn from_listings(partition: &str, listings: &BTreeMap<String, Value>) -> Result<Self> {
        let mut snapshot = Self::empty();
        for (kind, resp) in listings.iter().filter(|(k, _)| is_queried(k)) {
            snapshot.absorb(kind, partition, resp)?;
        }
        Ok(snapshot)
    }

    /// Index the items of one listing response
    fn absorb(&mut self, kind: &str, partition: &str, resp: &Value) -> Result<()> {
        let items = resp
            .get("items")
            .ok_or_else(|| Error::retrieval(format!("failed to get items from '{kind}' response")))?
            .as_array()
            .ok_or_else(|| Error::retrieval(format!("items of '{kind}' is not a list")))?;

        let entries = self.kinds.entry(kind.to_string()).or_default();
        for item in items {
            let props = item
                .as_object()
                .ok_or_else(|| Error::retrieval(format!("item of '{kind}' is not an object")))?;
            let name = props
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::retrieval(format!("item of '{kind}' has no name")))?;
            let subfolder = props.get("subPath").and_then(Value::as_str).unwrap_or("");
            entries.insert(ResourceKey::new(partition, subfolder, name), props.clone());
        }
        Ok(())
    }

    /// Record a live resource
    pub fn insert(&mut self, kind: &str, key: ResourceKey, props: Map<String, Value>) {
        self.kinds
            .entry(kind.to_string())
            .or_default()
            .insert(key, props);
    }

    /// Live properties of a resource, if it exists
    pub fn get(&self, kind: &str, key: &ResourceKey) -> Option<&Map<String, Value>> {
        self.kinds.get(kind).and_then(|entries| entries.get(key))
    }

    /// Whether a resource exists
    pub fn contains(&self, kind: &str, key: &ResourceKey) -> bool {
        self.get(kind, key).is_some()
    }

    /// Total number of live resources
    pub fn len(&self) -> usize {
        self.kinds.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Kinds referenced by either config tree, plus folders
pub fn gather_kinds(old: Option<&ConfigTree>, new: Option<&ConfigTree>) -> Vec<String> {
    let mut kinds = BTreeSet::from([FOLDER_KIND.to_string()]);
    for tree in [old, new].into_iter().flatten() {
        for resources in tree.values() {
            for type_path in resources.keys() {
                if let Some((kind, _name)) = type_path.rsplit_once('/') {
                    kinds.insert(kind.to_string());
                }
            }
        }
    }
    kinds.into_iter().collect()
}
