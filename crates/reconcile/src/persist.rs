//! Persisted reconciliation state
//!
//! The last applied spec, the request batch it produced and the partition
//! map are kept on the device itself, in an internal data group. Values are
//! base64 encoded and split into records of at most [`CHUNK_SIZE`]
//! characters, since the device rejects long strings in a single record.

use crate::client::DeviceClient;
use crate::error::{Error, Result};
use crate::types::{ConfigTree, ResourceKey, RestRequest};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Kind of the data group holding the state
pub const DATA_GROUP_KIND: &str = "ltm/data-group/internal";

/// Default partition of the state data groups
pub const DEFAULT_STATE_PARTITION: &str = "cis-c-tenant";

/// Default prefix of the state data group names
pub const DEFAULT_STATE_PREFIX: &str = "f5-kic_";

/// Maximum characters per record
pub const CHUNK_SIZE: usize = 1024;

const CLIENT_KEY_RECORD: &str = "cmkey";
const SPEC_RECORD: &str = "as3";
const REQUESTS_RECORD: &str = "rest";
const PARTITION_MAP_RECORD: &str = "psmap";

/// State of one client as persisted on the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfig {
    /// Key of the client that owns the state
    pub client_key: String,
    /// Serialized spec applied last
    pub spec: String,
    /// Serialized request batch applied last
    pub requests: String,
    /// Partition bookkeeping of the client
    pub partition_map: Map<String, Value>,
}

impl PersistedConfig {
    /// Config tree of the last applied spec, `None` when nothing was applied
    pub fn applied_tree(&self) -> Result<Option<ConfigTree>> {
        if self.spec.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&self.spec)
            .map_err(|e| Error::Persistence(format!("stored spec is not a config tree: {e}")))
    }
}

/// Where persisted state lives on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStore {
    pub partition: String,
    pub prefix: String,
}

impl Default for StateStore {
    fn default() -> Self {
        Self {
            partition: DEFAULT_STATE_PARTITION.to_string(),
            prefix: DEFAULT_STATE_PREFIX.to_string(),
        }
    }
}

impl StateStore {
    pub fn new(partition: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            prefix: prefix.into(),
        }
    }

    /// Data group name for `key`
    pub fn record_name(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn resource_key(&self, key: &str) -> ResourceKey {
        ResourceKey::new(&self.partition, "", self.record_name(key))
    }

    /// Load the state stored under `key`, `None` when nothing is stored
    pub fn load(&self, client: &dyn DeviceClient, key: &str) -> Result<Option<PersistedConfig>> {
        let rkey = self.resource_key(key);
        let Some(props) = client
            .fetch(DATA_GROUP_KIND, &rkey)
            .map_err(|e| Error::Persistence(format!("failed to fetch {rkey}: {e}")))?
        else {
            log::debug!("no persisted state at {rkey}");
            return Ok(None);
        };

        // The device omits the field for a data group without records.
        let records = match props.get("records") {
            None => return Ok(Some(PersistedConfig::default())),
            Some(records) => records
                .as_array()
                .ok_or_else(|| Error::Persistence(format!("records of {rkey} is not a list")))?,
        };
        decode_records(records).map(Some)
    }

    /// Store `config` under `key`, creating or replacing the data group
    pub fn save(&self, client: &dyn DeviceClient, key: &str, config: &PersistedConfig) -> Result<()> {
        let rkey = self.resource_key(key);
        let records = encode_records(config)?;
        let body = json!({
            "name": rkey.name,
            "type": "string",
            "partition": self.partition,
            "records": records,
        });

        let exists = client
            .fetch(DATA_GROUP_KIND, &rkey)
            .map_err(|e| Error::Persistence(format!("failed to fetch {rkey}: {e}")))?
            .is_some();
        let result = if exists {
            client.update(DATA_GROUP_KIND, &rkey, &body)
        } else {
            client.create(DATA_GROUP_KIND, &body)
        };
        result.map_err(|e| Error::Persistence(format!("failed to store {rkey}: {e}")))?;
        log::debug!("persisted state at {rkey}");
        Ok(())
    }

    /// Remove the state stored under `key`, if any
    pub fn delete(&self, client: &dyn DeviceClient, key: &str) -> Result<()> {
        let rkey = self.resource_key(key);
        let exists = client
            .fetch(DATA_GROUP_KIND, &rkey)
            .map_err(|e| Error::Persistence(format!("failed to fetch {rkey}: {e}")))?
            .is_some();
        if exists {
            client
                .remove(DATA_GROUP_KIND, &rkey)
                .map_err(|e| Error::Persistence(format!("failed to remove {rkey}: {e}")))?;
        }
        Ok(())
    }
}

/// Where a deployment records what it applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub store: StateStore,
    /// Client key the state is stored under
    pub key: String,
}

impl StateRecord {
    pub fn new(store: StateStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Store `applied` and the batch that converged the device to it
    ///
    /// The partition map of any previously stored state is kept.
    pub fn save(
        &self,
        client: &dyn DeviceClient,
        applied: Option<&ConfigTree>,
        batch: &[RestRequest],
    ) -> Result<()> {
        let previous = self.store.load(client, &self.key)?.unwrap_or_default();
        let config = PersistedConfig {
            client_key: self.key.clone(),
            spec: serde_json::to_string(&applied)?,
            requests: serde_json::to_string(batch)?,
            partition_map: previous.partition_map,
        };
        self.store.save(client, &self.key, &config)
    }
}

/// Data group records for `config`
pub fn encode_records(config: &PersistedConfig) -> Result<Vec<Value>> {
    let mut records = Vec::new();
    if !config.client_key.is_empty() {
        records.push(json!({"name": CLIENT_KEY_RECORD, "data": config.client_key}));
    }

    let partition_map = if config.partition_map.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&config.partition_map)?
    };
    for (prefix, value) in [
        (SPEC_RECORD, config.spec.as_str()),
        (REQUESTS_RECORD, config.requests.as_str()),
        (PARTITION_MAP_RECORD, partition_map.as_str()),
    ] {
        if value.is_empty() {
            continue;
        }
        let encoded = STANDARD.encode(value);
        for (i, chunk) in chunks(&encoded, CHUNK_SIZE).enumerate() {
            records.push(json!({"name": format!("{prefix}.{i}"), "data": chunk}));
        }
    }
    Ok(records)
}

/// Rebuild a config from data group records in any order
pub fn decode_records(records: &[Value]) -> Result<PersistedConfig> {
    let mut config = PersistedConfig::default();
    let mut parts: BTreeMap<&str, BTreeMap<u32, &str>> = BTreeMap::new();

    for record in records {
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Persistence("record without name".to_string()))?;
        let data = record.get("data").and_then(Value::as_str).unwrap_or("");

        if name == CLIENT_KEY_RECORD {
            config.client_key = data.to_string();
            continue;
        }
        let (prefix, index) = name
            .split_once('.')
            .and_then(|(prefix, index)| Some((prefix, index.parse::<u32>().ok()?)))
            .filter(|(prefix, _)| {
                [SPEC_RECORD, REQUESTS_RECORD, PARTITION_MAP_RECORD].contains(prefix)
            })
            .ok_or_else(|| Error::Persistence(format!("invalid unknown key: {name}")))?;
        parts.entry(prefix).or_default().insert(index, data);
    }

    let joined = |prefix: &str| -> Result<String> {
        let encoded: String = parts
            .get(prefix)
            .map(|chunks| chunks.values().copied().collect())
            .unwrap_or_default();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Persistence(format!("invalid base64 in {prefix} records: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Persistence(format!("invalid text in {prefix} records: {e}")))
    };

    config.spec = joined(SPEC_RECORD)?;
    config.requests = joined(REQUESTS_RECORD)?;
    let partition_map = joined(PARTITION_MAP_RECORD)?;
    if !partition_map.is_empty() {
        config.partition_map = serde_json::from_str(&partition_map)?;
    }
    Ok(config)
}

/// Split ASCII text into pieces of at most `size` characters
fn chunks(text: &str, size: usize) -> impl Iterator<Item = &str> {
    (0..text.len())
        .step_by(size)
        .map(move |start| &text[start..text.len().min(start + size)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn sample(spec_len: usize) -> PersistedConfig {
        let mut partition_map = Map::new();
        partition_map.insert("tenant".to_string(), json!({"owner": "cluster-a"}));
        PersistedConfig {
            client_key: "cluster-a".to_string(),
            spec: "x".repeat(spec_len),
            requests: r#"[{"method":"POST"}]"#.to_string(),
            partition_map,
        }
    }

    #[test]
    fn test_record_layout() {
        let records = encode_records(&sample(10)).unwrap();
        let names: Vec<&str> = records
            .iter()
            .filter_map(|r| r["name"].as_str())
            .collect();
        assert_eq!(names, vec!["cmkey", "as3.0", "rest.0", "psmap.0"]);
        assert_eq!(records[0]["data"], "cluster-a");
        assert_eq!(records[1]["data"], STANDARD.encode("x".repeat(10)));
    }

    #[test]
    fn test_many_chunks_in_device_order() {
        let config = sample(12_000);
        let mut records = encode_records(&config).unwrap();
        let spec_chunks = records
            .iter()
            .filter(|r| r["name"].as_str().is_some_and(|n| n.starts_with("as3.")))
            .count();
        assert!(spec_chunks > 10);
        assert!(records.iter().all(|r| r["data"].as_str().is_some_and(|d| d.len() <= CHUNK_SIZE)));

        // Devices hand records back sorted by name: as3.0, as3.1, as3.10, ...
        records.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        assert_eq!(decode_records(&records).unwrap(), config);
    }

    #[test]
    fn test_unknown_record_rejected() {
        let records = vec![json!({"name": "bogus.0", "data": ""})];
        let err = decode_records(&records).unwrap_err();
        assert!(err.to_string().contains("bogus.0"));

        let records = vec![json!({"name": "as3.first", "data": ""})];
        assert!(decode_records(&records).is_err());
    }

    #[test]
    fn test_chunks() {
        let pieces: Vec<&str> = chunks("abcdefg", 3).collect();
        assert_eq!(pieces, vec!["abc", "def", "g"]);
        assert_eq!(chunks("", 3).count(), 0);
    }

    #[test]
    fn test_applied_tree() {
        let mut config = PersistedConfig::default();
        assert_eq!(config.applied_tree().unwrap(), None);

        config.spec = "null".to_string();
        assert_eq!(config.applied_tree().unwrap(), None);

        config.spec = r#"{"app": {"ltm/pool/web": {}}}"#.to_string();
        let tree = config.applied_tree().unwrap().unwrap();
        assert!(tree["app"].contains_key("ltm/pool/web"));

        config.spec = "[1, 2]".to_string();
        assert!(matches!(config.applied_tree(), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_state_record_keeps_partition_map() {
        let device = MockDevice::new("https://lb1");
        let record = StateRecord::new(StateStore::default(), "cluster-a");
        record.store.save(&device, "cluster-a", &sample(10)).unwrap();

        let applied: ConfigTree = serde_json::from_value(json!({"": {"ltm/pool/p1": {}}})).unwrap();
        let batch = vec![RestRequest::managed("ltm/pool", "p1", "tenant", "", json!({}))];
        record.save(&device, Some(&applied), &batch).unwrap();

        let stored = record.store.load(&device, "cluster-a").unwrap().unwrap();
        assert_eq!(stored.client_key, "cluster-a");
        assert_eq!(stored.applied_tree().unwrap(), Some(applied));
        assert_eq!(stored.partition_map, sample(10).partition_map);
        let requests: Vec<RestRequest> = serde_json::from_str(&stored.requests).unwrap();
        assert_eq!(requests, batch);
    }

    #[test]
    fn test_store_lifecycle() {
        let device = MockDevice::new("https://lb1");
        let store = StateStore::default();
        assert_eq!(store.load(&device, "main").unwrap(), None);

        let config = sample(3000);
        store.save(&device, "main", &config).unwrap();
        let key = ResourceKey::new("cis-c-tenant", "", "f5-kic_main");
        assert!(device.resource(DATA_GROUP_KIND, &key).is_some());
        assert_eq!(store.load(&device, "main").unwrap(), Some(config.clone()));

        let mut updated = config;
        updated.spec = "{}".to_string();
        store.save(&device, "main", &updated).unwrap();
        assert_eq!(store.load(&device, "main").unwrap(), Some(updated));
        assert_eq!(device.count(DATA_GROUP_KIND), 1);

        store.delete(&device, "main").unwrap();
        assert_eq!(store.load(&device, "main").unwrap(), None);
        store.delete(&device, "main").unwrap();
    }
}
