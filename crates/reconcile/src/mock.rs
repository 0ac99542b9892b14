//! In-memory device for tests and offline runs
//!
//! [`MockDevice`] keeps resources in memory, applies transactions atomically
//! on commit and records every call, so tests can assert both the resulting
//! state and the exact request sequence.
//!
//! ```
//! use reconcile::mock::MockDevice;
//! use reconcile::{DeviceClient, ResourceKey};
//! use serde_json::json;
//!
//! let device = MockDevice::new("https://lb1");
//! device.add_partition("tenant");
//! device.insert("ltm/pool", ResourceKey::new("tenant", "", "p1"), json!({"members": []}));
//!
//! let pool = device.fetch("ltm/pool", &ResourceKey::new("tenant", "", "p1")).unwrap();
//! assert!(pool.is_some());
//! ```

use crate::client::{CallResult, DeviceClient, TransactionId};
use crate::error::TransportError;
use crate::types::{FOLDER_KIND, Method, Payload, ResourceKey, RestRequest, UPLOAD_KIND};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A call received by the mock, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List {
        kind: String,
        partition: Option<String>,
    },
    Fetch {
        kind: String,
        key: ResourceKey,
    },
    Create {
        kind: String,
    },
    Update {
        kind: String,
        key: ResourceKey,
    },
    Remove {
        kind: String,
        key: ResourceKey,
    },
    Begin(TransactionId),
    Send {
        request: String,
        transaction: Option<TransactionId>,
    },
    Commit(TransactionId),
    Command(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Failure {
    List(String),
    Create(String),
    Send(String),
    Begin,
    Commit,
}

type Store = BTreeMap<String, BTreeMap<ResourceKey, Map<String, Value>>>;

#[derive(Debug, Default)]
struct State {
    resources: Store,
    uploads: BTreeMap<String, String>,
    listings: BTreeMap<String, Value>,
    pending: BTreeMap<u64, Vec<RestRequest>>,
    next_transaction: u64,
    failures: Vec<Failure>,
    calls: Vec<Call>,
}

/// Device double holding its configuration in memory
#[derive(Debug)]
pub struct MockDevice {
    url: String,
    state: Mutex<State>,
}

impl MockDevice {
    /// Create an empty device
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(State {
                next_transaction: 1,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a partition
    pub fn add_partition(&self, name: &str) {
        let key = ResourceKey::new("", "", name);
        let props = stored_props(FOLDER_KIND, &key, &json!({}));
        self.state()
            .resources
            .entry(FOLDER_KIND.to_string())
            .or_default()
            .insert(key, props);
    }

    /// Add a live resource; identity fields are filled in from `key`
    pub fn insert(&self, kind: &str, key: ResourceKey, body: Value) {
        let props = stored_props(kind, &key, &body);
        self.state()
            .resources
            .entry(kind.to_string())
            .or_default()
            .insert(key, props);
    }

    /// Serve a fixed response for every listing of `kind`
    pub fn set_listing(&self, kind: &str, response: Value) {
        self.state().listings.insert(kind.to_string(), response);
    }

    /// Live properties of a resource
    pub fn resource(&self, kind: &str, key: &ResourceKey) -> Option<Map<String, Value>> {
        self.state()
            .resources
            .get(kind)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    /// Number of live resources of `kind`
    pub fn count(&self, kind: &str) -> usize {
        self.state().resources.get(kind).map_or(0, BTreeMap::len)
    }

    /// Uploaded file content by name
    pub fn upload(&self, name: &str) -> Option<String> {
        self.state().uploads.get(name).cloned()
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Fail every listing of `kind`
    pub fn fail_on_list(&self, kind: &str) {
        self.state().failures.push(Failure::List(kind.to_string()));
    }

    /// Fail every direct create of `kind`
    pub fn fail_on_create(&self, kind: &str) {
        self.state().failures.push(Failure::Create(kind.to_string()));
    }

    /// Fail sending any request for a resource called `name`
    pub fn fail_on_send(&self, name: &str) {
        self.state().failures.push(Failure::Send(name.to_string()));
    }

    /// Fail opening transactions
    pub fn fail_on_begin(&self) {
        self.state().failures.push(Failure::Begin);
    }

    /// Fail committing transactions
    pub fn fail_on_commit(&self) {
        self.state().failures.push(Failure::Commit);
    }
}

fn injected(what: &str) -> TransportError {
    TransportError::new(format!("injected failure: {what}"), Some(500))
}

fn not_found(kind: &str, key: &ResourceKey) -> TransportError {
    TransportError::new(format!("{kind} {key} not found"), Some(404))
}

/// Properties as the device would report them
fn stored_props(kind: &str, key: &ResourceKey, body: &Value) -> Map<String, Value> {
    let mut props = body.as_object().cloned().unwrap_or_default();
    props.insert("name".to_string(), Value::String(key.name.clone()));
    if !key.partition.is_empty() {
        props.insert(
            "partition".to_string(),
            Value::String(key.partition.clone()),
        );
    }
    if !key.subfolder.is_empty() {
        props.insert("subPath".to_string(), Value::String(key.subfolder.clone()));
    }
    props.insert("fullPath".to_string(), Value::String(key.to_string()));
    if kind == FOLDER_KIND {
        props.remove("subPath");
    }
    props
}

/// Identity of a resource created from a bare body
fn key_from_body(body: &Value) -> ResourceKey {
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };
    let partition = field("partition");
    let partition = if partition == "/" {
        String::new()
    } else {
        partition
    };
    ResourceKey::new(partition, field("subPath"), field("name"))
}

fn apply(store: &mut Store, uploads: &mut BTreeMap<String, String>, request: &RestRequest) -> CallResult<()> {
    if request.kind == UPLOAD_KIND {
        if let Payload::Raw(content) = &request.body {
            uploads.insert(request.name.clone(), content.clone());
        }
        return Ok(());
    }

    let key = request.key();
    let body = request.body.as_json().cloned().unwrap_or(Value::Null);
    let entries = store.entry(request.kind.clone()).or_default();
    match request.method {
        Method::Noop => Ok(()),
        Method::Post => {
            if entries.contains_key(&key) {
                return Err(TransportError::new(
                    format!("{} {key} already exists", request.kind),
                    Some(409),
                ));
            }
            entries.insert(key.clone(), stored_props(&request.kind, &key, &body));
            Ok(())
        }
        Method::Patch => {
            let props = entries
                .get_mut(&key)
                .ok_or_else(|| not_found(&request.kind, &key))?;
            if let Some(fields) = body.as_object() {
                for (k, v) in fields {
                    props.insert(k.clone(), v.clone());
                }
            }
            Ok(())
        }
        Method::Delete => entries
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| not_found(&request.kind, &key)),
    }
}

impl DeviceClient for MockDevice {
    fn url(&self) -> &str {
        &self.url
    }

    fn list(&self, kind: &str, partition: Option<&str>) -> CallResult<Value> {
        let mut state = self.state();
        state.calls.push(Call::List {
            kind: kind.to_string(),
            partition: partition.map(str::to_string),
        });
        if state.failures.contains(&Failure::List(kind.to_string())) {
            return Err(injected(kind));
        }
        if let Some(fixed) = state.listings.get(kind) {
            return Ok(fixed.clone());
        }

        let items: Vec<Value> = state
            .resources
            .get(kind)
            .into_iter()
            .flat_map(|entries| entries.iter())
            .filter(|(key, _)| partition.is_none_or(|p| key.partition == p))
            .map(|(_, props)| Value::Object(props.clone()))
            .collect();
        Ok(json!({ "items": items }))
    }

    fn fetch(&self, kind: &str, key: &ResourceKey) -> CallResult<Option<Map<String, Value>>> {
        let mut state = self.state();
        state.calls.push(Call::Fetch {
            kind: kind.to_string(),
            key: key.clone(),
        });
        Ok(state
            .resources
            .get(kind)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn create(&self, kind: &str, body: &Value) -> CallResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Create {
            kind: kind.to_string(),
        });
        if state.failures.contains(&Failure::Create(kind.to_string())) {
            return Err(injected(kind));
        }
        let key = key_from_body(body);
        let entries = state.resources.entry(kind.to_string()).or_default();
        if entries.contains_key(&key) {
            return Err(TransportError::new(
                format!("{kind} {key} already exists"),
                Some(409),
            ));
        }
        entries.insert(key.clone(), stored_props(kind, &key, body));
        Ok(())
    }

    fn update(&self, kind: &str, key: &ResourceKey, body: &Value) -> CallResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Update {
            kind: kind.to_string(),
            key: key.clone(),
        });
        let props = state
            .resources
            .get_mut(kind)
            .and_then(|entries| entries.get_mut(key))
            .ok_or_else(|| not_found(kind, key))?;
        *props = stored_props(kind, key, body);
        Ok(())
    }

    fn remove(&self, kind: &str, key: &ResourceKey) -> CallResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Remove {
            kind: kind.to_string(),
            key: key.clone(),
        });
        state
            .resources
            .get_mut(kind)
            .and_then(|entries| entries.remove(key))
            .map(|_| ())
            .ok_or_else(|| not_found(kind, key))
    }

    fn begin_transaction(&self) -> CallResult<TransactionId> {
        let mut state = self.state();
        if state.failures.contains(&Failure::Begin) {
            return Err(injected("begin transaction"));
        }
        let id = TransactionId(state.next_transaction);
        state.next_transaction += 1;
        state.pending.insert(id.0, Vec::new());
        state.calls.push(Call::Begin(id));
        Ok(id)
    }

    fn send(&self, request: &RestRequest, transaction: Option<TransactionId>) -> CallResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Send {
            request: request.label(),
            transaction,
        });
        if state.failures.contains(&Failure::Send(request.name.clone())) {
            return Err(injected(&request.label()));
        }

        match transaction {
            Some(id) => {
                let queue = state.pending.get_mut(&id.0).ok_or_else(|| {
                    TransportError::new(format!("unknown transaction {id}"), Some(404))
                })?;
                queue.push(request.clone());
                Ok(())
            }
            None => {
                let State {
                    resources, uploads, ..
                } = &mut *state;
                apply(resources, uploads, request)
            }
        }
    }

    fn commit_transaction(&self, transaction: TransactionId) -> CallResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Commit(transaction));
        if state.failures.contains(&Failure::Commit) {
            return Err(injected("commit transaction"));
        }
        let queued = state.pending.remove(&transaction.0).ok_or_else(|| {
            TransportError::new(format!("unknown transaction {transaction}"), Some(404))
        })?;

        // Apply to a copy so a failing request leaves the device untouched.
        let mut resources = state.resources.clone();
        let mut uploads = state.uploads.clone();
        for request in &queued {
            apply(&mut resources, &mut uploads, request)?;
        }
        state.resources = resources;
        state.uploads = uploads;
        Ok(())
    }

    fn run_command(&self, command: &str) -> CallResult<Value> {
        self.state().calls.push(Call::Command(command.to_string()));
        Ok(json!({"command": "run", "utilCmdArgs": command}))
    }
}
