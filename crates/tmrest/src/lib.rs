//! # tmrest
//!
//! Blocking HTTP transport for iControl REST shaped management APIs.
//!
//! [`Client`] implements [`reconcile::DeviceClient`] on top of `ureq`:
//! basic authentication, optional TLS verification bypass for appliances
//! with self-signed certificates, transaction coordination and retries for
//! idempotent reads.
//!
//! ```no_run
//! use reconcile::DeviceClient;
//! use tmrest::Client;
//!
//! let client = Client::new("https://10.1.1.4", "admin", "secret", true);
//! let pools = client.list("ltm/pool", Some("tenant")).unwrap();
//! println!("{pools}");
//! ```

pub mod error;
pub mod retry;

pub use error::ErrorCategory;
pub use retry::{RetryConfig, with_retry};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reconcile::{
    CallResult, DeviceClient, Method, Payload, ResourceKey, RestRequest, TransactionId,
    TransportError,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Header tying a request to an open transaction.
pub const COORDINATION_HEADER: &str = "X-F5-REST-Coordination-Id";

/// Endpoint for opening and committing transactions.
const TRANSACTION_URI: &str = "/mgmt/tm/transaction";

/// Endpoint for running shell commands.
const BASH_URI: &str = "/mgmt/tm/util/bash";

/// Overall timeout of one HTTP exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type HttpResult = Result<ureq::http::Response<ureq::Body>, ureq::Error>;

/// HTTP client for one device.
pub struct Client {
    agent: ureq::Agent,
    url: String,
    auth: String,
    retry: RetryConfig,
}

impl Client {
    /// Create a client for the device at `url`.
    ///
    /// With `insecure`, TLS certificates are not verified.
    #[must_use]
    pub fn new(url: &str, username: &str, password: &str, insecure: bool) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(insecure)
                    .build(),
            )
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            url: url.trim_end_matches('/').to_string(),
            auth: basic_auth(username, password),
            retry: RetryConfig::default(),
        }
    }

    /// Use a custom retry policy for reads.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, uri: &str) -> String {
        format!("{}{uri}", self.url)
    }

    fn get(&self, uri: &str) -> CallResult<Value> {
        let url = self.endpoint(uri);
        with_retry(&self.retry, &url, || {
            log::trace!("GET {url}");
            let result = self
                .agent
                .get(&url)
                .header("Authorization", &self.auth)
                .header("Accept", "application/json")
                .call();
            read_response(result)
        })
    }

    fn post_json(
        &self,
        uri: &str,
        body: &Value,
        transaction: Option<TransactionId>,
    ) -> CallResult<Value> {
        let url = self.endpoint(uri);
        log::trace!("POST {url}");
        let builder = self.agent.post(&url).header("Authorization", &self.auth);
        read_response(coordinated(builder, transaction).send_json(body))
    }

    fn patch_json(
        &self,
        uri: &str,
        body: &Value,
        transaction: Option<TransactionId>,
    ) -> CallResult<Value> {
        let url = self.endpoint(uri);
        log::trace!("PATCH {url}");
        let builder = self.agent.patch(&url).header("Authorization", &self.auth);
        read_response(coordinated(builder, transaction).send_json(body))
    }

    fn delete(&self, uri: &str, transaction: Option<TransactionId>) -> CallResult<Value> {
        let url = self.endpoint(uri);
        log::trace!("DELETE {url}");
        let builder = self.agent.delete(&url).header("Authorization", &self.auth);
        read_response(coordinated(builder, transaction).call())
    }

    fn upload(&self, request: &RestRequest, content: &str) -> CallResult<Value> {
        let url = self.endpoint(&request.uri);
        log::trace!("POST {url} ({} bytes)", content.len());
        let mut builder = self.agent.post(&url).header("Authorization", &self.auth);
        for (name, value) in &request.headers {
            // Set by the agent from the body.
            if name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        read_response(builder.send(content))
    }
}

impl DeviceClient for Client {
    fn url(&self) -> &str {
        &self.url
    }

    fn list(&self, kind: &str, partition: Option<&str>) -> CallResult<Value> {
        self.get(&list_uri(kind, partition))
    }

    fn fetch(&self, kind: &str, key: &ResourceKey) -> CallResult<Option<Map<String, Value>>> {
        match self.get(&resource_uri(&format!("/mgmt/tm/{kind}"), key)) {
            Ok(Value::Object(props)) => Ok(Some(props)),
            Ok(other) => Err(TransportError::new(
                format!("unexpected response for {kind} {key}: {other}"),
                None,
            )),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create(&self, kind: &str, body: &Value) -> CallResult<()> {
        self.post_json(&format!("/mgmt/tm/{kind}"), body, None)
            .map(|_| ())
    }

    fn update(&self, kind: &str, key: &ResourceKey, body: &Value) -> CallResult<()> {
        self.patch_json(&resource_uri(&format!("/mgmt/tm/{kind}"), key), body, None)
            .map(|_| ())
    }

    fn remove(&self, kind: &str, key: &ResourceKey) -> CallResult<()> {
        self.delete(&resource_uri(&format!("/mgmt/tm/{kind}"), key), None)
            .map(|_| ())
    }

    fn begin_transaction(&self) -> CallResult<TransactionId> {
        let resp = self.post_json(TRANSACTION_URI, &json!({}), None)?;
        let opened: TransactionResponse = serde_json::from_value(resp).map_err(|e| {
            TransportError::new(format!("invalid transaction response: {e}"), None)
        })?;
        Ok(TransactionId(opened.trans_id))
    }

    fn send(&self, request: &RestRequest, transaction: Option<TransactionId>) -> CallResult<()> {
        let key = request.key();
        let result = match (request.method, &request.body) {
            (Method::Noop, _) => return Ok(()),
            (Method::Post, Payload::Raw(content)) => self.upload(request, content),
            (Method::Post, Payload::Json(body)) if is_collection(request) => {
                self.post_json(&request.uri, &with_identity(body, &key), transaction)
            }
            (Method::Post, Payload::Json(body)) => self.post_json(&request.uri, body, transaction),
            (Method::Patch, Payload::Json(body)) => {
                self.patch_json(&resource_uri(&request.uri, &key), body, transaction)
            }
            (Method::Delete, _) => self.delete(&resource_uri(&request.uri, &key), transaction),
            (Method::Patch, Payload::Raw(_)) => {
                return Err(TransportError::new(
                    format!("cannot send raw content with {}", request.label()),
                    None,
                ));
            }
        };
        result.map(|_| ())
    }

    fn commit_transaction(&self, transaction: TransactionId) -> CallResult<()> {
        self.patch_json(
            &format!("{TRANSACTION_URI}/{transaction}"),
            &json!({"state": "VALIDATING"}),
            None,
        )
        .map(|_| ())
    }

    fn run_command(&self, command: &str) -> CallResult<Value> {
        self.post_json(BASH_URI, &tmsh_body(command), None)
    }
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(rename = "transId")]
    trans_id: u64,
}

fn coordinated<B>(
    builder: ureq::RequestBuilder<B>,
    transaction: Option<TransactionId>,
) -> ureq::RequestBuilder<B> {
    match transaction {
        Some(id) => builder.header(COORDINATION_HEADER, id.to_string()),
        None => builder,
    }
}

/// Turn an HTTP exchange into the JSON body or a transport error.
fn read_response(result: HttpResult) -> CallResult<Value> {
    let mut response = result.map_err(error::from_ureq)?;
    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(error::from_ureq)?;

    if !response.status().is_success() {
        return Err(error::from_status(status, &text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| TransportError::new(format!("invalid JSON response: {e}"), Some(status)))
}

/// `Authorization` header value for basic authentication.
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Collection URI of `kind`, optionally filtered by partition.
pub fn list_uri(kind: &str, partition: Option<&str>) -> String {
    match partition {
        Some(p) => format!("/mgmt/tm/{kind}?$filter=partition+eq+{p}"),
        None => format!("/mgmt/tm/{kind}"),
    }
}

/// URI of one resource below a collection URI.
pub fn resource_uri(collection: &str, key: &ResourceKey) -> String {
    format!("{collection}/{}", key.tilde_path())
}

/// Whether `request` targets the collection of its own kind.
fn is_collection(request: &RestRequest) -> bool {
    request
        .uri
        .strip_prefix("/mgmt/tm/")
        .is_some_and(|kind| kind == request.kind)
}

/// Body for a create, with the identity fields the device expects.
///
/// Fields already present in `body` are kept.
pub fn with_identity(body: &Value, key: &ResourceKey) -> Value {
    let Value::Object(fields) = body else {
        return body.clone();
    };
    let mut fields = fields.clone();
    fields
        .entry("name")
        .or_insert_with(|| Value::String(key.name.clone()));
    if !key.partition.is_empty() {
        fields
            .entry("partition")
            .or_insert_with(|| Value::String(key.partition.clone()));
    }
    if !key.subfolder.is_empty() {
        fields
            .entry("subPath")
            .or_insert_with(|| Value::String(key.subfolder.clone()));
    }
    Value::Object(fields)
}

/// Body running `command` through tmsh.
pub fn tmsh_body(command: &str) -> Value {
    json!({
        "command": "run",
        "utilCmdArgs": format!("-c \"tmsh -c '{command}'\""),
    })
}
