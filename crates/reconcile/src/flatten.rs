//! Request synthesis: flatten a config tree into per-kind requests

use crate::error::{Error, Result};
use crate::snapshot::ExistenceSnapshot;
use crate::types::{
    ConfigTree, FOLDER_KIND, KindMap, Method, Operation, Payload, ResourceKey, RestRequest,
    Schedule, UPLOAD_KIND,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Requests derived from one config tree
#[derive(Debug, Clone, Default)]
pub struct Synthesized {
    /// One request per non-root folder
    pub folders: Vec<RestRequest>,
    /// Leaf requests grouped by kind
    pub resources: KindMap,
}

/// Flatten `tree` into requests for `operation`, resolving methods against the snapshot
pub fn synthesize(
    partition: &str,
    operation: Operation,
    tree: &ConfigTree,
    snapshot: &ExistenceSnapshot,
) -> Result<Synthesized> {
    log::debug!("generating {operation:?} requests for partition {partition}");
    let mut out = Synthesized::default();

    for (folder, resources) in tree {
        if !folder.is_empty() {
            let mut r = folder_request(folder, partition);
            let live = snapshot.contains(FOLDER_KIND, &ResourceKey::new(partition, "", folder));
            r.method = Method::resolve(operation, live);
            out.folders.push(r);
        }

        for (type_path, body) in resources {
            let (kind, name) = split_type_path(type_path)?;
            let root = kind.split('/').next().unwrap_or(kind);
            let request = match root {
                "ltm" | "net" | "sys" => {
                    let mut r = RestRequest::managed(kind, name, partition, folder, body.clone());
                    let live =
                        snapshot.contains(kind, &ResourceKey::new(partition, folder.as_str(), name));
                    r.method = Method::resolve(operation, live);
                    r
                }
                "shared" => shared_request(kind, name, partition, folder, body, operation)?,
                _ => return Err(Error::UnsupportedKind(format!("root kind {root} of {type_path}"))),
            };

            let queue = out.resources.entry(kind.to_string()).or_default();
            if request.schedule.is_some() {
                log::debug!("leaving {} to the device", request.label());
            } else {
                queue.push(request);
            }
        }
    }
    Ok(out)
}

/// Split `ltm/pool/p1` into kind `ltm/pool` and name `p1`
pub fn split_type_path(type_path: &str) -> Result<(&str, &str)> {
    match type_path.rsplit_once('/') {
        Some((kind, name)) if !kind.is_empty() && !name.is_empty() => Ok((kind, name)),
        _ => Err(Error::MalformedConfig(format!(
            "'{type_path}' is not of the form <kind>/<name>"
        ))),
    }
}

fn folder_request(name: &str, partition: &str) -> RestRequest {
    RestRequest::managed(
        FOLDER_KIND,
        name,
        partition,
        "",
        json!({"name": name, "partition": partition}),
    )
}

fn shared_request(
    kind: &str,
    name: &str,
    partition: &str,
    subfolder: &str,
    body: &Value,
    operation: Operation,
) -> Result<RestRequest> {
    if kind != UPLOAD_KIND {
        return Err(Error::UnsupportedKind(kind.to_string()));
    }

    match operation {
        Operation::Deploy => {
            let content = body
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::MalformedConfig(format!("upload {name} has no string 'content'"))
                })?;
            Ok(upload_request(name, partition, subfolder, content))
        }
        // Uploaded files are cleaned up by the device itself.
        Operation::Delete => Ok(RestRequest {
            method: Method::Post,
            body: Payload::Json(json!({
                "command": "run",
                "utilCmdArgs": format!("-c 'rm -f /var/config/rest/downloads/{name}'"),
            })),
            uri: "/mgmt/tm/util/bash".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            partition: partition.to_string(),
            subfolder: subfolder.to_string(),
            headers: BTreeMap::new(),
            with_trans: false,
            schedule: Some(Schedule::Never),
        }),
    }
}

/// Direct upload of raw content with byte-accurate range headers
pub fn upload_request(name: &str, partition: &str, subfolder: &str, content: &str) -> RestRequest {
    let size = content.len();
    let headers = BTreeMap::from([
        (
            "Content-Type".to_string(),
            "application/octet-stream".to_string(),
        ),
        ("Content-Length".to_string(), size.to_string()),
        (
            "Content-Range".to_string(),
            format!("0-{}/{size}", size.saturating_sub(1)),
        ),
    ]);
    RestRequest {
        method: Method::Post,
        body: Payload::Raw(content.to_string()),
        uri: format!("/mgmt/{UPLOAD_KIND}/{name}"),
        kind: UPLOAD_KIND.to_string(),
        name: name.to_string(),
        partition: partition.to_string(),
        subfolder: subfolder.to_string(),
        headers,
        with_trans: false,
        schedule: None,
    }
}
