//! Diff & merge: classify requests from both config sides

use crate::document::{deep_equal, fields_satisfied};
use crate::order::ResourceOrder;
use crate::snapshot::ExistenceSnapshot;
use crate::types::{KindMap, Method, Payload, ResourceKey, RestRequest};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Classified requests of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct Sweep {
    pub creates: Vec<RestRequest>,
    /// Already in reverse discovery order
    pub deletes: Vec<RestRequest>,
    pub updates: Vec<RestRequest>,
}

impl Sweep {
    /// Total number of requests
    pub fn len(&self) -> usize {
        self.creates.len() + self.deletes.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a create-side request relates to its delete-side counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Create,
    Update,
    Unchanged,
}

/// Match delete-side against create-side requests and classify each
///
/// Kinds are processed group by group in `order`. A create-side request
/// without counterpart is a create; a counterpart with a different body, or
/// an equal body the live object does not satisfy, makes it an update.
/// Delete-side requests left unmatched are deletions, emitted most recently
/// discovered first. Delete-side requests whose resource is not live are
/// dropped, there is nothing to remove.
pub fn sweep(
    dels: &KindMap,
    crts: &KindMap,
    order: &ResourceOrder,
    snapshot: &ExistenceSnapshot,
) -> Sweep {
    let mut out = Sweep::default();
    let mut discovered_deletes = Vec::new();

    let kinds = dels.keys().chain(crts.keys()).map(String::as_str);
    for group in order.group(kinds) {
        for kind in &group {
            let drs = dels.get(kind).map(Vec::as_slice).unwrap_or_default();
            let crs = crts.get(kind).map(Vec::as_slice).unwrap_or_default();

            let mut unmatched: HashMap<ResourceKey, &RestRequest> =
                drs.iter().map(|dr| (dr.key(), dr)).collect();

            for cr in crs {
                let key = cr.key();
                let Some(dr) = unmatched.remove(&key) else {
                    out.creates.push(cr.clone());
                    continue;
                };

                if dr.method == Method::Noop {
                    let mut cr = cr.clone();
                    cr.method = Method::Post;
                    out.creates.push(cr);
                    continue;
                }

                match classify(dr, cr, snapshot) {
                    Verdict::Create => out.creates.push(cr.clone()),
                    Verdict::Update => {
                        let mut cr = cr.clone();
                        cr.method = Method::Patch;
                        out.updates.push(cr);
                    }
                    Verdict::Unchanged => {
                        log::trace!("{} {} unchanged", cr.kind, key);
                    }
                }
            }

            for dr in drs {
                if unmatched.remove(&dr.key()).is_none() {
                    continue;
                }
                if dr.method == Method::Noop {
                    log::debug!("{} {} is not live, nothing to delete", dr.kind, dr.key());
                    continue;
                }
                discovered_deletes.push(dr.clone());
            }
        }
    }

    discovered_deletes.reverse();
    out.deletes = discovered_deletes;
    out
}

fn classify(dr: &RestRequest, cr: &RestRequest, snapshot: &ExistenceSnapshot) -> Verdict {
    if !bodies_equal(&dr.body, &cr.body) {
        return Verdict::Update;
    }

    match snapshot.get(&cr.kind, &cr.key()) {
        None => Verdict::Create,
        Some(live) => {
            let live = Value::Object(live.clone());
            match cr.body.as_json() {
                Some(desired) if !fields_satisfied(desired, &live) => Verdict::Update,
                _ => Verdict::Unchanged,
            }
        }
    }
}

fn bodies_equal(a: &Payload, b: &Payload) -> bool {
    match (a, b) {
        (Payload::Json(a), Payload::Json(b)) => deep_equal(a, b),
        (Payload::Raw(a), Payload::Raw(b)) => a == b,
        _ => false,
    }
}
