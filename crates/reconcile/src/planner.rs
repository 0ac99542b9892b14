//! Batch planner - turns two config trees into one ordered request batch

use crate::client::DeviceClient;
use crate::diff::sweep;
use crate::error::Result;
use crate::flatten::synthesize;
use crate::order::ResourceOrder;
use crate::snapshot::{ExistenceSnapshot, gather_kinds};
use crate::types::{
    ConfigTree, FOLDER_KIND, KindMap, Method, Operation, RestRequest, VIRTUAL_ADDRESS_KIND,
    VIRTUAL_KIND,
};
use serde_json::Value;

/// Compute the ordered batch converging `partition` from `old` to `new`
///
/// The batch is laid out as folder creates, creates, updates, the isolated
/// virtual pair (deletes then creates), deletes and finally folder deletes.
pub fn plan_requests(
    partition: &str,
    old: Option<&ConfigTree>,
    new: Option<&ConfigTree>,
    snapshot: &ExistenceSnapshot,
    order: &ResourceOrder,
) -> Result<Vec<RestRequest>> {
    let empty = ConfigTree::new();
    let dels = synthesize(partition, Operation::Delete, old.unwrap_or(&empty), snapshot)?;
    let crts = synthesize(partition, Operation::Deploy, new.unwrap_or(&empty), snapshot)?;

    let folders = sweep(
        &KindMap::from([(FOLDER_KIND.to_string(), dels.folders)]),
        &KindMap::from([(FOLDER_KIND.to_string(), crts.folders)]),
        order,
        snapshot,
    );

    let mut rdels = dels.resources;
    let mut rcrts = crts.resources;
    let (pair_deletes, pair_creates) =
        isolate_virtual_pair(&mut rdels, &mut rcrts, order, snapshot);

    let resources = sweep(&rdels, &rcrts, order, snapshot);

    let mut batch = Vec::with_capacity(
        folders.len() + resources.len() + pair_deletes.len() + pair_creates.len(),
    );
    batch.extend(folders.creates);
    batch.extend(resources.creates);
    batch.extend(resources.updates);
    batch.extend(pair_deletes);
    batch.extend(pair_creates);
    batch.extend(resources.deletes);
    batch.extend(folders.deletes);
    Ok(batch)
}

/// Capture the live state of `partition` and plan the batch against it
pub fn gen_rest_requests(
    client: &dyn DeviceClient,
    partition: &str,
    old: Option<&ConfigTree>,
    new: Option<&ConfigTree>,
    order: &ResourceOrder,
) -> Result<Vec<RestRequest>> {
    let kinds = gather_kinds(old, new);
    let snapshot = ExistenceSnapshot::capture(client, partition, &kinds)?;
    let batch = plan_requests(partition, old, new, &snapshot, order)?;

    if log::log_enabled!(log::Level::Debug)
        && let Ok(json) = serde_json::to_string(&batch)
    {
        log::debug!("requests for {partition} on {}: {json}", client.url());
    }
    Ok(batch)
}

/// Whether any virtual address is named differently from its address
///
/// Route domain (`%N`) and mask (`/N`) suffixes are ignored on both sides.
/// A virtual address without an `address` field is addressed by its name.
pub fn virtual_address_renamed<'a>(requests: impl IntoIterator<Item = &'a RestRequest>) -> bool {
    requests.into_iter().any(|r| {
        let address = r
            .body
            .as_json()
            .and_then(|b| b.get("address"))
            .and_then(Value::as_str);
        address.is_some_and(|address| bare_address(&r.name) != bare_address(address))
    })
}

fn bare_address(s: &str) -> &str {
    let s = s.split_once('/').map_or(s, |(head, _)| head);
    s.split_once('%').map_or(s, |(head, _)| head)
}

/// Pull the virtual pair out of the ordinary sweep when an address is renamed
///
/// A virtual server holds on to its address, so a renamed address cannot be
/// patched in place. When the pair has changes, every live virtual and
/// address of the old side is deleted (virtuals first) and every one of the
/// new side is created again (addresses first).
fn isolate_virtual_pair(
    rdels: &mut KindMap,
    rcrts: &mut KindMap,
    order: &ResourceOrder,
    snapshot: &ExistenceSnapshot,
) -> (Vec<RestRequest>, Vec<RestRequest>) {
    let addresses = rdels
        .get(VIRTUAL_ADDRESS_KIND)
        .into_iter()
        .chain(rcrts.get(VIRTUAL_ADDRESS_KIND))
        .flatten();
    if !virtual_address_renamed(addresses) {
        return (Vec::new(), Vec::new());
    }

    let pair = |map: &KindMap| -> KindMap {
        [VIRTUAL_KIND, VIRTUAL_ADDRESS_KIND]
            .into_iter()
            .filter_map(|k| map.get(k).map(|v| (k.to_string(), v.clone())))
            .collect()
    };
    if sweep(&pair(&*rdels), &pair(&*rcrts), order, snapshot).is_empty() {
        return (Vec::new(), Vec::new());
    }
    log::info!("virtual address renamed, recreating virtual servers and addresses");

    let take = |map: &mut KindMap, kind: &str| map.remove(kind).unwrap_or_default();
    let deletes = take(rdels, VIRTUAL_KIND)
        .into_iter()
        .chain(take(rdels, VIRTUAL_ADDRESS_KIND))
        .filter(|r| r.method != Method::Noop)
        .collect();
    let creates = take(rcrts, VIRTUAL_ADDRESS_KIND)
        .into_iter()
        .chain(take(rcrts, VIRTUAL_KIND))
        .map(|mut r| {
            r.method = Method::Post;
            r
        })
        .collect();
    (deletes, creates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice};
    use crate::types::ResourceKey;
    use serde_json::{Map, json};

    fn tree(v: Value) -> ConfigTree {
        serde_json::from_value(v).unwrap()
    }

    fn live(snapshot: &mut ExistenceSnapshot, kind: &str, key: ResourceKey, body: Value) {
        let props: Map<String, Value> = body.as_object().cloned().unwrap_or_default();
        snapshot.insert(kind, key, props);
    }

    fn summary(batch: &[RestRequest]) -> Vec<String> {
        batch.iter().map(RestRequest::label).collect()
    }

    #[test]
    fn test_pool_scenario() {
        let old = tree(json!({"": {"ltm/pool/p1": {"members": ["10.0.0.1:80"]}}}));
        let new = tree(json!({
            "": {"ltm/pool/p1": {"members": ["10.0.0.2:80"]}},
            "sub": {"ltm/pool/p2": {}}
        }));
        let mut snapshot = ExistenceSnapshot::empty();
        live(
            &mut snapshot,
            "ltm/pool",
            ResourceKey::new("t", "", "p1"),
            json!({"members": ["10.0.0.1:80"]}),
        );

        let batch = plan_requests("t", Some(&old), Some(&new), &snapshot, &ResourceOrder::default()).unwrap();
        assert_eq!(
            summary(&batch),
            vec![
                "POST sys/folder /t/sub",
                "POST ltm/pool /t/sub/p2",
                "PATCH ltm/pool /t/p1",
            ]
        );
        assert_eq!(batch[2].body.as_json(), Some(&json!({"members": ["10.0.0.2:80"]})));
    }

    #[test]
    fn test_full_batch_orders_every_phase() {
        let old = tree(json!({
            "": {
                "ltm/pool/upd": {"members": ["10.0.0.1:80"]},
                "ltm/monitor/http/m1": {},
                "ltm/pool/gone": {}
            },
            "old": {"ltm/pool/x": {}}
        }));
        let new = tree(json!({
            "": {"ltm/pool/upd": {"members": ["10.0.0.2:80"]}},
            "fresh": {"ltm/pool/y": {}}
        }));
        let mut snapshot = ExistenceSnapshot::empty();
        live(
            &mut snapshot,
            "ltm/pool",
            ResourceKey::new("t", "", "upd"),
            json!({"members": ["10.0.0.1:80"]}),
        );
        live(&mut snapshot, "ltm/pool", ResourceKey::new("t", "", "gone"), json!({}));
        live(&mut snapshot, "ltm/pool", ResourceKey::new("t", "old", "x"), json!({}));
        live(&mut snapshot, "ltm/monitor/http", ResourceKey::new("t", "", "m1"), json!({}));
        live(&mut snapshot, "sys/folder", ResourceKey::new("t", "", "old"), json!({}));

        let batch = plan_requests("t", Some(&old), Some(&new), &snapshot, &ResourceOrder::default()).unwrap();
        assert_eq!(
            summary(&batch),
            vec![
                "POST sys/folder /t/fresh",
                "POST ltm/pool /t/fresh/y",
                "PATCH ltm/pool /t/upd",
                "DELETE ltm/pool /t/old/x",
                "DELETE ltm/pool /t/gone",
                "DELETE ltm/monitor/http /t/m1",
                "DELETE sys/folder /t/old",
            ]
        );
    }

    #[test]
    fn test_same_config_plans_nothing() {
        let cfg = tree(json!({"app": {"ltm/pool/p1": {"members": []}}}));
        let mut snapshot = ExistenceSnapshot::empty();
        live(&mut snapshot, FOLDER_KIND, ResourceKey::new("t", "", "app"), json!({"name": "app", "partition": "t"}));
        live(&mut snapshot, "ltm/pool", ResourceKey::new("t", "app", "p1"), json!({"members": []}));

        let batch = plan_requests("t", Some(&cfg), Some(&cfg), &snapshot, &ResourceOrder::default()).unwrap();
        assert!(batch.is_empty(), "unexpected requests: {:?}", summary(&batch));
    }

    #[test]
    fn test_teardown_orders_deletes_after_dependents() {
        let old = tree(json!({
            "app": {
                "ltm/monitor/http/m1": {},
                "ltm/pool/p1": {"monitor": "m1"},
                "ltm/virtual/vs": {"pool": "p1"}
            }
        }));
        let mut snapshot = ExistenceSnapshot::empty();
        live(&mut snapshot, FOLDER_KIND, ResourceKey::new("t", "", "app"), json!({}));
        live(&mut snapshot, "ltm/monitor/http", ResourceKey::new("t", "app", "m1"), json!({}));
        live(&mut snapshot, "ltm/pool", ResourceKey::new("t", "app", "p1"), json!({}));
        live(&mut snapshot, "ltm/virtual", ResourceKey::new("t", "app", "vs"), json!({}));

        let batch = plan_requests("t", Some(&old), None, &snapshot, &ResourceOrder::default()).unwrap();
        assert_eq!(
            summary(&batch),
            vec![
                "DELETE ltm/virtual /t/app/vs",
                "DELETE ltm/pool /t/app/p1",
                "DELETE ltm/monitor/http /t/app/m1",
                "DELETE sys/folder /t/app",
            ]
        );
    }

    #[test]
    fn test_creates_respect_dependency_order() {
        let new = tree(json!({
            "": {
                "ltm/virtual/vs": {},
                "ltm/pool/p1": {},
                "ltm/monitor/http/m1": {},
                "net/arp/a1": {}
            }
        }));
        let order = ResourceOrder::default();
        let batch = plan_requests("t", None, Some(&new), &ExistenceSnapshot::empty(), &order).unwrap();
        let ranks: Vec<usize> = batch.iter().map(|r| order.rank(&r.kind)).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{:?}", summary(&batch));
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_virtual_address_renamed() {
        let va = |name: &str, address: Option<&str>| {
            let body = address.map_or_else(|| json!({}), |a| json!({"address": a}));
            RestRequest::managed(VIRTUAL_ADDRESS_KIND, name, "t", "", body)
        };
        assert!(!virtual_address_renamed(&[va("10.0.0.1", Some("10.0.0.1"))]));
        assert!(!virtual_address_renamed(&[va("10.0.0.1%2", Some("10.0.0.1%2/32"))]));
        assert!(!virtual_address_renamed(&[va("anything", None)]));
        assert!(virtual_address_renamed(&[
            va("10.0.0.1", Some("10.0.0.1")),
            va("app_svc_vip", Some("10.0.0.1")),
        ]));
    }

    #[test]
    fn test_virtual_address_rename_is_isolated() {
        let old = tree(json!({
            "": {
                "ltm/pool/p1": {"members": []},
                "ltm/pool/gone": {},
                "ltm/virtual-address/172.16.142.112": {"address": "172.16.142.112"},
                "ltm/virtual/vs": {"destination": "/t/172.16.142.112:80"}
            }
        }));
        let new = tree(json!({
            "": {
                "ltm/pool/p1": {"members": ["10.0.0.1:80"]},
                "ltm/virtual-address/app_svc_vip": {"address": "172.16.142.112"},
                "ltm/virtual/vs": {"destination": "/t/app_svc_vip:80"}
            }
        }));
        let mut snapshot = ExistenceSnapshot::empty();
        for (kind, name) in [
            ("ltm/pool", "p1"),
            ("ltm/pool", "gone"),
            (VIRTUAL_ADDRESS_KIND, "172.16.142.112"),
            (VIRTUAL_KIND, "vs"),
        ] {
            live(&mut snapshot, kind, ResourceKey::new("t", "", name), json!({}));
        }

        let batch = plan_requests("t", Some(&old), Some(&new), &snapshot, &ResourceOrder::default()).unwrap();
        assert_eq!(
            summary(&batch),
            vec![
                "PATCH ltm/pool /t/p1",
                "DELETE ltm/virtual /t/vs",
                "DELETE ltm/virtual-address /t/172.16.142.112",
                "POST ltm/virtual-address /t/app_svc_vip",
                "POST ltm/virtual /t/vs",
                "DELETE ltm/pool /t/gone",
            ]
        );
    }

    #[test]
    fn test_virtual_pair_without_changes_stays_in_place() {
        let cfg = tree(json!({
            "": {
                "ltm/virtual-address/app_svc_vip": {"address": "172.16.142.112"},
                "ltm/virtual/vs": {"destination": "/t/app_svc_vip:80"}
            }
        }));
        let mut snapshot = ExistenceSnapshot::empty();
        live(&mut snapshot, VIRTUAL_ADDRESS_KIND, ResourceKey::new("t", "", "app_svc_vip"), json!({"address": "172.16.142.112"}));
        live(&mut snapshot, VIRTUAL_KIND, ResourceKey::new("t", "", "vs"), json!({"destination": "/t/app_svc_vip:80"}));

        let batch = plan_requests("t", Some(&cfg), Some(&cfg), &snapshot, &ResourceOrder::default()).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_malformed_tree_is_rejected() {
        let new = tree(json!({"": {"pool": {}}}));
        let err = plan_requests("t", None, Some(&new), &ExistenceSnapshot::empty(), &ResourceOrder::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_gen_rest_requests_queries_the_device() {
        let device = MockDevice::new("https://lb1");
        device.add_partition("t");
        device.insert("ltm/pool", ResourceKey::new("t", "", "p1"), json!({"members": []}));

        let new = tree(json!({"": {"ltm/pool/p1": {"members": []}, "ltm/pool/p2": {}}}));
        let batch = gen_rest_requests(&device, "t", None, Some(&new), &ResourceOrder::default()).unwrap();
        assert_eq!(summary(&batch), vec!["PATCH ltm/pool /t/p1", "POST ltm/pool /t/p2"]);

        let listed: Vec<String> = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::List { kind, partition: Some(_) } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(listed, vec!["ltm/pool", "sys/folder"]);
    }
}
