//! Transaction executor - sends one batch to one device

use crate::client::DeviceClient;
use crate::error::{Error, Result, TransactionStage};
use crate::types::{ExecuteSummary, Method, RestRequest};

/// Send `batch` to the device
///
/// Requests flagged as non-transactional (uploads) go first, in batch order,
/// outside any transaction. The rest are queued into a single transaction
/// which is committed at the end, so the device applies them all or none.
/// When nothing transactional remains no transaction is opened. The first
/// failure aborts the batch; nothing is retried.
pub fn execute(client: &dyn DeviceClient, batch: &[RestRequest]) -> Result<ExecuteSummary> {
    let mut summary = ExecuteSummary::default();
    let (transactional, direct): (Vec<&RestRequest>, Vec<&RestRequest>) = batch
        .iter()
        .filter(|r| r.method != Method::Noop)
        .partition(|r| r.with_trans);

    for request in direct {
        log::debug!("{}: {}", client.url(), request.label());
        client.send(request, None).map_err(|e| {
            Error::transaction(
                TransactionStage::Direct {
                    request: request.label(),
                },
                e,
            )
        })?;
        summary.record(request);
    }

    if transactional.is_empty() {
        log::debug!("{}: no transactional requests, skipping transaction", client.url());
        return Ok(summary);
    }

    let id = client
        .begin_transaction()
        .map_err(|e| Error::transaction(TransactionStage::Begin, e))?;
    log::debug!("{}: opened transaction {id}", client.url());

    for request in &transactional {
        log::debug!("{}: [{id}] {}", client.url(), request.label());
        client.send(request, Some(id)).map_err(|e| {
            Error::transaction(
                TransactionStage::Submit {
                    request: request.label(),
                },
                e,
            )
        })?;
    }

    client
        .commit_transaction(id)
        .map_err(|e| Error::transaction(TransactionStage::Commit, e))?;
    for request in &transactional {
        summary.record(request);
    }
    summary.committed = true;

    log::info!(
        "{}: committed transaction {id} with {} requests",
        client.url(),
        transactional.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TransactionId;
    use crate::flatten::upload_request;
    use crate::mock::{Call, MockDevice};
    use crate::types::ResourceKey;
    use serde_json::json;

    fn pool(method: Method, name: &str) -> RestRequest {
        let mut r = RestRequest::managed("ltm/pool", name, "t", "", json!({"members": []}));
        r.method = method;
        r
    }

    #[test]
    fn test_empty_batch_skips_transaction() {
        let device = MockDevice::new("https://lb1");
        let summary = execute(&device, &[]).unwrap();
        assert_eq!(summary, ExecuteSummary::default());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_uploads_only_skip_transaction() {
        let device = MockDevice::new("https://lb1");
        let batch = vec![upload_request("cert.pem", "t", "", "abc")];

        let summary = execute(&device, &batch).unwrap();
        assert_eq!(summary.uploaded, 1);
        assert!(!summary.committed);
        assert_eq!(
            device.calls(),
            vec![Call::Send {
                request: batch[0].label(),
                transaction: None
            }]
        );
        assert_eq!(device.upload("cert.pem").as_deref(), Some("abc"));
    }

    #[test]
    fn test_direct_requests_go_first() {
        let device = MockDevice::new("https://lb1");
        let upload = upload_request("cert.pem", "t", "", "abc");
        let batch = vec![pool(Method::Post, "p1"), upload.clone(), pool(Method::Post, "p2")];

        let summary = execute(&device, &batch).unwrap();
        let id = TransactionId(1);
        assert_eq!(
            device.calls(),
            vec![
                Call::Send {
                    request: upload.label(),
                    transaction: None
                },
                Call::Begin(id),
                Call::Send {
                    request: batch[0].label(),
                    transaction: Some(id)
                },
                Call::Send {
                    request: batch[2].label(),
                    transaction: Some(id)
                },
                Call::Commit(id),
            ]
        );
        assert_eq!((summary.created, summary.uploaded), (2, 1));
        assert!(summary.committed);
        assert_eq!(device.count("ltm/pool"), 2);
    }

    #[test]
    fn test_submit_failure_leaves_device_untouched() {
        let device = MockDevice::new("https://lb1");
        device.fail_on_send("p2");
        let batch = vec![pool(Method::Post, "p1"), pool(Method::Post, "p2")];

        let err = execute(&device, &batch).unwrap_err();
        match err {
            Error::Transaction {
                stage: TransactionStage::Submit { request },
                ..
            } => assert_eq!(request, "POST ltm/pool /t/p2"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.count("ltm/pool"), 0);
        assert!(!device.calls().iter().any(|c| matches!(c, Call::Commit(_))));
    }

    #[test]
    fn test_begin_and_commit_failures() {
        let device = MockDevice::new("https://lb1");
        device.fail_on_begin();
        let err = execute(&device, &[pool(Method::Post, "p1")]).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction {
                stage: TransactionStage::Begin,
                ..
            }
        ));

        let device = MockDevice::new("https://lb1");
        device.fail_on_commit();
        let err = execute(&device, &[pool(Method::Post, "p1")]).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction {
                stage: TransactionStage::Commit,
                ..
            }
        ));
        assert_eq!(device.count("ltm/pool"), 0);
    }

    #[test]
    fn test_transaction_is_atomic_on_device_rejection() {
        let device = MockDevice::new("https://lb1");
        device.insert("ltm/pool", ResourceKey::new("t", "", "p1"), json!({}));
        let batch = vec![pool(Method::Delete, "p1"), pool(Method::Patch, "missing")];

        let err = execute(&device, &batch).unwrap_err();
        assert!(err.to_string().contains("commit"));
        assert_eq!(device.count("ltm/pool"), 1);
    }
}
