//! Partition lifecycle and device-wide administrative commands

use crate::client::DeviceClient;
use crate::error::{Error, Result};
use crate::types::{DEFAULT_PARTITION, FOLDER_KIND, ResourceKey};
use serde_json::{Value, json};

/// List partition names present on the device
///
/// Partitions are the folders whose full path has a single segment.
pub fn list_partitions(client: &dyn DeviceClient) -> Result<Vec<String>> {
    let resp = client
        .list(FOLDER_KIND, None)
        .map_err(|e| Error::retrieval(format!("failed to list partitions: {e}")))?;
    let items = resp
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::retrieval("failed to get items from partition listing"))?;

    let mut partitions: Vec<String> = items
        .iter()
        .filter_map(|item| item.get("fullPath").and_then(Value::as_str))
        .filter_map(|full_path| {
            let segments: Vec<&str> = full_path.split('/').collect();
            match segments.as_slice() {
                ["", name] if !name.is_empty() => Some((*name).to_string()),
                _ => None,
            }
        })
        .collect();
    partitions.sort();
    partitions.dedup();
    Ok(partitions)
}

fn partition_key(name: &str) -> ResourceKey {
    ResourceKey::new("", "", name)
}

/// Create the partition unless it already exists
pub fn ensure_partition(client: &dyn DeviceClient, name: &str) -> Result<()> {
    if name == DEFAULT_PARTITION {
        return Ok(());
    }
    let existing = client
        .fetch(FOLDER_KIND, &partition_key(name))
        .map_err(|e| Error::partition(name, e))?;
    if existing.is_some() {
        log::debug!("partition {name} already present on {}", client.url());
        return Ok(());
    }

    log::info!("creating partition {name} on {}", client.url());
    client
        .create(FOLDER_KIND, &json!({"name": name, "partition": "/"}))
        .map_err(|e| Error::partition(name, e))
}

/// Remove the partition if it exists
pub fn remove_partition(client: &dyn DeviceClient, name: &str) -> Result<()> {
    if name == DEFAULT_PARTITION {
        return Ok(());
    }
    let key = partition_key(name);
    let existing = client
        .fetch(FOLDER_KIND, &key)
        .map_err(|e| Error::partition(name, e))?;
    if existing.is_none() {
        return Ok(());
    }

    log::info!("removing partition {name} from {}", client.url());
    client
        .remove(FOLDER_KIND, &key)
        .map_err(|e| Error::partition(name, e))
}

/// Build the tmsh command persisting running config
pub fn save_command(partitions: &[String]) -> String {
    let mut cmd = String::from("save sys config");
    if !partitions.is_empty() {
        cmd.push_str(" partitions {");
        for p in partitions {
            cmd.push(' ');
            cmd.push_str(p);
        }
        cmd.push_str(" }");
    }
    cmd
}

/// Persist running config to disk, optionally only some partitions
pub fn save_sys_config(client: &dyn DeviceClient, partitions: &[String]) -> Result<()> {
    let cmd = save_command(partitions);
    let resp = client.run_command(&cmd)?;
    if let Some(result) = resp.get("commandResult")
        && !result.is_null()
        && result.as_str() != Some("")
    {
        log::warn!("command {cmd}: {result}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice};

    #[test]
    fn test_list_partitions_parses_full_paths() {
        let device = MockDevice::new("https://lb1");
        device.set_listing(
            FOLDER_KIND,
            json!({"items": [
                {"name": "/", "fullPath": "/"},
                {"name": "Common", "fullPath": "/Common"},
                {"name": "tenant", "fullPath": "/tenant"},
                {"name": "app", "fullPath": "/tenant/app"},
                {"name": "tenant", "fullPath": "/tenant"}
            ]}),
        );

        let partitions = list_partitions(&device).unwrap();
        assert_eq!(partitions, vec!["Common".to_string(), "tenant".to_string()]);
    }

    #[test]
    fn test_list_partitions_without_items() {
        let device = MockDevice::new("https://lb1");
        device.set_listing(FOLDER_KIND, json!({"kind": "tm:sys:folder"}));

        let err = list_partitions(&device).unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)));
    }

    #[test]
    fn test_ensure_partition_skips_common() {
        let device = MockDevice::new("https://lb1");
        ensure_partition(&device, DEFAULT_PARTITION).unwrap();
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_ensure_partition_creates_once() {
        let device = MockDevice::new("https://lb1");
        ensure_partition(&device, "tenant").unwrap();
        ensure_partition(&device, "tenant").unwrap();

        let creates = device
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count();
        assert_eq!(creates, 1);
        assert_eq!(list_partitions(&device).unwrap(), vec!["tenant".to_string()]);
    }

    #[test]
    fn test_remove_partition_absent_is_ok() {
        let device = MockDevice::new("https://lb1");
        remove_partition(&device, "tenant").unwrap();
        assert!(
            !device
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Remove { .. }))
        );
    }

    #[test]
    fn test_remove_partition() {
        let device = MockDevice::new("https://lb1");
        device.add_partition("tenant");
        remove_partition(&device, "tenant").unwrap();
        assert!(list_partitions(&device).unwrap().is_empty());
    }

    #[test]
    fn test_partition_failure_maps_to_lifecycle_error() {
        let device = MockDevice::new("https://lb1");
        device.fail_on_create(FOLDER_KIND);
        let err = ensure_partition(&device, "tenant").unwrap_err();
        assert!(matches!(err, Error::PartitionLifecycle { ref partition, .. } if partition == "tenant"));
    }

    #[test]
    fn test_save_command() {
        assert_eq!(save_command(&[]), "save sys config");
        assert_eq!(
            save_command(&["a".to_string(), "b".to_string()]),
            "save sys config partitions { a b }"
        );
    }

    #[test]
    fn test_save_sys_config_runs_command() {
        let device = MockDevice::new("https://lb1");
        save_sys_config(&device, &["tenant".to_string()]).unwrap();
        assert!(device.calls().contains(&Call::Command(
            "save sys config partitions { tenant }".to_string()
        )));
    }
}
