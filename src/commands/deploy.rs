//! Converge a partition across the configured fleet.

use anyhow::{Context as AnyhowContext, Result, bail};
use dialoguer::Confirm;
use reconcile::{
    ConfigTree, DeployOptions, DeployRequest, Deployer, DeviceClient, StateRecord, StateStore,
    gen_rest_requests,
};
use std::sync::Arc;

use super::{plan, read_tree};
use crate::Context;
use crate::cli::DeployArgs;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, args: DeployArgs) -> Result<()> {
    let settings = Settings::load(ctx.config.as_deref())?;
    let order = settings.resource_order()?;
    let selected = settings.select_devices(args.device.as_deref())?;
    let partition = args.transition.partition.clone();
    let store = settings.state_store();

    let from = match (&args.transition.from, &args.state_key) {
        (None, Some(key)) => {
            let device = selected[0];
            let client = device.client(&settings.retry)?;
            let recorded = recorded_tree(&client, &store, key)
                .with_context(|| format!("Failed to read state {key} from {}", device.url))?;
            if recorded.is_none() {
                ui::info(&format!("No state recorded under {key}, starting fresh"));
            }
            recorded
        }
        (from, _) => read_tree(from.as_deref())?,
    };
    let to = read_tree(args.transition.to.as_deref())?;

    if args.dry_run {
        for device in selected {
            let client = device.client(&settings.retry)?;
            let batch = gen_rest_requests(&client, &partition, from.as_ref(), to.as_ref(), &order)
                .with_context(|| format!("Failed to plan {partition} on {}", device.url))?;
            plan::show(ctx, &format!("Plan for {partition} on {}", device.url), &batch);
        }
        return Ok(());
    }

    if !args.yes {
        let prompt = format!("Deploy {partition} to {} device(s)?", selected.len());
        if !Confirm::new().with_prompt(prompt).default(false).interact()? {
            ui::info("Cancelled");
            return Ok(());
        }
    }

    let total = selected.len();
    let devices = settings
        .select_devices(None)?
        .iter()
        .map(|d| {
            d.client(&settings.retry)
                .map(|c| Arc::new(c) as Arc<dyn DeviceClient>)
        })
        .collect::<Result<Vec<_>>>()?;

    let deployer = Deployer::spawn(devices, order, settings.queue_capacity)?;
    let request = DeployRequest::new(partition.clone(), partition.clone(), from, to).with_options(
        DeployOptions {
            create_partition: args.create_partition,
            delete_partition: args.delete_partition,
            target: target_url(args.device.as_deref()),
            record: args
                .state_key
                .as_ref()
                .map(|key| StateRecord::new(store.clone(), key.as_str())),
        },
    );

    let ticket = deployer.submit(request)?;
    if !ctx.quiet {
        ui::info(&format!("Deploying {} to {total} device(s)...", ticket.id()));
    }
    let report = ticket.wait()?;
    deployer.shutdown();

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(summary) => ui::success(&format!(
                "{}: {}",
                outcome.device,
                ui::summary_line(summary)
            )),
            Err(e) => ui::error(&format!("{}: {e}", outcome.device)),
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        bail!("Deploy of {partition} failed on {failed} of {total} device(s)");
    }
    if !ctx.quiet {
        println!();
        ui::success(&format!(
            "{partition} converged ({})",
            ui::summary_line(&report.summary())
        ));
    }
    Ok(())
}

/// Device filter in the form the clients report their URL
fn target_url(device: Option<&str>) -> Option<String> {
    device.map(|url| url.trim_end_matches('/').to_string())
}

/// Config recorded under `key` on `client`, if any
fn recorded_tree(
    client: &dyn DeviceClient,
    store: &StateStore,
    key: &str,
) -> Result<Option<ConfigTree>> {
    let Some(config) = store.load(client, key)? else {
        return Ok(None);
    };
    Ok(config.applied_tree()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::mock::MockDevice;
    use serde_json::json;

    #[test]
    fn test_target_matches_client_url() {
        let client = tmrest::Client::new("https://10.1.1.4/", "admin", "admin", true);
        let target = target_url(Some("https://10.1.1.4/"));
        assert_eq!(target.as_deref(), Some(DeviceClient::url(&client)));
        assert_eq!(target_url(None), None);
    }

    #[test]
    fn test_recorded_tree() {
        let device = MockDevice::new("https://lb1");
        let store = StateStore::default();
        assert_eq!(recorded_tree(&device, &store, "cluster-a").unwrap(), None);

        let tree: ConfigTree =
            serde_json::from_value(json!({"": {"ltm/pool/p1": {"members": []}}})).unwrap();
        StateRecord::new(store.clone(), "cluster-a")
            .save(&device, Some(&tree), &[])
            .unwrap();
        assert_eq!(recorded_tree(&device, &store, "cluster-a").unwrap(), Some(tree));
        assert_eq!(recorded_tree(&device, &store, "other").unwrap(), None);
    }

    #[test]
    fn test_recorded_teardown_is_empty() {
        let device = MockDevice::new("https://lb1");
        let store = StateStore::default();
        StateRecord::new(store.clone(), "cluster-a")
            .save(&device, None, &[])
            .unwrap();
        assert_eq!(recorded_tree(&device, &store, "cluster-a").unwrap(), None);
    }
}
