//! Inspect and clear state persisted on devices.

use anyhow::{Context as AnyhowContext, Result};
use dialoguer::Confirm;
use reconcile::PersistedConfig;
use serde_json::Value;

use crate::Context;
use crate::cli::StateCommand;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let settings = Settings::load(ctx.config.as_deref())?;
    let store = settings.state_store();

    match cmd {
        StateCommand::Show { key, device } => {
            for device in settings.select_devices(device.device.as_deref())? {
                let client = device.client(&settings.retry)?;
                let state = store
                    .load(&client, &key)
                    .with_context(|| format!("Failed to load state from {}", device.url))?;

                ui::section(&device.url);
                match state {
                    Some(config) => show(&config),
                    None => ui::dim(&format!("no state stored under {key}")),
                }
            }
        }
        StateCommand::Clear { key, device, yes } => {
            let devices = settings.select_devices(device.device.as_deref())?;
            if !yes {
                let prompt = format!(
                    "Delete {} from {} device(s)?",
                    store.record_name(&key),
                    devices.len()
                );
                if !Confirm::new().with_prompt(prompt).default(false).interact()? {
                    ui::info("Cancelled");
                    return Ok(());
                }
            }
            for device in devices {
                let client = device.client(&settings.retry)?;
                store
                    .delete(&client, &key)
                    .with_context(|| format!("Failed to clear state on {}", device.url))?;
                if !ctx.quiet {
                    ui::success(&format!("{}: cleared {key}", device.url));
                }
            }
        }
    }
    Ok(())
}

fn show(config: &PersistedConfig) {
    ui::kv("client key", or_none(&config.client_key));
    ui::kv(
        "requests",
        &request_count(&config.requests).map_or_else(|| "-".to_string(), |n| n.to_string()),
    );
    let partitions: Vec<&str> = config.partition_map.keys().map(String::as_str).collect();
    ui::kv("partitions", or_none(&partitions.join(", ")));

    if !config.spec.is_empty() {
        println!();
        match serde_json::from_str::<Value>(&config.spec) {
            Ok(spec) => println!(
                "{}",
                serde_json::to_string_pretty(&spec).unwrap_or_else(|_| config.spec.clone())
            ),
            Err(_) => println!("{}", config.spec),
        }
    }
}

fn or_none(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

/// Number of requests in a persisted batch, `None` when nothing parseable is stored
fn request_count(requests: &str) -> Option<usize> {
    serde_json::from_str::<Value>(requests)
        .ok()?
        .as_array()
        .map(Vec::len)
}
