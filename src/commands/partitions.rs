use anyhow::{Context as AnyhowContext, Result};
use reconcile::list_partitions;

use crate::Context;
use crate::cli::DeviceArgs;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, args: DeviceArgs) -> Result<()> {
    let settings = Settings::load(ctx.config.as_deref())?;

    for device in settings.select_devices(args.device.as_deref())? {
        let client = device.client(&settings.retry)?;
        let partitions = list_partitions(&client)
            .with_context(|| format!("Failed to list partitions of {}", device.url))?;

        if ctx.quiet {
            for name in &partitions {
                println!("{name}");
            }
            continue;
        }

        ui::section(&device.url);
        if partitions.is_empty() {
            ui::dim("no partitions");
        }
        for name in &partitions {
            println!("  {name}");
        }
    }
    Ok(())
}
