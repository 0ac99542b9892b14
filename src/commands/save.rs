use anyhow::{Context as AnyhowContext, Result};
use reconcile::save_sys_config;

use crate::Context;
use crate::cli::SaveArgs;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, args: SaveArgs) -> Result<()> {
    let settings = Settings::load(ctx.config.as_deref())?;
    let scope = if args.partitions.is_empty() {
        "all partitions".to_string()
    } else {
        args.partitions.join(", ")
    };

    for device in settings.select_devices(args.device.device.as_deref())? {
        let client = device.client(&settings.retry)?;
        save_sys_config(&client, &args.partitions)
            .with_context(|| format!("Failed to save config on {}", device.url))?;
        if !ctx.quiet {
            ui::success(&format!("{}: saved {scope}", device.url));
        }
    }
    Ok(())
}
