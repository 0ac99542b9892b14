//! Offline planning: config files in, ordered request batch out.

use anyhow::{Context as AnyhowContext, Result};
use reconcile::{ExistenceSnapshot, RestRequest, plan_requests};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{read_json, read_tree};
use crate::Context;
use crate::cli::PlanArgs;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let settings = Settings::load(ctx.config.as_deref())?;
    let order = settings.resource_order()?;
    let partition = &args.transition.partition;

    let from = read_tree(args.transition.from.as_deref())?;
    let to = read_tree(args.transition.to.as_deref())?;
    let snapshot = match &args.live {
        Some(path) => {
            let listings: BTreeMap<String, Value> = read_json(path)?;
            ExistenceSnapshot::from_listings(partition, &listings)
                .with_context(|| format!("Invalid live listings in {}", path.display()))?
        }
        None => ExistenceSnapshot::empty(),
    };
    log::debug!("planning {partition} against {} live resources", snapshot.len());

    let batch = plan_requests(partition, from.as_ref(), to.as_ref(), &snapshot, &order)
        .with_context(|| format!("Failed to plan {partition}"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&batch)?);
        return Ok(());
    }

    show(ctx, &format!("Plan for {partition}"), &batch);
    Ok(())
}

/// Print a planned batch with one line per request
pub fn show(ctx: &Context, title: &str, batch: &[RestRequest]) {
    if !ctx.quiet {
        ui::header(title);
    }
    if batch.is_empty() {
        ui::success("Already converged, nothing to do");
        return;
    }
    for req in batch {
        ui::request(req);
    }
    if !ctx.quiet {
        println!();
        ui::dim(&counts(batch));
    }
}

/// "N to create, N to update, N to delete"
fn counts(batch: &[RestRequest]) -> String {
    use reconcile::Method;

    let count = |method| batch.iter().filter(|r| r.method == method).count();
    format!(
        "{} to create, {} to update, {} to delete",
        count(Method::Post),
        count(Method::Patch),
        count(Method::Delete)
    )
}
