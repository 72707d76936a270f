//! Flips `used` for every address with a non-empty history this run
//! (spec.md §4.10).

use crate::pipeline::Context;

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let seen: Vec<String> = ctx
        .history_results
        .iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(address, _)| address.clone())
        .collect();
    if seen.is_empty() {
        return Ok(());
    }

    let changed = ctx.store.set_addresses_used(&seen).await?;
    ctx.stats.addresses_updated += changed;
    Ok(())
}
