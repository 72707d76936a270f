//! Batched address-history fetch (spec.md §4.4). A failed batch falls back
//! to per-address requests so one bad address can't blank out a whole
//! chunk's worth of otherwise-healthy results.

use tracing::warn;

use crate::pipeline::Context;

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let addresses: Vec<String> = ctx.addresses.iter().map(|a| a.address.clone()).collect();
    if addresses.is_empty() {
        return Ok(());
    }

    for chunk in addresses.chunks(ctx.config.history_batch_size) {
        match ctx.client.get_address_history_batch(chunk).await {
            Ok(map) => {
                for (address, entries) in map {
                    record(ctx, address, entries);
                }
            }
            Err(err) => {
                warn!(%err, "batched history fetch failed, retrying addresses individually");
                for address in chunk {
                    match ctx.client.get_address_history(address).await {
                        Ok(entries) => record(ctx, address.clone(), entries),
                        Err(err) => warn!(%address, %err, "address history fetch failed, skipping"),
                    }
                }
            }
        }
    }

    ctx.stats.histories_fetched = ctx.history_results.len();
    Ok(())
}

fn record(ctx: &mut Context, address: String, entries: Vec<crate::node::HistoryEntry>) {
    for entry in &entries {
        ctx.all_txids.insert(entry.txid);
    }
    ctx.history_results.insert(address, entries);
}
