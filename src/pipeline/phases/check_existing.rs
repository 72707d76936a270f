//! Partitions every txid seen in this run's histories into already-known
//! and new (spec.md §4.5).

use crate::pipeline::Context;

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let txids: Vec<_> = ctx.all_txids.iter().copied().collect();
    if txids.is_empty() {
        return Ok(());
    }

    let existing = ctx
        .store
        .find_transactions_by_txids(ctx.wallet_id, &txids)
        .await?;
    for tx in existing {
        ctx.existing_txid_set.insert(tx.txid);
        ctx.existing_tx_map.insert(tx.txid, tx);
    }

    ctx.new_txids = txids
        .into_iter()
        .filter(|t| !ctx.existing_txid_set.contains(t))
        .collect();

    Ok(())
}
