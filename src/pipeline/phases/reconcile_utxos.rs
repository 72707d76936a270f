//! Reconciles persisted UTXOs against what the node just reported
//! (spec.md §4.8): marks externally-spent UTXOs, refreshes confirmations
//! (including shallow-reorg reappearance), and invalidates draft locks that
//! referenced a UTXO that just got spent.

use tracing::info;

use crate::pipeline::Context;

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let existing = ctx.store.find_utxos(ctx.wallet_id).await?;
    if existing.is_empty() {
        return Ok(());
    }

    let newly_spent: Vec<(bitcoin::Txid, u32)> = existing
        .iter()
        .filter(|u| {
            !u.spent
                && ctx.successfully_fetched_addresses.contains(&u.address)
                && !ctx.all_utxo_keys.contains(&(u.txid, u.vout))
        })
        .map(|u| (u.txid, u.vout))
        .collect();

    if !newly_spent.is_empty() {
        let changed = ctx
            .store
            .mark_utxos_spent(ctx.wallet_id, &newly_spent)
            .await?;
        ctx.stats.utxos_marked_spent += changed;
        invalidate_draft_locks(ctx, &newly_spent).await?;
    }

    for utxo in &existing {
        if utxo.spent {
            continue;
        }
        let Some((_, remote)) = ctx.utxo_data_map.get(&(utxo.txid, utxo.vout)) else {
            continue;
        };

        let (new_height, new_confirmations) = if remote.height > 0 {
            let confirmations = ((ctx.tip_height as i64) - (remote.height as i64) + 1).max(0) as u32;
            (Some(remote.height), confirmations)
        } else {
            // Reappearance in the mempool: a shallow reorg unconfirmed the
            // block this UTXO was mined in.
            (None, 0)
        };

        if new_height == utxo.block_height && new_confirmations == utxo.confirmations {
            continue;
        }

        let mut updated = utxo.clone();
        updated.block_height = new_height;
        updated.confirmations = new_confirmations;
        ctx.store.update_utxo(updated).await?;
    }

    Ok(())
}

async fn invalidate_draft_locks(
    ctx: &Context,
    keys: &[(bitcoin::Txid, u32)],
) -> anyhow::Result<()> {
    let drafts = ctx
        .store
        .find_draft_locks_for_utxos(ctx.wallet_id, keys)
        .await?;
    if drafts.is_empty() {
        return Ok(());
    }
    for draft in &drafts {
        info!(label = %draft.label, txid = %draft.txid, vout = draft.vout, "invalidating draft lock on spent utxo");
    }
    let ids: Vec<i64> = drafts.iter().map(|d| d.id).collect();
    ctx.store.delete_draft_locks(&ids).await?;
    Ok(())
}
