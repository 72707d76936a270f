//! Persists newly-seen UTXOs (spec.md §4.9). A key already in the store is
//! left untouched here — `reconcileUtxosPhase` owns confirmation refresh for
//! rows that already exist.

use std::collections::HashSet;

use bitcoin::Txid;

use crate::pipeline::Context;
use crate::store::Utxo;

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    if ctx.all_utxo_keys.is_empty() {
        return Ok(());
    }

    let existing_keys: HashSet<(Txid, u32)> = ctx
        .store
        .find_utxos(ctx.wallet_id)
        .await?
        .into_iter()
        .map(|u| (u.txid, u.vout))
        .collect();

    let mut rows = Vec::new();
    for key @ (txid, vout) in ctx.all_utxo_keys.clone() {
        if existing_keys.contains(&key) {
            continue;
        }
        let Some((address, remote)) = ctx.utxo_data_map.get(&key).cloned() else {
            continue;
        };

        let script_pubkey = script_pubkey_for(ctx, txid, vout).await.unwrap_or_default();

        let (block_height, confirmations) = if remote.height > 0 {
            let confirmations = ((ctx.tip_height as i64) - (remote.height as i64) + 1).max(0) as u32;
            (Some(remote.height), confirmations)
        } else {
            (None, 0)
        };

        rows.push(Utxo {
            wallet_id: ctx.wallet_id,
            txid,
            vout,
            address,
            amount: remote.amount_sat,
            block_height,
            confirmations,
            spent: false,
        });
    }

    if rows.is_empty() {
        return Ok(());
    }

    let result = ctx.store.create_utxos(rows).await?;
    ctx.stats.utxos_created += result.inserted;
    Ok(())
}

/// Resolves the `scriptPubKey` hex for `(txid, vout)` from the pipeline's
/// tx-details cache, falling back to a single on-demand fetch and
/// tolerating a null result (spec.md §4.9).
async fn script_pubkey_for(ctx: &mut Context, txid: Txid, vout: u32) -> Option<String> {
    if let Some(tx) = ctx.tx_details_cache.get(&txid) {
        return tx.vout.iter().find(|o| o.vout == vout).map(|o| o.script_pubkey_hex.clone());
    }
    let fetched = ctx.client.get_transaction(&txid).await.ok()?;
    let script_pubkey = fetched
        .vout
        .iter()
        .find(|o| o.vout == vout)
        .map(|o| o.script_pubkey_hex.clone());
    ctx.tx_details_cache.insert(txid, fetched);
    script_pubkey
}
