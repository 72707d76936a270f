//! Classifies and persists newly seen transactions (spec.md §4.6) — the
//! algorithmic heart of the sync pipeline: verbose batch fetch, a second
//! pass to resolve any prevout the server didn't inline, classification,
//! bulk insert, per-row input/output persistence, intra-batch RBF linking,
//! and a fire-and-forget notification.

use std::collections::{HashMap, HashSet};

use bitcoin::Txid;
use tracing::warn;

use crate::classify::{classify_transaction, resolve_prevout};
use crate::node::NormalizedTx;
use crate::pipeline::Context;
use crate::store::{
    OutputType, RbfStatus, Transaction, TransactionInput, TransactionLabel, TransactionOutput,
    TransactionType,
};

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    if ctx.new_txids.is_empty() {
        return Ok(());
    }

    let mut history_heights: HashMap<Txid, i32> = HashMap::new();
    for entries in ctx.history_results.values() {
        for entry in entries {
            if entry.height > 0 {
                history_heights.insert(entry.txid, entry.height);
            }
        }
    }

    let new_txids = ctx.new_txids.clone();
    let mut notify_txids = Vec::new();

    for chunk in new_txids.chunks(ctx.config.tx_batch_size_pipeline) {
        let fetched = ctx.client.get_transactions_batch(chunk).await?;
        ctx.stats.transactions_processed += fetched.len();

        let prev_txids: Vec<Txid> = fetched
            .values()
            .flat_map(|tx| tx.vin.iter())
            .filter(|vin| !vin.is_coinbase && vin.prevout.is_none())
            .filter_map(|vin| vin.prev_txid)
            .filter(|t| !fetched.contains_key(t))
            .collect();
        let prev_tx_cache: HashMap<Txid, NormalizedTx> = if prev_txids.is_empty() {
            HashMap::new()
        } else {
            ctx.client
                .get_transactions_batch(&prev_txids)
                .await
                .unwrap_or_default()
        };

        let mut pending_rows = Vec::new();
        let mut seen_this_batch: HashSet<Txid> = HashSet::new();

        for txid in chunk {
            if !seen_this_batch.insert(*txid) {
                continue; // a txid only ever classifies to one row per run
            }
            let Some(normalized) = fetched.get(txid) else {
                continue;
            };

            let classification = classify_transaction(
                normalized,
                &ctx.address_set,
                &ctx.address_to_id,
                &prev_tx_cache,
                history_heights.get(txid).copied(),
                ctx.tip_height,
            );

            let block_time = match normalized.block_time {
                Some(t) => Some(t),
                None => match classification.resolved_block_height {
                    Some(h) if h > 0 => ctx
                        .timestamp_cache
                        .get_block_timestamp(ctx.network, h as u32, ctx.client.as_ref())
                        .await
                        .ok(),
                    _ => None,
                },
            };

            let row = Transaction {
                id: 0,
                wallet_id: ctx.wallet_id,
                txid: *txid,
                tx_type: classification.tx_type,
                amount: classification.amount,
                fee: classification.fee,
                block_height: classification.resolved_block_height,
                block_time,
                confirmations: classification.confirmations,
                rbf_status: classification.rbf_status,
                replaced_by_txid: None,
                address_id: classification.address_id,
                counterparty_address: classification.counterparty_address,
                balance_after: None,
                created_at: unix_now(),
            };
            ctx.tx_details_cache.insert(*txid, normalized.clone());
            pending_rows.push(row);
            notify_txids.push(*txid);
        }

        if pending_rows.is_empty() {
            continue;
        }

        let inserted = ctx.store.create_transactions(pending_rows).await?;

        for row in &inserted {
            let Some(normalized) = ctx.tx_details_cache.get(&row.txid) else {
                continue;
            };
            persist_inputs(ctx, row, normalized, &prev_tx_cache).await?;
            persist_outputs(ctx, row, normalized).await?;
            apply_labels(ctx, row).await?;
        }

        link_rbf_conflicts(ctx, &inserted).await?;

        ctx.stats.new_transactions_created += inserted.len();
        ctx.new_transactions.extend(inserted);
    }

    ctx.notifier.notify_new_transactions(ctx.wallet_id, notify_txids);

    Ok(())
}

async fn persist_inputs(
    ctx: &Context,
    row: &Transaction,
    normalized: &NormalizedTx,
    prev_tx_cache: &HashMap<Txid, NormalizedTx>,
) -> anyhow::Result<()> {
    let mut inputs = Vec::new();
    for (idx, vin) in normalized.vin.iter().enumerate() {
        if vin.is_coinbase {
            continue;
        }
        let Some(prevout) =
            resolve_prevout(vin.prev_txid, vin.prev_vout, vin.prevout.as_ref(), prev_tx_cache)
        else {
            continue;
        };
        let Some(address) = &prevout.address else {
            continue;
        };
        inputs.push(TransactionInput {
            transaction_id: row.id,
            input_index: idx as u32,
            prev_txid: vin.prev_txid.unwrap_or(row.txid),
            prev_vout: vin.prev_vout.unwrap_or(prevout.vout),
            address: address.clone(),
            amount: prevout.amount_sat,
            derivation_path: ctx.address_to_derivation_path.get(address).cloned(),
        });
    }
    if !inputs.is_empty() {
        ctx.store.create_transaction_inputs(inputs).await?;
    }
    Ok(())
}

async fn persist_outputs(
    ctx: &Context,
    row: &Transaction,
    normalized: &NormalizedTx,
) -> anyhow::Result<()> {
    let mut outputs = Vec::new();
    for out in &normalized.vout {
        let Some(address) = &out.address else {
            continue;
        };
        let is_ours = ctx.address_set.contains(address);
        let output_type = match row.tx_type {
            TransactionType::Received => {
                if is_ours {
                    OutputType::Recipient
                } else {
                    OutputType::Unknown
                }
            }
            TransactionType::Sent => {
                if is_ours {
                    OutputType::Change
                } else {
                    OutputType::Recipient
                }
            }
            TransactionType::Consolidation => OutputType::Consolidation,
        };
        outputs.push(TransactionOutput {
            transaction_id: row.id,
            output_index: out.vout,
            address: address.clone(),
            amount: out.amount_sat,
            script_pubkey: out.script_pubkey_hex.clone(),
            output_type,
            is_ours,
        });
    }
    if !outputs.is_empty() {
        ctx.store.create_transaction_outputs(outputs).await?;
    }
    Ok(())
}

async fn apply_labels(ctx: &Context, row: &Transaction) -> anyhow::Result<()> {
    let Some(address_id) = row.address_id else {
        return Ok(());
    };
    let labels = ctx.store.find_labels_for_address(address_id).await?;
    if labels.is_empty() {
        return Ok(());
    }
    let links = labels
        .into_iter()
        .map(|label| TransactionLabel {
            transaction_id: row.id,
            label_id: label.id,
        })
        .collect();
    ctx.store.create_transaction_labels(links).await?;
    Ok(())
}

/// A freshly inserted, already-confirmed row that shares an input with an
/// existing active row replaces it (spec.md §4.6: linking only triggers
/// "if this batch introduced confirmed transactions").
async fn link_rbf_conflicts(ctx: &Context, inserted: &[Transaction]) -> anyhow::Result<()> {
    if !inserted.iter().any(|t| t.confirmations > 0) {
        return Ok(());
    }
    let candidates = ctx
        .store
        .find_transactions_with_rbf_candidates(ctx.wallet_id)
        .await?;
    if candidates.is_empty() {
        return Ok(());
    }

    for new_tx in inserted {
        if new_tx.confirmations == 0 {
            continue;
        }
        let new_inputs = ctx.store.find_transaction_inputs(new_tx.id).await?;
        let new_input_keys: HashSet<(Txid, u32)> = new_inputs
            .iter()
            .map(|i| (i.prev_txid, i.prev_vout))
            .collect();
        if new_input_keys.is_empty() {
            continue;
        }

        for candidate in &candidates {
            if candidate.txid == new_tx.txid {
                continue;
            }
            let candidate_inputs = ctx.store.find_transaction_inputs(candidate.id).await?;
            let shares_input = candidate_inputs
                .iter()
                .any(|i| new_input_keys.contains(&(i.prev_txid, i.prev_vout)));
            if !shares_input {
                continue;
            }
            let mut replaced = candidate.clone();
            replaced.rbf_status = RbfStatus::Replaced;
            replaced.replaced_by_txid = Some(new_tx.txid);
            if let Err(err) = ctx.store.update_transaction(replaced).await {
                warn!(%err, txid = %candidate.txid, "failed to mark rbf-replaced row");
            }
        }
    }

    Ok(())
}
