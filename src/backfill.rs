//! Confirmation maintenance and field backfill for legacy rows
//! (spec.md §4.15).

use std::collections::{HashMap, HashSet};

use bitcoin::Txid;

use crate::blockheight::{HeightCache, TimestampCache};
use crate::classify::classify_transaction;
use crate::config::Config;
use crate::node::NodeClient;
use crate::store::{RbfStatus, Store, StoreResult, WalletId};

/// Recomputes `confirmations` for every transaction below
/// `config.deep_confirmation_threshold` with a known `blockHeight`, writing
/// back only rows that changed. A 0 → >0 transition also sets
/// `rbfStatus = confirmed`.
pub async fn update_transaction_confirmations(
    store: &dyn Store,
    height_cache: &HeightCache,
    client: &dyn NodeClient,
    wallet_id: WalletId,
    network: crate::config::Network,
    config: &Config,
) -> StoreResult<usize> {
    let tip = height_cache
        .get_block_height(network, client)
        .await
        .map_err(|e| crate::store::StoreError::Backend(e.to_string()))?;

    let candidates = store
        .find_transactions_below_confirmations(wallet_id, config.deep_confirmation_threshold)
        .await?;

    let mut updated = 0;
    for mut tx in candidates {
        let height = match tx.block_height {
            Some(h) => h,
            None => continue,
        };
        let new_confirmations = ((tip as i64) - (height as i64) + 1).max(0) as u32;
        if new_confirmations == tx.confirmations {
            continue;
        }
        let was_unconfirmed = tx.confirmations == 0;
        tx.confirmations = new_confirmations;
        if was_unconfirmed && new_confirmations > 0 {
            tx.rbf_status = RbfStatus::Confirmed;
        }
        store.update_transaction(tx).await?;
        updated += 1;
    }
    Ok(updated)
}

/// Fills `blockHeight`, `blockTime`, `fee`, `counterpartyAddress`,
/// `addressId` for rows that are missing them, using the same
/// classification rules as `processTransactionsPhase` (spec.md §4.6) and
/// the same prev-tx batch pre-fetch.
pub async fn populate_missing_transaction_fields(
    store: &dyn Store,
    timestamp_cache: &TimestampCache,
    height_cache: &HeightCache,
    client: &dyn NodeClient,
    wallet_id: WalletId,
    network: crate::config::Network,
    config: &Config,
) -> StoreResult<usize> {
    let all = store.find_all_transactions(wallet_id).await?;
    let incomplete: Vec<_> = all
        .into_iter()
        .filter(|t| {
            t.block_height.is_none()
                || t.block_time.is_none()
                || (t.fee.is_none() && t.tx_type != crate::store::TransactionType::Received)
                || t.counterparty_address.is_none()
                || t.address_id.is_none()
        })
        .collect();
    if incomplete.is_empty() {
        return Ok(0);
    }

    let addresses = store.find_addresses(wallet_id).await?;
    let wallet_addresses: HashSet<String> = addresses.iter().map(|a| a.address.clone()).collect();
    let address_ids: HashMap<String, _> =
        addresses.iter().map(|a| (a.address.clone(), a.id)).collect();

    let tip = height_cache
        .get_block_height(network, client)
        .await
        .map_err(|e| crate::store::StoreError::Backend(e.to_string()))?;

    // When the remote can't place a transaction in a block via its own
    // record, block heights flow from a parallel fetch of every wallet
    // address's history, keyed by txid (spec.md §4.15).
    let mut history_heights: HashMap<Txid, i32> = HashMap::new();
    for chunk in addresses.chunks(config.history_batch_size) {
        let batch: Vec<String> = chunk.iter().map(|a| a.address.clone()).collect();
        if let Ok(histories) = client.get_address_history_batch(&batch).await {
            for entries in histories.into_values() {
                for entry in entries {
                    if entry.height > 0 {
                        history_heights.insert(entry.txid, entry.height);
                    }
                }
            }
        }
    }

    let mut updated = 0;
    for txid_chunk in incomplete.chunks(config.tx_batch_size_backfill) {
        let txids: Vec<Txid> = txid_chunk.iter().map(|t| t.txid).collect();
        let fetched = client
            .get_transactions_batch(&txids)
            .await
            .unwrap_or_default();

        // Pre-fetch prev-tx records needed for fee/counterparty resolution.
        let prev_txids: Vec<Txid> = fetched
            .values()
            .flat_map(|tx| tx.vin.iter())
            .filter(|vin| !vin.is_coinbase && vin.prevout.is_none())
            .filter_map(|vin| vin.prev_txid)
            .collect();
        let prev_tx_cache = if prev_txids.is_empty() {
            HashMap::new()
        } else {
            client
                .get_transactions_batch(&prev_txids)
                .await
                .unwrap_or_default()
        };

        for row in txid_chunk {
            let Some(normalized) = fetched.get(&row.txid) else {
                continue;
            };
            let history_height = history_heights.get(&row.txid).copied();
            let classification = classify_transaction(
                normalized,
                &wallet_addresses,
                &address_ids,
                &prev_tx_cache,
                history_height,
                tip,
            );

            let mut updated_row = row.clone();
            if updated_row.block_height.is_none() {
                updated_row.block_height = classification.resolved_block_height;
            }
            if updated_row.block_time.is_none() {
                updated_row.block_time = match normalized.block_time {
                    Some(t) => Some(t),
                    None => match updated_row.block_height {
                        Some(h) if h > 0 => timestamp_cache
                            .get_block_timestamp(network, h as u32, client)
                            .await
                            .ok(),
                        _ => None,
                    },
                };
            }
            if updated_row.fee.is_none() {
                updated_row.fee = classification.fee;
            }
            if updated_row.counterparty_address.is_none() {
                updated_row.counterparty_address = classification.counterparty_address;
            }
            if updated_row.address_id.is_none() {
                updated_row.address_id = classification.address_id;
            }

            store.update_transaction(updated_row).await?;
            updated += 1;
        }
    }

    Ok(updated)
}
