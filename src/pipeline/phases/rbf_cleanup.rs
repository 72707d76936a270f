//! Replace-by-fee cleanup (spec.md §4.3). Runs first in the "default"
//! ordering so ambiguity left over from a previous run is resolved before
//! new histories get classified against a stale active/replaced split.
//!
//! Purely a store-side reconciliation: no node request is made here.

use std::collections::{HashMap, HashSet};

use bitcoin::Txid;

use crate::pipeline::Context;
use crate::store::{RbfStatus, Transaction};

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let candidates = ctx
        .store
        .find_transactions_with_rbf_candidates(ctx.wallet_id)
        .await?;
    if candidates.is_empty() {
        return Ok(());
    }

    let confirmed: Vec<Transaction> = ctx
        .store
        .find_all_transactions(ctx.wallet_id)
        .await?
        .into_iter()
        .filter(|t| t.confirmations > 0)
        .collect();
    if confirmed.is_empty() {
        return Ok(());
    }

    let mut confirmed_input_keys: HashMap<Txid, HashSet<(Txid, u32)>> = HashMap::new();
    for tx in &confirmed {
        let inputs = ctx.store.find_transaction_inputs(tx.id).await?;
        confirmed_input_keys.insert(
            tx.txid,
            inputs.into_iter().map(|i| (i.prev_txid, i.prev_vout)).collect(),
        );
    }

    for mut candidate in candidates {
        let candidate_inputs = ctx.store.find_transaction_inputs(candidate.id).await?;
        let candidate_keys: HashSet<(Txid, u32)> = candidate_inputs
            .iter()
            .map(|i| (i.prev_txid, i.prev_vout))
            .collect();
        if candidate_keys.is_empty() {
            continue;
        }

        let replacement = confirmed.iter().find(|tx| {
            tx.txid != candidate.txid
                && confirmed_input_keys
                    .get(&tx.txid)
                    .is_some_and(|keys| !keys.is_disjoint(&candidate_keys))
        });

        if let Some(replaced_by) = replacement {
            candidate.rbf_status = RbfStatus::Replaced;
            candidate.replaced_by_txid = Some(replaced_by.txid);
            ctx.store.update_transaction(candidate).await?;
        }
    }

    Ok(())
}
