//! Retroactive consolidation correction (spec.md §4.12). Gap-limit
//! expansion can add an address to the wallet set *after* a transaction
//! spending to it was classified `sent`; this phase re-examines every
//! `sent` row against the now-current address set and reclassifies.

use crate::pipeline::Context;
use crate::store::{OutputType, TransactionType};

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let all = ctx.store.find_all_transactions(ctx.wallet_id).await?;
    let sent: Vec<_> = all.into_iter().filter(|t| t.tx_type == TransactionType::Sent).collect();
    if sent.is_empty() {
        return Ok(());
    }

    let mut amount_changed = false;

    for mut tx in sent {
        let outputs = ctx.store.find_transaction_outputs(tx.id).await?;
        if outputs.is_empty() {
            continue;
        }
        let all_ours = outputs.iter().all(|o| ctx.address_set.contains(&o.address));
        if !all_ours {
            continue;
        }

        let new_amount = -(tx.fee.unwrap_or(0) as i64);
        if new_amount != tx.amount {
            amount_changed = true;
        }
        tx.tx_type = TransactionType::Consolidation;
        tx.amount = new_amount;
        ctx.store.update_transaction(tx.clone()).await?;

        for out in &outputs {
            if !out.is_ours || out.output_type != OutputType::Consolidation {
                ctx.store
                    .update_transaction_output_ownership(
                        tx.id,
                        out.output_index,
                        true,
                        OutputType::Consolidation,
                    )
                    .await?;
            }
        }

        ctx.stats.corrected_consolidations += 1;
    }

    if amount_changed {
        crate::balance::recalculate_wallet_balances(ctx.store.as_ref(), ctx.wallet_id).await?;
    }

    Ok(())
}
