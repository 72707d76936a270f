//! Running balance recomputation (spec.md §4.14).

use crate::store::{Store, StoreOp, StoreResult, WalletId};

/// Width of each chunked balance-write store transaction (spec.md §4.14).
const BALANCE_CHUNK_SIZE: usize = 500;

/// Recomputes `balanceAfter` for every transaction in `wallet_id`, ordered
/// by `(blockTime asc, createdAt asc)`, and writes the result back in
/// chunks of 500 rows per store transaction.
pub async fn recalculate_wallet_balances(store: &dyn Store, wallet_id: WalletId) -> StoreResult<()> {
    let mut transactions = store.find_all_transactions(wallet_id).await?;
    transactions.sort_by_key(|t| (t.block_time.unwrap_or(u32::MAX), t.created_at));

    let mut running_balance: i64 = 0;
    let updates: Vec<StoreOp> = transactions
        .iter()
        .map(|t| {
            running_balance += t.amount;
            StoreOp::UpdateTransactionBalance {
                id: t.id,
                balance_after: running_balance,
            }
        })
        .collect();

    for chunk in updates.chunks(BALANCE_CHUNK_SIZE) {
        store.transaction(chunk.to_vec()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{RbfStatus, ScriptType, Transaction, TransactionType, Wallet, WalletType};
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn wallet(id: WalletId) -> Wallet {
        Wallet {
            id,
            network: crate::config::Network::Regtest,
            descriptor: "wpkh(...)".to_string(),
            wallet_type: WalletType::SingleSig,
            script_type: ScriptType::NativeSegwit,
            quorum: None,
        }
    }

    fn tx(id: i64, amount: i64, created_at: i64, block_time: Option<u32>) -> Transaction {
        Transaction {
            id,
            wallet_id: 1,
            txid: Txid::from_byte_array([id as u8; 32]),
            tx_type: TransactionType::Received,
            amount,
            fee: None,
            block_height: None,
            block_time,
            confirmations: 1,
            rbf_status: RbfStatus::Confirmed,
            replaced_by_txid: None,
            address_id: None,
            counterparty_address: None,
            balance_after: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn accumulates_in_block_time_then_created_at_order() {
        let store = MemoryStore::new();
        store.seed_wallet(wallet(1));
        for transaction in [
            tx(1, 100, 1, Some(10)),
            tx(2, 50, 2, Some(5)),
            tx(3, 25, 3, None),
        ] {
            store.create_transactions(vec![transaction]).await.unwrap();
        }

        recalculate_wallet_balances(&store, 1).await.unwrap();

        let mut all = store.find_all_transactions(1).await.unwrap();
        all.sort_by_key(|t| t.id);
        // order: tx2 (time 5, +50) -> tx1 (time 10, +100) -> tx3 (no time, +25)
        assert_eq!(all[1].balance_after, Some(150)); // tx1: 50 + 100
        assert_eq!(all[0].balance_after, Some(50)); // tx2 first
        assert_eq!(all[2].balance_after, Some(175)); // tx3 last
    }
}
