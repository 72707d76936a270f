//! In-memory [`Store`] used by the crate's own tests and as a reference
//! implementation for the abstract persistence contract.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::Txid;

use super::{
    Address, AddressId, Chain, CreateManyResult, DraftLock, Label, Store, StoreError, StoreOp,
    StoreResult, Transaction, TransactionId, TransactionInput, TransactionLabel,
    TransactionOutput, Utxo, Wallet, WalletId,
};

#[derive(Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    addresses: Vec<Address>,
    next_address_id: AddressId,
    transactions: Vec<Transaction>,
    next_transaction_id: TransactionId,
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    utxos: Vec<Utxo>,
    draft_locks: Vec<DraftLock>,
    next_draft_lock_id: i64,
    labels: Vec<Label>,
    transaction_labels: Vec<TransactionLabel>,
}

/// A single-process, `Mutex`-guarded reference [`Store`].
///
/// Not meant for production use: every method takes a global lock, and
/// nothing is persisted across process restarts. It exists so the pipeline
/// and its phases can be exercised without a real database.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a wallet row directly, bypassing the (out-of-scope) wallet
    /// creation surface.
    pub fn seed_wallet(&self, wallet: Wallet) {
        self.state.lock().unwrap().wallets.insert(wallet.id, wallet);
    }

    /// Seeds addresses directly, assigning ids sequentially.
    pub fn seed_addresses(&self, addresses: Vec<Address>) {
        let mut state = self.state.lock().unwrap();
        for mut addr in addresses {
            state.next_address_id += 1;
            addr.id = state.next_address_id;
            state.addresses.push(addr);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_wallet(&self, wallet_id: WalletId) -> StoreResult<Wallet> {
        self.state
            .lock()
            .unwrap()
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_addresses(&self, wallet_id: WalletId) -> StoreResult<Vec<Address>> {
        let mut addrs: Vec<Address> = self
            .state
            .lock()
            .unwrap()
            .addresses
            .iter()
            .filter(|a| a.wallet_id == wallet_id)
            .cloned()
            .collect();
        addrs.sort_by_key(|a| (a.chain as u8, a.index));
        Ok(addrs)
    }

    async fn find_addresses_by_chain(
        &self,
        wallet_id: WalletId,
        chain: Chain,
    ) -> StoreResult<Vec<Address>> {
        let mut addrs: Vec<Address> = self
            .state
            .lock()
            .unwrap()
            .addresses
            .iter()
            .filter(|a| a.wallet_id == wallet_id && a.chain == chain)
            .cloned()
            .collect();
        addrs.sort_by_key(|a| a.index);
        Ok(addrs)
    }

    async fn create_addresses(&self, addresses: Vec<Address>) -> StoreResult<CreateManyResult> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for mut addr in addresses {
            let exists = state.addresses.iter().any(|a| {
                a.address == addr.address
                    || (a.wallet_id == addr.wallet_id && a.chain == addr.chain && a.index == addr.index)
            });
            if exists {
                continue;
            }
            state.next_address_id += 1;
            addr.id = state.next_address_id;
            state.addresses.push(addr);
            inserted += 1;
        }
        Ok(CreateManyResult { inserted })
    }

    async fn set_addresses_used(&self, addresses: &[String]) -> StoreResult<usize> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for addr in state.addresses.iter_mut() {
            if addresses.contains(&addr.address) && !addr.used {
                addr.used = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_transactions_by_txids(
        &self,
        wallet_id: WalletId,
        txids: &[Txid],
    ) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id && txids.contains(&t.txid))
            .cloned()
            .collect())
    }

    async fn find_transactions_with_rbf_candidates(
        &self,
        wallet_id: WalletId,
    ) -> StoreResult<Vec<Transaction>> {
        use super::RbfStatus;
        Ok(self
            .state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| {
                t.wallet_id == wallet_id
                    && ((t.confirmations == 0 && t.rbf_status == RbfStatus::Active)
                        || (t.rbf_status == RbfStatus::Replaced && t.replaced_by_txid.is_none()))
            })
            .cloned()
            .collect())
    }

    async fn find_all_transactions(&self, wallet_id: WalletId) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn find_transactions_below_confirmations(
        &self,
        wallet_id: WalletId,
        threshold: u32,
    ) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| {
                t.wallet_id == wallet_id && t.confirmations < threshold && t.block_height.is_some()
            })
            .cloned()
            .collect())
    }

    async fn find_transaction_inputs(
        &self,
        transaction_id: TransactionId,
    ) -> StoreResult<Vec<TransactionInput>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .inputs
            .iter()
            .filter(|i| i.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn create_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> StoreResult<Vec<Transaction>> {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(transactions.len());
        for mut tx in transactions {
            let exists = state
                .transactions
                .iter()
                .any(|t| t.wallet_id == tx.wallet_id && t.txid == tx.txid);
            if exists {
                continue;
            }
            state.next_transaction_id += 1;
            tx.id = state.next_transaction_id;
            state.transactions.push(tx.clone());
            out.push(tx);
        }
        Ok(out)
    }

    async fn update_transaction(&self, transaction: Transaction) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.transactions.iter_mut().find(|t| t.id == transaction.id) {
            *slot = transaction;
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn create_transaction_inputs(
        &self,
        inputs: Vec<TransactionInput>,
    ) -> StoreResult<CreateManyResult> {
        let mut state = self.state.lock().unwrap();
        let inserted = inputs.len();
        state.inputs.extend(inputs);
        Ok(CreateManyResult { inserted })
    }

    async fn create_transaction_outputs(
        &self,
        outputs: Vec<TransactionOutput>,
    ) -> StoreResult<CreateManyResult> {
        let mut state = self.state.lock().unwrap();
        let inserted = outputs.len();
        state.outputs.extend(outputs);
        Ok(CreateManyResult { inserted })
    }

    async fn find_transaction_outputs(
        &self,
        transaction_id: TransactionId,
    ) -> StoreResult<Vec<TransactionOutput>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .outputs
            .iter()
            .filter(|o| o.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn update_transaction_output_ownership(
        &self,
        transaction_id: TransactionId,
        output_index: u32,
        is_ours: bool,
        output_type: super::OutputType,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        for out in state.outputs.iter_mut() {
            if out.transaction_id == transaction_id && out.output_index == output_index {
                out.is_ours = is_ours;
                out.output_type = output_type;
            }
        }
        Ok(())
    }

    async fn find_utxos(&self, wallet_id: WalletId) -> StoreResult<Vec<Utxo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .utxos
            .iter()
            .filter(|u| u.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn create_utxos(&self, utxos: Vec<Utxo>) -> StoreResult<CreateManyResult> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for utxo in utxos {
            let exists = state
                .utxos
                .iter()
                .any(|u| u.wallet_id == utxo.wallet_id && u.txid == utxo.txid && u.vout == utxo.vout);
            if exists {
                continue;
            }
            state.utxos.push(utxo);
            inserted += 1;
        }
        Ok(CreateManyResult { inserted })
    }

    async fn update_utxo(&self, utxo: Utxo) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state
            .utxos
            .iter_mut()
            .find(|u| u.wallet_id == utxo.wallet_id && u.txid == utxo.txid && u.vout == utxo.vout)
        {
            *slot = utxo;
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn mark_utxos_spent(
        &self,
        wallet_id: WalletId,
        keys: &[(Txid, u32)],
    ) -> StoreResult<usize> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for utxo in state.utxos.iter_mut() {
            if utxo.wallet_id == wallet_id
                && !utxo.spent
                && keys.contains(&(utxo.txid, utxo.vout))
            {
                utxo.spent = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_draft_locks_for_utxos(
        &self,
        wallet_id: WalletId,
        keys: &[(Txid, u32)],
    ) -> StoreResult<Vec<DraftLock>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .draft_locks
            .iter()
            .filter(|d| d.wallet_id == wallet_id && keys.contains(&(d.txid, d.vout)))
            .cloned()
            .collect())
    }

    async fn delete_draft_locks(&self, ids: &[i64]) -> StoreResult<usize> {
        let mut state = self.state.lock().unwrap();
        let before = state.draft_locks.len();
        state.draft_locks.retain(|d| !ids.contains(&d.id));
        Ok(before - state.draft_locks.len())
    }

    async fn find_labels_for_address(&self, address_id: AddressId) -> StoreResult<Vec<Label>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .labels
            .iter()
            .filter(|l| l.address_id == address_id)
            .cloned()
            .collect())
    }

    async fn create_transaction_labels(
        &self,
        links: Vec<TransactionLabel>,
    ) -> StoreResult<CreateManyResult> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for link in links {
            let exists = state
                .transaction_labels
                .iter()
                .any(|l| l.transaction_id == link.transaction_id && l.label_id == link.label_id);
            if exists {
                continue;
            }
            state.transaction_labels.push(link);
            inserted += 1;
        }
        Ok(CreateManyResult { inserted })
    }

    async fn transaction(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        for op in ops {
            match op {
                StoreOp::CreateTransactions(txs) => {
                    for mut tx in txs {
                        let exists = state
                            .transactions
                            .iter()
                            .any(|t| t.wallet_id == tx.wallet_id && t.txid == tx.txid);
                        if exists {
                            continue;
                        }
                        state.next_transaction_id += 1;
                        tx.id = state.next_transaction_id;
                        state.transactions.push(tx);
                    }
                }
                StoreOp::CreateTransactionInputs(inputs) => state.inputs.extend(inputs),
                StoreOp::CreateTransactionOutputs(outputs) => state.outputs.extend(outputs),
                StoreOp::CreateUtxos(utxos) => {
                    for utxo in utxos {
                        let exists = state.utxos.iter().any(|u| {
                            u.wallet_id == utxo.wallet_id
                                && u.txid == utxo.txid
                                && u.vout == utxo.vout
                        });
                        if !exists {
                            state.utxos.push(utxo);
                        }
                    }
                }
                StoreOp::UpdateTransactionBalance { id, balance_after } => {
                    if let Some(tx) = state.transactions.iter_mut().find(|t| t.id == id) {
                        tx.balance_after = Some(balance_after);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Chain, ScriptType, WalletType};

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

    #[tokio::test]
    async fn create_addresses_skips_duplicates_by_address_string() {
        let store = MemoryStore::new();
        store.seed_wallet(wallet(1));
        let addr = Address {
            id: 0,
            wallet_id: 1,
            address: "bc1qexample".to_string(),
            derivation_path: "m/84'/0'/0'/0/0".to_string(),
            index: 0,
            used: false,
            chain: Chain::External,
        };
        let first = store.create_addresses(vec![addr.clone()]).await.unwrap();
        assert_eq!(first.inserted, 1);
        let second = store.create_addresses(vec![addr]).await.unwrap();
        assert_eq!(second.inserted, 0);
    }

    #[tokio::test]
    async fn set_addresses_used_only_counts_flips() {
        let store = MemoryStore::new();
        store.seed_wallet(wallet(1));
        store.seed_addresses(vec![Address {
            id: 0,
            wallet_id: 1,
            address: "bc1qexample".to_string(),
            derivation_path: "m/84'/0'/0'/0/0".to_string(),
            index: 0,
            used: false,
            chain: Chain::External,
        }]);
        let changed = store
            .set_addresses_used(&["bc1qexample".to_string()])
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let changed_again = store
            .set_addresses_used(&["bc1qexample".to_string()])
            .await
            .unwrap();
        assert_eq!(changed_again, 0);
    }
}
