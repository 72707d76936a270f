//! The persistence boundary (spec.md §3, §6).
//!
//! Storage is out of scope for the core; this module defines only the
//! entities and the abstract, async [`Store`] trait the pipeline consumes.
//! [`memory`] provides an in-process reference implementation used by the
//! crate's own tests.

pub mod memory;

use async_trait::async_trait;
use bitcoin::Txid;
use thiserror::Error;

use crate::config::Network;

pub type WalletId = i64;
pub type AddressId = i64;
pub type TransactionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletType {
    SingleSig,
    MultiSig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    Legacy,
    NestedSegwit,
    NativeSegwit,
    Taproot,
}

#[derive(Debug, Clone)]
pub struct Wallet {
    pub id: WalletId,
    pub network: Network,
    pub descriptor: String,
    pub wallet_type: WalletType,
    pub script_type: ScriptType,
    pub quorum: Option<(u8, u8)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    External = 0,
    Internal = 1,
}

#[derive(Debug, Clone)]
pub struct Address {
    pub id: AddressId,
    pub wallet_id: WalletId,
    pub address: String,
    pub derivation_path: String,
    pub index: u32,
    pub used: bool,
    pub chain: Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Received,
    Sent,
    Consolidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbfStatus {
    Active,
    Replaced,
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub txid: Txid,
    pub tx_type: TransactionType,
    /// Signed satoshis: received > 0, sent < 0, consolidation <= 0.
    pub amount: i64,
    pub fee: Option<u64>,
    pub block_height: Option<i32>,
    pub block_time: Option<u32>,
    pub confirmations: u32,
    pub rbf_status: RbfStatus,
    pub replaced_by_txid: Option<Txid>,
    pub address_id: Option<AddressId>,
    pub counterparty_address: Option<String>,
    pub balance_after: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct TransactionInput {
    pub transaction_id: TransactionId,
    pub input_index: u32,
    pub prev_txid: Txid,
    pub prev_vout: u32,
    pub address: String,
    pub amount: u64,
    pub derivation_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Recipient,
    Change,
    Consolidation,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct TransactionOutput {
    pub transaction_id: TransactionId,
    pub output_index: u32,
    pub address: String,
    pub amount: u64,
    pub script_pubkey: String,
    pub output_type: OutputType,
    pub is_ours: bool,
}

#[derive(Debug, Clone)]
pub struct Utxo {
    pub wallet_id: WalletId,
    pub txid: Txid,
    pub vout: u32,
    pub address: String,
    pub amount: u64,
    pub block_height: Option<i32>,
    pub confirmations: u32,
    pub spent: bool,
}

#[derive(Debug, Clone)]
pub struct DraftLock {
    pub id: i64,
    pub wallet_id: WalletId,
    pub txid: Txid,
    pub vout: u32,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub id: i64,
    pub wallet_id: WalletId,
    pub address_id: AddressId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct TransactionLabel {
    pub transaction_id: TransactionId,
    pub label_id: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store transaction aborted: {0}")]
    TransactionAborted(String),
    #[error("not found")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a batch insert with `skipDuplicates` semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateManyResult {
    pub inserted: usize,
}

/// A single mutation, for use inside [`Store::transaction`].
///
/// The core only ever needs to batch the four write shapes below inside
/// one store transaction (spec.md §6); anything larger goes through the
/// dedicated typed methods instead of this enum.
pub enum StoreOp {
    CreateTransactions(Vec<Transaction>),
    CreateTransactionInputs(Vec<TransactionInput>),
    CreateTransactionOutputs(Vec<TransactionOutput>),
    CreateUtxos(Vec<Utxo>),
    UpdateTransactionBalance { id: TransactionId, balance_after: i64 },
}

/// The abstract relational interface the pipeline consumes (spec.md §6).
///
/// Every multi-row write takes `skipDuplicates`-style semantics: a
/// conflicting row is silently skipped rather than aborting the whole
/// batch, matching spec.md §7 item 4 ("only batch-level aborts fail the
/// phase").
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_wallet(&self, wallet_id: WalletId) -> StoreResult<Wallet>;

    async fn find_addresses(&self, wallet_id: WalletId) -> StoreResult<Vec<Address>>;

    async fn find_addresses_by_chain(
        &self,
        wallet_id: WalletId,
        chain: Chain,
    ) -> StoreResult<Vec<Address>>;

    async fn create_addresses(
        &self,
        addresses: Vec<Address>,
    ) -> StoreResult<CreateManyResult>;

    async fn set_addresses_used(&self, addresses: &[String]) -> StoreResult<usize>;

    async fn find_transactions_by_txids(
        &self,
        wallet_id: WalletId,
        txids: &[Txid],
    ) -> StoreResult<Vec<Transaction>>;

    async fn find_transactions_with_rbf_candidates(
        &self,
        wallet_id: WalletId,
    ) -> StoreResult<Vec<Transaction>>;

    async fn find_all_transactions(&self, wallet_id: WalletId) -> StoreResult<Vec<Transaction>>;

    async fn find_transactions_below_confirmations(
        &self,
        wallet_id: WalletId,
        threshold: u32,
    ) -> StoreResult<Vec<Transaction>>;

    async fn find_transaction_inputs(
        &self,
        transaction_id: TransactionId,
    ) -> StoreResult<Vec<TransactionInput>>;

    async fn create_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> StoreResult<Vec<Transaction>>;

    async fn update_transaction(&self, transaction: Transaction) -> StoreResult<()>;

    async fn create_transaction_inputs(
        &self,
        inputs: Vec<TransactionInput>,
    ) -> StoreResult<CreateManyResult>;

    async fn create_transaction_outputs(
        &self,
        outputs: Vec<TransactionOutput>,
    ) -> StoreResult<CreateManyResult>;

    async fn find_transaction_outputs(
        &self,
        transaction_id: TransactionId,
    ) -> StoreResult<Vec<TransactionOutput>>;

    async fn update_transaction_output_ownership(
        &self,
        transaction_id: TransactionId,
        output_index: u32,
        is_ours: bool,
        output_type: OutputType,
    ) -> StoreResult<()>;

    async fn find_utxos(&self, wallet_id: WalletId) -> StoreResult<Vec<Utxo>>;

    async fn create_utxos(&self, utxos: Vec<Utxo>) -> StoreResult<CreateManyResult>;

    async fn update_utxo(&self, utxo: Utxo) -> StoreResult<()>;

    async fn mark_utxos_spent(
        &self,
        wallet_id: WalletId,
        keys: &[(Txid, u32)],
    ) -> StoreResult<usize>;

    async fn find_draft_locks_for_utxos(
        &self,
        wallet_id: WalletId,
        keys: &[(Txid, u32)],
    ) -> StoreResult<Vec<DraftLock>>;

    async fn delete_draft_locks(&self, ids: &[i64]) -> StoreResult<usize>;

    async fn find_labels_for_address(&self, address_id: AddressId) -> StoreResult<Vec<Label>>;

    async fn create_transaction_labels(
        &self,
        links: Vec<TransactionLabel>,
    ) -> StoreResult<CreateManyResult>;

    /// Atomically applies a list of mutations (spec.md §6
    /// `transaction(ops[])`).
    async fn transaction(&self, ops: Vec<StoreOp>) -> StoreResult<()>;
}
