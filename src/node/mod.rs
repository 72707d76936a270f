//! Unified node-client capability surface.
//!
//! Two wire dialects exist — Electrum stratum ([`electrum`]) and Bitcoin
//! Core JSON-RPC ([`core_rpc`]) — but the sync pipeline only ever talks to
//! the [`NodeClient`] trait. [`NodeHandle`] is the tagged-variant dispatch
//! recommended for "polymorphism over transport" in the design notes: a
//! `&dyn NodeClient` would work just as well, but the enum keeps the type
//! `Send + Sync + Clone` without boxing, matching how the teacher's `Client`
//! is itself `Clone` and shared across tasks.

pub mod core_rpc;
pub mod electrum;
pub mod normalize;
pub mod pool;

use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::Txid;
use futures::stream::{self, StreamExt};
use thiserror::Error;

/// Bounded fan-out width for default per-address history/UTXO fallback
/// fetches (spec.md §5).
const HISTORY_UTXO_FANOUT: usize = 10;
/// Bounded fan-out width for default per-transaction fallback fetches
/// (spec.md §5).
const TX_FANOUT: usize = 5;

pub use normalize::{NormalizedTx, NormalizedTxIn, NormalizedTxOut};

/// Failures from the node-client capability surface.
///
/// Both transports normalize their protocol- and transport-level failures
/// into this type so phases can match on a single error shape regardless of
/// which dialect is in use (spec.md §7 items 1-2).
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error (code {code}): {message}")]
    Protocol { code: i64, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("server did not return a value for {0}")]
    Missing(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type NodeResult<T> = Result<T, NodeError>;

/// One entry of an address's confirmed/mempool history, per spec.md §4.1.
///
/// `height == 0` means the transaction is unconfirmed (mempool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryEntry {
    pub txid: Txid,
    pub height: i32,
}

/// A single unspent output as reported by the remote node for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteUtxo {
    pub txid: Txid,
    pub vout: u32,
    /// Amount in satoshis, already normalized (see [`normalize`]).
    pub amount_sat: u64,
    /// `0` when the UTXO sits in the mempool.
    pub height: i32,
}

/// The unified capability surface consumed by the pipeline (spec.md §4.1).
///
/// Implementors MUST normalize field naming so that callers always see
/// satoshi amounts and a consistent `scriptPubKey.address` shape, per the
/// heuristics in [`normalize`].
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn connect(&self) -> NodeResult<()>;
    async fn disconnect(&self) -> NodeResult<()>;
    async fn is_connected(&self) -> bool;

    async fn get_block_height(&self) -> NodeResult<u32>;

    /// Fetches the raw 80-byte block header at `height`, hex-encoded.
    async fn get_block_header(&self, height: u32) -> NodeResult<String>;

    async fn get_address_history(&self, address: &str) -> NodeResult<Vec<HistoryEntry>>;

    /// Batched address-history fetch. Implementations SHOULD map this 1-to-1
    /// onto the protocol's native batch call; on batch failure the caller
    /// (`fetchHistoriesPhase`) falls back to [`Self::get_address_history`]
    /// per address, so a default implementation that simply loops is a
    /// correct (if slower) fallback.
    async fn get_address_history_batch(
        &self,
        addresses: &[String],
    ) -> NodeResult<HashMap<String, Vec<HistoryEntry>>> {
        let results: Vec<NodeResult<(String, Vec<HistoryEntry>)>> =
            stream::iter(addresses.iter().cloned())
                .map(|addr| async move {
                    let entries = self.get_address_history(&addr).await?;
                    Ok((addr, entries))
                })
                .buffer_unordered(HISTORY_UTXO_FANOUT)
                .collect()
                .await;

        let mut out = HashMap::with_capacity(addresses.len());
        for result in results {
            let (addr, entries) = result?;
            out.insert(addr, entries);
        }
        Ok(out)
    }

    async fn get_address_utxos(&self, address: &str) -> NodeResult<Vec<RemoteUtxo>>;

    async fn get_address_utxos_batch(
        &self,
        addresses: &[String],
    ) -> NodeResult<HashMap<String, Vec<RemoteUtxo>>> {
        let results: Vec<NodeResult<(String, Vec<RemoteUtxo>)>> =
            stream::iter(addresses.iter().cloned())
                .map(|addr| async move {
                    let utxos = self.get_address_utxos(&addr).await?;
                    Ok((addr, utxos))
                })
                .buffer_unordered(HISTORY_UTXO_FANOUT)
                .collect()
                .await;

        let mut out = HashMap::with_capacity(addresses.len());
        for result in results {
            let (addr, utxos) = result?;
            out.insert(addr, utxos);
        }
        Ok(out)
    }

    /// Fetches one transaction in verbose (decoded) form where supported.
    ///
    /// When the remote can't produce verbose detail (Blockstream-class
    /// Electrum servers), the returned [`NormalizedTx`] still carries
    /// `txid`/`hex` but leaves `vin[].prevout` empty; block heights then
    /// flow from address history rather than the transaction record
    /// (spec.md §4.1, §4.6).
    async fn get_transaction(&self, txid: &Txid) -> NodeResult<NormalizedTx>;

    async fn get_transactions_batch(
        &self,
        txids: &[Txid],
    ) -> NodeResult<HashMap<Txid, NormalizedTx>> {
        let fetched: Vec<Option<(Txid, NormalizedTx)>> = stream::iter(txids.iter().copied())
            .map(|txid| async move { self.get_transaction(&txid).await.ok().map(|tx| (txid, tx)) })
            .buffer_unordered(TX_FANOUT)
            .collect()
            .await;

        let mut out = HashMap::with_capacity(txids.len());
        out.extend(fetched.into_iter().flatten());
        Ok(out)
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> NodeResult<Txid>;

    /// Estimated fee rate in sat/vByte for confirmation within `blocks`.
    async fn estimate_fee(&self, blocks: u16) -> NodeResult<f64>;
}

/// Tagged dispatch over the two supported transports.
///
/// See the design notes in SPEC_FULL.md §5/§9: a trait-object would work
/// too, but the enum keeps `Clone` cheap (both inner clients are
/// `Arc`-backed) and avoids a vtable indirection on the pipeline's hot path.
#[derive(Clone)]
pub enum NodeHandle {
    Electrum(electrum::ElectrumClient),
    Core(core_rpc::CoreRpcClient),
}

#[async_trait]
impl NodeClient for NodeHandle {
    async fn connect(&self) -> NodeResult<()> {
        match self {
            Self::Electrum(c) => c.connect().await,
            Self::Core(c) => c.connect().await,
        }
    }

    async fn disconnect(&self) -> NodeResult<()> {
        match self {
            Self::Electrum(c) => c.disconnect().await,
            Self::Core(c) => c.disconnect().await,
        }
    }

    async fn is_connected(&self) -> bool {
        match self {
            Self::Electrum(c) => c.is_connected().await,
            Self::Core(c) => c.is_connected().await,
        }
    }

    async fn get_block_height(&self) -> NodeResult<u32> {
        match self {
            Self::Electrum(c) => c.get_block_height().await,
            Self::Core(c) => c.get_block_height().await,
        }
    }

    async fn get_block_header(&self, height: u32) -> NodeResult<String> {
        match self {
            Self::Electrum(c) => c.get_block_header(height).await,
            Self::Core(c) => c.get_block_header(height).await,
        }
    }

    async fn get_address_history(&self, address: &str) -> NodeResult<Vec<HistoryEntry>> {
        match self {
            Self::Electrum(c) => c.get_address_history(address).await,
            Self::Core(c) => c.get_address_history(address).await,
        }
    }

    async fn get_address_history_batch(
        &self,
        addresses: &[String],
    ) -> NodeResult<HashMap<String, Vec<HistoryEntry>>> {
        match self {
            Self::Electrum(c) => c.get_address_history_batch(addresses).await,
            Self::Core(c) => c.get_address_history_batch(addresses).await,
        }
    }

    async fn get_address_utxos(&self, address: &str) -> NodeResult<Vec<RemoteUtxo>> {
        match self {
            Self::Electrum(c) => c.get_address_utxos(address).await,
            Self::Core(c) => c.get_address_utxos(address).await,
        }
    }

    async fn get_address_utxos_batch(
        &self,
        addresses: &[String],
    ) -> NodeResult<HashMap<String, Vec<RemoteUtxo>>> {
        match self {
            Self::Electrum(c) => c.get_address_utxos_batch(addresses).await,
            Self::Core(c) => c.get_address_utxos_batch(addresses).await,
        }
    }

    async fn get_transaction(&self, txid: &Txid) -> NodeResult<NormalizedTx> {
        match self {
            Self::Electrum(c) => c.get_transaction(txid).await,
            Self::Core(c) => c.get_transaction(txid).await,
        }
    }

    async fn get_transactions_batch(
        &self,
        txids: &[Txid],
    ) -> NodeResult<HashMap<Txid, NormalizedTx>> {
        match self {
            Self::Electrum(c) => c.get_transactions_batch(txids).await,
            Self::Core(c) => c.get_transactions_batch(txids).await,
        }
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> NodeResult<Txid> {
        match self {
            Self::Electrum(c) => c.broadcast_transaction(raw_hex).await,
            Self::Core(c) => c.broadcast_transaction(raw_hex).await,
        }
    }

    async fn estimate_fee(&self, blocks: u16) -> NodeResult<f64> {
        match self {
            Self::Electrum(c) => c.estimate_fee(blocks).await,
            Self::Core(c) => c.estimate_fee(blocks).await,
        }
    }
}
