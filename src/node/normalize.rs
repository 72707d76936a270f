//! The intermediate, wire-agnostic transaction record.
//!
//! spec.md §4.1/§9 describes a heuristic for normalizing ambiguous wire
//! fields: amounts that are either BTC decimals or already satoshis
//! depending on server, and `scriptPubKey.address` that may be a single
//! string or a one-element array on older servers. Neither transport in
//! this crate ever sees that ambiguity: [`crate::node::core_rpc`] decodes
//! Core's raw consensus-encoded transaction bytes into a typed
//! `bitcoin::Transaction` (so output amounts come from `Amount::to_sat()`
//! and addresses from `Address::from_script`, both exact), and
//! [`crate::node::electrum`] does the same via `electrum_client`'s own
//! typed decode of `blockchain.transaction.get`. [`NormalizedTx`] is still
//! the single intermediate record both transports produce — it just never
//! needs a normalizing heuristic to build, because the typed decode it's
//! built from already is the normalization, performed once at ingestion.
//! A transport parsing loosely-typed verbose JSON directly (rather than
//! decoding to a typed `bitcoin` struct first) would need the heuristic
//! spec.md §4.1 describes; neither of this crate's transports does.

use bitcoin::Txid;

/// A previous or current output, already amount-normalized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedTxOut {
    pub vout: u32,
    /// `None` for OP_RETURN / non-decodable scripts.
    pub address: Option<String>,
    pub script_pubkey_hex: String,
    pub amount_sat: u64,
}

/// One transaction input, with its previous output resolved when the
/// server inlined it (`prevout` is present only for verbose-capable
/// servers, per spec.md §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedTxIn {
    pub is_coinbase: bool,
    pub prev_txid: Option<Txid>,
    pub prev_vout: Option<u32>,
    pub prevout: Option<NormalizedTxOut>,
}

/// The intermediate, normalized transaction record every node-client
/// transport produces, regardless of wire dialect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedTx {
    pub txid: Txid,
    pub vin: Vec<NormalizedTxIn>,
    pub vout: Vec<NormalizedTxOut>,
    /// Fee in satoshis, when the server reports it directly (Core's
    /// `gettransaction`). `None` when the pipeline must compute it from
    /// input/output sums instead.
    pub fee_sat: Option<u64>,
    /// `None` when the server can't place the tx in a block (mempool or
    /// non-verbose response); the pipeline then falls back to address
    /// history for height, per spec.md §4.1.
    pub block_height: Option<i32>,
    /// Unix seconds from the transaction record's own `time` field, when
    /// present.
    pub block_time: Option<u32>,
}

