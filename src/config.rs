//! Configuration surface (spec.md §6).
//!
//! A single [`Config`] record per process, keyed by network for the
//! per-network node endpoint. Plain struct with `Default`, in the teacher's
//! idiom, rather than a builder — every field maps directly to a key spec.md
//! §6 names.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A wallet's network, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    pub fn as_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Which wire dialect a [`NodeEndpoint`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEndpointKind {
    Electrum,
    Core,
}

/// A single remote node's connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEndpoint {
    #[serde(rename = "type")]
    pub kind: NodeEndpointKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Chunking for store writes, kept distinct from node-request batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Width of each chunked store transaction (spec.md §6
    /// `sync.transactionBatchSize`; also used by [`crate::balance`] for its
    /// 500-row recalculation chunks unless overridden).
    pub transaction_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transaction_batch_size: 500,
        }
    }
}

/// The full configuration surface consumed by the pipeline and backfill
/// scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on `confirmations` below which
    /// [`crate::backfill::update_transaction_confirmations`] still
    /// re-checks a transaction (default 100).
    pub deep_confirmation_threshold: u32,
    pub sync: SyncConfig,
    /// BIP-44 gap limit maintained independently per chain (default 20).
    pub address_gap_limit: u32,
    pub node_endpoints: HashMap<Network, NodeEndpoint>,
    pub default_electrum_host: String,
    pub default_electrum_port: u16,
    pub default_electrum_ssl: bool,
    /// Width of batched `getAddressHistory`/UTXO requests (default 10).
    pub history_batch_size: usize,
    /// Width of batched verbose-transaction fetches during the main
    /// pipeline (default 25, per spec.md §4.6).
    pub tx_batch_size_pipeline: usize,
    /// Width of batched verbose-transaction fetches during backfill
    /// (default 5, per spec.md §6).
    pub tx_batch_size_backfill: usize,
    pub notification_batch_size: usize,
    /// Per-request timeout applied to every outbound node call (default 30s,
    /// per spec.md §5).
    #[serde(with = "duration_secs")]
    pub node_request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deep_confirmation_threshold: 100,
            sync: SyncConfig::default(),
            address_gap_limit: 20,
            node_endpoints: HashMap::new(),
            default_electrum_host: "electrum.blockstream.info".to_string(),
            default_electrum_port: 50002,
            default_electrum_ssl: true,
            history_batch_size: 10,
            tx_batch_size_pipeline: 25,
            tx_batch_size_backfill: 5,
            notification_batch_size: 50,
            node_request_timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
