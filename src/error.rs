//! Crate-wide error types.
//!
//! Transport/protocol failures live closer to their transport
//! (`node::core_rpc::error`, `node::electrum`); persistence failures are
//! `crate::store::StoreError`. This module holds only the pipeline runtime's
//! own error envelope.

use thiserror::Error;

use crate::config::Network;
use crate::pipeline::SyncStats;
use crate::store::WalletId;

/// A lightweight snapshot of a sync run's [`crate::pipeline::Context`] at
/// the moment a phase failed, carried on [`PipelineError`] so a caller can
/// recover the state the spec's error envelope requires (spec.md §6:
/// "context: Context-snapshot") without the error type borrowing the live
/// `Context` itself.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub wallet_id: WalletId,
    pub network: Option<Network>,
    pub addresses_seen: usize,
    pub new_transactions_seen: usize,
    pub tip_height: u32,
    pub stats: SyncStats,
}

impl ContextSnapshot {
    /// A snapshot for failures that happen before a `Context` exists yet
    /// (loading the wallet, acquiring a node client, reading the tip
    /// height) — only the wallet id, and the network once the wallet row
    /// has been read, are known at that point.
    pub fn for_wallet(wallet_id: WalletId, network: Option<Network>) -> Self {
        Self {
            wallet_id,
            network,
            ..Default::default()
        }
    }
}

/// The pipeline error envelope described in spec.md §6.
///
/// Carries the failed phase name, the phases that completed before it, the
/// underlying cause, and a snapshot of the `Context` the failure occurred
/// in, so a caller can decide whether to resume.
#[derive(Debug, Error)]
#[error("sync pipeline failed in phase `{failed_phase}` after completing {completed_phases:?}: {cause}")]
pub struct PipelineError {
    pub failed_phase: &'static str,
    pub completed_phases: Vec<&'static str>,
    #[source]
    pub cause: anyhow::Error,
    pub context: ContextSnapshot,
}

impl PipelineError {
    pub fn new(
        failed_phase: &'static str,
        completed_phases: Vec<&'static str>,
        cause: anyhow::Error,
        context: ContextSnapshot,
    ) -> Self {
        Self {
            failed_phase,
            completed_phases,
            cause,
            context,
        }
    }
}
