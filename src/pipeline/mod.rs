//! The staged synchronization engine (spec.md §4.2).
//!
//! [`Runtime`] owns the process-wide singletons (design notes: node client
//! pool, block-height cache, timestamp LRU) and drives one [`Context`]
//! through an ordered list of phases per sync run. Phases never see each
//! other directly; they only read and extend `Context`.

pub mod phases;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use bitcoin::Txid;
use tokio::sync::Mutex as AsyncMutex;

use crate::blockheight::{HeightCache, TimestampCache};
use crate::config::{Config, Network};
use crate::descriptor::DescriptorDeriver;
use crate::error::{ContextSnapshot, PipelineError};
use crate::node::normalize::NormalizedTx;
use crate::node::pool::NodeClientPool;
use crate::node::{HistoryEntry, NodeClient, RemoteUtxo};
use crate::notify::Notifier;
use crate::store::{Address, AddressId, Store, Transaction, WalletId};

/// One phase in the default/quick orderings (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    RbfCleanup,
    FetchHistories,
    CheckExisting,
    ProcessTransactions,
    FetchUtxos,
    ReconcileUtxos,
    InsertUtxos,
    UpdateAddresses,
    GapLimit,
    FixConsolidations,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::RbfCleanup => "rbfCleanup",
            Phase::FetchHistories => "fetchHistories",
            Phase::CheckExisting => "checkExisting",
            Phase::ProcessTransactions => "processTransactions",
            Phase::FetchUtxos => "fetchUtxos",
            Phase::ReconcileUtxos => "reconcileUtxos",
            Phase::InsertUtxos => "insertUtxos",
            Phase::UpdateAddresses => "updateAddresses",
            Phase::GapLimit => "gapLimit",
            Phase::FixConsolidations => "fixConsolidations",
        }
    }
}

/// The "default" preset ordering (spec.md §4.2).
pub const DEFAULT_ORDER: &[Phase] = &[
    Phase::RbfCleanup,
    Phase::FetchHistories,
    Phase::CheckExisting,
    Phase::ProcessTransactions,
    Phase::FetchUtxos,
    Phase::ReconcileUtxos,
    Phase::InsertUtxos,
    Phase::UpdateAddresses,
    Phase::GapLimit,
    Phase::FixConsolidations,
];

/// The "quick" polling-path ordering (spec.md §4.2).
pub const QUICK_ORDER: &[Phase] = &[
    Phase::FetchHistories,
    Phase::CheckExisting,
    Phase::ProcessTransactions,
    Phase::FetchUtxos,
    Phase::ReconcileUtxos,
    Phase::InsertUtxos,
    Phase::UpdateAddresses,
];

/// Per-run statistics, matching the sync result envelope (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub histories_fetched: usize,
    pub transactions_processed: usize,
    pub new_transactions_created: usize,
    pub utxos_fetched: usize,
    pub utxos_created: usize,
    pub utxos_marked_spent: usize,
    pub addresses_updated: usize,
    pub new_addresses_generated: usize,
    pub corrected_consolidations: usize,
}

/// The mutable state threaded through every phase of one sync run
/// (spec.md §4.2 step 4, design notes "shared mutable context").
pub struct Context {
    pub wallet_id: WalletId,
    pub wallet_descriptor: String,
    pub network: Network,
    pub client: Arc<dyn NodeClient>,
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub notifier: Notifier,
    pub height_cache: Arc<HeightCache>,
    pub timestamp_cache: Arc<TimestampCache>,
    pub deriver: Option<Arc<dyn DescriptorDeriver>>,

    pub addresses: Vec<Address>,
    pub address_set: HashSet<String>,
    pub address_to_id: HashMap<String, AddressId>,
    pub address_to_derivation_path: HashMap<String, String>,

    pub history_results: HashMap<String, Vec<HistoryEntry>>,
    pub all_txids: HashSet<Txid>,

    pub existing_tx_map: HashMap<Txid, Transaction>,
    pub existing_txid_set: HashSet<Txid>,
    pub new_txids: Vec<Txid>,

    pub tx_details_cache: HashMap<Txid, NormalizedTx>,

    pub utxo_data_map: HashMap<(Txid, u32), (String, RemoteUtxo)>,
    pub all_utxo_keys: HashSet<(Txid, u32)>,
    pub successfully_fetched_addresses: HashSet<String>,

    pub new_transactions: Vec<Transaction>,
    pub new_addresses: Vec<Address>,

    pub stats: SyncStats,
    pub start_time: Instant,
    pub tip_height: u32,
    pub completed_phases: Vec<&'static str>,
}

impl From<&Context> for ContextSnapshot {
    fn from(ctx: &Context) -> Self {
        Self {
            wallet_id: ctx.wallet_id,
            network: Some(ctx.network),
            addresses_seen: ctx.addresses.len(),
            new_transactions_seen: ctx.new_transactions.len(),
            tip_height: ctx.tip_height,
            stats: ctx.stats.clone(),
        }
    }
}

impl Context {
    fn rebuild_address_indexes(&mut self) {
        self.address_set = self.addresses.iter().map(|a| a.address.clone()).collect();
        self.address_to_id = self
            .addresses
            .iter()
            .map(|a| (a.address.clone(), a.id))
            .collect();
        self.address_to_derivation_path = self
            .addresses
            .iter()
            .map(|a| (a.address.clone(), a.derivation_path.clone()))
            .collect();
    }
}

/// The aggregate result of one sync run (spec.md §6).
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub addresses: usize,
    pub transactions: usize,
    pub utxos: usize,
    pub elapsed_ms: u128,
    pub stats: SyncStats,
}

/// A `0.0..=1.0` estimate of how far through the configured phase ordering
/// a run has progressed, derived from `completedPhases.len() / total`
/// (SPEC_FULL.md §3, grounded on liana's `bitcoin::SyncProgress`). Additive
/// over spec.md §6's envelope, which carries no progress field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncProgress(pub f32);

type PhaseHook = Arc<dyn Fn(Phase, &Context, SyncProgress) + Send + Sync>;

/// Owns the process-wide singletons and serializes runs per wallet
/// (spec.md §4.2, §5: "no two runs for the same walletId may proceed
/// concurrently").
pub struct Runtime {
    pub store: Arc<dyn Store>,
    pub node_pool: Arc<NodeClientPool>,
    pub height_cache: Arc<HeightCache>,
    pub timestamp_cache: Arc<TimestampCache>,
    pub notifier: Notifier,
    pub config: Config,
    pub deriver: Option<Arc<dyn DescriptorDeriver>>,
    wallet_locks: AsyncMutex<HashMap<WalletId, Arc<AsyncMutex<()>>>>,
}

impl Runtime {
    pub fn new(
        store: Arc<dyn Store>,
        node_pool: Arc<NodeClientPool>,
        notifier: Notifier,
        config: Config,
    ) -> Self {
        Self {
            store,
            node_pool,
            height_cache: Arc::new(HeightCache::new()),
            timestamp_cache: Arc::new(TimestampCache::new()),
            notifier,
            config,
            deriver: None,
            wallet_locks: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Registers the descriptor-to-address deriver used by the gap-limit
    /// phase. Without one, that phase is a no-op (spec.md §4.11 treats
    /// derivation as a pluggable capability the core does not implement).
    pub fn with_deriver(mut self, deriver: Arc<dyn DescriptorDeriver>) -> Self {
        self.deriver = Some(deriver);
        self
    }

    async fn wallet_lock(&self, wallet_id: WalletId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.wallet_locks.lock().await;
        locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Runs `order`, skipping phases in `skip` and, if `only` is non-empty,
    /// running only those phases, calling `on_phase_complete` after each.
    pub async fn run(
        &self,
        wallet_id: WalletId,
        order: &[Phase],
        skip: &[Phase],
        only: &[Phase],
        on_phase_complete: Option<PhaseHook>,
    ) -> Result<SyncResult, PipelineError> {
        let lock = self.wallet_lock(wallet_id).await;
        let _guard = lock.lock().await;

        let wallet = self.store.find_wallet(wallet_id).await.map_err(|e| {
            PipelineError::new(
                "loadWallet",
                vec![],
                anyhow::anyhow!(e),
                ContextSnapshot::for_wallet(wallet_id, None),
            )
        })?;

        let client = self
            .node_pool
            .get(wallet.network)
            .await
            .ok_or_else(|| {
                PipelineError::new(
                    "acquireNodeClient",
                    vec![],
                    anyhow::anyhow!("no node client registered for network {:?}", wallet.network),
                    ContextSnapshot::for_wallet(wallet_id, Some(wallet.network)),
                )
            })?;

        client.connect().await.map_err(|e| {
            PipelineError::new(
                "acquireNodeClient",
                vec![],
                anyhow::anyhow!(e),
                ContextSnapshot::for_wallet(wallet_id, Some(wallet.network)),
            )
        })?;

        let tip_height = self
            .height_cache
            .get_block_height(wallet.network, client.as_ref())
            .await
            .map_err(|e| {
                PipelineError::new(
                    "getTipHeight",
                    vec![],
                    anyhow::anyhow!(e),
                    ContextSnapshot::for_wallet(wallet_id, Some(wallet.network)),
                )
            })?;

        let addresses = self.store.find_addresses(wallet_id).await.map_err(|e| {
            PipelineError::new(
                "loadAddresses",
                vec![],
                anyhow::anyhow!(e),
                ContextSnapshot::for_wallet(wallet_id, Some(wallet.network)),
            )
        })?;

        let mut ctx = Context {
            wallet_id,
            wallet_descriptor: wallet.descriptor.clone(),
            network: wallet.network,
            client: client.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            notifier: self.notifier.clone(),
            height_cache: self.height_cache.clone(),
            timestamp_cache: self.timestamp_cache.clone(),
            deriver: self.deriver.clone(),
            addresses,
            address_set: HashSet::new(),
            address_to_id: HashMap::new(),
            address_to_derivation_path: HashMap::new(),
            history_results: HashMap::new(),
            all_txids: HashSet::new(),
            existing_tx_map: HashMap::new(),
            existing_txid_set: HashSet::new(),
            new_txids: Vec::new(),
            tx_details_cache: HashMap::new(),
            utxo_data_map: HashMap::new(),
            all_utxo_keys: HashSet::new(),
            successfully_fetched_addresses: HashSet::new(),
            new_transactions: Vec::new(),
            new_addresses: Vec::new(),
            stats: SyncStats::default(),
            start_time: Instant::now(),
            tip_height,
            completed_phases: Vec::new(),
        };
        ctx.rebuild_address_indexes();

        let total_phases = order.len().max(1);
        for &phase in order {
            if skip.contains(&phase) {
                continue;
            }
            if !only.is_empty() && !only.contains(&phase) {
                continue;
            }

            let result = phases::run_phase(phase, &mut ctx).await;
            match result {
                Ok(()) => {
                    ctx.completed_phases.push(phase.name());
                    if let Some(hook) = &on_phase_complete {
                        let progress = SyncProgress(
                            ctx.completed_phases.len() as f32 / total_phases as f32,
                        );
                        hook(phase, &ctx, progress);
                    }
                }
                Err(err) => {
                    let snapshot = ContextSnapshot::from(&ctx);
                    return Err(PipelineError::new(
                        phase.name(),
                        ctx.completed_phases,
                        err,
                        snapshot,
                    ));
                }
            }
        }

        Ok(SyncResult {
            addresses: ctx.addresses.len(),
            transactions: ctx.new_transactions.len(),
            utxos: ctx.all_utxo_keys.len(),
            elapsed_ms: ctx.start_time.elapsed().as_millis(),
            stats: ctx.stats,
        })
    }
}
