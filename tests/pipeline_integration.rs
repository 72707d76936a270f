//! End-to-end pipeline tests against [`MemoryStore`] and a scripted fake
//! [`NodeClient`], covering the concrete scenarios in spec.md §8.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::Txid;

use wallet_sync_core::descriptor::{DerivationError, DerivedAddress, DescriptorDeriver};
use wallet_sync_core::node::pool::NodeClientPool;
use wallet_sync_core::node::{
    HistoryEntry, NodeClient, NodeError, NodeResult, NormalizedTx, NormalizedTxIn, NormalizedTxOut,
    RemoteUtxo,
};
use wallet_sync_core::notify::Notifier;
use wallet_sync_core::store::memory::MemoryStore;
use wallet_sync_core::store::{
    Address, Chain, RbfStatus, ScriptType, Store, TransactionType, Wallet, WalletType,
};
use wallet_sync_core::{Config, Network, Runtime, DEFAULT_ORDER};

fn txid(byte: u8) -> Txid {
    Txid::from_byte_array([byte; 32])
}

fn wallet(id: i64) -> Wallet {
    Wallet {
        id,
        network: Network::Regtest,
        descriptor: "wpkh(tpub.../*)".to_string(),
        wallet_type: WalletType::SingleSig,
        script_type: ScriptType::NativeSegwit,
        quorum: None,
    }
}

fn address(wallet_id: i64, addr: &str, index: u32, chain: Chain) -> Address {
    Address {
        id: 0,
        wallet_id,
        address: addr.to_string(),
        derivation_path: format!("m/84'/1'/0'/{}/{}", chain as u8, index),
        index,
        used: chain == Chain::External && index < 5,
        chain,
    }
}

fn out(address: &str, amount_sat: u64, vout: u32) -> NormalizedTxOut {
    NormalizedTxOut {
        vout,
        address: Some(address.to_string()),
        script_pubkey_hex: String::new(),
        amount_sat,
    }
}

fn input(prev_txid: Txid, prev_vout: u32) -> NormalizedTxIn {
    NormalizedTxIn {
        is_coinbase: false,
        prev_txid: Some(prev_txid),
        prev_vout: Some(prev_vout),
        prevout: None,
    }
}

/// A scripted node client: every response is pre-seeded, nothing is
/// computed. Matches SPEC_FULL.md §2's "scripted NodeClient test double".
#[derive(Default)]
struct FakeNodeClient {
    height: u32,
    histories: HashMap<String, Vec<HistoryEntry>>,
    utxos: HashMap<String, Vec<RemoteUtxo>>,
    transactions: HashMap<Txid, NormalizedTx>,
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn connect(&self) -> NodeResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> NodeResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn get_block_height(&self) -> NodeResult<u32> {
        Ok(self.height)
    }

    async fn get_block_header(&self, height: u32) -> NodeResult<String> {
        Err(NodeError::Missing(format!("no header seeded for height {height}")))
    }

    async fn get_address_history(&self, address: &str) -> NodeResult<Vec<HistoryEntry>> {
        Ok(self.histories.get(address).cloned().unwrap_or_default())
    }

    async fn get_address_utxos(&self, address: &str) -> NodeResult<Vec<RemoteUtxo>> {
        Ok(self.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_transaction(&self, txid: &Txid) -> NodeResult<NormalizedTx> {
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| NodeError::Missing(txid.to_string()))
    }

    async fn broadcast_transaction(&self, _raw_hex: &str) -> NodeResult<Txid> {
        Err(NodeError::Transport("fake client does not broadcast".to_string()))
    }

    async fn estimate_fee(&self, _blocks: u16) -> NodeResult<f64> {
        Ok(1.0)
    }
}

/// Derives a deterministic placeholder address per chain/index, with the
/// ability to override specific indices to land on an address the test
/// wants to see re-enter the wallet set (scenario 3's "wallet-addr-new").
#[derive(Default)]
struct FakeDeriver {
    overrides: HashMap<(Chain, u32), String>,
}

#[async_trait]
impl DescriptorDeriver for FakeDeriver {
    async fn derive(
        &self,
        _descriptor: &str,
        chain: Chain,
        index: u32,
    ) -> Result<DerivedAddress, DerivationError> {
        let address = self
            .overrides
            .get(&(chain, index))
            .cloned()
            .unwrap_or_else(|| format!("derived-{:?}-{}", chain, index));
        Ok(DerivedAddress {
            address,
            derivation_path: format!("m/84'/1'/0'/{}/{}", chain as u8, index),
            index,
            chain,
        })
    }
}

async fn runtime(store: Arc<MemoryStore>, client: Arc<FakeNodeClient>, config: Config) -> Runtime {
    let pool = Arc::new(NodeClientPool::new());
    pool.register(Network::Regtest, client as Arc<dyn NodeClient>).await;
    let (notifier, _rx) = Notifier::channel(16);
    Runtime::new(store, pool, notifier, config)
}

#[tokio::test]
async fn received_with_height_from_history_fallback() {
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(1));
    store.seed_addresses(vec![address(1, "wallet-addr", 0, Chain::External)]);

    let t = txid(1);
    let mut client = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client.histories.insert(
        "wallet-addr".to_string(),
        vec![HistoryEntry { txid: t, height: 995 }],
    );
    client.transactions.insert(
        t,
        NormalizedTx {
            txid: t,
            vin: vec![],
            vout: vec![out("wallet-addr", 99_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );

    let rt = runtime(store.clone(), Arc::new(client), Config::default()).await;
    let result = rt.run(1, DEFAULT_ORDER, &[], &[], None).await.unwrap();
    assert_eq!(result.stats.new_transactions_created, 1);

    let rows = store.find_all_transactions(1).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.tx_type, TransactionType::Received);
    assert_eq!(row.amount, 99_000);
    assert_eq!(row.block_height, Some(995));
    assert_eq!(row.confirmations, 6);
    assert_eq!(row.rbf_status, RbfStatus::Confirmed);
}

#[tokio::test]
async fn received_with_non_wallet_output_marks_it_unknown() {
    // A received tx (wallet_inputs = 0) can still carry an output that
    // isn't ours — e.g. a batched payment that happens to touch the
    // wallet. spec.md §4.6: received outputs are `recipient` only when
    // wallet-owned, `unknown` otherwise.
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(9));
    store.seed_addresses(vec![address(9, "wallet-addr", 0, Chain::External)]);

    let t = txid(70);
    let mut client = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client.histories.insert(
        "wallet-addr".to_string(),
        vec![HistoryEntry { txid: t, height: 995 }],
    );
    client.transactions.insert(
        t,
        NormalizedTx {
            txid: t,
            vin: vec![],
            vout: vec![out("wallet-addr", 99_000, 0), out("someone-elses-addr", 5_000, 1)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );

    let rt = runtime(store.clone(), Arc::new(client), Config::default()).await;
    rt.run(9, DEFAULT_ORDER, &[], &[], None).await.unwrap();

    let rows = store.find_all_transactions(9).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.tx_type, TransactionType::Received);

    let outputs = store.find_transaction_outputs(row.id).await.unwrap();
    let ours = outputs.iter().find(|o| o.address == "wallet-addr").unwrap();
    assert!(ours.is_ours);
    assert_eq!(ours.output_type, wallet_sync_core::store::OutputType::Recipient);

    let foreign = outputs.iter().find(|o| o.address == "someone-elses-addr").unwrap();
    assert!(!foreign.is_ours);
    assert_eq!(foreign.output_type, wallet_sync_core::store::OutputType::Unknown);
}

#[tokio::test]
async fn sent_with_fee_computed_from_prev_tx() {
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(2));
    store.seed_addresses(vec![address(2, "wallet-addr", 0, Chain::External)]);

    let prev = txid(10);
    let spend = txid(11);
    let mut client = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client.histories.insert(
        "wallet-addr".to_string(),
        vec![HistoryEntry { txid: spend, height: 0 }],
    );
    client.transactions.insert(
        prev,
        NormalizedTx {
            txid: prev,
            vin: vec![],
            vout: vec![out("wallet-addr", 1_000_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client.transactions.insert(
        spend,
        NormalizedTx {
            txid: spend,
            vin: vec![input(prev, 0)],
            vout: vec![out("external-addr", 990_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );

    let rt = runtime(store.clone(), Arc::new(client), Config::default()).await;
    rt.run(2, DEFAULT_ORDER, &[], &[], None).await.unwrap();

    let rows = store.find_all_transactions(2).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.tx_type, TransactionType::Sent);
    assert_eq!(row.fee, Some(10_000));
    assert_eq!(row.amount, -1_000_000);
    assert_eq!(row.counterparty_address.as_deref(), Some("external-addr"));
}

#[tokio::test]
async fn rbf_replacement_marks_pending_tx_replaced() {
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(3));
    store.seed_addresses(vec![address(3, "wallet-addr", 0, Chain::External)]);

    let x = txid(20);
    let y = txid(21);
    let t1 = txid(22);
    let t2 = txid(23);

    let mut client = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client.histories.insert(
        "wallet-addr".to_string(),
        vec![
            HistoryEntry { txid: t1, height: 0 },
            HistoryEntry { txid: t2, height: 990 },
        ],
    );
    client.transactions.insert(
        x,
        NormalizedTx {
            txid: x,
            vin: vec![],
            vout: vec![out("wallet-addr", 100_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client.transactions.insert(
        y,
        NormalizedTx {
            txid: y,
            vin: vec![],
            vout: vec![out("someone-else", 50_000, 1)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client.transactions.insert(
        t1,
        NormalizedTx {
            txid: t1,
            vin: vec![input(x, 0)],
            vout: vec![out("external-1", 90_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client.transactions.insert(
        t2,
        NormalizedTx {
            txid: t2,
            vin: vec![input(x, 0), input(y, 1)],
            vout: vec![out("external-2", 120_000, 0)],
            fee_sat: None,
            block_height: Some(990),
            block_time: None,
        },
    );

    let rt = runtime(store.clone(), Arc::new(client), Config::default()).await;
    rt.run(3, DEFAULT_ORDER, &[], &[], None).await.unwrap();

    let rows = store.find_all_transactions(3).await.unwrap();
    let row_t1 = rows.iter().find(|t| t.txid == t1).unwrap();
    let row_t2 = rows.iter().find(|t| t.txid == t2).unwrap();

    assert_eq!(row_t2.confirmations, 11);
    assert_eq!(row_t1.rbf_status, RbfStatus::Replaced);
    assert_eq!(row_t1.replaced_by_txid, Some(t2));
}

#[tokio::test]
async fn gap_limit_expansion_restores_configured_gap() {
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(4));

    let mut addresses = Vec::new();
    for i in 0..10u32 {
        addresses.push(address(4, &format!("external-{i}"), i, Chain::External));
    }
    store.seed_addresses(addresses);

    let client = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };

    let pool = Arc::new(NodeClientPool::new());
    pool.register(Network::Regtest, Arc::new(client)).await;
    let (notifier, _rx) = Notifier::channel(16);
    let rt = Runtime::new(store.clone(), pool, notifier, Config::default())
        .with_deriver(Arc::new(FakeDeriver::default()));

    let result = rt.run(4, DEFAULT_ORDER, &[], &[], None).await.unwrap();
    assert_eq!(result.stats.new_addresses_generated, 15);

    let external = store.find_addresses_by_chain(4, Chain::External).await.unwrap();
    assert_eq!(external.len(), 25);
    let unused_suffix = external.iter().rev().take_while(|a| !a.used).count();
    assert_eq!(unused_suffix, 20);
}

#[tokio::test]
async fn consolidation_discovered_via_retroactive_correction() {
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(5));
    store.seed_addresses(vec![address(5, "wallet-addr-old", 0, Chain::External)]);

    let prev = txid(30);
    let spend = txid(31);
    let mut client = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client.histories.insert(
        "wallet-addr-old".to_string(),
        vec![HistoryEntry { txid: spend, height: 0 }],
    );
    client.transactions.insert(
        prev,
        NormalizedTx {
            txid: prev,
            vin: vec![],
            vout: vec![out("wallet-addr-old", 510, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client.transactions.insert(
        spend,
        NormalizedTx {
            txid: spend,
            vin: vec![input(prev, 0)],
            vout: vec![out("wallet-addr-new", 500, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );

    let mut config = Config::default();
    config.address_gap_limit = 1;

    let pool = Arc::new(NodeClientPool::new());
    pool.register(Network::Regtest, Arc::new(client)).await;
    let (notifier, _rx) = Notifier::channel(16);
    let mut overrides = HashMap::new();
    overrides.insert((Chain::External, 1), "wallet-addr-new".to_string());
    let rt = Runtime::new(store.clone(), pool, notifier, config)
        .with_deriver(Arc::new(FakeDeriver { overrides }));

    rt.run(5, DEFAULT_ORDER, &[], &[], None).await.unwrap();

    let rows = store.find_all_transactions(5).await.unwrap();
    let row = rows.iter().find(|t| t.txid == spend).unwrap();
    assert_eq!(row.tx_type, TransactionType::Consolidation);
    assert_eq!(row.amount, -10);

    let outputs = store.find_transaction_outputs(row.id).await.unwrap();
    let changed_output = outputs.iter().find(|o| o.address == "wallet-addr-new").unwrap();
    assert!(changed_output.is_ours);
    assert_eq!(
        changed_output.output_type,
        wallet_sync_core::store::OutputType::Consolidation
    );
}

#[tokio::test]
async fn idempotent_second_run_creates_nothing_new() {
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(6));
    store.seed_addresses(vec![address(6, "wallet-addr", 0, Chain::External)]);

    let t = txid(40);
    let mut client = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client.histories.insert(
        "wallet-addr".to_string(),
        vec![HistoryEntry { txid: t, height: 995 }],
    );
    client.transactions.insert(
        t,
        NormalizedTx {
            txid: t,
            vin: vec![],
            vout: vec![out("wallet-addr", 99_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client.utxos.insert(
        "wallet-addr".to_string(),
        vec![RemoteUtxo {
            txid: t,
            vout: 0,
            amount_sat: 99_000,
            height: 995,
        }],
    );

    let client = Arc::new(client);
    let pool = Arc::new(NodeClientPool::new());
    pool.register(Network::Regtest, client.clone() as Arc<dyn NodeClient>).await;
    let (notifier, _rx) = Notifier::channel(16);
    let rt = Runtime::new(store.clone(), pool, notifier, Config::default());

    let first = rt.run(6, DEFAULT_ORDER, &[], &[], None).await.unwrap();
    assert_eq!(first.stats.new_transactions_created, 1);
    assert_eq!(first.stats.utxos_created, 1);

    let second = rt.run(6, DEFAULT_ORDER, &[], &[], None).await.unwrap();
    assert_eq!(second.stats.new_transactions_created, 0);
    assert_eq!(second.stats.utxos_created, 0);
    assert_eq!(second.stats.addresses_updated, 0);
}

#[tokio::test]
async fn utxo_reappears_after_shallow_reorg() {
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(7));
    store.seed_addresses(vec![address(7, "wallet-addr", 0, Chain::External)]);

    let t = txid(50);
    let mut client = FakeNodeClient {
        height: 800_000,
        ..Default::default()
    };
    client.histories.insert(
        "wallet-addr".to_string(),
        vec![HistoryEntry { txid: t, height: 799_995 }],
    );
    client.transactions.insert(
        t,
        NormalizedTx {
            txid: t,
            vin: vec![],
            vout: vec![out("wallet-addr", 50_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client.utxos.insert(
        "wallet-addr".to_string(),
        vec![RemoteUtxo {
            txid: t,
            vout: 0,
            amount_sat: 50_000,
            height: 799_995,
        }],
    );

    let client = Arc::new(client);
    let pool = Arc::new(NodeClientPool::new());
    pool.register(Network::Regtest, client.clone() as Arc<dyn NodeClient>).await;
    let (notifier, _rx) = Notifier::channel(16);
    let rt = Runtime::new(store.clone(), pool, notifier, Config::default());

    rt.run(7, DEFAULT_ORDER, &[], &[], None).await.unwrap();
    let utxos = store.find_utxos(7).await.unwrap();
    assert_eq!(utxos[0].block_height, Some(799_995));
    assert_eq!(utxos[0].confirmations, 6);

    // Next sync: the remote now reports this UTXO back in the mempool.
    let mut reorged = FakeNodeClient {
        height: 800_000,
        ..Default::default()
    };
    reorged.histories.insert(
        "wallet-addr".to_string(),
        vec![HistoryEntry { txid: t, height: 0 }],
    );
    reorged.transactions.insert(
        t,
        NormalizedTx {
            txid: t,
            vin: vec![],
            vout: vec![out("wallet-addr", 50_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    reorged.utxos.insert(
        "wallet-addr".to_string(),
        vec![RemoteUtxo {
            txid: t,
            vout: 0,
            amount_sat: 50_000,
            height: 0,
        }],
    );

    let pool2 = Arc::new(NodeClientPool::new());
    pool2
        .register(Network::Regtest, Arc::new(reorged) as Arc<dyn NodeClient>)
        .await;
    let (notifier2, _rx2) = Notifier::channel(16);
    let rt2 = Runtime::new(store.clone(), pool2, notifier2, Config::default());
    rt2.run(7, DEFAULT_ORDER, &[], &[], None).await.unwrap();

    let utxos = store.find_utxos(7).await.unwrap();
    assert_eq!(utxos[0].block_height, None);
    assert_eq!(utxos[0].confirmations, 0);
    assert!(!utxos[0].spent);
}

#[tokio::test]
async fn balance_after_recalculation_equals_unspent_utxo_sum() {
    // spec.md §8: for every wallet, sum(amount) over all transactions
    // equals sum(utxo.amount) where spent=false, once balances have been
    // recalculated. Two receives, then one is spent away, leaving a single
    // remaining UTXO.
    let store = Arc::new(MemoryStore::new());
    store.seed_wallet(wallet(8));
    store.seed_addresses(vec![address(8, "wallet-addr", 0, Chain::External)]);

    let recv1 = txid(60);
    let recv2 = txid(61);

    let mut client1 = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client1.histories.insert(
        "wallet-addr".to_string(),
        vec![
            HistoryEntry { txid: recv1, height: 990 },
            HistoryEntry { txid: recv2, height: 995 },
        ],
    );
    client1.transactions.insert(
        recv1,
        NormalizedTx {
            txid: recv1,
            vin: vec![],
            vout: vec![out("wallet-addr", 200_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client1.transactions.insert(
        recv2,
        NormalizedTx {
            txid: recv2,
            vin: vec![],
            vout: vec![out("wallet-addr", 50_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client1.utxos.insert(
        "wallet-addr".to_string(),
        vec![
            RemoteUtxo { txid: recv1, vout: 0, amount_sat: 200_000, height: 990 },
            RemoteUtxo { txid: recv2, vout: 0, amount_sat: 50_000, height: 995 },
        ],
    );

    let rt1 = runtime(store.clone(), Arc::new(client1), Config::default()).await;
    rt1.run(8, DEFAULT_ORDER, &[], &[], None).await.unwrap();

    // Second sync: recv1's output is spent to an external address, leaving
    // only recv2's UTXO unspent on the remote.
    let spend = txid(62);
    let mut client2 = FakeNodeClient {
        height: 1000,
        ..Default::default()
    };
    client2.histories.insert(
        "wallet-addr".to_string(),
        vec![
            HistoryEntry { txid: recv1, height: 990 },
            HistoryEntry { txid: recv2, height: 995 },
            HistoryEntry { txid: spend, height: 998 },
        ],
    );
    client2.transactions.insert(
        recv1,
        NormalizedTx {
            txid: recv1,
            vin: vec![],
            vout: vec![out("wallet-addr", 200_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        },
    );
    client2.transactions.insert(
        spend,
        NormalizedTx {
            txid: spend,
            vin: vec![input(recv1, 0)],
            vout: vec![out("external-addr", 190_000, 0)],
            fee_sat: None,
            block_height: Some(998),
            block_time: None,
        },
    );
    client2.utxos.insert(
        "wallet-addr".to_string(),
        vec![RemoteUtxo { txid: recv2, vout: 0, amount_sat: 50_000, height: 995 }],
    );

    let rt2 = runtime(store.clone(), Arc::new(client2), Config::default()).await;
    rt2.run(8, DEFAULT_ORDER, &[], &[], None).await.unwrap();

    wallet_sync_core::balance::recalculate_wallet_balances(store.as_ref(), 8)
        .await
        .unwrap();

    let transactions = store.find_all_transactions(8).await.unwrap();
    let total_amount: i64 = transactions.iter().map(|t| t.amount).sum();
    let last_balance = transactions
        .iter()
        .max_by_key(|t| (t.block_time.unwrap_or(u32::MAX), t.created_at))
        .and_then(|t| t.balance_after)
        .unwrap();
    assert_eq!(last_balance, total_amount);

    let utxos = store.find_utxos(8).await.unwrap();
    let unspent_sum: i64 = utxos.iter().filter(|u| !u.spent).map(|u| u.amount as i64).sum();
    assert_eq!(total_amount, unspent_sum);
}
