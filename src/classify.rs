//! The classification algorithm (spec.md §4.6), shared by
//! [`crate::pipeline::phases::process_transactions`] and
//! [`crate::backfill::populate_missing_transaction_fields`].

use std::collections::{HashMap, HashSet};

use bitcoin::Txid;

use crate::node::{NormalizedTx, NormalizedTxOut};
use crate::store::{AddressId, RbfStatus, TransactionType};

/// One BTC in satoshis, the sanity ceiling for both a server-reported fee
/// and a computed one (spec.md §4.6).
const ONE_BTC_SATS: u64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tx_type: TransactionType,
    pub amount: i64,
    pub fee: Option<u64>,
    pub confirmations: u32,
    pub rbf_status: RbfStatus,
    pub counterparty_address: Option<String>,
    pub address_id: Option<AddressId>,
    /// The block height the classifier resolved, from the transaction
    /// record or the address-history fallback, whichever produced one.
    pub resolved_block_height: Option<i32>,
}

pub(crate) fn resolve_prevout<'a>(
    prev_txid: Option<Txid>,
    prev_vout: Option<u32>,
    inline: Option<&'a NormalizedTxOut>,
    prev_tx_cache: &'a HashMap<Txid, NormalizedTx>,
) -> Option<&'a NormalizedTxOut> {
    if let Some(out) = inline {
        return Some(out);
    }
    let (txid, vout) = (prev_txid?, prev_vout?);
    prev_tx_cache.get(&txid)?.vout.iter().find(|o| o.vout == vout)
}

/// Classifies one transaction given the wallet's address set, an
/// address-string-to-id map, a fallback history height (used when the
/// transaction record itself carries none), and the node's current tip.
pub fn classify_transaction(
    tx: &NormalizedTx,
    wallet_addresses: &HashSet<String>,
    address_ids: &HashMap<String, AddressId>,
    prev_tx_cache: &HashMap<Txid, NormalizedTx>,
    history_height: Option<i32>,
    tip_height: u32,
) -> Classification {
    let resolved_inputs: Vec<Option<&NormalizedTxOut>> = tx
        .vin
        .iter()
        .map(|vin| {
            if vin.is_coinbase {
                None
            } else {
                resolve_prevout(vin.prev_txid, vin.prev_vout, vin.prevout.as_ref(), prev_tx_cache)
            }
        })
        .collect();

    let wallet_input_outs: Vec<&NormalizedTxOut> = resolved_inputs
        .iter()
        .flatten()
        .filter(|o| o.address.as_deref().is_some_and(|a| wallet_addresses.contains(a)))
        .copied()
        .collect();
    let wallet_inputs = wallet_input_outs.len();

    let external_outputs: Vec<&NormalizedTxOut> = tx
        .vout
        .iter()
        .filter(|o| o.address.as_deref().is_some_and(|a| !wallet_addresses.contains(a)))
        .collect();

    let tx_type = if wallet_inputs == 0 {
        TransactionType::Received
    } else if external_outputs.is_empty() {
        TransactionType::Consolidation
    } else {
        TransactionType::Sent
    };

    let sum_inputs: u64 = wallet_input_outs.iter().map(|o| o.amount_sat).sum();
    // Sum over *all* resolved inputs (not only wallet-owned), needed for the
    // input/output delta fee fallback.
    let sum_all_inputs: u64 = resolved_inputs.iter().flatten().map(|o| o.amount_sat).sum();
    let sum_all_outputs: u64 = tx.vout.iter().map(|o| o.amount_sat).sum();

    let fee = match tx_type {
        TransactionType::Received => None,
        _ => {
            let server_fee = tx.fee_sat.filter(|&f| f < ONE_BTC_SATS);
            server_fee.or_else(|| {
                if sum_all_inputs > 0 && sum_all_inputs >= sum_all_outputs {
                    let delta = sum_all_inputs - sum_all_outputs;
                    (delta > 0 && delta < ONE_BTC_SATS).then_some(delta)
                } else {
                    None
                }
            })
        }
    };

    let amount: i64 = match tx_type {
        TransactionType::Received => tx
            .vout
            .iter()
            .filter(|o| o.address.as_deref().is_some_and(|a| wallet_addresses.contains(a)))
            .map(|o| o.amount_sat as i64)
            .sum(),
        TransactionType::Sent => {
            let external_sum: u64 = external_outputs.iter().map(|o| o.amount_sat).sum();
            -((external_sum + fee.unwrap_or(0)) as i64)
        }
        TransactionType::Consolidation => -(fee.unwrap_or(0) as i64),
    };

    let resolved_block_height = tx.block_height.or(history_height).filter(|&h| h > 0);
    let confirmations = match resolved_block_height {
        Some(h) => ((tip_height as i64) - (h as i64) + 1).max(0) as u32,
        None => 0,
    };
    let rbf_status = if confirmations > 0 {
        RbfStatus::Confirmed
    } else {
        RbfStatus::Active
    };

    let counterparty_address = match tx_type {
        TransactionType::Received => resolved_inputs
            .iter()
            .flatten()
            .find_map(|o| o.address.clone()),
        TransactionType::Sent => external_outputs.first().and_then(|o| o.address.clone()),
        TransactionType::Consolidation => None,
    };

    let address_id = match tx_type {
        TransactionType::Received => tx
            .vout
            .iter()
            .find(|o| o.address.as_deref().is_some_and(|a| wallet_addresses.contains(a)))
            .and_then(|o| o.address.as_deref())
            .and_then(|a| address_ids.get(a).copied()),
        TransactionType::Sent => wallet_input_outs
            .first()
            .and_then(|o| o.address.as_deref())
            .and_then(|a| address_ids.get(a).copied()),
        TransactionType::Consolidation => None,
    };

    Classification {
        tx_type,
        amount,
        fee,
        confirmations,
        rbf_status,
        counterparty_address,
        address_id,
        resolved_block_height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NormalizedTxIn, NormalizedTxOut};

    fn out(address: &str, amount_sat: u64, vout: u32) -> NormalizedTxOut {
        NormalizedTxOut {
            vout,
            address: Some(address.to_string()),
            script_pubkey_hex: String::new(),
            amount_sat,
        }
    }

    fn txid(byte: u8) -> Txid {
        use bitcoin::hashes::Hash;
        Txid::from_byte_array([byte; 32])
    }

    #[test]
    fn received_with_height_from_history_fallback() {
        let wallet_addr = "wallet-addr".to_string();
        let wallet_set: HashSet<String> = [wallet_addr.clone()].into_iter().collect();
        let tx = NormalizedTx {
            txid: txid(1),
            vin: vec![],
            vout: vec![out(&wallet_addr, 99_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        };
        let c = classify_transaction(&tx, &wallet_set, &HashMap::new(), &HashMap::new(), Some(995), 1000);
        assert_eq!(c.tx_type, TransactionType::Received);
        assert_eq!(c.amount, 99_000);
        assert_eq!(c.resolved_block_height, Some(995));
        assert_eq!(c.confirmations, 6);
        assert_eq!(c.rbf_status, RbfStatus::Confirmed);
    }

    #[test]
    fn sent_with_fee_computed_from_prev_tx() {
        let wallet_addr = "wallet-addr".to_string();
        let wallet_set: HashSet<String> = [wallet_addr.clone()].into_iter().collect();
        let prev_txid = txid(2);
        let mut prev_cache = HashMap::new();
        prev_cache.insert(
            prev_txid,
            NormalizedTx {
                txid: prev_txid,
                vin: vec![],
                vout: vec![out(&wallet_addr, 1_000_000, 0)],
                fee_sat: None,
                block_height: None,
                block_time: None,
            },
        );
        let tx = NormalizedTx {
            txid: txid(3),
            vin: vec![NormalizedTxIn {
                is_coinbase: false,
                prev_txid: Some(prev_txid),
                prev_vout: Some(0),
                prevout: None,
            }],
            vout: vec![out("external-addr", 990_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        };
        let c = classify_transaction(&tx, &wallet_set, &HashMap::new(), &prev_cache, None, 1000);
        assert_eq!(c.tx_type, TransactionType::Sent);
        assert_eq!(c.fee, Some(10_000));
        assert_eq!(c.amount, -1_000_000);
        assert_eq!(c.counterparty_address.as_deref(), Some("external-addr"));
    }

    #[test]
    fn consolidation_with_unknown_fee_stores_zero_amount() {
        let wallet_addr = "wallet-addr".to_string();
        let wallet_set: HashSet<String> = [wallet_addr.clone()].into_iter().collect();
        let prev_txid = txid(4);
        let mut prev_cache = HashMap::new();
        prev_cache.insert(
            prev_txid,
            NormalizedTx {
                txid: prev_txid,
                vin: vec![],
                vout: vec![out(&wallet_addr, 500, 0)],
                fee_sat: None,
                block_height: None,
                block_time: None,
            },
        );
        let tx = NormalizedTx {
            txid: txid(5),
            vin: vec![NormalizedTxIn {
                is_coinbase: false,
                prev_txid: Some(prev_txid),
                prev_vout: Some(0),
                prevout: None,
            }],
            vout: vec![out(&wallet_addr, 500, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        };
        let c = classify_transaction(&tx, &wallet_set, &HashMap::new(), &prev_cache, None, 1000);
        assert_eq!(c.tx_type, TransactionType::Consolidation);
        assert_eq!(c.fee, None);
        assert_eq!(c.amount, 0);
    }

    mod sign_law {
        use super::*;
        use proptest::prelude::*;

        fn addr_strategy() -> impl Strategy<Value = String> {
            prop_oneof![Just("wallet-addr".to_string()), Just("external-addr".to_string())]
        }

        fn out_strategy() -> impl Strategy<Value = NormalizedTxOut> {
            (addr_strategy(), 1u64..1_000_000_000, 0u32..8).prop_map(|(address, amount_sat, vout)| {
                NormalizedTxOut {
                    vout,
                    address: Some(address),
                    script_pubkey_hex: String::new(),
                    amount_sat,
                }
            })
        }

        proptest! {
            /// spec.md §9's sign law: a `received` transaction's amount is
            /// never negative, and `sent`/`consolidation` are never positive,
            /// for any mix of wallet/external inputs and outputs.
            #[test]
            fn amount_sign_matches_tx_type(
                has_wallet_input in any::<bool>(),
                outputs in proptest::collection::vec(out_strategy(), 1..4),
            ) {
                let wallet_set: HashSet<String> = ["wallet-addr".to_string()].into_iter().collect();
                let prev_txid = txid(100);
                let mut prev_cache = HashMap::new();
                let vin = if has_wallet_input {
                    prev_cache.insert(
                        prev_txid,
                        NormalizedTx {
                            txid: prev_txid,
                            vin: vec![],
                            vout: vec![out("wallet-addr", 5_000_000, 0)],
                            fee_sat: None,
                            block_height: None,
                            block_time: None,
                        },
                    );
                    vec![NormalizedTxIn {
                        is_coinbase: false,
                        prev_txid: Some(prev_txid),
                        prev_vout: Some(0),
                        prevout: None,
                    }]
                } else {
                    vec![]
                };

                let tx = NormalizedTx {
                    txid: txid(101),
                    vin,
                    vout: outputs,
                    fee_sat: None,
                    block_height: None,
                    block_time: None,
                };
                let c = classify_transaction(&tx, &wallet_set, &HashMap::new(), &prev_cache, None, 1000);
                match c.tx_type {
                    TransactionType::Received => prop_assert!(c.amount >= 0),
                    TransactionType::Sent | TransactionType::Consolidation => prop_assert!(c.amount <= 0),
                }
            }
        }
    }

    #[test]
    fn coinbase_inputs_never_count_as_wallet_inputs() {
        let wallet_set: HashSet<String> = ["wallet-addr".to_string()].into_iter().collect();
        let tx = NormalizedTx {
            txid: txid(6),
            vin: vec![NormalizedTxIn {
                is_coinbase: true,
                prev_txid: None,
                prev_vout: None,
                prevout: None,
            }],
            vout: vec![out("wallet-addr", 5_000_000_000, 0)],
            fee_sat: None,
            block_height: None,
            block_time: None,
        };
        let c = classify_transaction(&tx, &wallet_set, &HashMap::new(), &HashMap::new(), None, 1000);
        assert_eq!(c.tx_type, TransactionType::Received);
    }
}
