//! Electrum stratum transport.
//!
//! `electrum_client` is a blocking crate; every call here is dispatched
//! through [`tokio::task::spawn_blocking`], the same bridge the `Reader`/
//! `Wallet` trait docs recommend for non-`async` wallet backends.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hex::DisplayHex;
use bitcoin::{Address, Network, Script, ScriptBuf, Txid};
use electrum_client::{Client as ElectrumRpc, ConfigBuilder, ElectrumApi};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::node::normalize::{NormalizedTxIn, NormalizedTxOut};
use crate::node::{HistoryEntry, NodeClient, NodeError, NodeResult, NormalizedTx, RemoteUtxo};

fn to_node_error(e: electrum_client::Error) -> NodeError {
    use electrum_client::Error::*;
    match e {
        IOError(io) => NodeError::Transport(io.to_string()),
        Message(m) => NodeError::Protocol { code: 0, message: m },
        Protocol(v) => NodeError::Protocol {
            code: 0,
            message: v.to_string(),
        },
        AlreadySubscribed(_) | NotSubscribed(_) => NodeError::Protocol {
            code: 0,
            message: e.to_string(),
        },
        _ => NodeError::Transport(e.to_string()),
    }
}

fn script_for(address: &str) -> NodeResult<ScriptBuf> {
    let addr = Address::from_str(address)
        .map_err(|e| NodeError::Malformed(format!("invalid address {address}: {e}")))?;
    Ok(addr.assume_checked().script_pubkey())
}

/// An Electrum stratum client, reachable over TCP/TLS/SOCKS5.
#[derive(Clone)]
pub struct ElectrumClient {
    inner: Arc<ElectrumRpc>,
    network: Network,
}

impl ElectrumClient {
    pub fn connect(url: &str, network: Network, use_tls: bool, validate_domain: bool) -> NodeResult<Self> {
        let config = ConfigBuilder::new()
            .validate_domain(validate_domain)
            .build();
        let scheme_url = if use_tls {
            format!("ssl://{url}")
        } else {
            format!("tcp://{url}")
        };
        let inner = ElectrumRpc::from_config(&scheme_url, config).map_err(to_node_error)?;
        Ok(Self {
            inner: Arc::new(inner),
            network,
        })
    }

    async fn blocking<T, F>(&self, f: F) -> NodeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ElectrumRpc) -> Result<T, electrum_client::Error> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| NodeError::Transport(format!("blocking task panicked: {e}")))?
            .map_err(to_node_error)
    }

    /// Pushes one notification per new tip onto a channel, per the push
    /// path `subscribe_tip()` adds beyond simple polling. The background
    /// task owns its own subscription and exits when the receiver is
    /// dropped.
    pub fn subscribe_tip(&self) -> (mpsc::Receiver<u32>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let inner = self.inner.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let first = match inner.block_headers_subscribe() {
                Ok(h) => h,
                Err(_) => return,
            };
            if tx.blocking_send(first.height as u32).is_err() {
                return;
            }
            loop {
                match inner.block_headers_pop() {
                    Ok(Some(notification)) => {
                        if tx.blocking_send(notification.height as u32).is_err() {
                            return;
                        }
                    }
                    Ok(None) => std::thread::sleep(std::time::Duration::from_millis(500)),
                    Err(_) => return,
                }
            }
        });
        (rx, handle)
    }
}

#[async_trait]
impl NodeClient for ElectrumClient {
    async fn connect(&self) -> NodeResult<()> {
        self.blocking(|c| c.block_headers_subscribe().map(|_| ()))
            .await
    }

    async fn disconnect(&self) -> NodeResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.blocking(|c| c.ping()).await.is_ok()
    }

    async fn get_block_height(&self) -> NodeResult<u32> {
        self.blocking(|c| c.block_headers_subscribe())
            .await
            .map(|h| h.height as u32)
    }

    async fn get_block_header(&self, height: u32) -> NodeResult<String> {
        let raw = self
            .blocking(move |c| c.block_header_raw(height as usize))
            .await?;
        Ok(raw.to_lower_hex_string())
    }

    async fn get_address_history(&self, address: &str) -> NodeResult<Vec<HistoryEntry>> {
        let script = script_for(address)?;
        let entries = self
            .blocking(move |c| c.script_get_history(&script))
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| HistoryEntry {
                txid: e.tx_hash,
                height: e.height,
            })
            .collect())
    }

    async fn get_address_history_batch(
        &self,
        addresses: &[String],
    ) -> NodeResult<HashMap<String, Vec<HistoryEntry>>> {
        let scripts: Vec<(String, ScriptBuf)> = addresses
            .iter()
            .map(|a| script_for(a).map(|s| (a.clone(), s)))
            .collect::<NodeResult<_>>()?;
        let results = self
            .blocking(move |c| {
                let refs: Vec<&Script> = scripts.iter().map(|(_, s)| s.as_script()).collect();
                let histories = c.batch_script_get_history(refs)?;
                Ok(scripts
                    .iter()
                    .map(|(addr, _)| addr.clone())
                    .zip(histories)
                    .collect::<Vec<_>>())
            })
            .await?;

        Ok(results
            .into_iter()
            .map(|(addr, entries)| {
                (
                    addr,
                    entries
                        .into_iter()
                        .map(|e| HistoryEntry {
                            txid: e.tx_hash,
                            height: e.height,
                        })
                        .collect(),
                )
            })
            .collect())
    }

    async fn get_address_utxos(&self, address: &str) -> NodeResult<Vec<RemoteUtxo>> {
        let script = script_for(address)?;
        let utxos = self
            .blocking(move |c| c.script_list_unspent(&script))
            .await?;
        Ok(utxos
            .into_iter()
            .map(|u| RemoteUtxo {
                txid: u.tx_hash,
                vout: u.tx_pos as u32,
                amount_sat: u.value,
                height: u.height as i32,
            })
            .collect())
    }

    async fn get_transaction(&self, txid: &Txid) -> NodeResult<NormalizedTx> {
        let txid = *txid;
        let network = self.network;
        let tx = self.blocking(move |c| c.transaction_get(&txid)).await?;

        let vin = tx
            .input
            .iter()
            .map(|txin| NormalizedTxIn {
                is_coinbase: txin.previous_output.is_null(),
                prev_txid: if txin.previous_output.is_null() {
                    None
                } else {
                    Some(txin.previous_output.txid)
                },
                prev_vout: if txin.previous_output.is_null() {
                    None
                } else {
                    Some(txin.previous_output.vout)
                },
                prevout: None,
            })
            .collect();

        let vout = tx
            .output
            .iter()
            .enumerate()
            .map(|(i, txout)| NormalizedTxOut {
                vout: i as u32,
                address: Address::from_script(&txout.script_pubkey, network)
                    .ok()
                    .map(|a| a.to_string()),
                script_pubkey_hex: txout.script_pubkey.to_hex_string(),
                amount_sat: txout.value.to_sat(),
            })
            .collect();

        // Blockstream-class Electrum servers don't return height/time
        // alongside `blockchain.transaction.get`; the caller falls back to
        // address history for placement.
        Ok(NormalizedTx {
            txid,
            vin,
            vout,
            fee_sat: None,
            block_height: None,
            block_time: None,
        })
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> NodeResult<Txid> {
        let tx: bitcoin::Transaction = bitcoin::consensus::encode::deserialize_hex(raw_hex)
            .map_err(|e| NodeError::Malformed(format!("invalid raw transaction hex: {e}")))?;
        self.blocking(move |c| c.transaction_broadcast(&tx)).await
    }

    async fn estimate_fee(&self, blocks: u16) -> NodeResult<f64> {
        let btc_per_kvb = self.blocking(move |c| c.estimate_fee(blocks as usize)).await?;
        Ok(btc_per_kvb * 100_000_000.0 / 1000.0)
    }
}
