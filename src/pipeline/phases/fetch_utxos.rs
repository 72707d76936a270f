//! Batched UTXO fetch per address (spec.md §4.7). Builds the key space
//! `reconcileUtxosPhase` and `insertUtxosPhase` both read from.

use tracing::warn;

use crate::pipeline::Context;

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let addresses: Vec<String> = ctx.addresses.iter().map(|a| a.address.clone()).collect();
    if addresses.is_empty() {
        return Ok(());
    }

    for chunk in addresses.chunks(ctx.config.history_batch_size) {
        match ctx.client.get_address_utxos_batch(chunk).await {
            Ok(map) => {
                for (address, utxos) in map {
                    record(ctx, address, utxos);
                }
            }
            Err(err) => {
                warn!(%err, "batched utxo fetch failed, retrying addresses individually");
                for address in chunk {
                    match ctx.client.get_address_utxos(address).await {
                        Ok(utxos) => record(ctx, address.clone(), utxos),
                        Err(err) => warn!(%address, %err, "address utxo fetch failed, skipping"),
                    }
                }
            }
        }
    }

    ctx.stats.utxos_fetched = ctx.all_utxo_keys.len();
    Ok(())
}

fn record(ctx: &mut Context, address: String, utxos: Vec<crate::node::RemoteUtxo>) {
    // Only addresses whose request succeeded contribute to spent-detection
    // in reconcileUtxosPhase (spec.md §4.7).
    ctx.successfully_fetched_addresses.insert(address.clone());
    for utxo in utxos {
        let key = (utxo.txid, utxo.vout);
        ctx.all_utxo_keys.insert(key);
        ctx.utxo_data_map.insert(key, (address.clone(), utxo));
    }
}
