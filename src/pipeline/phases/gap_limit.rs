//! BIP-44 gap-limit maintenance (spec.md §4.11), independently on the
//! external and internal chains. Without a registered
//! [`crate::descriptor::DescriptorDeriver`] this phase is a no-op: address
//! derivation is out of scope for the core (spec.md §1).

use tracing::warn;

use crate::pipeline::Context;
use crate::store::{Address, Chain};

pub async fn run(ctx: &mut Context) -> anyhow::Result<()> {
    let Some(deriver) = ctx.deriver.clone() else {
        return Ok(());
    };

    for chain in [Chain::External, Chain::Internal] {
        run_chain(ctx, deriver.as_ref(), chain).await?;
    }

    ctx.rebuild_address_indexes();
    Ok(())
}

async fn run_chain(
    ctx: &mut Context,
    deriver: &dyn crate::descriptor::DescriptorDeriver,
    chain: Chain,
) -> anyhow::Result<()> {
    let existing = ctx
        .store
        .find_addresses_by_chain(ctx.wallet_id, chain)
        .await?;

    let max_index = existing.iter().map(|a| a.index).max();
    let unused_gap = existing
        .iter()
        .rev()
        .take_while(|a| !a.used)
        .count() as u32;

    let gap_limit = ctx.config.address_gap_limit;
    if unused_gap >= gap_limit {
        return Ok(());
    }

    let start = max_index.map(|i| i + 1).unwrap_or(0);
    let needed = gap_limit - unused_gap;

    let mut derived = Vec::new();
    for index in start..start + needed {
        match deriver.derive(&ctx.wallet_descriptor, chain, index).await {
            Ok(addr) => derived.push(Address {
                id: 0,
                wallet_id: ctx.wallet_id,
                address: addr.address,
                derivation_path: addr.derivation_path,
                index: addr.index,
                used: false,
                chain: addr.chain,
            }),
            Err(err) => warn!(%err, index, ?chain, "gap-limit derivation failed, skipping index"),
        }
    }

    if derived.is_empty() {
        return Ok(());
    }

    let result = ctx.store.create_addresses(derived.clone()).await?;
    ctx.stats.new_addresses_generated += result.inserted;
    ctx.new_addresses.extend(derived.clone());
    ctx.addresses.extend(derived);

    Ok(())
}
