//! The ten sync phases (spec.md §4.3-§4.12), each operating purely on
//! [`Context`] and returning `anyhow::Result<()>` so [`super::Runtime::run`]
//! can wrap a failure into the pipeline error envelope uniformly.

mod check_existing;
mod fetch_histories;
mod fetch_utxos;
mod fix_consolidations;
mod gap_limit;
mod insert_utxos;
mod process_transactions;
mod rbf_cleanup;
mod reconcile_utxos;
mod update_addresses;

use super::{Context, Phase};

pub(super) async fn run_phase(phase: Phase, ctx: &mut Context) -> anyhow::Result<()> {
    match phase {
        Phase::RbfCleanup => rbf_cleanup::run(ctx).await,
        Phase::FetchHistories => fetch_histories::run(ctx).await,
        Phase::CheckExisting => check_existing::run(ctx).await,
        Phase::ProcessTransactions => process_transactions::run(ctx).await,
        Phase::FetchUtxos => fetch_utxos::run(ctx).await,
        Phase::ReconcileUtxos => reconcile_utxos::run(ctx).await,
        Phase::InsertUtxos => insert_utxos::run(ctx).await,
        Phase::UpdateAddresses => update_addresses::run(ctx).await,
        Phase::GapLimit => gap_limit::run(ctx).await,
        Phase::FixConsolidations => fix_consolidations::run(ctx).await,
    }
}
