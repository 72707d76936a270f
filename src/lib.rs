//! Wallet synchronization core (spec.md §1-§2).
//!
//! The pipeline ([`pipeline`]) reconciles a watch-only wallet's relational
//! store against an Electrum or Bitcoin Core node: discovering addresses
//! under a BIP-44 gap limit, classifying transactions into
//! received/sent/consolidation, computing fees and running balances,
//! detecting RBF replacement, and maintaining confirmations. Everything
//! else in this crate exists to serve that pipeline.

pub mod backfill;
pub mod balance;
pub mod blockheight;
pub mod classify;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod node;
pub mod notify;
pub mod pipeline;
pub mod store;

pub use config::{Config, Network};
pub use error::PipelineError;
pub use pipeline::{
    Context, Phase, Runtime, SyncProgress, SyncResult, SyncStats, DEFAULT_ORDER, QUICK_ORDER,
};
pub use store::Store;
