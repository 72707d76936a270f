//! Descriptor-to-address derivation is out of scope (spec.md §1): the core
//! only needs *a* way to ask "give me address N on this chain", not the
//! BIP-32/39/44/49/84/86 math behind it. [`DescriptorDeriver`] is the seam;
//! a real deployment plugs in whatever descriptor library it already uses
//! for import/parsing.

use async_trait::async_trait;

use crate::store::Chain;

#[derive(Debug, Clone)]
pub struct DerivedAddress {
    pub address: String,
    pub derivation_path: String,
    pub index: u32,
    pub chain: Chain,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to derive address at index {index}: {reason}")]
pub struct DerivationError {
    pub index: u32,
    pub reason: String,
}

/// Derives addresses from a wallet's output descriptor.
///
/// [`crate::pipeline::phases::gap_limit`] tolerates per-index failures
/// (spec.md §7 item 5): a derivation error for one index must not abort the
/// whole gap-limit expansion.
#[async_trait]
pub trait DescriptorDeriver: Send + Sync {
    async fn derive(
        &self,
        descriptor: &str,
        chain: Chain,
        index: u32,
    ) -> Result<DerivedAddress, DerivationError>;
}
