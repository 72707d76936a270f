//! Per-network tip-height cache and the block-timestamp LRU (spec.md §4.13).
//!
//! Both are process-wide singletons per the design notes' "globals to
//! eliminate" section: rather than `static`s, they are plain components a
//! registry owns and threads into [`crate::pipeline::Runtime`].

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::config::Network;
use crate::node::{NodeClient, NodeResult};

const TIMESTAMP_CACHE_CAPACITY: usize = 1000;

/// Per-network cached tip height with a monotonic setter.
#[derive(Default)]
pub struct HeightCache {
    heights: Mutex<HashMap<Network, u32>>,
}

impl HeightCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached height for `network`, or 0 if never set.
    pub fn get(&self, network: Network) -> u32 {
        self.heights.lock().unwrap().get(&network).copied().unwrap_or(0)
    }

    /// Overwrites the cache only if `height` is higher than what's stored.
    pub fn set(&self, network: Network, height: u32) {
        let mut heights = self.heights.lock().unwrap();
        let entry = heights.entry(network).or_insert(0);
        if height > *entry {
            *entry = height;
        }
    }

    /// Fetches the node's current height, refreshing the cache on success.
    /// On failure, falls back to the cached value if it is positive;
    /// otherwise propagates the error (spec.md §4.13).
    pub async fn get_block_height(
        &self,
        network: Network,
        client: &dyn NodeClient,
    ) -> NodeResult<u32> {
        match client.get_block_height().await {
            Ok(height) => {
                self.set(network, height);
                Ok(height)
            }
            Err(err) => {
                let cached = self.get(network);
                if cached > 0 {
                    Ok(cached)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Unix-second block timestamps, keyed by `(network, height)`, with a
/// capacity of 1000 and strict MRU ordering (spec.md §4.13, §8).
pub struct TimestampCache {
    cache: Mutex<LruCache<(Network, u32), u32>>,
}

impl Default for TimestampCache {
    fn default() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(TIMESTAMP_CACHE_CAPACITY).unwrap(),
            )),
        }
    }
}

impl TimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts the unix-second timestamp from an 80-byte header (bytes
    /// 68-71, little-endian), fetching and caching it if necessary.
    pub async fn get_block_timestamp(
        &self,
        network: Network,
        height: u32,
        client: &dyn NodeClient,
    ) -> NodeResult<u32> {
        if let Some(cached) = self.cache.lock().unwrap().get(&(network, height)) {
            return Ok(*cached);
        }

        let header_hex = client.get_block_header(height).await?;
        let timestamp = extract_timestamp(&header_hex)?;
        self.cache.lock().unwrap().put((network, height), timestamp);
        Ok(timestamp)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    #[cfg(test)]
    fn contains(&self, key: &(Network, u32)) -> bool {
        self.cache.lock().unwrap().contains(key)
    }
}

fn extract_timestamp(header_hex: &str) -> NodeResult<u32> {
    use hex::FromHex;
    let bytes = Vec::<u8>::from_hex(header_hex)
        .map_err(|e| crate::node::NodeError::Malformed(format!("bad header hex: {e}")))?;
    if bytes.len() < 72 {
        return Err(crate::node::NodeError::Malformed(
            "header shorter than 80 bytes".to_string(),
        ));
    }
    let ts = u32::from_le_bytes([bytes[68], bytes[69], bytes[70], bytes[71]]);
    Ok(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_cache_is_monotonic() {
        let cache = HeightCache::new();
        cache.set(Network::Mainnet, 100);
        cache.set(Network::Mainnet, 50);
        assert_eq!(cache.get(Network::Mainnet), 100);
        cache.set(Network::Mainnet, 150);
        assert_eq!(cache.get(Network::Mainnet), 150);
    }

    #[test]
    fn height_cache_is_per_network() {
        let cache = HeightCache::new();
        cache.set(Network::Mainnet, 100);
        cache.set(Network::Testnet, 5);
        assert_eq!(cache.get(Network::Testnet), 5);
    }

    #[test]
    fn extract_timestamp_reads_bytes_68_to_71() {
        use hex::DisplayHex;
        // A fabricated 80-byte header with everything zero except the
        // timestamp field, little-endian 0x0000_0064 (100).
        let mut header = [0u8; 80];
        header[68..72].copy_from_slice(&100u32.to_le_bytes());
        let hex = header.to_lower_hex_string();
        let ts = extract_timestamp(&hex).unwrap();
        assert_eq!(ts, 100);
    }

    #[test]
    fn timestamp_cache_evicts_oldest_after_1001_entries() {
        let cache = TimestampCache::new();
        for height in 0..1001u32 {
            let key = (Network::Mainnet, height);
            cache.cache.lock().unwrap().put(key, height);
        }
        assert_eq!(cache.len(), 1000);
        assert!(!cache.contains(&(Network::Mainnet, 0)));
        assert!(cache.contains(&(Network::Mainnet, 1000)));
    }
}
