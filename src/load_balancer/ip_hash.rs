//! Key affinity strategy.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::load_balancer::Strategy;
use crate::registry::ServiceInstance;

/// Maps a caller key (usually the client IP) to an instance with a stable
/// SHA-256 hash, so the same key keeps landing on the same instance while
/// the healthy set is unchanged.
#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

impl Strategy for IpHash {
    fn pick(
        &self,
        _service: &str,
        healthy: &[Arc<ServiceInstance>],
        key: Option<&str>,
    ) -> Option<Arc<ServiceInstance>> {
        if healthy.is_empty() {
            return None;
        }
        let idx = match key {
            Some(key) => (stable_hash(key) % healthy.len() as u64) as usize,
            None => 0,
        };
        healthy.get(idx).cloned()
    }
}
