/// Sync engine configuration.
///
/// Request windows, penalty thresholds and the parameters of the progress
/// estimate.
use serde::{Deserialize, Serialize};

/// Maximum headers requested from one peer at a time.
pub const MAX_HEADERS_PER_REQUEST: u64 = 192;

/// Maximum bodies requested from one peer at a time.
pub const MAX_BODIES_PER_REQUEST: usize = 128;

/// Protocol violations tolerated before a peer is no longer given work.
pub const MAX_FAILED_REQUESTS: u32 = 3;

/// Size at which the informational set of announced hashes is reset.
pub const KNOWN_HASHES_CAP: usize = 10_000;

/// Blocks assumed reachable beyond our head when no chain peer is known.
pub const CHAIN_REORG_SIZE: u64 = 30_000;

/// Expected interval between blocks, in seconds.
pub const TARGET_BLOCK_TIME_SECS: u64 = 13;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SyncConfig {
    pub max_headers_per_request: u64,
    pub max_bodies_per_request: usize,
    pub max_failed_requests: u32,
    pub known_hashes_cap: usize,
    pub chain_reorg_size: u64,
    pub target_block_time_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_headers_per_request: MAX_HEADERS_PER_REQUEST,
            max_bodies_per_request: MAX_BODIES_PER_REQUEST,
            max_failed_requests: MAX_FAILED_REQUESTS,
            known_hashes_cap: KNOWN_HASHES_CAP,
            chain_reorg_size: CHAIN_REORG_SIZE,
            target_block_time_secs: TARGET_BLOCK_TIME_SECS,
        }
    }
}
