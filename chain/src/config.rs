pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const GENESIS_DIFFICULTY: u64 = 17_179_869_184;
pub const BLOCK_DIFFICULTY: u64 = 131_072;
pub const BLOCK_TIME_SECS: u64 = 13;
pub const GENESIS_TIMESTAMP: u64 = 1_438_269_973;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    /// Blocks that may wait in the import queue before it reports no room.
    pub queue_capacity: usize,
    pub genesis_difficulty: u64,
    pub block_difficulty: u64,
    pub block_time_secs: u64,
    pub genesis_timestamp: u64,
}

pub const DEVNET_CONFIG: ChainConfig = ChainConfig {
    queue_capacity: DEFAULT_QUEUE_CAPACITY,
    genesis_difficulty: GENESIS_DIFFICULTY,
    block_difficulty: BLOCK_DIFFICULTY,
    block_time_secs: BLOCK_TIME_SECS,
    genesis_timestamp: GENESIS_TIMESTAMP,
};

impl Default for ChainConfig {
    fn default() -> Self {
        DEVNET_CONFIG
    }
}

impl ChainConfig {
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}
