/// Interfaces the sync engine consumes from the rest of the client.
///
/// The local chain answers questions about what is already known, and the
/// import queue accepts fully assembled blocks under backpressure.
use alloy_primitives::{B256, U256};
use containers::Block;

/// Read-only view of the local chain.
///
/// The sync engine calls this while holding its own lock, so implementations
/// must not call back into the engine.
pub trait ChainState: Send + Sync {
    fn head_number(&self) -> u64;

    fn head_hash(&self) -> B256;

    /// Total difficulty of the current head.
    fn total_difficulty(&self) -> U256;

    /// Timestamp of the current head, in seconds.
    fn head_timestamp(&self) -> u64;

    /// Hash of the canonical block at `number`, if the chain has one.
    fn block_hash(&self, number: u64) -> Option<B256>;

    fn is_known(&self, hash: &B256) -> bool;
}

/// Outcome of handing a block to the import queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportResult {
    /// Accepted and queued for commit.
    Imported,
    /// Already part of the chain; nothing to do.
    AlreadyKnown,
    /// The parent is not known to the chain.
    UnknownParent,
    /// Rejected as malformed.
    Invalid,
    /// No capacity; retry once room is available.
    QueueFull,
}

impl ImportResult {
    /// Whether the block is now part of the chain.
    pub fn is_accepted(&self) -> bool {
        matches!(self, ImportResult::Imported | ImportResult::AlreadyKnown)
    }
}

/// Downstream queue validating and committing blocks.
///
/// Called with the sync engine's lock held. Neither method may call back
/// into the engine: the room-available signal has to be raised later, from
/// whatever frees capacity, never from inside `import` or `has_room`.
pub trait ImportQueue: Send + Sync {
    /// Whether another block can be accepted right now.
    fn has_room(&self) -> bool;

    fn import(&self, block: &Block) -> ImportResult;
}
