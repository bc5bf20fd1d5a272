use std::collections::{HashMap, VecDeque};

use alloy_primitives::{B256, U256};
use containers::Block;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::ChainConfig;
use crate::provider::{ChainState, ImportQueue, ImportResult};

/// Callback fired when the import queue goes from full to having room.
pub type RoomCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug)]
struct ChainInner {
    /// Canonical block hashes, indexed by number.
    canonical: Vec<B256>,
    /// Total difficulty at each canonical number.
    total_difficulty: Vec<U256>,
    blocks: HashMap<B256, Block>,
    /// Imported blocks not yet committed, oldest first.
    queue: VecDeque<B256>,
    capacity: usize,
}

impl ChainInner {
    fn head_number(&self) -> u64 {
        (self.canonical.len() - 1) as u64
    }

    fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Attach `block` to the canonical chain, replacing whatever sits at its
    /// number and above.
    fn link(&mut self, block: Block, hash: B256) -> ImportResult {
        if !block.is_consistent() {
            return ImportResult::Invalid;
        }
        let number = block.number() as usize;
        if number == 0 {
            return ImportResult::Invalid;
        }
        match self.canonical.get(number - 1) {
            Some(parent) if *parent == block.header.parent_hash => {}
            _ => return ImportResult::UnknownParent,
        }
        if number < self.canonical.len() {
            self.truncate(number);
        }

        let td = self.total_difficulty[number - 1] + block.header.difficulty;
        self.canonical.push(hash);
        self.total_difficulty.push(td);
        self.blocks.insert(hash, block);
        trace!(number, hash = %hash, "Linked block");
        ImportResult::Imported
    }

    fn truncate(&mut self, number: usize) {
        debug!(from = number, head = self.head_number(), "Replacing canonical tail");
        for hash in self.canonical.drain(number..) {
            self.blocks.remove(&hash);
            self.queue.retain(|queued| *queued != hash);
        }
        self.total_difficulty.truncate(number);
    }
}

/// In-memory chain with a bounded import queue.
///
/// Imported blocks become part of the canonical chain immediately but occupy
/// a queue slot until [`Chain::drain`] commits them. While the queue is full,
/// [`ImportQueue::has_room`] is false and imports return
/// [`ImportResult::QueueFull`]. Draining from a full queue fires the
/// room-available callbacks exactly once per transition.
///
/// The newest imported block always wins at its number; choosing between
/// forks is left to the caller.
pub struct Chain {
    inner: Mutex<ChainInner>,
    room_callbacks: Mutex<Vec<RoomCallback>>,
}

impl Chain {
    pub fn new(genesis: Block, config: &ChainConfig) -> Self {
        let hash = genesis.hash();
        let difficulty = genesis.header.difficulty;
        let mut blocks = HashMap::new();
        blocks.insert(hash, genesis);

        Self {
            inner: Mutex::new(ChainInner {
                canonical: vec![hash],
                total_difficulty: vec![difficulty],
                blocks,
                queue: VecDeque::new(),
                capacity: config.queue_capacity,
            }),
            room_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Build a chain whose committed blocks are `blocks`, genesis first.
    pub fn with_blocks(blocks: &[Block], config: &ChainConfig) -> Self {
        let Some((genesis, rest)) = blocks.split_first() else {
            return Self::new(crate::ChainBuilder::genesis(config), config);
        };
        let chain = Self::new(genesis.clone(), config);
        {
            let mut inner = chain.inner.lock();
            for block in rest {
                let result = inner.link(block.clone(), block.hash());
                if result != ImportResult::Imported {
                    warn!(number = block.number(), ?result, "Could not seed block");
                    break;
                }
            }
        }
        chain
    }

    /// Register a callback for the edge-triggered room-available signal.
    pub fn on_room_available<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.room_callbacks.lock().push(Box::new(callback));
    }

    /// Commit up to `max` queued blocks. Returns how many were committed.
    pub fn drain(&self, max: usize) -> usize {
        let (drained, freed) = {
            let mut inner = self.inner.lock();
            let was_full = inner.is_full();
            let count = max.min(inner.queue.len());
            inner.queue.drain(..count);
            (count, was_full && !inner.is_full())
        };

        if drained > 0 {
            trace!(drained, "Committed queued blocks");
        }
        if freed {
            debug!("Import queue has room again");
            for callback in self.room_callbacks.lock().iter() {
                callback();
            }
        }
        drained
    }

    /// Number of imported blocks waiting to be committed.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Highest block no longer waiting in the queue.
    pub fn committed_number(&self) -> u64 {
        let inner = self.inner.lock();
        inner.head_number() - inner.queue.len() as u64
    }

    pub fn block(&self, hash: &B256) -> Option<Block> {
        self.inner.lock().blocks.get(hash).cloned()
    }

    pub fn block_by_number(&self, number: u64) -> Option<Block> {
        let inner = self.inner.lock();
        let hash = inner.canonical.get(number as usize)?;
        inner.blocks.get(hash).cloned()
    }
}

impl ChainState for Chain {
    fn head_number(&self) -> u64 {
        self.inner.lock().head_number()
    }

    fn head_hash(&self) -> B256 {
        let inner = self.inner.lock();
        inner.canonical[inner.canonical.len() - 1]
    }

    fn total_difficulty(&self) -> U256 {
        let inner = self.inner.lock();
        inner.total_difficulty[inner.total_difficulty.len() - 1]
    }

    fn head_timestamp(&self) -> u64 {
        let inner = self.inner.lock();
        let head = inner.canonical[inner.canonical.len() - 1];
        inner
            .blocks
            .get(&head)
            .map(|block| block.header.timestamp)
            .unwrap_or_default()
    }

    fn block_hash(&self, number: u64) -> Option<B256> {
        self.inner.lock().canonical.get(number as usize).copied()
    }

    fn is_known(&self, hash: &B256) -> bool {
        self.inner.lock().blocks.contains_key(hash)
    }
}

impl ImportQueue for Chain {
    fn has_room(&self) -> bool {
        !self.inner.lock().is_full()
    }

    fn import(&self, block: &Block) -> ImportResult {
        let mut inner = self.inner.lock();
        let hash = block.hash();
        if inner.blocks.contains_key(&hash) {
            return ImportResult::AlreadyKnown;
        }
        if inner.is_full() {
            return ImportResult::QueueFull;
        }

        let result = inner.link(block.clone(), hash);
        if result == ImportResult::Imported {
            inner.queue.push_back(hash);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChainBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config(capacity: usize) -> ChainConfig {
        ChainConfig::default().with_queue_capacity(capacity)
    }

    #[test]
    fn test_import_extends_head() {
        let builder = ChainBuilder::new(&config(8)).extend(3);
        let blocks = builder.blocks();
        let chain = Chain::new(blocks[0].clone(), &config(8));

        for block in &blocks[1..] {
            assert_eq!(chain.import(block), ImportResult::Imported);
        }
        assert_eq!(chain.head_number(), 3);
        assert_eq!(chain.head_hash(), blocks[3].hash());
        assert_eq!(chain.total_difficulty(), builder.total_difficulty());
        assert_eq!(chain.queued(), 3);
        assert_eq!(chain.committed_number(), 0);
        assert_eq!(chain.import(&blocks[2]), ImportResult::AlreadyKnown);
    }

    #[test]
    fn test_rejects_unknown_parent_and_inconsistent_body() {
        let blocks = ChainBuilder::new(&config(8)).extend(3).into_blocks();
        let chain = Chain::new(blocks[0].clone(), &config(8));

        assert_eq!(chain.import(&blocks[2]), ImportResult::UnknownParent);

        let mut tampered = blocks[1].clone();
        tampered.body.transactions.clear();
        assert_eq!(chain.import(&tampered), ImportResult::Invalid);
        assert_eq!(chain.head_number(), 0);
    }

    #[test]
    fn test_queue_full_and_room_signal() {
        let blocks = ChainBuilder::new(&config(2)).extend(4).into_blocks();
        let chain = Chain::new(blocks[0].clone(), &config(2));
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = signals.clone();
        chain.on_room_available(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(chain.import(&blocks[1]), ImportResult::Imported);
        assert_eq!(chain.import(&blocks[2]), ImportResult::Imported);
        assert!(!chain.has_room());
        assert_eq!(chain.import(&blocks[3]), ImportResult::QueueFull);

        assert_eq!(chain.drain(1), 1);
        assert!(chain.has_room());
        assert_eq!(signals.load(Ordering::SeqCst), 1);

        // Not full before this drain, so no second edge.
        assert_eq!(chain.drain(1), 1);
        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert_eq!(chain.committed_number(), 2);
    }

    #[test]
    fn test_import_never_signals_room() {
        let blocks = ChainBuilder::new(&config(1)).extend(3).into_blocks();
        let chain = Chain::new(blocks[0].clone(), &config(1));
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = signals.clone();
        chain.on_room_available(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(chain.import(&blocks[1]), ImportResult::Imported);
        assert_eq!(chain.import(&blocks[2]), ImportResult::QueueFull);
        assert!(!chain.has_room());
        assert_eq!(signals.load(Ordering::SeqCst), 0);

        chain.drain(1);
        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert_eq!(chain.import(&blocks[2]), ImportResult::Imported);
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fork_replaces_canonical_tail() {
        let main = ChainBuilder::new(&config(8)).extend(4);
        let fork = main.fork(2, 7).extend(3);
        let chain = Chain::with_blocks(main.blocks(), &config(8));
        assert_eq!(chain.head_number(), 4);

        for block in &fork.blocks()[3..] {
            assert_eq!(chain.import(block), ImportResult::Imported);
        }
        assert_eq!(chain.head_number(), 5);
        assert_eq!(chain.head_hash(), fork.head().hash());
        assert!(!chain.is_known(&main.blocks()[4].hash()));
        assert!(chain.is_known(&main.blocks()[2].hash()));
    }

    #[test]
    fn test_with_blocks_commits_everything() {
        let blocks = ChainBuilder::new(&config(1)).extend(5).into_blocks();
        let chain = Chain::with_blocks(&blocks, &config(1));
        assert_eq!(chain.head_number(), 5);
        assert_eq!(chain.queued(), 0);
        assert!(chain.has_room());
        assert_eq!(chain.block_by_number(3), Some(blocks[3].clone()));
    }
}
