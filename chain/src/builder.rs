use alloy_primitives::{Bytes, B256, U256};
use containers::{Block, BlockBody, BlockHeader, EMPTY_LIST_HASH};

use crate::config::ChainConfig;

/// Deterministic chain generator for simulations and tests.
///
/// Every block gets a body with one transaction unique to its number and the
/// builder's seed, unless a body is supplied explicitly. Two builders with
/// different seeds produce different hashes from the same parent, which is
/// how forks are made.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    blocks: Vec<Block>,
    seed: u8,
    difficulty: U256,
    block_time_secs: u64,
}

impl ChainBuilder {
    pub fn new(config: &ChainConfig) -> Self {
        Self {
            blocks: vec![Self::genesis(config)],
            seed: 0,
            difficulty: U256::from(config.block_difficulty),
            block_time_secs: config.block_time_secs,
        }
    }

    pub fn genesis(config: &ChainConfig) -> Block {
        Block::new(
            BlockHeader {
                uncles_hash: EMPTY_LIST_HASH,
                transactions_root: EMPTY_LIST_HASH,
                difficulty: U256::from(config.genesis_difficulty),
                timestamp: config.genesis_timestamp,
                extra_data: Bytes::from_static(b"genesis"),
                ..Default::default()
            },
            BlockBody::default(),
        )
    }

    /// Body with a single transaction derived from `number` and `seed`.
    pub fn unique_body(number: u64, seed: u8) -> BlockBody {
        let mut tx = number.to_be_bytes().to_vec();
        tx.push(seed);
        BlockBody::new(vec![Bytes::from(tx)], vec![])
    }

    pub fn with_seed(mut self, seed: u8) -> Self {
        self.seed = seed;
        self
    }

    /// Append `count` blocks with unique bodies.
    pub fn extend(mut self, count: usize) -> Self {
        for _ in 0..count {
            let number = self.head().number() + 1;
            self.push(Self::unique_body(number, self.seed));
        }
        self
    }

    pub fn push(&mut self, body: BlockBody) -> &Block {
        let parent = self.head();
        let number = parent.number() + 1;
        let header = BlockHeader {
            parent_hash: parent.hash(),
            uncles_hash: body.uncles_hash(),
            state_root: B256::left_padding_from(&number.to_be_bytes()),
            transactions_root: body.transactions_root(),
            difficulty: self.difficulty,
            number,
            timestamp: parent.header.timestamp + self.block_time_secs,
            extra_data: Bytes::from(vec![self.seed]),
        };
        self.blocks.push(Block::new(header, body));
        self.head()
    }

    pub fn push_empty(&mut self) -> &Block {
        self.push(BlockBody::default())
    }

    /// Copy of the chain up to and including `number`, continuing with `seed`.
    pub fn fork(&self, number: u64, seed: u8) -> ChainBuilder {
        let keep = (number as usize + 1).min(self.blocks.len());
        ChainBuilder {
            blocks: self.blocks[..keep].to_vec(),
            seed,
            difficulty: self.difficulty,
            block_time_secs: self.block_time_secs,
        }
    }

    pub fn head(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn total_difficulty(&self) -> U256 {
        self.blocks
            .iter()
            .fold(U256::ZERO, |td, block| td + block.header.difficulty)
    }

    /// Total difficulty at `number`, if the chain reaches it.
    pub fn total_difficulty_at(&self, number: u64) -> Option<U256> {
        let end = number as usize + 1;
        if end > self.blocks.len() {
            return None;
        }
        Some(
            self.blocks[..end]
                .iter()
                .fold(U256::ZERO, |td, block| td + block.header.difficulty),
        )
    }
}
