use alloy_primitives::{Bytes, B256};

use crate::block::{Block, BlockBody, BlockHeader};
use crate::types::HeaderId;

/// A downloaded header together with its encoding and cached hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderRecord {
    pub data: Bytes,
    pub hash: B256,
    pub header: BlockHeader,
}

impl HeaderRecord {
    pub fn new(header: BlockHeader) -> Self {
        let data = header.encoded();
        let hash = alloy_primitives::keccak256(&data);
        Self { data, hash, header }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn content_id(&self) -> HeaderId {
        self.header.content_id()
    }
}

/// A downloaded body together with its encoding and content identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BodyRecord {
    pub data: Bytes,
    pub id: HeaderId,
    pub body: BlockBody,
}

impl BodyRecord {
    pub fn new(body: BlockBody) -> Self {
        Self {
            data: body.encoded(),
            id: body.content_id(),
            body,
        }
    }

    /// Body of a block without transactions or uncles.
    pub fn empty() -> Self {
        Self::new(BlockBody::default())
    }

    /// Join with a header committing to the same content.
    ///
    /// Returns `None` when the header references a different body.
    pub fn assemble(&self, header: &HeaderRecord) -> Option<Block> {
        if header.content_id() != self.id {
            return None;
        }
        Some(Block::new(header.header.clone(), self.body.clone()))
    }
}
