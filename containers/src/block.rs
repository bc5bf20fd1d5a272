use alloy_primitives::{keccak256, Bytes, B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::types::{BlockNumber, HeaderId};

/// Block header as received from peers.
///
/// Only the fields the sync engine reasons about are modelled: linkage
/// (`parent_hash`, `number`), body identity (`transactions_root`,
/// `uncles_hash`) and the difficulty used to accumulate total difficulty.
#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub uncles_hash: B256,
    pub state_root: B256,
    pub transactions_root: B256,
    pub difficulty: U256,
    pub number: BlockNumber,
    pub timestamp: u64,
    pub extra_data: Bytes,
}

impl BlockHeader {
    /// Keccak-256 of the RLP encoding.
    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// RLP encoding of the header.
    pub fn encoded(&self) -> Bytes {
        alloy_rlp::encode(self).into()
    }

    pub fn content_id(&self) -> HeaderId {
        HeaderId::new(self.transactions_root, self.uncles_hash)
    }

    /// Whether the referenced body has neither transactions nor uncles.
    pub fn has_empty_body(&self) -> bool {
        self.content_id().is_empty()
    }
}

/// Block body: opaque encoded transactions plus uncle headers.
#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Bytes>,
    pub uncles: Vec<BlockHeader>,
}

impl BlockBody {
    pub fn new(transactions: Vec<Bytes>, uncles: Vec<BlockHeader>) -> Self {
        Self {
            transactions,
            uncles,
        }
    }

    pub fn transactions_root(&self) -> B256 {
        keccak256(alloy_rlp::encode(&self.transactions))
    }

    pub fn uncles_hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(&self.uncles))
    }

    /// Identity that a header must carry for this body to belong to it.
    pub fn content_id(&self) -> HeaderId {
        HeaderId::new(self.transactions_root(), self.uncles_hash())
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.uncles.is_empty()
    }

    pub fn encoded(&self) -> Bytes {
        alloy_rlp::encode(self).into()
    }
}

/// A complete block, ready for the import queue.
#[derive(Clone, Debug, PartialEq, Eq, Default, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Whether the body carries the content the header commits to.
    pub fn is_consistent(&self) -> bool {
        self.header.content_id() == self.body.content_id()
    }

    pub fn encoded(&self) -> Bytes {
        alloy_rlp::encode(self).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::Decodable;
    use pretty_assertions::assert_eq;

    fn body_with(tx: &'static [u8]) -> BlockBody {
        BlockBody::new(vec![Bytes::from_static(tx)], vec![])
    }

    #[test]
    fn test_empty_body_identity() {
        let body = BlockBody::default();
        assert!(body.is_empty());
        assert_eq!(body.content_id(), HeaderId::EMPTY);
    }

    #[test]
    fn test_header_hash_changes_with_fields() {
        let header = BlockHeader {
            number: 1,
            ..Default::default()
        };
        let other = BlockHeader {
            number: 2,
            ..Default::default()
        };
        assert_ne!(header.hash(), other.hash());
        assert_eq!(header.hash(), header.clone().hash());
    }

    #[test]
    fn test_body_identity_ignores_header() {
        let body = body_with(b"transfer");
        let a = BlockHeader {
            number: 5,
            transactions_root: body.transactions_root(),
            uncles_hash: body.uncles_hash(),
            ..Default::default()
        };
        let b = BlockHeader {
            number: 9,
            extra_data: Bytes::from_static(b"other fork"),
            ..a.clone()
        };
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.content_id(), body.content_id());
        assert_eq!(b.content_id(), body.content_id());
    }

    #[test]
    fn test_block_consistency() {
        let body = body_with(b"transfer");
        let header = BlockHeader {
            number: 1,
            transactions_root: body.transactions_root(),
            uncles_hash: body.uncles_hash(),
            ..Default::default()
        };
        assert!(Block::new(header.clone(), body).is_consistent());
        assert!(!Block::new(header, body_with(b"different")).is_consistent());
    }

    #[test]
    fn test_block_decodes_from_encoding() {
        let body = body_with(b"transfer");
        let block = Block::new(
            BlockHeader {
                number: 3,
                difficulty: U256::from(131_072u64),
                transactions_root: body.transactions_root(),
                uncles_hash: body.uncles_hash(),
                ..Default::default()
            },
            body,
        );
        let encoded = block.encoded();
        let decoded = Block::decode(&mut &encoded[..]).unwrap();
        assert_eq!(decoded, block);
    }
}
