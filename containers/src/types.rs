use alloy_primitives::{b256, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a block in the chain.
pub type BlockNumber = u64;

/// Keccak-256 of an RLP-encoded empty list.
///
/// This is both the uncles hash and the transactions root of a block without
/// transactions or uncles.
pub const EMPTY_LIST_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Content identity of a block body.
///
/// Two headers carrying the same transactions root and uncles hash reference
/// byte-identical bodies, so a body downloaded for one of them satisfies the
/// other as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderId {
    pub transactions_root: B256,
    pub uncles: B256,
}

impl HeaderId {
    /// Identity of a body with no transactions and no uncles.
    pub const EMPTY: HeaderId = HeaderId {
        transactions_root: EMPTY_LIST_HASH,
        uncles: EMPTY_LIST_HASH,
    };

    pub fn new(transactions_root: B256, uncles: B256) -> Self {
        Self {
            transactions_root,
            uncles,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Display for HeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.transactions_root, self.uncles)
    }
}
