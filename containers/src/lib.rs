pub mod block;
pub mod record;
pub mod types;

pub use block::{Block, BlockBody, BlockHeader};
pub use record::{BodyRecord, HeaderRecord};
pub use types::{BlockNumber, HeaderId, EMPTY_LIST_HASH};

pub use alloy_primitives::{Bytes, B256, U256};
