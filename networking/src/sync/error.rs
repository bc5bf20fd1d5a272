use libp2p_identity::PeerId;
use thiserror::Error;

/// Reasons a peer event was not (fully) accepted.
///
/// By the time one of these is returned the engine has already recovered:
/// the peer's assignment is released and, where the peer is at fault, it
/// has been penalized. Callers may use the error for their own scoring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("peer {0} has not reported its status")]
    UnknownPeer(PeerId),

    #[error("unsolicited block headers from {peer}")]
    UnsolicitedHeaders { peer: PeerId },

    #[error("unsolicited block bodies from {peer}")]
    UnsolicitedBodies { peer: PeerId },

    #[error("expected header {expected}, got {got}")]
    MisorderedHeaders { expected: u64, got: u64 },

    #[error("header {number} does not link to its predecessor")]
    BrokenHeaderChain { number: u64 },

    #[error("{count} block bodies matched no downloaded header")]
    UnknownBodies { count: usize },

    #[error("chain peer {peer} gave no usable answer to the ancestor probe at {number}")]
    InvalidProbe { peer: PeerId, number: u64 },

    #[error("chain peer {peer} shares no ancestor with the local chain")]
    NoCommonAncestor { peer: PeerId },

    #[error("new block {number} rejected by the import queue")]
    RejectedNewBlock { number: u64 },
}
