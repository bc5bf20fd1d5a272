/// Block-chain sync engine.
///
/// Catches the local chain up with the network by downloading headers and
/// bodies from several peers at once and feeding assembled blocks to the
/// import queue. It includes:
///
/// - **Peer Manager**: Tracks what each peer claims and penalizes misbehaviour
/// - **Assignments**: Which peer is fetching which chain index
/// - **Block Cache**: Headers and bodies per index, with bodies deduplicated
///   by content identity across competing forks
/// - **Chain Peer Selector**: Follows the heaviest peer and finds the common
///   ancestor with it
/// - **Assembler**: Joins headers with bodies and imports them in order
/// - **Sync Service**: Dispatches peer events and drives the state machine
///
/// ## State Machine
///
/// - **Idle**: No round active
/// - **FindingCommonAncestor**: Probing the chain peer one header at a time
/// - **DownloadingHeaders / DownloadingBodies**: Fetching block data
/// - **Waiting**: Import queue is full; resumes when it signals room
/// - **Complete**: Round finished, folds back to Idle
pub mod assembler;
pub mod assignments;
pub mod block_cache;
pub mod chain_peer;
pub mod config;
pub mod error;
pub mod peer_manager;
pub mod service;
pub mod states;

pub use assembler::{CollectReport, Watermarks};
pub use assignments::DownloadAssignments;
pub use block_cache::{BlockCache, BodyInsert, CachedHeader};
pub use chain_peer::{AncestorSearch, ChainPeerSelector, ProbeOutcome};
pub use config::*;
pub use error::SyncError;
pub use peer_manager::{PeerManager, SyncPeer};
pub use service::{SyncService, SyncStatus};
pub use states::SyncState;

#[cfg(test)]
mod tests;
