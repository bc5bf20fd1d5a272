use std::fmt::Display;

use alloy_primitives::{B256, U256};
use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Chain status a peer reports when its session is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub total_difficulty: U256,
    pub head_hash: B256,
    pub head_number: u64,
}

impl PeerStatus {
    pub fn new(total_difficulty: U256, head_hash: B256, head_number: u64) -> Self {
        Self {
            total_difficulty,
            head_hash,
            head_number,
        }
    }
}

/// Request the sync engine wants a peer session to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// `count` consecutive headers starting at `start`.
    BlockHeaders { start: u64, count: u64 },
    /// Bodies for the headers with these hashes.
    BlockBodies { hashes: Vec<B256> },
}

impl SyncRequest {
    pub fn len(&self) -> usize {
        match self {
            SyncRequest::BlockHeaders { count, .. } => *count as usize,
            SyncRequest::BlockBodies { hashes } => hashes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for SyncRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncRequest::BlockHeaders { start, count } => {
                write!(f, "headers {start}..{}", start + count)
            }
            SyncRequest::BlockBodies { hashes } => write!(f, "{} bodies", hashes.len()),
        }
    }
}

/// A request addressed to a specific peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSyncRequest {
    pub peer: PeerId,
    pub request: SyncRequest,
}

/// Outbound side of the peer layer.
///
/// Called by the sync engine after it has released its own lock, so an
/// implementation may block or re-enter the engine.
pub trait PeerNetwork: Send + Sync {
    fn send_request(&self, peer: PeerId, request: SyncRequest);
}

/// [`PeerNetwork`] forwarding requests into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    sender: mpsc::UnboundedSender<OutboundSyncRequest>,
}

impl ChannelNetwork {
    pub fn new(sender: mpsc::UnboundedSender<OutboundSyncRequest>) -> Self {
        Self { sender }
    }
}

impl PeerNetwork for ChannelNetwork {
    fn send_request(&self, peer: PeerId, request: SyncRequest) {
        if self
            .sender
            .send(OutboundSyncRequest { peer, request })
            .is_err()
        {
            debug!(peer = %peer, "Outbound request channel closed");
        }
    }
}
