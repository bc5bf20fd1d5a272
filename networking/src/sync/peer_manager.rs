/// Peer registry for sync operations.
///
/// Tracks what each connected peer claims about its chain and how well it
/// has behaved. The engine never holds on to the peer session itself: a peer
/// is referenced by its [`PeerId`] and disappears from the registry when it
/// disconnects, after which lookups return `None`.
use std::collections::{HashMap, HashSet};

use alloy_primitives::{B256, U256};
use libp2p_identity::PeerId;
use tracing::{debug, warn};

use crate::types::PeerStatus;

/// Sync-specific peer state.
#[derive(Debug, Clone)]
pub struct SyncPeer {
    pub peer_id: PeerId,
    pub status: PeerStatus,
    pub failed_requests: u32,
    /// Set once the peer exceeded its failure budget. Disabled peers are
    /// never given work and never selected as chain peer.
    pub disabled: bool,
    /// Bodies the peer answered without. It is not asked for them again.
    pub missing_bodies: HashSet<B256>,
}

impl SyncPeer {
    pub fn new(peer_id: PeerId, status: PeerStatus) -> Self {
        Self {
            peer_id,
            status,
            failed_requests: 0,
            disabled: false,
            missing_bodies: HashSet::new(),
        }
    }

    pub fn total_difficulty(&self) -> U256 {
        self.status.total_difficulty
    }

    pub fn head_number(&self) -> u64 {
        self.status.head_number
    }

    /// Check if peer likely has the block at `number`.
    pub fn has_block(&self, number: u64) -> bool {
        self.status.head_number >= number
    }

    /// Check if peer can be given work.
    pub fn is_available(&self) -> bool {
        !self.disabled
    }
}

#[derive(Debug, Default, Clone)]
pub struct PeerManager {
    peers: HashMap<PeerId, SyncPeer>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, or replace the status of a known one.
    pub fn add_or_update(&mut self, peer_id: PeerId, status: PeerStatus) -> &mut SyncPeer {
        let peer = self
            .peers
            .entry(peer_id)
            .or_insert_with(|| SyncPeer::new(peer_id, status));
        peer.status = status;
        peer
    }

    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<SyncPeer> {
        self.peers.remove(peer_id)
    }

    pub fn get_peer(&self, peer_id: &PeerId) -> Option<&SyncPeer> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn is_available(&self, peer_id: &PeerId) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|peer| peer.is_available())
    }

    /// Raise what we believe about a peer's head after it announced a block.
    pub fn note_head(&mut self, peer_id: &PeerId, hash: B256, number: u64, total_difficulty: Option<U256>) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            if number > peer.status.head_number {
                peer.status.head_number = number;
                peer.status.head_hash = hash;
            }
            if let Some(td) = total_difficulty {
                peer.status.total_difficulty = peer.status.total_difficulty.max(td);
            }
        }
    }

    /// Record that a peer does not have blocks above `number`.
    pub fn lower_head(&mut self, peer_id: &PeerId, number: u64) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            if number < peer.status.head_number {
                debug!(peer = %peer_id, from = peer.status.head_number, to = number, "Lowering peer head");
                peer.status.head_number = number;
            }
        }
    }

    /// Record bodies a peer could not serve.
    pub fn note_missing_bodies(&mut self, peer_id: &PeerId, hashes: impl IntoIterator<Item = B256>) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.missing_bodies.extend(hashes);
        }
    }

    /// Whether a peer already answered a request for `hash` without the body.
    pub fn lacks_body(&self, peer_id: &PeerId, hash: &B256) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|peer| peer.missing_bodies.contains(hash))
    }

    /// Count a failure against a peer. Returns true if this disabled it.
    pub fn penalize(&mut self, peer_id: &PeerId, reason: &str, max_failed_requests: u32) -> bool {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return false;
        };
        peer.failed_requests += 1;
        warn!(
            peer = %peer_id,
            failures = peer.failed_requests,
            reason,
            "Penalizing peer"
        );
        if !peer.disabled && peer.failed_requests >= max_failed_requests {
            peer.disabled = true;
            warn!(peer = %peer_id, "Peer disabled for the rest of its session");
            return true;
        }
        false
    }

    /// Stop giving a peer work regardless of its failure count.
    pub fn disable(&mut self, peer_id: &PeerId, reason: &str) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            warn!(peer = %peer_id, reason, "Disabling peer");
            peer.disabled = true;
        }
    }

    /// Available peer with the highest total difficulty above `min_td`.
    ///
    /// Ties go to the lowest peer id so selection is deterministic.
    pub fn best_peer(&self, min_td: U256) -> Option<PeerId> {
        self.peers
            .values()
            .filter(|peer| peer.is_available() && peer.total_difficulty() > min_td)
            .max_by(|a, b| {
                a.total_difficulty()
                    .cmp(&b.total_difficulty())
                    .then_with(|| b.peer_id.cmp(&a.peer_id))
            })
            .map(|peer| peer.peer_id)
    }

    /// Whether any available peer claims a block at or above `number`.
    pub fn any_has_block(&self, number: u64) -> bool {
        self.peers
            .values()
            .any(|peer| peer.is_available() && peer.has_block(number))
    }

    /// Ids of all tracked peers in a stable order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
