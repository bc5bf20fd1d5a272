use crate::sync::{PeerManager, SyncPeer};
use crate::types::PeerStatus;
use alloy_primitives::{B256, U256};
use libp2p_identity::PeerId;
use rstest::rstest;

fn status(td: u64, head: u64) -> PeerStatus {
    PeerStatus::new(U256::from(td), B256::repeat_byte(head as u8), head)
}

#[test]
fn test_sync_peer_is_available() {
    let mut peer = SyncPeer::new(PeerId::random(), status(10, 5));
    assert!(peer.is_available());
    assert!(peer.has_block(5));
    assert!(!peer.has_block(6));

    peer.disabled = true;
    assert!(!peer.is_available());
}

#[test]
fn test_add_or_update_replaces_status() {
    let mut manager = PeerManager::new();
    let peer = PeerId::random();

    manager.add_or_update(peer, status(10, 5));
    manager.add_or_update(peer, status(20, 8));

    assert_eq!(manager.len(), 1);
    assert_eq!(manager.get_peer(&peer).map(SyncPeer::head_number), Some(8));
}

#[test]
fn test_removed_peer_is_not_found() {
    let mut manager = PeerManager::new();
    let peer = PeerId::random();

    manager.add_or_update(peer, status(10, 5));
    assert!(manager.remove_peer(&peer).is_some());
    assert!(manager.get_peer(&peer).is_none());
    assert!(!manager.is_available(&peer));
    assert!(manager.is_empty());
}

#[test]
fn test_best_peer_prefers_total_difficulty() {
    let mut manager = PeerManager::new();
    let low = PeerId::random();
    let high = PeerId::random();

    manager.add_or_update(low, status(10, 50));
    manager.add_or_update(high, status(30, 20));

    assert_eq!(manager.best_peer(U256::from(5)), Some(high));
    assert_eq!(manager.best_peer(U256::from(30)), None);

    manager.disable(&high, "test");
    assert_eq!(manager.best_peer(U256::from(5)), Some(low));
}

#[test]
fn test_best_peer_breaks_ties_by_id() {
    let mut manager = PeerManager::new();
    let mut ids = [PeerId::random(), PeerId::random()];
    ids.sort();

    manager.add_or_update(ids[1], status(10, 1));
    manager.add_or_update(ids[0], status(10, 1));

    assert_eq!(manager.best_peer(U256::ZERO), Some(ids[0]));
}

#[rstest]
#[case(1, false)]
#[case(2, false)]
#[case(3, true)]
fn test_penalize_disables_at_limit(#[case] failures: u32, #[case] disabled: bool) {
    let mut manager = PeerManager::new();
    let peer = PeerId::random();
    manager.add_or_update(peer, status(10, 5));

    let mut last = false;
    for _ in 0..failures {
        last = manager.penalize(&peer, "test", 3);
    }

    assert_eq!(last, disabled);
    assert_eq!(manager.is_available(&peer), !disabled);
}

#[test]
fn test_penalize_reports_disable_once() {
    let mut manager = PeerManager::new();
    let peer = PeerId::random();
    manager.add_or_update(peer, status(10, 5));

    assert!(manager.penalize(&peer, "test", 1));
    assert!(!manager.penalize(&peer, "test", 1));
    assert!(!manager.penalize(&PeerId::random(), "test", 1));
}

#[test]
fn test_note_and_lower_head() {
    let mut manager = PeerManager::new();
    let peer = PeerId::random();
    manager.add_or_update(peer, status(10, 5));

    manager.note_head(&peer, B256::repeat_byte(9), 9, Some(U256::from(12)));
    let tracked = manager.get_peer(&peer).cloned();
    assert_eq!(tracked.as_ref().map(SyncPeer::head_number), Some(9));
    assert_eq!(tracked.map(|p| p.total_difficulty()), Some(U256::from(12)));

    // Lower announcements never move the head back.
    manager.note_head(&peer, B256::repeat_byte(3), 3, Some(U256::from(1)));
    assert_eq!(manager.get_peer(&peer).map(SyncPeer::head_number), Some(9));

    manager.lower_head(&peer, 4);
    assert_eq!(manager.get_peer(&peer).map(SyncPeer::head_number), Some(4));
    assert!(manager.any_has_block(4));
    assert!(!manager.any_has_block(5));
}

#[test]
fn test_peer_ids_sorted() {
    let mut manager = PeerManager::new();
    for _ in 0..5 {
        manager.add_or_update(PeerId::random(), status(1, 1));
    }
    let ids = manager.peer_ids();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn test_missing_bodies_are_remembered_per_peer() {
    let mut manager = PeerManager::new();
    let (peer, other) = (PeerId::random(), PeerId::random());
    manager.add_or_update(peer, status(10, 5));
    manager.add_or_update(other, status(10, 5));

    let hash = B256::repeat_byte(7);
    manager.note_missing_bodies(&peer, [hash]);

    assert!(manager.lacks_body(&peer, &hash));
    assert!(!manager.lacks_body(&other, &hash));
    assert!(manager.get_peer(&peer).is_some_and(|sync_peer| sync_peer.failed_requests == 0));
}
