use crate::sync::DownloadAssignments;
use libp2p_identity::PeerId;
use pretty_assertions::assert_eq;

#[test]
fn test_assign_skips_indices_owned_by_another_peer() {
    let mut assignments = DownloadAssignments::new();
    let a = PeerId::random();
    let b = PeerId::random();

    assert_eq!(assignments.assign(a, 1..=4), vec![1, 2, 3, 4]);
    assert_eq!(assignments.assign(b, 3..=6), vec![5, 6]);

    assert_eq!(assignments.assigned_to(&a), &[1, 2, 3, 4]);
    assert_eq!(assignments.assigned_to(&b), &[5, 6]);
    assert_eq!(assignments.owner(3), Some(a));
    assert_eq!(assignments.len(), 6);
    assert!(assignments.is_consistent());
}

#[test]
fn test_assign_nothing_leaves_peer_without_entry() {
    let mut assignments = DownloadAssignments::new();
    let a = PeerId::random();
    let b = PeerId::random();

    assignments.assign(a, [7]);
    assert!(assignments.assign(b, [7]).is_empty());
    assert!(!assignments.has_assignment(&b));
    assert!(assignments.is_consistent());
}

#[test]
fn test_release_peer_returns_indices_to_pool() {
    let mut assignments = DownloadAssignments::new();
    let a = PeerId::random();
    let b = PeerId::random();

    assignments.assign(a, [4, 5, 6]);
    assert_eq!(assignments.release_peer(&a), vec![4, 5, 6]);
    assert!(!assignments.is_downloading(5));
    assert!(assignments.is_empty());

    assert_eq!(assignments.assign(b, [4, 5, 6]), vec![4, 5, 6]);
    assert_eq!(assignments.owner(5), Some(b));
}

#[test]
fn test_release_index_is_idempotent() {
    let mut assignments = DownloadAssignments::new();
    let a = PeerId::random();

    assignments.assign(a, [1, 2]);
    assignments.release_index(1);
    assignments.release_index(1);

    assert_eq!(assignments.assigned_to(&a), &[2]);
    assert_eq!(assignments.release_peer(&a), vec![2]);
    assert!(assignments.is_consistent());
}

#[test]
fn test_release_index_drops_emptied_peer() {
    let mut assignments = DownloadAssignments::new();
    let a = PeerId::random();

    assignments.assign(a, [9]);
    assignments.release_index(9);

    assert!(!assignments.has_assignment(&a));
    assert!(assignments.release_peer(&a).is_empty());
}

#[test]
fn test_release_through() {
    let mut assignments = DownloadAssignments::new();
    let a = PeerId::random();
    let b = PeerId::random();

    assignments.assign(a, [1, 2, 3]);
    assignments.assign(b, [4, 5]);
    assignments.release_through(4);

    assert!(!assignments.has_assignment(&a));
    assert_eq!(assignments.assigned_to(&b), &[5]);
    assert_eq!(assignments.len(), 1);
    assert!(assignments.is_consistent());
}

#[test]
fn test_clear() {
    let mut assignments = DownloadAssignments::new();
    let peer = PeerId::random();
    assignments.assign(peer, [1, 2]);
    assignments.assign(PeerId::random(), [3]);
    assignments.clear();

    assert!(assignments.is_empty());
    assert!(!assignments.has_assignment(&peer));
    assert!(assignments.assigned_to(&peer).is_empty());
}
