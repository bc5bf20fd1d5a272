/// Work assignment tables.
///
/// Records which peer is fetching which chain indices. One table exists per
/// download phase (headers and bodies). An index is owned by at most one peer
/// at a time, and the set of indices being downloaded is always exactly the
/// union of the per-peer lists.
use std::collections::{BTreeSet, HashMap};

use libp2p_identity::PeerId;

#[derive(Debug, Default, Clone)]
pub struct DownloadAssignments {
    downloading: BTreeSet<u64>,
    by_peer: HashMap<PeerId, Vec<u64>>,
}

impl DownloadAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `indices` to `peer`.
    ///
    /// Indices already owned by any peer are skipped; the ones actually
    /// assigned are returned in the order given.
    pub fn assign(&mut self, peer: PeerId, indices: impl IntoIterator<Item = u64>) -> Vec<u64> {
        let assigned: Vec<u64> = indices
            .into_iter()
            .filter(|index| self.downloading.insert(*index))
            .collect();
        if !assigned.is_empty() {
            self.by_peer
                .entry(peer)
                .or_default()
                .extend(assigned.iter().copied());
        }
        assigned
    }

    pub fn is_downloading(&self, index: u64) -> bool {
        self.downloading.contains(&index)
    }

    /// Indices currently owned by `peer`, in request order.
    pub fn assigned_to(&self, peer: &PeerId) -> &[u64] {
        self.by_peer.get(peer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_assignment(&self, peer: &PeerId) -> bool {
        self.by_peer.contains_key(peer)
    }

    pub fn owner(&self, index: u64) -> Option<PeerId> {
        if !self.downloading.contains(&index) {
            return None;
        }
        self.by_peer
            .iter()
            .find(|(_, indices)| indices.contains(&index))
            .map(|(peer, _)| *peer)
    }

    /// Release everything `peer` owns back to the unassigned pool.
    ///
    /// Returns the released indices. Indices resolved in the meantime were
    /// already dropped from the peer's list, so nothing is freed twice.
    pub fn release_peer(&mut self, peer: &PeerId) -> Vec<u64> {
        let released = self.by_peer.remove(peer).unwrap_or_default();
        for index in &released {
            self.downloading.remove(index);
        }
        released
    }

    /// Drop a single index, whoever owns it. Used when the index is resolved
    /// through another path.
    pub fn release_index(&mut self, index: u64) {
        if !self.downloading.remove(&index) {
            return;
        }
        self.by_peer.retain(|_, indices| {
            indices.retain(|owned| *owned != index);
            !indices.is_empty()
        });
    }

    /// Drop every index at or below `index`.
    pub fn release_through(&mut self, index: u64) {
        let stale: Vec<u64> = self.downloading.range(..=index).copied().collect();
        for owned in stale {
            self.release_index(owned);
        }
    }

    pub fn clear(&mut self) {
        self.downloading.clear();
        self.by_peer.clear();
    }

    pub fn len(&self) -> usize {
        self.downloading.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloading.is_empty()
    }

    /// Check the per-peer lists are disjoint and cover `downloading` exactly.
    pub fn is_consistent(&self) -> bool {
        let mut seen = BTreeSet::new();
        for indices in self.by_peer.values() {
            if indices.is_empty() {
                return false;
            }
            for index in indices {
                if !seen.insert(*index) {
                    return false;
                }
            }
        }
        seen == self.downloading
    }
}
