/// Content store for downloaded headers and bodies.
///
/// Headers and bodies are kept per chain index. Several candidate headers may
/// sit at the same index when peers disagree about the chain, so each index
/// holds an ordered list rather than a single entry.
///
/// Bodies are deduplicated by content identity: every header committing to
/// the same transactions root and uncles hash shares one download. The first
/// index registered for an identity owns the download; when the body arrives
/// it is copied to every index whose header references it.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use containers::{B256, BodyRecord, HeaderId, HeaderRecord};
use libp2p_identity::PeerId;
use tracing::trace;

/// A header candidate and the peer that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedHeader {
    pub record: HeaderRecord,
    pub origin: PeerId,
}

impl CachedHeader {
    pub fn hash(&self) -> B256 {
        self.record.hash
    }

    pub fn content_id(&self) -> HeaderId {
        self.record.content_id()
    }
}

/// Outcome of storing a downloaded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyInsert {
    /// No stored header references this body.
    Unknown,
    /// Every index referencing this body already has it.
    AlreadySatisfied(u64),
    /// Body was copied to these indices.
    Stored(Vec<u64>),
}

#[derive(Debug, Default, Clone)]
pub struct BlockCache {
    headers: BTreeMap<u64, Vec<CachedHeader>>,
    bodies: BTreeMap<u64, Vec<BodyRecord>>,
    /// Content identity -> indices whose headers reference it. The lowest
    /// index is the one responsible for downloading the body.
    content_index: HashMap<HeaderId, BTreeSet<u64>>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a header candidate at `number`.
    ///
    /// Returns false if the same header is already stored there. A header
    /// with an empty body gets that body immediately; a header sharing its
    /// content with an index that already holds the body gets a copy.
    pub fn insert_header(&mut self, number: u64, record: HeaderRecord, origin: PeerId) -> bool {
        let candidates = self.headers.entry(number).or_default();
        if candidates.iter().any(|cached| cached.hash() == record.hash) {
            trace!(number, hash = %record.hash, "Header already cached");
            return false;
        }

        let id = record.content_id();
        candidates.push(CachedHeader { record, origin });

        if id.is_empty() {
            self.store_body_at(number, BodyRecord::empty());
            return true;
        }

        let indices = self.content_index.entry(id).or_default();
        let donor = indices.iter().copied().find(|index| *index != number);
        indices.insert(number);

        if let Some(body) = donor.and_then(|index| self.body_for(index, &id)).cloned() {
            trace!(number, %id, "Reusing body from another index");
            self.store_body_at(number, body);
        }
        true
    }

    /// Store a downloaded body at every index whose header references it.
    pub fn insert_body(&mut self, record: BodyRecord) -> BodyInsert {
        let Some(indices) = self.content_index.get(&record.id) else {
            return BodyInsert::Unknown;
        };

        let missing: Vec<u64> = indices
            .iter()
            .copied()
            .filter(|index| self.body_for(*index, &record.id).is_none())
            .collect();

        if missing.is_empty() {
            let owner = indices.first().copied().unwrap_or_default();
            return BodyInsert::AlreadySatisfied(owner);
        }

        for index in &missing {
            self.store_body_at(*index, record.clone());
        }
        BodyInsert::Stored(missing)
    }

    fn store_body_at(&mut self, number: u64, record: BodyRecord) {
        let bodies = self.bodies.entry(number).or_default();
        if !bodies.iter().any(|body| body.id == record.id) {
            bodies.push(record);
        }
    }

    /// Whether a body request should be issued for `id` on behalf of `number`.
    ///
    /// Only the owning index of an identity requests it, and only until the
    /// body is stored.
    pub fn needs_body(&self, number: u64, id: &HeaderId) -> bool {
        !id.is_empty()
            && self.content_owner(id) == Some(number)
            && self.body_for(number, id).is_none()
    }

    /// Indices whose headers reference the body with identity `id`.
    pub fn content_indices(&self, id: &HeaderId) -> impl Iterator<Item = u64> + '_ {
        self.content_index
            .get(id)
            .into_iter()
            .flat_map(|indices| indices.iter().copied())
    }

    /// Index responsible for downloading the body with identity `id`.
    pub fn content_owner(&self, id: &HeaderId) -> Option<u64> {
        self.content_index
            .get(id)
            .and_then(|indices| indices.first().copied())
    }

    pub fn headers_at(&self, number: u64) -> &[CachedHeader] {
        self.headers.get(&number).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_header(&self, number: u64) -> bool {
        self.headers.contains_key(&number)
    }

    pub fn body_for(&self, number: u64, id: &HeaderId) -> Option<&BodyRecord> {
        self.bodies
            .get(&number)?
            .iter()
            .find(|body| body.id == *id)
    }

    /// Indices holding at least one header, ascending.
    pub fn header_indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.headers.keys().copied()
    }

    /// Indices above `number` holding at least one header, ascending.
    pub fn header_indices_above(&self, number: u64) -> impl Iterator<Item = u64> + '_ {
        self.headers
            .range(number.saturating_add(1)..)
            .map(|(index, _)| *index)
    }

    /// Drop everything stored at `number`.
    ///
    /// Identities referenced only from here lose their entry; identities
    /// shared with other indices pass ownership to the next one.
    pub fn remove_index(&mut self, number: u64) {
        if let Some(candidates) = self.headers.remove(&number) {
            for cached in candidates {
                self.unlink_content(number, &cached.content_id());
            }
        }
        self.bodies.remove(&number);
    }

    /// Drop every index at or below `number`.
    pub fn remove_through(&mut self, number: u64) {
        let stale: Vec<u64> = self
            .headers
            .range(..=number)
            .map(|(index, _)| *index)
            .chain(self.bodies.range(..=number).map(|(index, _)| *index))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for index in stale {
            self.remove_index(index);
        }
    }

    /// Drop one candidate header at `number` together with any body only it
    /// referenced.
    pub fn remove_candidate(&mut self, number: u64, hash: &B256) {
        let Some(candidates) = self.headers.get_mut(&number) else {
            return;
        };
        let Some(position) = candidates.iter().position(|cached| cached.hash() == *hash) else {
            return;
        };

        let removed = candidates.remove(position);
        let id = removed.content_id();
        let still_referenced = candidates.iter().any(|cached| cached.content_id() == id);
        let now_empty = candidates.is_empty();

        if !still_referenced {
            self.unlink_content(number, &id);
            if let Some(bodies) = self.bodies.get_mut(&number) {
                bodies.retain(|body| body.id != id);
            }
        }
        if now_empty {
            self.remove_index(number);
        } else if self.bodies.get(&number).is_some_and(Vec::is_empty) {
            self.bodies.remove(&number);
        }
    }

    /// Keep only the headers delivered by `peer`.
    ///
    /// Used when a new chain peer is selected and headers from the previous
    /// selection can no longer be trusted to lead to its head.
    pub fn retain_origin(&mut self, peer: &PeerId) {
        let foreign: Vec<(u64, B256)> = self
            .headers
            .iter()
            .flat_map(|(number, candidates)| {
                candidates
                    .iter()
                    .filter(|cached| cached.origin != *peer)
                    .map(move |cached| (*number, cached.hash()))
            })
            .collect();
        for (number, hash) in foreign {
            self.remove_candidate(number, &hash);
        }
    }

    fn unlink_content(&mut self, number: u64, id: &HeaderId) {
        if let Some(indices) = self.content_index.get_mut(id) {
            indices.remove(&number);
            if indices.is_empty() {
                self.content_index.remove(id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.headers.clear();
        self.bodies.clear();
        self.content_index.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.bodies.is_empty() && self.content_index.is_empty()
    }

    pub fn header_count(&self) -> usize {
        self.headers.values().map(Vec::len).sum()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.values().map(Vec::len).sum()
    }
}
