/// Sync service coordinating all synchronization operations.
///
/// The SyncService is the entry point for every peer event. It coordinates:
/// - PeerManager: what each peer claims and how it behaved
/// - DownloadAssignments: which peer fetches which index
/// - BlockCache: downloaded headers and deduplicated bodies
/// - ChainPeerSelector: the chain being followed and its common ancestor
/// - Assembler: joining headers with bodies and feeding the import queue
///
/// All state sits behind one lock. Requests produced while handling an event
/// are sent to the peer layer only after the lock is released.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{B256, U256};
use chain::{ChainState, ImportQueue, ImportResult};
use containers::{Block, BlockBody, BlockHeader, BodyRecord, HeaderRecord};
use libp2p_identity::PeerId;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

use super::{
    assembler::{self, Watermarks},
    assignments::DownloadAssignments,
    block_cache::{BlockCache, BodyInsert},
    chain_peer::{ChainPeerSelector, ProbeOutcome},
    config::SyncConfig,
    error::SyncError,
    peer_manager::PeerManager,
    states::SyncState,
};
use crate::types::{OutboundSyncRequest, PeerNetwork, PeerStatus, SyncRequest};

/// The one request a peer may have outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingRequest {
    Headers { start: u64, count: u64 },
    Bodies { hashes: Vec<B256> },
}

/// Snapshot of sync progress for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub starting_block: u64,
    pub current_block: u64,
    pub highest_block: u64,
    pub estimated_hashes: u64,
    pub chain_peer: Option<PeerId>,
    pub peer_count: usize,
    pub downloading_headers: usize,
    pub downloading_bodies: usize,
}

#[derive(Debug, Default)]
struct SyncInner {
    state: SyncState,
    peers: PeerManager,
    header_downloads: DownloadAssignments,
    body_downloads: DownloadAssignments,
    requests: HashMap<PeerId, PendingRequest>,
    cache: BlockCache,
    selector: ChainPeerSelector,
    marks: Watermarks,
    /// Peer whose header the cursor currently points at. `None` when the
    /// cursor is a block of the local chain.
    cursor_origin: Option<PeerId>,
    known_new_hashes: HashSet<B256>,
    outbound: Vec<OutboundSyncRequest>,
}

impl SyncInner {
    fn is_busy(&self, peer: &PeerId) -> bool {
        self.requests.contains_key(peer)
    }

    fn send(&mut self, peer: PeerId, request: SyncRequest) {
        self.outbound.push(OutboundSyncRequest { peer, request });
    }

    fn set_state(&mut self, target: SyncState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            warn!(from = %self.state, to = %target, "Unexpected sync state transition");
        }
        if self.state.is_downloading() && target.is_downloading() {
            debug!(from = %self.state, to = %target, "Sync state changed");
        } else {
            info!(from = %self.state, to = %target, "Sync state changed");
        }
        self.state = target;
    }

    /// Keep the downloading tag in line with what is in flight.
    fn refresh_download_state(&mut self) {
        if !self.state.is_downloading() {
            return;
        }
        if self.body_downloads.is_empty() {
            self.set_state(SyncState::DownloadingHeaders);
        } else {
            self.set_state(SyncState::DownloadingBodies);
        }
    }

    fn invariants(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if !self.header_downloads.is_consistent() {
            violations.push("header assignments overlap");
        }
        if !self.body_downloads.is_consistent() {
            violations.push("body assignments overlap");
        }
        if self.state == SyncState::Idle
            && !(self.cache.is_empty()
                && self.header_downloads.is_empty()
                && self.body_downloads.is_empty()
                && self.requests.is_empty())
        {
            violations.push("tables populated while idle");
        }
        if !self.marks.is_ordered() {
            violations.push("watermarks out of order");
        }
        if let Some(peer) = self.selector.chain_peer() {
            if !self.peers.contains(&peer) {
                violations.push("chain peer is not connected");
            }
        }
        violations
    }
}

pub struct SyncService<C: ChainState, Q: ImportQueue, N: PeerNetwork> {
    config: SyncConfig,
    chain: Arc<C>,
    queue: Arc<Q>,
    network: N,
    inner: Mutex<SyncInner>,
}

impl<C: ChainState, Q: ImportQueue, N: PeerNetwork> SyncService<C, Q, N> {
    pub fn new(config: SyncConfig, chain: Arc<C>, queue: Arc<Q>, network: N) -> Self {
        let marks = Watermarks::from_chain(chain.as_ref());
        Self {
            config,
            chain,
            queue,
            network,
            inner: Mutex::new(SyncInner {
                marks,
                ..SyncInner::default()
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get current sync state.
    pub fn state(&self) -> SyncState {
        self.inner.lock().state
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.lock().state != SyncState::Idle
    }

    pub fn status(&self) -> SyncStatus {
        let inner = self.inner.lock();
        SyncStatus {
            state: inner.state,
            starting_block: inner.marks.starting,
            current_block: inner.marks.last_imported,
            highest_block: inner.marks.highest_seen,
            estimated_hashes: self.estimated_hashes(&inner),
            chain_peer: inner.selector.chain_peer(),
            peer_count: inner.peers.len(),
            downloading_headers: inner.header_downloads.len(),
            downloading_bodies: inner.body_downloads.len(),
        }
    }

    /// A peer finished its handshake or refreshed its status.
    pub fn on_peer_status(&self, peer: PeerId, status: PeerStatus) {
        let mut inner = self.inner.lock();
        let known = inner.peers.contains(&peer);
        inner.peers.add_or_update(peer, status);
        debug!(
            peer = %peer,
            known,
            total_difficulty = %status.total_difficulty,
            head = status.head_number,
            "Peer status"
        );

        if inner.selector.is_chain_peer(&peer) {
            inner.selector.update_td(status.total_difficulty);
            inner.marks.observe(status.head_number);
        } else if inner.peers.is_available(&peer)
            && status.total_difficulty > inner.selector.threshold(self.chain.total_difficulty())
        {
            self.switch_chain_peer(&mut inner, peer);
        }

        self.continue_sync(&mut inner);
        self.finish(inner);
    }

    pub fn on_peer_block_headers(
        &self,
        peer: PeerId,
        headers: Vec<BlockHeader>,
    ) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        let result = self.handle_headers(&mut inner, peer, headers);
        self.continue_sync(&mut inner);
        self.finish(inner);
        result
    }

    pub fn on_peer_block_bodies(&self, peer: PeerId, bodies: Vec<BlockBody>) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        let result = self.handle_bodies(&mut inner, peer, bodies);
        self.continue_sync(&mut inner);
        self.finish(inner);
        result
    }

    /// A peer announced a complete block outside of bulk download.
    pub fn on_peer_new_block(
        &self,
        peer: PeerId,
        block: Block,
        total_difficulty: U256,
    ) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        let result = self.handle_new_block(&mut inner, peer, block, total_difficulty);
        self.continue_sync(&mut inner);
        self.finish(inner);
        result
    }

    /// A peer announced block hashes.
    ///
    /// Returns the header request issued to that peer as a result, if any.
    /// The request has already been handed to the peer network.
    pub fn on_peer_new_hashes(&self, peer: PeerId, hashes: Vec<(B256, u64)>) -> Option<SyncRequest> {
        let mut inner = self.inner.lock();
        let issued_before = inner.outbound.len();
        let announced = self.handle_new_hashes(&mut inner, peer, hashes);
        self.continue_sync(&mut inner);

        let request = if announced {
            inner.outbound[issued_before..]
                .iter()
                .find(|outbound| outbound.peer == peer)
                .map(|outbound| outbound.request.clone())
        } else {
            None
        };
        self.finish(inner);
        request
    }

    /// A peer disconnected or its session timed out.
    pub fn on_peer_aborting(&self, peer: PeerId) {
        let mut inner = self.inner.lock();
        if inner.peers.remove_peer(&peer).is_none() {
            trace!(peer = %peer, "Unknown peer left");
            self.finish(inner);
            return;
        }

        let released = inner.header_downloads.assigned_to(&peer).len()
            + inner.body_downloads.assigned_to(&peer).len();
        self.clear_peer_download(&mut inner, &peer);
        info!(peer = %peer, released, "Peer left sync");

        if inner.selector.is_chain_peer(&peer) {
            self.drop_chain_peer(&mut inner);
        }

        self.continue_sync(&mut inner);
        self.finish(inner);
    }

    /// The import queue has room again.
    pub fn on_room_available(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SyncState::Waiting {
            info!(last_imported = inner.marks.last_imported, "Import queue has room, resuming sync");
            inner.set_state(SyncState::DownloadingHeaders);
            self.collect_blocks(&mut inner);
            self.continue_sync(&mut inner);
        }
        self.finish(inner);
    }

    /// Drop all progress and pick the best peer again.
    pub fn restart_sync(&self) {
        let mut inner = self.inner.lock();
        info!(state = %inner.state, "Restarting sync");
        self.reset_sync(&mut inner);

        if let Some(best) = inner.peers.best_peer(self.chain.total_difficulty()) {
            self.switch_chain_peer(&mut inner, best);
        }
        self.continue_sync(&mut inner);
        self.finish(inner);
    }

    /// Cancel everything and return to idle. Safe to call at any time.
    pub fn abort_sync(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SyncState::Idle {
            info!(state = %inner.state, "Aborting sync");
        }
        self.stop_round(&mut inner);
        inner.marks = Watermarks::default();
        inner.cursor_origin = None;
        inner.known_new_hashes.clear();
        self.finish(inner);
    }

    /// Release the lock, then hand queued requests to the peer network.
    fn finish(&self, mut inner: MutexGuard<'_, SyncInner>) {
        inner.refresh_download_state();
        if cfg!(debug_assertions) {
            let violations = inner.invariants();
            if !violations.is_empty() {
                error!(?violations, state = %inner.state, "Sync invariants violated");
            }
            debug_assert!(violations.is_empty(), "sync invariants violated: {violations:?}");
        }

        let outbound = std::mem::take(&mut inner.outbound);
        drop(inner);

        for OutboundSyncRequest { peer, request } in outbound {
            debug!(peer = %peer, %request, "Sending sync request");
            self.network.send_request(peer, request);
        }
    }

    fn handle_headers(
        &self,
        inner: &mut SyncInner,
        peer: PeerId,
        headers: Vec<BlockHeader>,
    ) -> Result<(), SyncError> {
        if !inner.peers.contains(&peer) {
            return Err(SyncError::UnknownPeer(peer));
        }
        let Some(&PendingRequest::Headers { start, count }) = inner.requests.get(&peer) else {
            debug!(peer = %peer, count = headers.len(), "Unsolicited headers");
            return Err(SyncError::UnsolicitedHeaders { peer });
        };
        inner.requests.remove(&peer);
        inner.header_downloads.release_peer(&peer);

        let records: Vec<HeaderRecord> = headers.into_iter().map(HeaderRecord::new).collect();

        if inner.state == SyncState::FindingCommonAncestor {
            if inner.selector.is_chain_peer(&peer) && inner.selector.probing() == Some(start) {
                return self.handle_probe(inner, peer, start, records);
            }
            debug!(peer = %peer, start, "Discarding headers received during ancestor search");
            return Ok(());
        }

        if records.is_empty() {
            debug!(peer = %peer, start, "Peer has no headers from requested index");
            inner.peers.lower_head(&peer, start.saturating_sub(1));
            return Ok(());
        }

        for (offset, record) in records.iter().enumerate() {
            let expected = start + offset as u64;
            if offset as u64 >= count || record.number() != expected {
                self.penalize(inner, &peer, "misordered headers");
                return Err(SyncError::MisorderedHeaders {
                    expected,
                    got: record.number(),
                });
            }
        }
        for pair in records.windows(2) {
            if pair[1].header.parent_hash != pair[0].hash {
                self.penalize(inner, &peer, "broken header chain");
                return Err(SyncError::BrokenHeaderChain {
                    number: pair[1].number(),
                });
            }
        }

        let received = records.len();
        if let Some(last) = records.last() {
            inner.peers.note_head(&peer, last.hash, last.number(), None);
            inner.marks.observe(last.number());
        }

        let mut stored = 0;
        for record in records {
            let number = record.number();
            if number <= inner.marks.cursor {
                trace!(number, "Skipping header at or below the cursor");
                continue;
            }
            if inner.cache.insert_header(number, record, peer) {
                stored += 1;
            }
        }
        debug!(peer = %peer, start, received, stored, "Received headers");

        self.collect_blocks(inner);
        Ok(())
    }

    fn handle_probe(
        &self,
        inner: &mut SyncInner,
        peer: PeerId,
        number: u64,
        records: Vec<HeaderRecord>,
    ) -> Result<(), SyncError> {
        let header = match records.as_slice() {
            [header] if header.number() == number => header,
            _ => {
                self.penalize(inner, &peer, "bad ancestor probe answer");
                self.drop_chain_peer(inner);
                return Err(SyncError::InvalidProbe { peer, number });
            }
        };

        match inner.selector.on_probe_header(header, self.chain.as_ref()) {
            ProbeOutcome::Found { number, hash } => {
                self.on_ancestor_found(inner, number, hash);
                Ok(())
            }
            ProbeOutcome::Continue(next) => {
                trace!(peer = %peer, number = next, "Probing further back");
                self.issue_probe(inner, peer, next);
                Ok(())
            }
            ProbeOutcome::Unrelated => {
                inner.peers.disable(&peer, "no common ancestor");
                self.drop_chain_peer(inner);
                Err(SyncError::NoCommonAncestor { peer })
            }
        }
    }

    fn handle_bodies(
        &self,
        inner: &mut SyncInner,
        peer: PeerId,
        bodies: Vec<BlockBody>,
    ) -> Result<(), SyncError> {
        if !inner.peers.contains(&peer) {
            return Err(SyncError::UnknownPeer(peer));
        }
        let requested = match inner.requests.get(&peer) {
            Some(PendingRequest::Bodies { hashes }) => hashes.clone(),
            _ => {
                debug!(peer = %peer, count = bodies.len(), "Unsolicited bodies");
                return Err(SyncError::UnsolicitedBodies { peer });
            }
        };
        inner.requests.remove(&peer);
        let assigned = inner.body_downloads.release_peer(&peer);

        if bodies.is_empty() {
            // Only bodies of headers this peer sent itself are owed.
            let owed = assigned
                .iter()
                .flat_map(|index| inner.cache.headers_at(*index))
                .any(|cached| cached.origin == peer && requested.contains(&cached.hash()));
            if owed {
                self.penalize(inner, &peer, "empty body response");
            } else {
                debug!(peer = %peer, count = requested.len(), "Peer lacks bodies of other peers' headers");
                inner.peers.note_missing_bodies(&peer, requested);
            }
            return Ok(());
        }

        let received = bodies.len();
        let mut stored = 0;
        let mut unknown = 0;
        for body in bodies {
            match inner.cache.insert_body(BodyRecord::new(body)) {
                BodyInsert::Unknown => unknown += 1,
                BodyInsert::AlreadySatisfied(owner) => {
                    trace!(owner, "Body already stored");
                }
                BodyInsert::Stored(indices) => stored += indices.len(),
            }
        }
        debug!(peer = %peer, received, stored, unknown, "Received bodies");

        if unknown == received && assigned.iter().any(|index| inner.cache.has_header(*index)) {
            self.penalize(inner, &peer, "bodies match no header");
            return Err(SyncError::UnknownBodies { count: unknown });
        }

        self.collect_blocks(inner);
        Ok(())
    }

    fn handle_new_block(
        &self,
        inner: &mut SyncInner,
        peer: PeerId,
        block: Block,
        total_difficulty: U256,
    ) -> Result<(), SyncError> {
        if !inner.peers.contains(&peer) {
            return Err(SyncError::UnknownPeer(peer));
        }
        let hash = block.hash();
        let number = block.number();
        inner
            .peers
            .note_head(&peer, hash, number, Some(total_difficulty));
        if inner.selector.is_chain_peer(&peer) {
            inner.selector.update_td(total_difficulty);
        }

        if self.chain.is_known(&hash) {
            trace!(peer = %peer, number, "Announced block already known");
            return Ok(());
        }

        let parent = block.header.parent_hash;
        let extends_head =
            parent == self.chain.head_hash() && number == self.chain.head_number() + 1;
        let fits_round = match inner.state {
            SyncState::Idle => true,
            state if state.is_downloading() => {
                inner.marks.cursor_hash == parent && inner.marks.cursor + 1 == number
            }
            _ => false,
        };

        if extends_head && fits_round && self.queue.has_room() {
            match self.queue.import(&block) {
                result if result.is_accepted() => {
                    info!(peer = %peer, number, hash = %hash, "Imported announced block");
                    inner.marks.advance(number, hash);
                    inner.cursor_origin = Some(peer);
                    inner.cache.remove_through(number);
                    inner.header_downloads.release_through(number);
                    inner.body_downloads.release_through(number);
                    return Ok(());
                }
                ImportResult::QueueFull => {
                    debug!(number, "Import queue full, treating block as sync target");
                }
                result => {
                    warn!(peer = %peer, number, ?result, "Announced block rejected");
                    inner.peers.disable(&peer, "rejected new block");
                    self.clear_peer_download(inner, &peer);
                    if inner.selector.is_chain_peer(&peer) {
                        self.drop_chain_peer(inner);
                    }
                    return Err(SyncError::RejectedNewBlock { number });
                }
            }
        }

        inner.marks.observe(number);
        self.sync_peer(inner, peer, true);
        Ok(())
    }

    /// Returns true if the announcement raised the sync target.
    fn handle_new_hashes(&self, inner: &mut SyncInner, peer: PeerId, hashes: Vec<(B256, u64)>) -> bool {
        if !inner.peers.contains(&peer) {
            debug!(peer = %peer, "New hashes from unknown peer");
            return false;
        }
        if inner.known_new_hashes.len() > self.config.known_hashes_cap {
            debug!(size = inner.known_new_hashes.len(), "Resetting known new hashes");
            inner.known_new_hashes.clear();
        }

        let mut known = 0;
        let mut unknown = 0;
        let mut highest: Option<(B256, u64)> = None;
        for (hash, number) in hashes {
            inner.known_new_hashes.insert(hash);
            if self.chain.is_known(&hash) {
                known += 1;
                continue;
            }
            unknown += 1;
            if highest.map_or(true, |(_, best)| number > best) {
                highest = Some((hash, number));
            }
        }
        debug!(peer = %peer, known, unknown, "New block hashes");

        let Some((hash, number)) = highest else {
            return false;
        };
        inner.peers.note_head(&peer, hash, number, None);
        if number <= inner.marks.highest_seen || inner.is_busy(&peer) {
            return false;
        }
        inner.marks.observe(number);
        self.sync_peer(inner, peer, true);
        true
    }

    /// Make `peer` the chain peer and start looking for the common ancestor.
    fn switch_chain_peer(&self, inner: &mut SyncInner, peer: PeerId) {
        let Some(status) = inner.peers.get_peer(&peer).map(|sync_peer| sync_peer.status) else {
            return;
        };

        if inner.state == SyncState::Idle {
            self.begin_round(inner);
        } else if let Some(previous) = inner.selector.chain_peer() {
            if previous != peer {
                info!(previous = %previous, next = %peer, "Replacing chain peer");
            }
        }

        inner.selector.select(peer, status.total_difficulty);
        inner.marks.observe(status.head_number);
        info!(
            peer = %peer,
            total_difficulty = %status.total_difficulty,
            head = status.head_number,
            "Selected chain peer"
        );
        self.start_ancestor_search(inner);
    }

    /// Search for the chain peer's common ancestor from the cursor down.
    ///
    /// Headers other peers contributed are dropped since they may belong to
    /// another subchain.
    fn start_ancestor_search(&self, inner: &mut SyncInner) {
        let Some(peer) = inner.selector.chain_peer() else {
            return;
        };
        let head = inner
            .peers
            .get_peer(&peer)
            .map(|sync_peer| sync_peer.head_number())
            .unwrap_or_default();

        inner.cache.retain_origin(&peer);
        inner.set_state(SyncState::FindingCommonAncestor);

        let from = inner.marks.cursor.min(head);
        match inner.selector.begin_search(from, self.chain.as_ref()) {
            ProbeOutcome::Found { number, hash } => self.on_ancestor_found(inner, number, hash),
            ProbeOutcome::Continue(number) => {
                if !inner.is_busy(&peer) {
                    self.issue_probe(inner, peer, number);
                }
            }
            ProbeOutcome::Unrelated => {}
        }
    }

    fn issue_probe(&self, inner: &mut SyncInner, peer: PeerId, number: u64) {
        inner.header_downloads.release_index(number);
        inner.header_downloads.assign(peer, [number]);
        inner
            .requests
            .insert(peer, PendingRequest::Headers { start: number, count: 1 });
        inner.send(peer, SyncRequest::BlockHeaders { start: number, count: 1 });
    }

    fn on_ancestor_found(&self, inner: &mut SyncInner, number: u64, hash: B256) {
        info!(number, hash = %hash, "Found common ancestor");
        inner.marks.rebase(number, hash);
        inner.cursor_origin = None;
        inner.cache.remove_through(number);
        inner.set_state(SyncState::DownloadingHeaders);
        self.collect_blocks(inner);
    }

    /// Forget the chain peer and follow the best remaining one, if any.
    fn drop_chain_peer(&self, inner: &mut SyncInner) {
        let Some(previous) = inner.selector.chain_peer() else {
            return;
        };
        info!(peer = %previous, "Dropping chain peer");
        inner.selector.clear();

        match inner.peers.best_peer(self.chain.total_difficulty()) {
            Some(next) => self.switch_chain_peer(inner, next),
            None => {
                info!("No peer offers a heavier chain");
                self.stop_round(inner);
            }
        }
    }

    /// Start a new round from the local head.
    fn begin_round(&self, inner: &mut SyncInner) {
        self.reset_sync(inner);
        info!(head = inner.marks.starting, "Starting sync round");
    }

    fn reset_sync(&self, inner: &mut SyncInner) {
        self.stop_round(inner);
        inner.marks = Watermarks::from_chain(self.chain.as_ref());
        inner.cursor_origin = None;
    }

    /// Clear every per-round table and go idle. Watermarks are kept.
    fn stop_round(&self, inner: &mut SyncInner) {
        self.clear_all_downloads(inner);
        inner.cache.clear();
        inner.selector.clear();
        inner.set_state(SyncState::Idle);
    }

    fn complete_sync(&self, inner: &mut SyncInner) {
        inner.set_state(SyncState::Complete);
        info!(
            starting = inner.marks.starting,
            last_imported = inner.marks.last_imported,
            highest = inner.marks.highest_seen,
            "Sync round complete"
        );
        self.stop_round(inner);
    }

    fn pause_sync(&self, inner: &mut SyncInner) {
        if inner.state.is_downloading() {
            info!(last_imported = inner.marks.last_imported, "Import queue full, pausing sync");
            inner.set_state(SyncState::Waiting);
        }
    }

    /// Give work to every idle peer, then check whether the round is done.
    fn continue_sync(&self, inner: &mut SyncInner) {
        if !inner.state.is_downloading() && inner.state != SyncState::FindingCommonAncestor {
            return;
        }

        let mut order = inner.peers.peer_ids();
        if let Some(chain_peer) = inner.selector.chain_peer() {
            order.retain(|peer| *peer != chain_peer);
            order.insert(0, chain_peer);
        }
        for peer in order {
            self.sync_peer(inner, peer, false);
        }
        self.check_completion(inner);
    }

    fn check_completion(&self, inner: &mut SyncInner) {
        if !inner.state.is_downloading()
            || !inner.requests.is_empty()
            || !inner.header_downloads.is_empty()
            || !inner.body_downloads.is_empty()
        {
            return;
        }
        let next = inner.marks.cursor + 1;
        if inner.marks.cursor >= inner.marks.highest_seen || !inner.peers.any_has_block(next) {
            self.complete_sync(inner);
        }
    }

    /// Decide what, if anything, `peer` should fetch next.
    ///
    /// `force` starts a round with this peer even if its chain is not
    /// heavier than ours.
    fn sync_peer(&self, inner: &mut SyncInner, peer: PeerId, force: bool) {
        if !inner.peers.is_available(&peer) {
            return;
        }

        match inner.state {
            SyncState::Idle => {
                let threshold = inner.selector.threshold(self.chain.total_difficulty());
                let candidate = inner
                    .peers
                    .best_peer(threshold)
                    .or(force.then_some(peer));
                if let Some(candidate) = candidate {
                    self.switch_chain_peer(inner, candidate);
                }
            }
            SyncState::FindingCommonAncestor => {
                if inner.selector.is_chain_peer(&peer) && !inner.is_busy(&peer) {
                    if let Some(number) = inner.selector.probing() {
                        self.issue_probe(inner, peer, number);
                    }
                }
            }
            SyncState::DownloadingHeaders | SyncState::DownloadingBodies => {
                if !inner.is_busy(&peer) {
                    self.request_blocks(inner, peer);
                }
            }
            SyncState::Waiting | SyncState::Complete => {}
        }
    }

    /// Assign the next bodies, or failing that the next headers, to `peer`.
    fn request_blocks(&self, inner: &mut SyncInner, peer: PeerId) {
        if !self.queue.has_room() {
            self.pause_sync(inner);
            return;
        }
        let Some(head) = inner
            .peers
            .get_peer(&peer)
            .map(|sync_peer| sync_peer.head_number())
        else {
            return;
        };

        let chain_peer = inner.selector.chain_peer();
        let mut indices = Vec::new();
        let mut hashes = Vec::new();
        for number in inner.cache.header_indices_above(inner.marks.cursor) {
            if indices.len() >= self.config.max_bodies_per_request || number > head {
                break;
            }
            if inner.body_downloads.is_downloading(number) {
                continue;
            }
            // A body shared with an index already being fetched arrives with it.
            let mut needed = inner.cache.headers_at(number).iter().filter(|cached| {
                let id = cached.content_id();
                inner.cache.needs_body(number, &id)
                    && !inner.peers.lacks_body(&peer, &cached.hash())
                    && !inner
                        .cache
                        .content_indices(&id)
                        .any(|index| inner.body_downloads.is_downloading(index))
            });
            let Some(first) = needed.next() else {
                continue;
            };
            let chosen = if chain_peer == Some(first.origin) {
                first
            } else {
                needed
                    .find(|cached| chain_peer == Some(cached.origin))
                    .unwrap_or(first)
            };
            indices.push(number);
            hashes.push(chosen.hash());
        }

        if !indices.is_empty() {
            let first = indices[0];
            inner.body_downloads.assign(peer, indices);
            inner.requests.insert(
                peer,
                PendingRequest::Bodies {
                    hashes: hashes.clone(),
                },
            );
            debug!(peer = %peer, first, count = hashes.len(), "Requesting bodies");
            inner.send(peer, SyncRequest::BlockBodies { hashes });
            return;
        }

        let window = self
            .config
            .max_headers_per_request
            .min(self.estimated_hashes(inner).max(1));
        let (start, count) = {
            let view: &SyncInner = inner;
            let upper = view.marks.highest_seen.min(head);
            let is_free = |number: u64| {
                !view.header_downloads.is_downloading(number) && !view.cache.has_header(number)
            };
            let Some(start) = (view.marks.cursor + 1..=upper).find(|number| is_free(*number))
            else {
                return;
            };
            let mut count = 0;
            while count < window && start + count <= upper && is_free(start + count) {
                count += 1;
            }
            (start, count)
        };

        inner.header_downloads.assign(peer, start..start + count);
        inner
            .requests
            .insert(peer, PendingRequest::Headers { start, count });
        debug!(peer = %peer, start, count, "Requesting headers");
        inner.send(peer, SyncRequest::BlockHeaders { start, count });
    }

    /// Assemble what is ready and deal with what the import queue refused.
    fn collect_blocks(&self, inner: &mut SyncInner) {
        if !inner.state.is_downloading() {
            return;
        }

        let chain_peer = inner.selector.chain_peer();
        let report = assembler::collect_blocks(
            self.queue.as_ref(),
            &mut inner.cache,
            &mut inner.header_downloads,
            &mut inner.body_downloads,
            &mut inner.marks,
            chain_peer.as_ref(),
        );

        if report.last_origin.is_some() {
            inner.cursor_origin = report.last_origin;
        }
        if report.accepted() > 0 {
            info!(
                imported = report.imported,
                already_known = report.already_known,
                last_imported = inner.marks.last_imported,
                highest = inner.marks.highest_seen,
                "Imported blocks"
            );
        }

        for (number, origin) in &report.rejected {
            debug!(number, origin = %origin, "Discarded rejected block");
            self.penalize(inner, origin, "block rejected by import queue");
        }

        for (number, origins) in &report.broken {
            match chain_peer {
                Some(chain_peer) if origins.contains(&chain_peer) => {
                    let cursor_from_chain_peer = inner
                        .cursor_origin
                        .map_or(true, |origin| origin == chain_peer);
                    if cursor_from_chain_peer {
                        warn!(number, peer = %chain_peer, "Chain peer subchain does not connect");
                        self.penalize(inner, &chain_peer, "subchain does not connect");
                        if inner.selector.is_chain_peer(&chain_peer) {
                            self.drop_chain_peer(inner);
                        }
                    } else {
                        if let Some(origin) = inner.cursor_origin {
                            self.penalize(inner, &origin, "header left the chain peer's subchain");
                        }
                        warn!(number, "Imported headers diverge from the chain peer, searching again");
                        self.start_ancestor_search(inner);
                    }
                }
                _ => {
                    for origin in origins {
                        self.penalize(inner, origin, "header does not link to the cursor");
                    }
                }
            }
        }

        if report.paused {
            self.pause_sync(inner);
        }
    }

    /// Count a failure against `peer`, releasing its work if that disabled it.
    fn penalize(&self, inner: &mut SyncInner, peer: &PeerId, reason: &str) {
        if inner
            .peers
            .penalize(peer, reason, self.config.max_failed_requests)
        {
            self.clear_peer_download(inner, peer);
            if inner.selector.is_chain_peer(peer) {
                self.drop_chain_peer(inner);
            }
        }
    }

    fn clear_peer_download(&self, inner: &mut SyncInner, peer: &PeerId) {
        inner.requests.remove(peer);
        inner.header_downloads.release_peer(peer);
        inner.body_downloads.release_peer(peer);
    }

    fn clear_all_downloads(&self, inner: &mut SyncInner) {
        inner.requests.clear();
        inner.header_downloads.clear();
        inner.body_downloads.clear();
    }

    /// Rough number of blocks still to fetch.
    fn estimated_hashes(&self, inner: &SyncInner) -> u64 {
        let target = inner
            .selector
            .chain_peer()
            .and_then(|peer| inner.peers.get_peer(&peer))
            .map(|sync_peer| sync_peer.head_number().max(inner.marks.highest_seen));

        match target {
            Some(target) => target.saturating_sub(inner.marks.cursor),
            None => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_secs())
                    .unwrap_or_default();
                let behind = now.saturating_sub(self.chain.head_timestamp());
                self.config.chain_reorg_size + behind / self.config.target_block_time_secs.max(1)
            }
        }
    }
}
