/// Block assembly.
///
/// Walks forward from the import cursor, joins each header with its body and
/// hands the block to the import queue. Stops at the first index that is not
/// ready.
use alloy_primitives::B256;
use chain::{ChainState, ImportQueue, ImportResult};
use libp2p_identity::PeerId;
use tracing::{debug, warn};

use super::assignments::DownloadAssignments;
use super::block_cache::{BlockCache, CachedHeader};

/// Progress of the current round.
///
/// `cursor` is the last index of the subchain being assembled. It can sit
/// below `last_imported` after the ancestor search settles on an older
/// block, but `last_imported` itself never moves down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermarks {
    pub starting: u64,
    pub highest_seen: u64,
    pub last_imported: u64,
    pub cursor: u64,
    pub cursor_hash: B256,
}

impl Watermarks {
    pub fn from_chain<C: ChainState + ?Sized>(chain: &C) -> Self {
        let head = chain.head_number();
        Self {
            starting: head,
            highest_seen: head,
            last_imported: head,
            cursor: head,
            cursor_hash: chain.head_hash(),
        }
    }

    /// Record an accepted block.
    pub fn advance(&mut self, number: u64, hash: B256) {
        self.cursor = number;
        self.cursor_hash = hash;
        self.last_imported = self.last_imported.max(number);
        self.highest_seen = self.highest_seen.max(self.last_imported);
    }

    pub fn observe(&mut self, number: u64) {
        self.highest_seen = self.highest_seen.max(number);
    }

    /// Move the cursor to the common ancestor.
    pub fn rebase(&mut self, number: u64, hash: B256) {
        self.cursor = number;
        self.cursor_hash = hash;
    }

    pub fn is_ordered(&self) -> bool {
        self.cursor <= self.last_imported && self.last_imported <= self.highest_seen
    }
}

/// Result of one assembly pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub imported: usize,
    pub already_known: usize,
    /// Index and origin of the header the import queue refused.
    pub rejected: Vec<(u64, PeerId)>,
    /// Index whose headers do not link to the cursor, with their origins.
    pub broken: Vec<(u64, Vec<PeerId>)>,
    /// Origin of the header most recently accepted.
    pub last_origin: Option<PeerId>,
    /// The queue ran out of room.
    pub paused: bool,
}

impl CollectReport {
    pub fn accepted(&self) -> usize {
        self.imported + self.already_known
    }
}

/// Header at an index that continues the cursor. The chain peer's candidate
/// wins when several do.
fn pick_candidate<'a>(
    candidates: &'a [CachedHeader],
    parent: B256,
    chain_peer: Option<&PeerId>,
) -> Option<&'a CachedHeader> {
    let mut linked = candidates
        .iter()
        .filter(|cached| cached.record.header.parent_hash == parent);
    let first = linked.next()?;
    if chain_peer == Some(&first.origin) {
        return Some(first);
    }
    Some(
        linked
            .find(|cached| chain_peer == Some(&cached.origin))
            .unwrap_or(first),
    )
}

pub fn collect_blocks<Q: ImportQueue + ?Sized>(
    queue: &Q,
    cache: &mut BlockCache,
    header_downloads: &mut DownloadAssignments,
    body_downloads: &mut DownloadAssignments,
    marks: &mut Watermarks,
    chain_peer: Option<&PeerId>,
) -> CollectReport {
    let mut report = CollectReport::default();

    loop {
        let number = marks.cursor + 1;
        let candidates = cache.headers_at(number);
        if candidates.is_empty() {
            break;
        }

        let Some(header) = pick_candidate(candidates, marks.cursor_hash, chain_peer).cloned()
        else {
            let mut origins: Vec<PeerId> = candidates.iter().map(|cached| cached.origin).collect();
            origins.sort();
            origins.dedup();
            warn!(number, parent = %marks.cursor_hash, "No cached header links to the cursor");
            cache.remove_index(number);
            header_downloads.release_index(number);
            body_downloads.release_index(number);
            report.broken.push((number, origins));
            break;
        };

        let Some(block) = cache
            .body_for(number, &header.content_id())
            .and_then(|body| body.assemble(&header.record))
        else {
            break;
        };

        if !queue.has_room() {
            report.paused = true;
            break;
        }

        match queue.import(&block) {
            result if result.is_accepted() => {
                if result == ImportResult::Imported {
                    report.imported += 1;
                } else {
                    report.already_known += 1;
                }
                marks.advance(number, header.hash());
                report.last_origin = Some(header.origin);
                cache.remove_index(number);
                header_downloads.release_index(number);
                body_downloads.release_index(number);
            }
            ImportResult::QueueFull => {
                report.paused = true;
                break;
            }
            result => {
                warn!(number, hash = %header.hash(), ?result, "Import queue rejected block");
                cache.remove_candidate(number, &header.hash());
                header_downloads.release_index(number);
                body_downloads.release_index(number);
                report.rejected.push((number, header.origin));
                break;
            }
        }
    }

    if report.accepted() > 0 || !report.rejected.is_empty() {
        debug!(
            imported = report.imported,
            already_known = report.already_known,
            rejected = report.rejected.len(),
            cursor = marks.cursor,
            "Collected blocks"
        );
    }
    report
}
