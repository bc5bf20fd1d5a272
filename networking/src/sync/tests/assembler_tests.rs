use crate::sync::assembler::collect_blocks;
use crate::sync::{BlockCache, DownloadAssignments, Watermarks};
use chain::{Chain, ChainBuilder, ChainConfig, ChainState, ImportQueue, ImportResult};
use containers::{Block, BodyRecord, HeaderRecord};
use libp2p_identity::PeerId;
use pretty_assertions::assert_eq;

use super::chain_config;

struct Fixture {
    chain: Chain,
    cache: BlockCache,
    headers: DownloadAssignments,
    bodies: DownloadAssignments,
    marks: Watermarks,
}

impl Fixture {
    fn new(config: &ChainConfig) -> Self {
        let chain = Chain::new(ChainBuilder::genesis(config), config);
        let marks = Watermarks::from_chain(&chain);
        Self {
            chain,
            cache: BlockCache::new(),
            headers: DownloadAssignments::new(),
            bodies: DownloadAssignments::new(),
            marks,
        }
    }

    fn store(&mut self, block: &Block, origin: PeerId) {
        self.cache
            .insert_header(block.number(), HeaderRecord::new(block.header.clone()), origin);
        self.cache.insert_body(BodyRecord::new(block.body.clone()));
    }

    fn collect(&mut self, chain_peer: Option<&PeerId>) -> crate::sync::CollectReport {
        collect_blocks(
            &self.chain,
            &mut self.cache,
            &mut self.headers,
            &mut self.bodies,
            &mut self.marks,
            chain_peer,
        )
    }
}

/// Queue refusing everything as invalid.
struct RejectingQueue;

impl ImportQueue for RejectingQueue {
    fn has_room(&self) -> bool {
        true
    }

    fn import(&self, _block: &Block) -> ImportResult {
        ImportResult::Invalid
    }
}

#[test]
fn test_imports_contiguous_run_and_stops_at_gap() {
    let config = chain_config(16);
    let blocks = ChainBuilder::new(&config).extend(5).into_blocks();
    let mut fixture = Fixture::new(&config);
    let peer = PeerId::random();
    for number in [1, 2, 4] {
        fixture.store(&blocks[number], peer);
    }
    fixture.headers.assign(peer, [1]);

    let report = fixture.collect(None);

    assert_eq!(report.imported, 2);
    assert_eq!(report.last_origin, Some(peer));
    assert!(!report.paused);
    assert_eq!(fixture.marks.cursor, 2);
    assert_eq!(fixture.marks.last_imported, 2);
    assert_eq!(fixture.chain.head_hash(), blocks[2].hash());
    assert!(!fixture.cache.has_header(1));
    assert!(!fixture.cache.has_header(2));
    assert!(fixture.cache.has_header(4));
    assert!(fixture.headers.is_empty());
}

#[test]
fn test_waits_for_missing_body() {
    let config = chain_config(16);
    let blocks = ChainBuilder::new(&config).extend(2).into_blocks();
    let mut fixture = Fixture::new(&config);
    fixture.cache.insert_header(
        1,
        HeaderRecord::new(blocks[1].header.clone()),
        PeerId::random(),
    );

    let report = fixture.collect(None);

    assert_eq!(report.accepted(), 0);
    assert!(fixture.cache.has_header(1));
    assert_eq!(fixture.marks.cursor, 0);
}

#[test]
fn test_prefers_chain_peer_candidate() {
    let config = chain_config(16);
    let main = ChainBuilder::new(&config).extend(1);
    let fork = main.fork(0, 9).extend(1);
    let mut fixture = Fixture::new(&config);
    let other = PeerId::random();
    let chain_peer = PeerId::random();

    fixture.store(&main.blocks()[1], other);
    fixture.store(&fork.blocks()[1], chain_peer);

    let report = fixture.collect(Some(&chain_peer));

    assert_eq!(report.imported, 1);
    assert_eq!(fixture.chain.head_hash(), fork.blocks()[1].hash());
    assert_eq!(fixture.marks.cursor_hash, fork.blocks()[1].hash());
    assert!(!fixture.cache.has_header(1));
}

#[test]
fn test_pauses_when_queue_is_full() {
    let config = chain_config(1);
    let blocks = ChainBuilder::new(&config).extend(3).into_blocks();
    let mut fixture = Fixture::new(&config);
    let peer = PeerId::random();
    for block in &blocks[1..] {
        fixture.store(block, peer);
    }

    let report = fixture.collect(None);

    assert!(report.paused);
    assert_eq!(report.imported, 1);
    assert_eq!(fixture.marks.last_imported, 1);
    assert!(fixture.cache.has_header(2));

    fixture.chain.drain(1);
    let report = fixture.collect(None);
    assert_eq!(report.imported, 1);
    assert!(report.paused);
    assert_eq!(fixture.marks.last_imported, 2);
}

#[test]
fn test_unlinked_header_is_purged() {
    let config = chain_config(16);
    let foreign_config = ChainConfig {
        genesis_difficulty: config.genesis_difficulty + 1,
        ..config.clone()
    };
    let foreign = ChainBuilder::new(&foreign_config).extend(2).into_blocks();
    let mut fixture = Fixture::new(&config);
    let peer = PeerId::random();
    fixture.store(&foreign[1], peer);
    fixture.store(&foreign[2], peer);
    fixture.bodies.assign(peer, [1]);

    let report = fixture.collect(None);

    assert_eq!(report.broken, vec![(1, vec![peer])]);
    assert!(!fixture.cache.has_header(1));
    assert!(fixture.cache.has_header(2));
    assert!(fixture.bodies.is_empty());
    assert_eq!(fixture.marks.cursor, 0);
}

#[test]
fn test_rejected_block_is_discarded_without_advancing() {
    let config = chain_config(16);
    let blocks = ChainBuilder::new(&config).extend(3).into_blocks();
    let mut fixture = Fixture::new(&config);
    let peer = PeerId::random();
    for block in &blocks[1..] {
        fixture.store(block, peer);
    }

    let report = collect_blocks(
        &RejectingQueue,
        &mut fixture.cache,
        &mut fixture.headers,
        &mut fixture.bodies,
        &mut fixture.marks,
        None,
    );

    assert_eq!(report.rejected, vec![(1, peer)]);
    assert_eq!(report.accepted(), 0);
    assert!(!fixture.cache.has_header(1));
    assert!(fixture.cache.has_header(2));
    assert!(fixture.cache.has_header(3));
    assert_eq!(fixture.marks.last_imported, 0);
}

#[test]
fn test_watermarks_never_move_back() {
    let mut marks = Watermarks::default();
    marks.observe(10);
    marks.advance(4, Default::default());
    marks.rebase(2, Default::default());

    assert_eq!(marks.cursor, 2);
    assert_eq!(marks.last_imported, 4);
    assert!(marks.is_ordered());

    marks.advance(3, Default::default());
    assert_eq!(marks.last_imported, 4);
    marks.observe(5);
    assert_eq!(marks.highest_seen, 10);
}
