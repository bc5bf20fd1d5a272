mod assembler_tests;
mod assignments_tests;
mod peer_manager_tests;

use std::collections::HashMap;
use std::sync::Arc;

use chain::{Chain, ChainBuilder, ChainConfig};
use containers::{Block, BlockBody, BlockHeader};
use libp2p_identity::PeerId;
use parking_lot::Mutex;

use crate::sync::{SyncConfig, SyncService};
use crate::types::{OutboundSyncRequest, PeerNetwork, PeerStatus, SyncRequest};

/// Peer network that only records what it was asked to send.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingNetwork {
    sent: Arc<Mutex<Vec<OutboundSyncRequest>>>,
}

impl RecordingNetwork {
    pub(crate) fn take(&self) -> Vec<OutboundSyncRequest> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub(crate) fn pending(&self) -> usize {
        self.sent.lock().len()
    }
}

impl PeerNetwork for RecordingNetwork {
    fn send_request(&self, peer: PeerId, request: SyncRequest) {
        self.sent.lock().push(OutboundSyncRequest { peer, request });
    }
}

pub(crate) type TestService = SyncService<Chain, Chain, RecordingNetwork>;

pub(crate) fn chain_config(capacity: usize) -> ChainConfig {
    ChainConfig::default().with_queue_capacity(capacity)
}

/// Service syncing into a fresh chain holding only genesis.
pub(crate) fn fresh_service(capacity: usize) -> (TestService, Arc<Chain>, RecordingNetwork) {
    let config = chain_config(capacity);
    let chain = Arc::new(Chain::new(ChainBuilder::genesis(&config), &config));
    service_on(chain, SyncConfig::default())
}

pub(crate) fn service_on(
    chain: Arc<Chain>,
    config: SyncConfig,
) -> (TestService, Arc<Chain>, RecordingNetwork) {
    let network = RecordingNetwork::default();
    let service = SyncService::new(config, chain.clone(), chain.clone(), network.clone());
    (service, chain, network)
}

pub(crate) fn status_of(builder: &ChainBuilder) -> PeerStatus {
    PeerStatus::new(
        builder.total_difficulty(),
        builder.head().hash(),
        builder.head().number(),
    )
}

pub(crate) fn sorted_peers(count: usize) -> Vec<PeerId> {
    let mut peers: Vec<PeerId> = (0..count).map(|_| PeerId::random()).collect();
    peers.sort();
    peers
}

pub(crate) enum Reply {
    Headers(Vec<BlockHeader>),
    Bodies(Vec<BlockBody>),
}

/// Answer a request the way an honest peer holding `blocks` would.
pub(crate) fn serve(blocks: &[Block], request: &SyncRequest) -> Reply {
    match request {
        SyncRequest::BlockHeaders { start, count } => Reply::Headers(
            blocks
                .iter()
                .skip(*start as usize)
                .take(*count as usize)
                .map(|block| block.header.clone())
                .collect(),
        ),
        SyncRequest::BlockBodies { hashes } => {
            let by_hash: HashMap<_, _> = blocks.iter().map(|block| (block.hash(), block)).collect();
            Reply::Bodies(
                hashes
                    .iter()
                    .filter_map(|hash| by_hash.get(hash).map(|block| block.body.clone()))
                    .collect(),
            )
        }
    }
}

/// Deliver a reply for every recorded request until the engine goes quiet.
pub(crate) fn pump(
    service: &TestService,
    network: &RecordingNetwork,
    chains: &HashMap<PeerId, Vec<Block>>,
) -> Vec<OutboundSyncRequest> {
    let mut handled = Vec::new();
    for _ in 0..1_000 {
        let outbound = network.take();
        if outbound.is_empty() {
            break;
        }
        for request in outbound {
            if let Some(blocks) = chains.get(&request.peer) {
                deliver(service, request.peer, serve(blocks, &request.request));
            }
            handled.push(request);
        }
    }
    handled
}

pub(crate) fn deliver(service: &TestService, peer: PeerId, reply: Reply) {
    let _ = match reply {
        Reply::Headers(headers) => service.on_peer_block_headers(peer, headers),
        Reply::Bodies(bodies) => service.on_peer_block_bodies(peer, bodies),
    };
}
