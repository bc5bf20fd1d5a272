/// Chain peer selection and common-ancestor search.
///
/// The chain peer is the peer with the highest total difficulty we know of.
/// Its chain is the one being downloaded, so before fetching anything we walk
/// back from our own head, one header at a time, until we reach a block both
/// chains share.
use alloy_primitives::{B256, U256};
use chain::ChainState;
use containers::HeaderRecord;
use libp2p_identity::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AncestorSearch {
    /// Waiting for the chain peer's header at `number`.
    Probing { number: u64 },
    /// The chain peer's block at `number` is part of our chain.
    Found { number: u64, hash: B256 },
}

/// What to do after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found { number: u64, hash: B256 },
    /// Ask for the header at this number next.
    Continue(u64),
    /// Even genesis differs; the peer is on another network.
    Unrelated,
}

#[derive(Debug, Default, Clone)]
pub struct ChainPeerSelector {
    chain_peer: Option<PeerId>,
    total_difficulty: U256,
    search: Option<AncestorSearch>,
}

impl ChainPeerSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain_peer(&self) -> Option<PeerId> {
        self.chain_peer
    }

    pub fn is_chain_peer(&self, peer: &PeerId) -> bool {
        self.chain_peer.as_ref() == Some(peer)
    }

    /// Total difficulty a peer must exceed to become chain peer.
    pub fn threshold(&self, local_td: U256) -> U256 {
        match self.chain_peer {
            Some(_) => local_td.max(self.total_difficulty),
            None => local_td,
        }
    }

    pub fn select(&mut self, peer: PeerId, total_difficulty: U256) {
        self.chain_peer = Some(peer);
        self.total_difficulty = total_difficulty;
        self.search = None;
    }

    /// Record a higher total difficulty announced by the chain peer.
    pub fn update_td(&mut self, total_difficulty: U256) {
        self.total_difficulty = self.total_difficulty.max(total_difficulty);
    }

    pub fn clear(&mut self) {
        self.chain_peer = None;
        self.total_difficulty = U256::ZERO;
        self.search = None;
    }

    pub fn search(&self) -> Option<AncestorSearch> {
        self.search
    }

    /// Number of the outstanding probe, if the search is running.
    pub fn probing(&self) -> Option<u64> {
        match self.search {
            Some(AncestorSearch::Probing { number }) => Some(number),
            _ => None,
        }
    }

    /// Start walking back from `from`. Genesis is shared by definition.
    pub fn begin_search<C: ChainState + ?Sized>(&mut self, from: u64, chain: &C) -> ProbeOutcome {
        if from == 0 {
            if let Some(hash) = chain.block_hash(0) {
                return self.found(0, hash);
            }
        }
        self.search = Some(AncestorSearch::Probing { number: from });
        ProbeOutcome::Continue(from)
    }

    /// Feed the chain peer's answer to the outstanding probe.
    pub fn on_probe_header<C: ChainState + ?Sized>(
        &mut self,
        header: &HeaderRecord,
        chain: &C,
    ) -> ProbeOutcome {
        let number = header.number();
        if chain.block_hash(number) == Some(header.hash) {
            return self.found(number, header.hash);
        }
        if number == 0 {
            self.search = None;
            return ProbeOutcome::Unrelated;
        }
        self.search = Some(AncestorSearch::Probing { number: number - 1 });
        ProbeOutcome::Continue(number - 1)
    }

    fn found(&mut self, number: u64, hash: B256) -> ProbeOutcome {
        self.search = Some(AncestorSearch::Found { number, hash });
        ProbeOutcome::Found { number, hash }
    }
}
