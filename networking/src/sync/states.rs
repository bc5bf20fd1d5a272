/// Sync engine state machine.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    /// No sync round is active.
    ///
    /// Either no peer offers a chain heavier than ours, or the last round
    /// completed or was aborted.
    #[default]
    Idle,

    /// A chain peer has been selected and we are walking back from our head
    /// to find the first block both chains share.
    FindingCommonAncestor,

    /// Fetching headers past the common ancestor.
    DownloadingHeaders,

    /// Fetching bodies for downloaded headers. Header requests continue to
    /// be issued alongside.
    DownloadingBodies,

    /// The import queue has no room; no new requests are issued and nothing
    /// is assembled until it signals room again.
    Waiting,

    /// Every block of the round has been imported. Folds back to `Idle`
    /// immediately.
    Complete,
}

impl SyncState {
    /// Check if a transition to the target state is valid.
    ///
    /// `Idle` (abort) and `FindingCommonAncestor` (chain peer change) are
    /// reachable from every state.
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        use SyncState::*;

        match (self, target) {
            (_, Idle) | (_, FindingCommonAncestor) => true,
            (FindingCommonAncestor, DownloadingHeaders) => true,
            (DownloadingHeaders | DownloadingBodies, DownloadingHeaders | DownloadingBodies) => true,
            (DownloadingHeaders | DownloadingBodies, Waiting | Complete) => true,
            (Waiting, DownloadingHeaders | DownloadingBodies) => true,
            _ => false,
        }
    }

    /// Whether block data is being requested.
    pub fn is_downloading(&self) -> bool {
        matches!(self, SyncState::DownloadingHeaders | SyncState::DownloadingBodies)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "Idle",
            SyncState::FindingCommonAncestor => "Finding common ancestor",
            SyncState::DownloadingHeaders => "Downloading headers",
            SyncState::DownloadingBodies => "Downloading bodies",
            SyncState::Waiting => "Waiting",
            SyncState::Complete => "Complete",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
