/// Sync service state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Idle state: no connected peer has announced its sync status yet.
    #[default]
    Idle,

    /// Syncing state: peers are ahead of the local confirmed milestone.
    ///
    /// Warp sync runs in this state when the gap is large enough.
    Syncing,

    /// Synced state: the local confirmed milestone is within the sync
    /// threshold of the newest milestone announced by peers.
    Synced,
}

impl SyncState {
    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        match self {
            SyncState::Idle => matches!(target, SyncState::Syncing | SyncState::Synced),
            SyncState::Syncing => matches!(target, SyncState::Synced | SyncState::Idle),
            SyncState::Synced => matches!(target, SyncState::Syncing | SyncState::Idle),
        }
    }
}
