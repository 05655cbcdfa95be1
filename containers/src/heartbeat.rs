use crate::MilestoneIndex;
use serde::{Deserialize, Serialize};

/// Sync progress a node announces to its peers.
///
/// Peers use the pruned/solid/latest indices to decide whether this node can
/// serve data for a given milestone.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Newest milestone whose full cone the node holds.
    pub solid_milestone_index: MilestoneIndex,
    /// Oldest milestone boundary still retained.
    pub pruned_milestone_index: MilestoneIndex,
    /// Newest milestone the node has heard about.
    pub latest_milestone_index: MilestoneIndex,
    pub connected_peers: u8,
    pub synced_peers: u8,
}

impl Heartbeat {
    pub fn new(
        solid_milestone_index: MilestoneIndex,
        pruned_milestone_index: MilestoneIndex,
        latest_milestone_index: MilestoneIndex,
        connected_peers: u8,
        synced_peers: u8,
    ) -> Self {
        Self {
            solid_milestone_index,
            pruned_milestone_index,
            latest_milestone_index,
            connected_peers,
            synced_peers,
        }
    }
}

/// Local sync progress as reported by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub confirmed_milestone_index: MilestoneIndex,
    pub pruned_milestone_index: MilestoneIndex,
    pub latest_milestone_index: MilestoneIndex,
}

impl SyncStatus {
    pub fn new(
        confirmed_milestone_index: MilestoneIndex,
        pruned_milestone_index: MilestoneIndex,
        latest_milestone_index: MilestoneIndex,
    ) -> Self {
        Self {
            confirmed_milestone_index,
            pruned_milestone_index,
            latest_milestone_index,
        }
    }
}
