mod broadcaster_tests;
mod warp_sync_tests;

use std::collections::HashSet;

use anyhow::{Result, bail};
use containers::{BlockId, Heartbeat, MilestoneIndex};
use libp2p_identity::PeerId;
use parking_lot::Mutex;

use crate::types::{PeerMessage, PeerMessageSink};

// Records every message instead of sending it
#[derive(Default)]
pub(super) struct RecordingSink {
    sent: Mutex<Vec<(PeerId, PeerMessage)>>,
    failing: HashSet<PeerId>,
}

impl RecordingSink {
    pub(super) fn failing_for(peer_id: PeerId) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: HashSet::from([peer_id]),
        }
    }

    pub(super) fn sent(&self) -> Vec<(PeerId, PeerMessage)> {
        self.sent.lock().clone()
    }

    pub(super) fn recipients(&self) -> HashSet<PeerId> {
        self.sent.lock().iter().map(|(peer_id, _)| *peer_id).collect()
    }
}

impl PeerMessageSink for RecordingSink {
    fn send(&self, peer_id: PeerId, message: PeerMessage) -> Result<()> {
        if self.failing.contains(&peer_id) {
            bail!("peer {peer_id} unreachable");
        }
        self.sent.lock().push((peer_id, message));
        Ok(())
    }
}

pub(super) fn heartbeat(solid: u32, pruned: u32, latest: u32) -> Heartbeat {
    Heartbeat::new(
        MilestoneIndex(solid),
        MilestoneIndex(pruned),
        MilestoneIndex(latest),
        0,
        0,
    )
}

pub(super) fn block_id(value: u64) -> BlockId {
    BlockId::from_low_u64_be(value)
}
