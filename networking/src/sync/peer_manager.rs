use super::config::SYNC_THRESHOLD;
use crate::types::{ConnectionState, PeerCount};
use containers::{Heartbeat, MilestoneIndex};
use libp2p_identity::PeerId;
use parking_lot::RwLock;
/// Peer manager for sync operations.
///
/// Tracks the last heartbeat of every peer and answers the data availability
/// questions request dispatch is based on.
use std::{collections::HashMap, sync::Arc};
use tokio::time::Instant;

/// Peer manager shared between the requester, the broadcaster and the
/// transport layer feeding heartbeats.
pub type SharedPeerManager = Arc<RwLock<PeerManager>>;

/// Sync-specific peer state.
///
/// Wraps peer information with the last received heartbeat and when heartbeats
/// were last exchanged.
#[derive(Debug, Clone)]
pub struct SyncPeer {
    pub peer_id: PeerId,
    pub connection_state: ConnectionState,
    pub heartbeat: Option<Heartbeat>,
    pub heartbeat_received_at: Option<Instant>,
    pub heartbeat_sent_at: Option<Instant>,
}

impl SyncPeer {
    pub fn new(peer_id: PeerId, connection_state: ConnectionState) -> Self {
        Self {
            peer_id,
            connection_state,
            heartbeat: None,
            heartbeat_received_at: None,
            heartbeat_sent_at: None,
        }
    }

    /// Check if peer is connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Check if peer holds the full data of the given milestone.
    ///
    /// True when `pruned < index <= solid` according to the last heartbeat.
    pub fn has_data_for_milestone(&self, index: MilestoneIndex) -> bool {
        match &self.heartbeat {
            Some(heartbeat) => {
                heartbeat.pruned_milestone_index < index
                    && index <= heartbeat.solid_milestone_index
            }
            None => false,
        }
    }

    /// Check if peer might hold data of the given milestone.
    ///
    /// True when `pruned < index <= latest` according to the last heartbeat.
    pub fn could_have_data_for_milestone(&self, index: MilestoneIndex) -> bool {
        match &self.heartbeat {
            Some(heartbeat) => {
                heartbeat.pruned_milestone_index < index
                    && index <= heartbeat.latest_milestone_index
            }
            None => false,
        }
    }

    /// Check if the peer is synchronized.
    ///
    /// The newest known milestone is the maximum of the peer's latest index and
    /// the local latest index. A peer without heartbeat is never synced.
    pub fn is_synced(&self, latest_milestone_index: MilestoneIndex) -> bool {
        let Some(heartbeat) = &self.heartbeat else {
            return false;
        };

        let latest = heartbeat
            .latest_milestone_index
            .max(latest_milestone_index);

        heartbeat.solid_milestone_index.0 >= latest.0.saturating_sub(SYNC_THRESHOLD)
    }
}

/// Peer manager for sync operations.
#[derive(Debug, Default, Clone)]
pub struct PeerManager {
    peers: HashMap<PeerId, SyncPeer>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPeerManager {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Add a peer to the manager.
    pub fn add_peer(
        &mut self,
        peer_id: PeerId,
        connection_state: ConnectionState,
    ) -> &mut SyncPeer {
        self.peers
            .entry(peer_id)
            .or_insert_with(|| SyncPeer::new(peer_id, connection_state))
    }

    /// Remove a peer from the manager.
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<SyncPeer> {
        self.peers.remove(peer_id)
    }

    /// Get a peer by ID.
    pub fn get_peer(&self, peer_id: &PeerId) -> Option<&SyncPeer> {
        self.peers.get(peer_id)
    }

    /// Get a mutable peer by ID.
    pub fn get_peer_mut(&mut self, peer_id: &PeerId) -> Option<&mut SyncPeer> {
        self.peers.get_mut(peer_id)
    }

    /// Update peer connection state.
    pub fn update_connection_state(&mut self, peer_id: &PeerId, state: ConnectionState) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.connection_state = state;
        }
    }

    /// Store the latest heartbeat of a peer.
    ///
    /// Returns false if the peer is unknown.
    pub fn update_heartbeat(&mut self, peer_id: &PeerId, heartbeat: Heartbeat) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.heartbeat = Some(heartbeat);
                peer.heartbeat_received_at = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    /// Connected peers, in unspecified order.
    pub fn connected_peers(&self) -> impl Iterator<Item = &SyncPeer> {
        self.peers.values().filter(|peer| peer.is_connected())
    }

    pub fn connected_peers_mut(&mut self) -> impl Iterator<Item = &mut SyncPeer> {
        self.peers.values_mut().filter(|peer| peer.is_connected())
    }

    pub fn connected_count(&self) -> usize {
        self.connected_peers().count()
    }

    /// Number of connected peers that are synced relative to the local
    /// latest milestone.
    pub fn synced_count(&self, latest_milestone_index: MilestoneIndex) -> usize {
        self.connected_peers()
            .filter(|peer| peer.is_synced(latest_milestone_index))
            .count()
    }

    pub fn peer_count(&self) -> PeerCount {
        PeerCount::new(self.peers.values().map(|peer| &peer.connection_state))
    }

    /// Get all tracked peers.
    pub fn get_all_peers(&self) -> impl Iterator<Item = &SyncPeer> {
        self.peers.values()
    }
}
