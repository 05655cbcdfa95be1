use std::{fmt::Display, sync::Arc};

use anyhow::{Result, anyhow};
use containers::{BlockId, Heartbeat, MilestoneIndex};
use libp2p_identity::PeerId;
use serde::Serialize;
use tokio::sync::mpsc;

/// Peer connection state machine.
///
/// Tracks the lifecycle of a connection to a peer:
/// DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
///
/// Only CONNECTED peers have an active gossip session and take part in
/// request dispatch and broadcasts.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No active connection to this peer.
    Disconnected,
    /// Transport connection in progress.
    Connecting,
    /// Session established, can exchange protocol messages.
    Connected,
    /// Graceful shutdown in progress.
    Disconnecting,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerCount {
    pub disconnected: u64,
    pub connecting: u64,
    pub connected: u64,
    pub disconnecting: u64,
}

impl PeerCount {
    pub fn new<'a>(states: impl IntoIterator<Item = &'a ConnectionState>) -> Self {
        let mut count = PeerCount::default();
        for state in states {
            match state {
                ConnectionState::Connected => count.connected += 1,
                ConnectionState::Connecting => count.connecting += 1,
                ConnectionState::Disconnected => count.disconnected += 1,
                ConnectionState::Disconnecting => count.disconnecting += 1,
            }
        }
        count
    }
}

/// A message this node wants delivered to a single peer.
///
/// Framing and serialization are up to the transport that drains the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    BlockRequest(BlockId),
    MilestoneRequest(MilestoneIndex),
    Heartbeat(Heartbeat),
    Gossip(Arc<[u8]>),
}

impl Display for PeerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerMessage::BlockRequest(block_id) => write!(f, "BlockRequest({block_id})"),
            PeerMessage::MilestoneRequest(index) => write!(f, "MilestoneRequest({index})"),
            PeerMessage::Heartbeat(heartbeat) => write!(
                f,
                "Heartbeat(solid={}, pruned={}, latest={})",
                heartbeat.solid_milestone_index,
                heartbeat.pruned_milestone_index,
                heartbeat.latest_milestone_index
            ),
            PeerMessage::Gossip(payload) => write!(f, "Gossip(len={})", payload.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPeerMessage {
    pub peer_id: PeerId,
    pub message: PeerMessage,
}

/// The send half of the peer transport.
///
/// Implementations must not block: dispatch and broadcast loops call this
/// while iterating over all peers.
pub trait PeerMessageSink: Send + Sync {
    fn send(&self, peer_id: PeerId, message: PeerMessage) -> Result<()>;
}

impl PeerMessageSink for mpsc::UnboundedSender<OutboundPeerMessage> {
    fn send(&self, peer_id: PeerId, message: PeerMessage) -> Result<()> {
        mpsc::UnboundedSender::send(self, OutboundPeerMessage { peer_id, message })
            .map_err(|err| anyhow!("failed to send message to peer {peer_id}: {err}"))
    }
}
