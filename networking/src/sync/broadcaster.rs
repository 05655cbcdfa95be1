use std::{collections::HashSet, sync::Arc};

use containers::Heartbeat;
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::peer_manager::{SharedPeerManager, SyncPeer};
use crate::{
    ledger::Ledger,
    types::{PeerMessage, PeerMessageSink},
};

/// Payload to forward to all connected peers except `exclude_peers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub payload: Arc<[u8]>,
    /// Usually the peers the payload came from.
    pub exclude_peers: HashSet<PeerId>,
}

impl Broadcast {
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            payload: payload.into(),
            exclude_peers: HashSet::new(),
        }
    }

    pub fn excluding(mut self, peer_id: PeerId) -> Self {
        self.exclude_peers.insert(peer_id);
        self
    }
}

/// Fan-out of gossip payloads and heartbeats.
///
/// `broadcast` waits while the queue is full, producers are slowed down
/// instead of losing payloads.
pub struct Broadcaster {
    peers: SharedPeerManager,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn PeerMessageSink>,
    sender: mpsc::Sender<Broadcast>,
    receiver: Mutex<Option<mpsc::Receiver<Broadcast>>>,
}

impl Broadcaster {
    pub fn new(
        peers: SharedPeerManager,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn PeerMessageSink>,
        queue_size: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        Self {
            peers,
            ledger,
            sink,
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Enqueues a broadcast, waiting for space if the queue is full.
    pub async fn broadcast(&self, broadcast: Broadcast) {
        if self.sender.send(broadcast).await.is_err() {
            debug!("Broadcast queue closed, dropping broadcast");
        }
    }

    /// Forwards queued broadcasts until cancelled.
    ///
    /// Only one drainer can run per broadcaster.
    pub async fn run_broadcast_queue_drainer(&self, cancel: CancellationToken) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            warn!("Broadcast queue drainer already running");
            return;
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Broadcast queue drainer stopped");
                    break;
                }
                broadcast = receiver.recv() => {
                    let Some(broadcast) = broadcast else {
                        break;
                    };
                    self.deliver(&broadcast);
                }
            }
        }

        // allow a later restart
        *self.receiver.lock() = Some(receiver);
    }

    /// Sends the payload to every connected peer not excluded. Returns the
    /// number of successful sends.
    pub fn deliver(&self, broadcast: &Broadcast) -> usize {
        let targets: Vec<PeerId> = self
            .peers
            .read()
            .connected_peers()
            .filter(|peer| !broadcast.exclude_peers.contains(&peer.peer_id))
            .map(|peer| peer.peer_id)
            .collect();

        let mut sent = 0;
        for peer_id in targets {
            match self
                .sink
                .send(peer_id, PeerMessage::Gossip(broadcast.payload.clone()))
            {
                Ok(()) => sent += 1,
                Err(err) => debug!(peer = %peer_id, error = %err, "Failed to forward broadcast"),
            }
        }
        sent
    }

    /// Sends the local sync status to every connected peer passing `filter`.
    ///
    /// Returns the number of peers the heartbeat was sent to.
    pub fn broadcast_heartbeat(&self, filter: Option<&dyn Fn(&SyncPeer) -> bool>) -> usize {
        let status = self.ledger.sync_status();

        let mut peers = self.peers.write();
        let connected = peers.connected_count();
        let synced = peers.synced_count(status.latest_milestone_index);

        let heartbeat = Heartbeat::new(
            status.confirmed_milestone_index,
            status.pruned_milestone_index,
            status.latest_milestone_index,
            u8::try_from(connected).unwrap_or(u8::MAX),
            u8::try_from(synced).unwrap_or(u8::MAX),
        );

        let now = Instant::now();
        let mut sent = 0;
        for peer in peers.connected_peers_mut() {
            if filter.is_some_and(|filter| !filter(&*peer)) {
                continue;
            }

            match self
                .sink
                .send(peer.peer_id, PeerMessage::Heartbeat(heartbeat.clone()))
            {
                Ok(()) => {
                    peer.heartbeat_sent_at = Some(now);
                    sent += 1;
                }
                Err(err) => {
                    debug!(peer = %peer.peer_id, error = %err, "Failed to send heartbeat");
                }
            }
        }
        sent
    }
}
