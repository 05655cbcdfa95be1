use std::sync::Arc;

use containers::{BlockId, BlockMetadata, MilestoneIndex};
use libp2p_identity::PeerId;
use tokio::{
    sync::Notify,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    config::RequestsConfig,
    peer_manager::SharedPeerManager,
    request_queue::{Request, RequestKey, RequestQueue},
};
use crate::{
    ledger::Ledger,
    types::{PeerMessage, PeerMessageSink},
};

/// Signals that the node is too busy to request more data.
pub type BackPressureFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Where a drained request was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Sent to a single peer known to hold the data.
    Definite(PeerId),
    /// Sent to every peer that might hold the data.
    Flooded(usize),
}

/// Collects back-pressure predicates before the requester exists.
///
/// Once built, the set of predicates is fixed.
pub struct RequesterBuilder {
    queue: Arc<RequestQueue>,
    peers: SharedPeerManager,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn PeerMessageSink>,
    config: RequestsConfig,
    back_pressure: Vec<BackPressureFn>,
}

impl RequesterBuilder {
    pub fn new(
        queue: Arc<RequestQueue>,
        peers: SharedPeerManager,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn PeerMessageSink>,
        config: RequestsConfig,
    ) -> Self {
        Self {
            queue,
            peers,
            ledger,
            sink,
            config,
            back_pressure: Vec::new(),
        }
    }

    pub fn with_back_pressure(mut self, back_pressure: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.back_pressure.push(Box::new(back_pressure));
        self
    }

    pub fn add_back_pressure_fn(&mut self, back_pressure: BackPressureFn) {
        self.back_pressure.push(back_pressure);
    }

    pub fn build(self) -> Requester {
        Requester {
            queue: self.queue,
            peers: self.peers,
            ledger: self.ledger,
            sink: self.sink,
            config: self.config,
            back_pressure: self.back_pressure,
            drain_signal: Notify::new(),
        }
    }
}

/// Feeds the request queue and sends its requests to peers.
pub struct Requester {
    queue: Arc<RequestQueue>,
    peers: SharedPeerManager,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn PeerMessageSink>,
    config: RequestsConfig,
    back_pressure: Vec<BackPressureFn>,
    drain_signal: Notify,
}

impl Requester {
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// Enqueues a request unless the ledger already holds the data.
    ///
    /// Blocks that are solid entry points are never requested. Milestone
    /// requests are prioritised by their own index, `milestone_index` only
    /// applies to block requests.
    pub fn request(
        &self,
        key: impl Into<RequestKey>,
        milestone_index: MilestoneIndex,
        prevent_discard: bool,
    ) -> bool {
        let request = match key.into() {
            RequestKey::Block(block_id) => {
                if self.ledger.is_solid_entry_point(&block_id) || self.ledger.contains_block(&block_id) {
                    return false;
                }
                Request::block(block_id, milestone_index)
            }
            RequestKey::Milestone(index) => {
                if self.ledger.contains_milestone(index) {
                    return false;
                }
                Request::milestone(index)
            }
        };

        self.enqueue_and_signal(request.with_prevent_discard(prevent_discard))
    }

    /// Returns how many of the blocks were enqueued.
    pub fn request_multiple(
        &self,
        block_ids: &[BlockId],
        milestone_index: MilestoneIndex,
        prevent_discard: bool,
    ) -> usize {
        block_ids
            .iter()
            .filter(|block_id| self.request(**block_id, milestone_index, prevent_discard))
            .count()
    }

    /// Requests the parents of a block, unless the block is a solid entry
    /// point itself.
    pub fn request_parents(
        &self,
        metadata: &BlockMetadata,
        milestone_index: MilestoneIndex,
        prevent_discard: bool,
    ) -> usize {
        if self.ledger.is_solid_entry_point(&metadata.block_id) {
            return 0;
        }

        self.request_multiple(&metadata.parents, milestone_index, prevent_discard)
    }

    /// Requests the missing parents of a stored milestone. Parents of
    /// milestones are required for solidification and never discarded.
    pub fn request_milestone_parents(&self, index: MilestoneIndex) -> bool {
        let Some(parents) = self.ledger.milestone_parents(index) else {
            return false;
        };

        self.request_multiple(&parents, index, true) > 0
    }

    fn enqueue_and_signal(&self, request: Request) -> bool {
        if !self.queue.enqueue(request) {
            return false;
        }

        // a stored permit already covers the whole queue
        self.drain_signal.notify_one();
        true
    }

    fn is_back_pressured(&self) -> bool {
        self.back_pressure.iter().any(|back_pressure| back_pressure())
    }

    /// One re-enqueue tick.
    ///
    /// Returns `None` if back-pressure skipped the tick, otherwise the number
    /// of queued requests.
    pub fn reenqueue_pending(&self) -> Option<usize> {
        if self.is_back_pressured() {
            trace!("Back-pressure active, skipping pending request re-enqueue");
            return None;
        }

        let queued = self.queue.enqueue_pending(self.config.discard_older_than());
        if queued > 0 {
            self.drain_signal.notify_one();
        }

        Some(queued)
    }

    /// Periodically moves timed-out pending requests back into the queue.
    pub async fn run_pending_request_enqueuer(&self, cancel: CancellationToken) {
        let period = self.config.pending_reenqueue_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Pending request enqueuer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.reenqueue_pending();
                }
            }
        }
    }

    /// Drains the whole queue every time it is signalled.
    pub async fn run_request_queue_drainer(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Request queue drainer stopped");
                    return;
                }
                _ = self.drain_signal.notified() => {
                    while let Some(request) = self.queue.next() {
                        if cancel.is_cancelled() {
                            return;
                        }
                        self.dispatch(&request);
                    }
                }
            }
        }
    }

    /// Sends a request to the first peer that holds its milestone. Without
    /// such a peer, sends it to every peer that might hold it.
    pub fn dispatch(&self, request: &Request) -> Dispatch {
        let message = match request.key {
            RequestKey::Block(block_id) => PeerMessage::BlockRequest(block_id),
            RequestKey::Milestone(index) => PeerMessage::MilestoneRequest(index),
        };

        let (definite, candidates) = {
            let peers = self.peers.read();
            let definite = peers
                .connected_peers()
                .find(|peer| peer.has_data_for_milestone(request.milestone_index))
                .map(|peer| peer.peer_id);

            let candidates: Vec<PeerId> = match definite {
                Some(_) => Vec::new(),
                None => peers
                    .connected_peers()
                    .filter(|peer| peer.could_have_data_for_milestone(request.milestone_index))
                    .map(|peer| peer.peer_id)
                    .collect(),
            };

            (definite, candidates)
        };

        if let Some(peer_id) = definite {
            if let Err(err) = self.sink.send(peer_id, message) {
                debug!(peer = %peer_id, request = %request.key, error = %err, "Failed to send request");
            }
            return Dispatch::Definite(peer_id);
        }

        let mut sent = 0;
        for peer_id in candidates {
            match self.sink.send(peer_id, message.clone()) {
                Ok(()) => sent += 1,
                Err(err) => {
                    debug!(peer = %peer_id, request = %request.key, error = %err, "Failed to send request");
                }
            }
        }

        trace!(
            request = %request.key,
            milestone_index = request.milestone_index.0,
            peers = sent,
            "No peer holds requested data, flooded request"
        );

        Dispatch::Flooded(sent)
    }
}
