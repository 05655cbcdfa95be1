use containers::{Heartbeat, MilestoneIndex, SyncStatus};
use libp2p_identity::PeerId;
use parking_lot::Mutex;
/// Sync service wiring all synchronization components together.
///
/// The SyncService is the main entry point for synchronization. It owns:
/// - RequestQueue and Requester: fetching missing milestones and blocks
/// - WarpSync and MilestoneRangeRequester: bulk synchronization in windows
/// - Broadcaster: gossip fan-out and heartbeats
/// - PeerManager: tracking peer heartbeats
/// - State machine: managing IDLE -> SYNCING -> SYNCED transitions
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    broadcaster::{Broadcast, Broadcaster},
    config::{SYNC_THRESHOLD, SyncConfig},
    milestone_requester::MilestoneRangeRequester,
    peer_manager::{PeerManager, SharedPeerManager, SyncPeer},
    request_queue::{Request, RequestQueue},
    requester::{BackPressureFn, Requester, RequesterBuilder},
    states::SyncState,
    warp_sync::{WarpSync, WarpSyncEvent, WarpSyncSnapshot},
};
use crate::{
    error::SyncError,
    ledger::Ledger,
    types::{ConnectionState, PeerMessageSink},
};

/// Sync service coordinating all sync operations.
///
/// Cheap to clone, all clones share the same components.
#[derive(Clone)]
pub struct SyncService {
    config: Arc<SyncConfig>,
    ledger: Arc<dyn Ledger>,
    peers: SharedPeerManager,
    queue: Arc<RequestQueue>,
    requester: Arc<Requester>,
    warp_sync: Arc<WarpSync>,
    milestone_requester: Arc<MilestoneRangeRequester>,
    broadcaster: Arc<Broadcaster>,
    warp_sync_events: Arc<Mutex<Option<mpsc::UnboundedReceiver<WarpSyncEvent>>>>,
    // last sync status sent to all peers
    announced_status: Arc<Mutex<Option<SyncStatus>>>,
    state: Arc<Mutex<SyncState>>,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn PeerMessageSink>,
        back_pressure: Vec<BackPressureFn>,
    ) -> Self {
        let peers = PeerManager::shared();
        let queue = Arc::new(RequestQueue::with_latency_resolution(
            config.requests.latency_resolution,
        ));

        let mut builder = RequesterBuilder::new(
            queue.clone(),
            peers.clone(),
            ledger.clone(),
            sink.clone(),
            config.requests.clone(),
        );
        for back_pressure in back_pressure {
            builder.add_back_pressure_fn(back_pressure);
        }
        let requester = Arc::new(builder.build());

        let (warp_sync, warp_sync_events) = WarpSync::new(&config.warp_sync);
        let milestone_requester = Arc::new(MilestoneRangeRequester::new(
            ledger.clone(),
            requester.clone(),
            true,
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            peers.clone(),
            ledger.clone(),
            sink,
            config.broadcast.queue_size,
        ));

        Self {
            config: Arc::new(config),
            ledger,
            peers,
            queue,
            requester,
            warp_sync: Arc::new(warp_sync),
            milestone_requester,
            broadcaster,
            warp_sync_events: Arc::new(Mutex::new(Some(warp_sync_events))),
            announced_status: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(SyncState::default())),
            cancel: CancellationToken::new(),
        }
    }

    /// Get current sync state.
    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    pub fn request_queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn requester(&self) -> &Arc<Requester> {
        &self.requester
    }

    pub fn warp_sync(&self) -> &Arc<WarpSync> {
        &self.warp_sync
    }

    pub fn peers(&self) -> &SharedPeerManager {
        &self.peers
    }

    /// Spawns the background workers.
    ///
    /// All of them stop on `shutdown`.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let requester = self.requester.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move {
            requester.run_request_queue_drainer(cancel).await;
        }));

        let requester = self.requester.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move {
            requester.run_pending_request_enqueuer(cancel).await;
        }));

        let broadcaster = self.broadcaster.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move {
            broadcaster.run_broadcast_queue_drainer(cancel).await;
        }));

        match self.warp_sync_events.lock().take() {
            Some(events) => {
                let service = self.clone();
                handles.push(tokio::spawn(async move {
                    service.run_warp_sync_events(events).await;
                }));
            }
            None => warn!("Warp sync event loop already started"),
        }

        let service = self.clone();
        handles.push(tokio::spawn(async move {
            service.run_heartbeat_ticker().await;
        }));

        info!(
            warp_sync = self.config.warp_sync.enabled,
            advancement_range = self.config.warp_sync.advancement_range,
            "Sync service started"
        );

        handles
    }

    /// Stops all background workers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn run_warp_sync_events(&self, mut events: mpsc::UnboundedReceiver<WarpSyncEvent>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Warp sync event loop stopped");
                    return;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return;
                    };
                    // cone walks can be long, keep them off the runtime workers
                    let service = self.clone();
                    let handled = tokio::task::spawn_blocking(move || {
                        service.handle_warp_sync_event(event);
                    })
                    .await;
                    if let Err(err) = handled {
                        warn!(error = %err, "Warp sync event handler failed");
                    }
                }
            }
        }
    }

    async fn run_heartbeat_ticker(&self) {
        let check_interval = self.config.heartbeat.check_interval();
        let sent_interval = self.config.heartbeat.sent_interval();
        let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Heartbeat ticker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let sent = self.send_due_heartbeats(sent_interval);
                    if sent > 0 {
                        debug!(peers = sent, "Sent heartbeats");
                    }
                }
            }
        }
    }

    /// Sends a heartbeat to every peer that has not received one within
    /// `sent_interval`.
    pub fn send_due_heartbeats(&self, sent_interval: std::time::Duration) -> usize {
        let now = Instant::now();
        let due = |peer: &SyncPeer| {
            peer.heartbeat_sent_at
                .is_none_or(|sent_at| now.duration_since(sent_at) >= sent_interval)
        };
        self.broadcaster.broadcast_heartbeat(Some(&due))
    }

    /// Reacts to a warp sync notification.
    pub fn handle_warp_sync_event(&self, event: WarpSyncEvent) {
        match event {
            WarpSyncEvent::Start {
                target,
                checkpoint,
                advancement_range,
            } => {
                info!(target = target.0, checkpoint = checkpoint.0, "Synchronizing to milestone");
                self.filter_up_to(checkpoint);

                match self
                    .milestone_requester
                    .request_milestone_range(advancement_range, None, &self.cancel)
                {
                    Ok(range) if range.requested != advancement_range => {
                        // some milestones are stored already, they won't arrive again
                        info!(
                            requested = range.requested,
                            advancement_range,
                            "Manually starting solidifier, some milestones are already stored"
                        );
                        self.ledger.trigger_solidifier();
                    }
                    Ok(_) => {}
                    Err(err) => debug!(error = %err, "Milestone range request aborted"),
                }
            }
            WarpSyncEvent::CheckpointUpdated {
                checkpoint,
                old_checkpoint,
                advancement_range,
                target,
            } => {
                info!(checkpoint = checkpoint.0, target = target.0, "Checkpoint updated");
                self.filter_up_to(checkpoint);

                if let Err(err) = self.milestone_requester.request_milestone_range(
                    advancement_range,
                    Some(old_checkpoint),
                    &self.cancel,
                ) {
                    debug!(error = %err, "Milestone range request aborted");
                }
            }
            WarpSyncEvent::TargetUpdated { checkpoint, target } => {
                info!(target = target.0, checkpoint = checkpoint.0, "Target updated");
            }
            WarpSyncEvent::Done {
                delta_synced,
                referenced_blocks_total,
                took,
            } => {
                self.milestone_requester.cleanup();
                self.queue.filter(None);
                self.queue.free_memory();

                let seconds = took.as_secs_f64();
                let blocks_per_second = if seconds > 0.0 {
                    referenced_blocks_total as f64 / seconds
                } else {
                    0.0
                };
                info!(
                    milestones = delta_synced,
                    took_ms = took.as_millis() as u64,
                    blocks_per_second,
                    "Synchronized milestones"
                );
            }
        }
    }

    /// Only keep requests up to the checkpoint.
    fn filter_up_to(&self, checkpoint: MilestoneIndex) {
        self.queue.filter(Some(Arc::new(move |request: &Request| {
            request.milestone_index <= checkpoint
        })));
    }

    /// Add a peer to the sync service.
    pub fn add_peer(&self, peer_id: PeerId, connection_state: ConnectionState) {
        let mut pm = self.peers.write();
        pm.add_peer(peer_id, connection_state);
        info!(peer = %peer_id, "Peer added to sync service");
    }

    /// Remove a peer from the sync service.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.peers.write().remove_peer(peer_id);
        info!(peer = %peer_id, "Peer removed from sync service");
        self.update_sync_state();
    }

    /// Update peer connection state.
    pub fn update_peer_connection(&self, peer_id: &PeerId, state: ConnectionState) {
        self.peers.write().update_connection_state(peer_id, state);
        self.update_sync_state();
    }

    /// Stores a peer heartbeat and moves the warp sync target.
    pub fn on_peer_heartbeat(&self, peer_id: &PeerId, heartbeat: Heartbeat) {
        let solid = heartbeat.solid_milestone_index;
        if !self.peers.write().update_heartbeat(peer_id, heartbeat) {
            debug!(peer = %peer_id, "Heartbeat from unknown peer ignored");
            return;
        }
        debug!(peer = %peer_id, solid_milestone_index = solid.0, "Updated peer heartbeat");

        if self.config.warp_sync.enabled {
            let confirmed = self.ledger.sync_status().confirmed_milestone_index;
            self.warp_sync.update_current_confirmed_milestone(confirmed);
            self.warp_sync.update_target_milestone(solid);
        }

        self.update_sync_state();
    }

    /// Records that a milestone got confirmed, referencing
    /// `referenced_blocks` new blocks.
    pub fn on_confirmed_milestone(&self, index: MilestoneIndex, referenced_blocks: usize) {
        if self.config.warp_sync.enabled {
            self.warp_sync.add_referenced_blocks_count(referenced_blocks);
            self.warp_sync.update_current_confirmed_milestone(index);
        }

        self.on_sync_status_changed();
        self.update_sync_state();
    }

    /// Sends a heartbeat to all connected peers if the local confirmed,
    /// pruned or latest milestone changed since the last announcement.
    ///
    /// Returns the number of peers the heartbeat was sent to.
    pub fn on_sync_status_changed(&self) -> usize {
        let status = self.ledger.sync_status();
        {
            let mut announced = self.announced_status.lock();
            if *announced == Some(status) {
                return 0;
            }
            *announced = Some(status);
        }

        let sent = self.broadcaster.broadcast_heartbeat(None);
        debug!(
            confirmed_milestone_index = status.confirmed_milestone_index.0,
            pruned_milestone_index = status.pruned_milestone_index.0,
            latest_milestone_index = status.latest_milestone_index.0,
            peers = sent,
            "Announced sync status"
        );
        sent
    }

    /// Re-requests the current window when a milestone beyond the checkpoint
    /// failed to solidify, its requests might have been lost.
    pub fn on_milestone_solidification_failed(
        &self,
        index: MilestoneIndex,
    ) -> Result<(), SyncError> {
        if !self.config.warp_sync.enabled {
            return Ok(());
        }

        let checkpoint = self.warp_sync.current_checkpoint();
        if checkpoint.is_zero() || checkpoint >= index {
            return Ok(());
        }

        let range = self.milestone_requester.request_milestone_range(
            self.warp_sync.advancement_range(),
            None,
            &self.cancel,
        )?;
        info!(
            start = range.start.0,
            end = range.end.0,
            "Requesting missing milestones"
        );
        Ok(())
    }

    /// Queues a payload for all connected peers except the excluded ones.
    pub async fn broadcast(&self, broadcast: Broadcast) {
        self.broadcaster.broadcast(broadcast).await;
    }

    /// Update sync state based on current conditions.
    fn update_sync_state(&self) {
        let confirmed = self.ledger.sync_status().confirmed_milestone_index;
        let network_solid = self
            .peers
            .read()
            .connected_peers()
            .filter_map(|peer| peer.heartbeat.as_ref())
            .map(|heartbeat| heartbeat.solid_milestone_index)
            .max();

        let mut state = self.state.lock();
        let new_state = match network_solid {
            None => SyncState::Idle,
            Some(_) if self.warp_sync.is_running() => SyncState::Syncing,
            Some(solid) if confirmed.0 >= solid.0.saturating_sub(SYNC_THRESHOLD) => {
                SyncState::Synced
            }
            Some(_) => SyncState::Syncing,
        };

        if new_state == *state {
            return;
        }

        if !state.can_transition_to(new_state) {
            warn!(from = ?*state, to = ?new_state, "Invalid state transition attempted");
            return;
        }

        info!(
            from = ?*state,
            to = ?new_state,
            confirmed_milestone_index = confirmed.0,
            network_solid = network_solid.map(|index| index.0),
            "Sync state changed"
        );
        *state = new_state;
    }

    /// Get sync statistics.
    pub fn stats(&self) -> SyncStats {
        let status = self.ledger.sync_status();
        let confirmed = status.confirmed_milestone_index;
        let (connected_peers, synced_peers) = {
            let pm = self.peers.read();
            (pm.connected_count(), pm.synced_count(status.latest_milestone_index))
        };
        let (queued_requests, pending_requests, processing_requests) = self.queue.size();

        SyncStats {
            state: self.state(),
            confirmed_milestone_index: confirmed,
            connected_peers,
            synced_peers,
            queued_requests,
            pending_requests,
            processing_requests,
            avg_request_latency_ms: self.queue.avg_latency(),
            warp_sync: self.warp_sync.snapshot(),
        }
    }
}

/// Statistics about the sync service.
#[derive(Debug, Clone, Copy)]
pub struct SyncStats {
    pub state: SyncState,
    pub confirmed_milestone_index: MilestoneIndex,
    pub connected_peers: usize,
    pub synced_peers: usize,
    pub queued_requests: usize,
    pub pending_requests: usize,
    pub processing_requests: usize,
    pub avg_request_latency_ms: u64,
    pub warp_sync: WarpSyncSnapshot,
}
