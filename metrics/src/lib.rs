pub mod server;

use networking::sync::{SyncState, SyncStats};
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    sync_state: IntGauge,
    confirmed_milestone_index: IntGauge,
    peers_connected: IntGauge,
    peers_synced: IntGauge,
    requests: IntGaugeVec,
    request_latency_ms: IntGauge,
    // Warp sync
    warp_sync_target: IntGauge,
    warp_sync_checkpoint: IntGauge,
    warp_sync_referenced_blocks: IntGauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let sync_state = gauge(
            &registry,
            "sync_state",
            "Sync state of the node (0 = idle, 1 = syncing, 2 = synced)",
        )?;
        let confirmed_milestone_index = gauge(
            &registry,
            "sync_confirmed_milestone_index",
            "Index of the latest confirmed milestone",
        )?;

        // Network
        let peers_connected = gauge(&registry, "network_peers_connected", "Number of connected peers")?;
        let peers_synced = gauge(&registry, "network_peers_synced", "Number of connected peers that are synced")?;

        // Requests
        let requests = IntGaugeVec::new(
            Opts::new("sync_requests", "Number of outstanding requests by state"),
            &["state"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let request_latency_ms = gauge(
            &registry,
            "sync_request_latency_ms",
            "Average time between enqueueing a request and receiving its data",
        )?;

        // Warp sync
        let warp_sync_target = gauge(&registry, "warp_sync_target", "Target milestone of the running warp sync")?;
        let warp_sync_checkpoint = gauge(
            &registry,
            "warp_sync_checkpoint",
            "Current checkpoint of the running warp sync",
        )?;
        let warp_sync_referenced_blocks = gauge(
            &registry,
            "warp_sync_referenced_blocks",
            "Blocks referenced by milestones confirmed during the running warp sync",
        )?;

        Ok(Self {
            registry,
            sync_state,
            confirmed_milestone_index,
            peers_connected,
            peers_synced,
            requests,
            request_latency_ms,
            warp_sync_target,
            warp_sync_checkpoint,
            warp_sync_referenced_blocks,
        })
    }

    pub fn gather(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn set_sync_state(&self, state: SyncState) {
        let value = match state {
            SyncState::Idle => 0,
            SyncState::Syncing => 1,
            SyncState::Synced => 2,
        };
        self.sync_state.set(value);
    }

    pub fn set_peers(&self, connected: usize, synced: usize) {
        self.peers_connected.set(as_gauge(connected));
        self.peers_synced.set(as_gauge(synced));
    }

    pub fn set_requests(&self, queued: usize, pending: usize, processing: usize) {
        for (state, count) in [("queued", queued), ("pending", pending), ("processing", processing)] {
            self.requests.with_label_values(&[state]).set(as_gauge(count));
        }
    }

    /// Copies a sync service snapshot into the gauges.
    pub fn observe_sync_stats(&self, stats: &SyncStats) {
        self.set_sync_state(stats.state);
        self.confirmed_milestone_index
            .set(i64::from(stats.confirmed_milestone_index.0));
        self.set_peers(stats.connected_peers, stats.synced_peers);
        self.set_requests(
            stats.queued_requests,
            stats.pending_requests,
            stats.processing_requests,
        );
        self.request_latency_ms
            .set(i64::try_from(stats.avg_request_latency_ms).unwrap_or(i64::MAX));

        self.warp_sync_target.set(i64::from(stats.warp_sync.target.0));
        self.warp_sync_checkpoint
            .set(i64::from(stats.warp_sync.current_checkpoint.0));
        self.warp_sync_referenced_blocks
            .set(as_gauge(stats.warp_sync.referenced_blocks_total));
    }
}

fn as_gauge(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub type SharedMetrics = Arc<Metrics>;
