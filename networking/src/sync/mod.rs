pub mod broadcaster;
/// Milestone synchronization for the node.
///
/// This module decides which missing ledger data to fetch, from which peers,
/// in what order and how aggressively. It includes:
///
/// - **Request Queue**: outstanding requests in queued, pending and processing state
/// - **Requester**: re-enqueues timed-out requests and dispatches them to peers
/// - **Warp Sync**: splits a large milestone gap into checkpoint windows
/// - **Milestone Requester**: requests the milestones of a window and walks stored cones
/// - **Broadcaster**: bounded gossip fan-out and heartbeats
/// - **Peer Manager**: last heartbeat of every peer
/// - **Sync Service**: wires all of the above and reacts to warp sync events
///
/// ## Architecture
///
/// 1. Peer heartbeats raise the warp sync target
/// 2. Warp sync emits checkpoint windows
/// 3. The milestone requester puts the window into the request queue
/// 4. The requester drains the queue, preferring peers that surely hold the data
/// 5. Confirmation progress advances the checkpoint until the target is reached
///
/// ## State Machine
///
/// - **IDLE**: no peer announced its status yet
/// - **SYNCING**: peers are ahead of the local confirmed milestone
/// - **SYNCED**: within the sync threshold of the peers
pub mod config;
pub mod milestone_requester;
pub mod peer_manager;
pub mod request_queue;
pub mod requester;
pub mod service;
pub mod states;
pub mod warp_sync;

pub use broadcaster::{Broadcast, Broadcaster};
pub use config::*;
pub use milestone_requester::{MilestoneRangeRequester, RequestedRange};
pub use peer_manager::{PeerManager, SharedPeerManager, SyncPeer};
pub use request_queue::{QueueSnapshot, Request, RequestFilter, RequestKey, RequestQueue};
pub use requester::{BackPressureFn, Dispatch, Requester, RequesterBuilder};
pub use service::{SyncService, SyncStats};
pub use states::SyncState;
pub use warp_sync::{
    AdvanceCheckpointCriteria, WarpSync, WarpSyncEvent, WarpSyncSnapshot,
    advance_at_percentage_reached,
};

#[cfg(test)]
mod tests;
