use std::{collections::HashSet, sync::Arc, time::Duration};

use containers::{MilestoneIndex, SyncStatus};
use libp2p_identity::PeerId;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{RecordingSink, heartbeat};
use crate::{
    ledger::{Ledger, MemoryLedger},
    sync::{Broadcast, Broadcaster, PeerManager, SharedPeerManager, SyncPeer},
    types::{ConnectionState, OutboundPeerMessage, PeerMessage, PeerMessageSink},
};

fn connected_peers(peers: &SharedPeerManager, count: usize) -> Vec<PeerId> {
    let mut pm = peers.write();
    (0..count)
        .map(|_| {
            let peer_id = PeerId::random();
            pm.add_peer(peer_id, ConnectionState::Connected);
            peer_id
        })
        .collect()
}

fn broadcaster(peers: &SharedPeerManager, sink: Arc<dyn PeerMessageSink>, queue_size: usize) -> Broadcaster {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    Broadcaster::new(peers.clone(), ledger, sink, queue_size)
}

#[test]
fn test_deliver_skips_excluded_peers() {
    let peers = PeerManager::shared();
    let ids = connected_peers(&peers, 3);
    let sink = Arc::new(RecordingSink::default());
    let broadcaster = broadcaster(&peers, sink.clone(), 10);

    let sent = broadcaster.deliver(&Broadcast::new(vec![1u8, 2, 3]).excluding(ids[0]));

    assert_eq!(sent, 2);
    assert_eq!(sink.recipients(), HashSet::from([ids[1], ids[2]]));
    assert!(
        sink.sent()
            .iter()
            .all(|(_, message)| *message == PeerMessage::Gossip(Arc::from(vec![1u8, 2, 3])))
    );
}

#[test]
fn test_deliver_skips_disconnected_and_failing_peers() {
    let peers = PeerManager::shared();
    let ids = connected_peers(&peers, 3);
    peers
        .write()
        .update_connection_state(&ids[1], ConnectionState::Disconnecting);
    let sink = Arc::new(RecordingSink::failing_for(ids[0]));
    let broadcaster = broadcaster(&peers, sink.clone(), 10);

    let sent = broadcaster.deliver(&Broadcast::new(vec![7u8]));

    assert_eq!(sent, 1);
    assert_eq!(sink.recipients(), HashSet::from([ids[2]]));
}

#[tokio::test]
async fn test_drainer_forwards_queued_broadcasts() {
    let peers = PeerManager::shared();
    let ids = connected_peers(&peers, 3);
    let (sender, mut receiver) = mpsc::unbounded_channel::<OutboundPeerMessage>();
    let broadcaster = Arc::new(broadcaster(&peers, Arc::new(sender), 10));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let broadcaster = broadcaster.clone();
        let cancel = cancel.clone();
        async move { broadcaster.run_broadcast_queue_drainer(cancel).await }
    });

    broadcaster
        .broadcast(Broadcast::new(vec![9u8]).excluding(ids[2]))
        .await;

    let mut recipients = HashSet::new();
    for _ in 0..2 {
        let outbound = receiver.recv().await.unwrap();
        assert_eq!(outbound.message, PeerMessage::Gossip(Arc::from(vec![9u8])));
        recipients.insert(outbound.peer_id);
    }
    assert_eq!(recipients, HashSet::from([ids[0], ids[1]]));

    cancel.cancel();
    handle.await.unwrap();
    assert!(receiver.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_waits_while_queue_is_full() {
    let peers = PeerManager::shared();
    let broadcaster = broadcaster(&peers, Arc::new(RecordingSink::default()), 1);

    broadcaster.broadcast(Broadcast::new(vec![1u8])).await;

    let second = tokio::time::timeout(
        Duration::from_millis(100),
        broadcaster.broadcast(Broadcast::new(vec![2u8])),
    )
    .await;
    assert!(second.is_err());
}

#[tokio::test]
async fn test_second_drainer_returns_immediately() {
    let peers = PeerManager::shared();
    let broadcaster = Arc::new(broadcaster(&peers, Arc::new(RecordingSink::default()), 1));
    let cancel = CancellationToken::new();

    let first = tokio::spawn({
        let broadcaster = broadcaster.clone();
        let cancel = cancel.clone();
        async move { broadcaster.run_broadcast_queue_drainer(cancel).await }
    });
    tokio::task::yield_now().await;

    broadcaster
        .run_broadcast_queue_drainer(CancellationToken::new())
        .await;

    cancel.cancel();
    first.await.unwrap();
}

#[test]
fn test_heartbeat_carries_local_status_and_peer_counts() {
    let peers = PeerManager::shared();
    let ids = connected_peers(&peers, 3);
    {
        let mut pm = peers.write();
        pm.update_heartbeat(&ids[0], heartbeat(59, 0, 60));
        pm.update_heartbeat(&ids[1], heartbeat(10, 0, 50));
        pm.update_connection_state(&ids[2], ConnectionState::Disconnected);
    }
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_sync_status(SyncStatus::new(
        MilestoneIndex(50),
        MilestoneIndex(3),
        MilestoneIndex(60),
    ));
    let sink = Arc::new(RecordingSink::default());
    let broadcaster = Broadcaster::new(peers.clone(), ledger, sink.clone(), 10);

    let sent = broadcaster.broadcast_heartbeat(None);

    assert_eq!(sent, 2);
    assert_eq!(sink.recipients(), HashSet::from([ids[0], ids[1]]));
    let PeerMessage::Heartbeat(sent_heartbeat) = &sink.sent()[0].1 else {
        panic!("expected heartbeat");
    };
    assert_eq!(sent_heartbeat.solid_milestone_index, MilestoneIndex(50));
    assert_eq!(sent_heartbeat.pruned_milestone_index, MilestoneIndex(3));
    assert_eq!(sent_heartbeat.latest_milestone_index, MilestoneIndex(60));
    assert_eq!(sent_heartbeat.connected_peers, 2);
    assert_eq!(sent_heartbeat.synced_peers, 1);

    let pm = peers.read();
    assert!(pm.get_peer(&ids[0]).unwrap().heartbeat_sent_at.is_some());
    assert!(pm.get_peer(&ids[2]).unwrap().heartbeat_sent_at.is_none());
}

#[test]
fn test_lagging_node_counts_peers_against_its_latest_milestone() {
    let peers = PeerManager::shared();
    let ids = connected_peers(&peers, 1);
    peers.write().update_heartbeat(&ids[0], heartbeat(900, 0, 900));
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_sync_status(SyncStatus::new(
        MilestoneIndex(100),
        MilestoneIndex(0),
        MilestoneIndex(1000),
    ));
    let sink = Arc::new(RecordingSink::default());
    let broadcaster = Broadcaster::new(peers.clone(), ledger, sink.clone(), 10);

    assert_eq!(broadcaster.broadcast_heartbeat(None), 1);

    let PeerMessage::Heartbeat(sent_heartbeat) = &sink.sent()[0].1 else {
        panic!("expected heartbeat");
    };
    assert_eq!(sent_heartbeat.connected_peers, 1);
    assert_eq!(sent_heartbeat.synced_peers, 0);
}

#[test]
fn test_heartbeat_filter_limits_recipients() {
    let peers = PeerManager::shared();
    let ids = connected_peers(&peers, 2);
    let sink = Arc::new(RecordingSink::default());
    let broadcaster = broadcaster(&peers, sink.clone(), 10);

    let only_first = |peer: &SyncPeer| peer.peer_id == ids[0];
    let sent = broadcaster.broadcast_heartbeat(Some(&only_first));

    assert_eq!(sent, 1);
    assert_eq!(sink.recipients(), HashSet::from([ids[0]]));
}
