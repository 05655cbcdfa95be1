use containers::MilestoneIndex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::sync::{WarpSync, WarpSyncConfig, WarpSyncEvent, advance_at_percentage_reached};

fn warp_sync(range: u32, threshold: f64) -> (WarpSync, UnboundedReceiver<WarpSyncEvent>) {
    WarpSync::new(&WarpSyncConfig {
        enabled: true,
        advancement_range: range,
        advancement_threshold: threshold,
    })
}

fn drain(events: &mut UnboundedReceiver<WarpSyncEvent>) -> Vec<WarpSyncEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[rstest]
#[case::reached_threshold(140, 100, 150, true)]
#[case::below_threshold(130, 100, 150, false)]
#[case::below_previous_checkpoint(99, 100, 150, false)]
#[case::empty_window(150, 150, 150, true)]
fn test_advance_at_percentage_reached(
    #[case] confirmed: u32,
    #[case] previous: u32,
    #[case] current: u32,
    #[case] expected: bool,
) {
    let criteria = advance_at_percentage_reached(0.8);
    assert_eq!(
        criteria(
            MilestoneIndex(confirmed),
            MilestoneIndex(previous),
            MilestoneIndex(current)
        ),
        expected
    );
}

#[test]
fn test_checkpoint_advances_at_threshold() {
    let (warp_sync, mut events) = warp_sync(50, 0.8);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(100));
    assert!(!warp_sync.is_running());

    warp_sync.update_target_milestone(MilestoneIndex(1000));
    assert_eq!(
        drain(&mut events),
        vec![WarpSyncEvent::Start {
            target: MilestoneIndex(1000),
            checkpoint: MilestoneIndex(150),
            advancement_range: 50,
        }]
    );

    warp_sync.update_current_confirmed_milestone(MilestoneIndex(130));
    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(150));
    assert!(drain(&mut events).is_empty());

    warp_sync.update_current_confirmed_milestone(MilestoneIndex(140));
    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(200));
    assert_eq!(
        drain(&mut events),
        vec![WarpSyncEvent::CheckpointUpdated {
            checkpoint: MilestoneIndex(200),
            old_checkpoint: MilestoneIndex(150),
            advancement_range: 50,
            target: MilestoneIndex(1000),
        }]
    );

    // lower targets are ignored
    warp_sync.update_target_milestone(MilestoneIndex(145));
    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(200));
    assert_eq!(warp_sync.snapshot().target, MilestoneIndex(1000));
    assert!(drain(&mut events).is_empty());
}

#[test]
fn test_default_threshold_advances_on_entering_window() {
    let (warp_sync, mut events) = warp_sync(150, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(100));
    warp_sync.update_target_milestone(MilestoneIndex(1000));
    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(250));

    warp_sync.update_current_confirmed_milestone(MilestoneIndex(101));
    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(400));

    let snapshot = warp_sync.snapshot();
    assert_eq!(snapshot.previous_checkpoint, MilestoneIndex(250));
    assert_eq!(snapshot.init, MilestoneIndex(100));
    assert_eq!(drain(&mut events).len(), 2);
}

#[rstest]
#[case::gap_of_one(101, false)]
#[case::gap_of_two(102, true)]
fn test_run_starts_only_for_gap_of_two(#[case] target: u32, #[case] running: bool) {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(100));
    warp_sync.update_target_milestone(MilestoneIndex(target));

    assert_eq!(warp_sync.is_running(), running);
    assert_eq!(drain(&mut events).len(), usize::from(running));
}

#[test]
fn test_first_checkpoint_is_capped_at_target() {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(10));
    warp_sync.update_target_milestone(MilestoneIndex(20));

    assert_eq!(
        drain(&mut events),
        vec![WarpSyncEvent::Start {
            target: MilestoneIndex(20),
            checkpoint: MilestoneIndex(20),
            advancement_range: 10,
        }]
    );
}

#[test]
fn test_reaching_target_finishes_run() {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(10));
    warp_sync.update_target_milestone(MilestoneIndex(20));
    drain(&mut events);

    warp_sync.add_referenced_blocks_count(30);
    warp_sync.add_referenced_blocks_count(12);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(20));

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    let WarpSyncEvent::Done {
        delta_synced,
        referenced_blocks_total,
        ..
    } = events[0]
    else {
        panic!("expected done event, got {:?}", events[0]);
    };
    assert_eq!(delta_synced, 10);
    assert_eq!(referenced_blocks_total, 42);

    assert!(!warp_sync.is_running());
    let snapshot = warp_sync.snapshot();
    assert_eq!(snapshot.target, MilestoneIndex::ZERO);
    assert_eq!(snapshot.current_checkpoint, MilestoneIndex::ZERO);
    assert_eq!(snapshot.referenced_blocks_total, 0);
    assert_eq!(snapshot.current_confirmed, MilestoneIndex(20));
}

#[test]
fn test_new_run_can_start_after_done() {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(10));
    warp_sync.update_target_milestone(MilestoneIndex(20));
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(20));
    drain(&mut events);

    warp_sync.update_target_milestone(MilestoneIndex(30));

    assert!(warp_sync.is_running());
    assert_eq!(warp_sync.snapshot().init, MilestoneIndex(20));
}

#[test]
fn test_closer_target_forces_checkpoint_advance() {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(100));
    warp_sync.update_target_milestone(MilestoneIndex(160));
    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(150));
    drain(&mut events);

    warp_sync.update_target_milestone(MilestoneIndex(180));

    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(180));
    assert_eq!(
        drain(&mut events),
        vec![WarpSyncEvent::CheckpointUpdated {
            checkpoint: MilestoneIndex(180),
            old_checkpoint: MilestoneIndex(150),
            advancement_range: 30,
            target: MilestoneIndex(180),
        }]
    );
}

#[test]
fn test_farther_target_only_updates_target() {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(100));
    warp_sync.update_target_milestone(MilestoneIndex(1000));
    drain(&mut events);

    warp_sync.update_target_milestone(MilestoneIndex(2000));

    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(150));
    assert_eq!(
        drain(&mut events),
        vec![WarpSyncEvent::TargetUpdated {
            checkpoint: MilestoneIndex(150),
            target: MilestoneIndex(2000),
        }]
    );
}

#[test]
fn test_advance_near_target_shrinks_range() {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(100));
    warp_sync.update_target_milestone(MilestoneIndex(180));
    drain(&mut events);

    warp_sync.update_current_confirmed_milestone(MilestoneIndex(140));

    assert_eq!(
        drain(&mut events),
        vec![WarpSyncEvent::CheckpointUpdated {
            checkpoint: MilestoneIndex(180),
            old_checkpoint: MilestoneIndex(150),
            advancement_range: 30,
            target: MilestoneIndex(180),
        }]
    );
}

#[test]
fn test_older_confirmed_milestone_is_ignored() {
    let (warp_sync, mut events) = warp_sync(50, 0.0);
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(100));
    warp_sync.update_target_milestone(MilestoneIndex(1000));
    drain(&mut events);

    warp_sync.update_current_confirmed_milestone(MilestoneIndex(90));

    assert_eq!(warp_sync.snapshot().current_confirmed, MilestoneIndex(100));
    assert!(drain(&mut events).is_empty());
}

#[test]
fn test_custom_criteria_is_used() {
    let (warp_sync, mut events) = WarpSync::with_criteria(10, Box::new(|_, _, _| false));
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(1));
    warp_sync.update_target_milestone(MilestoneIndex(100));
    warp_sync.update_current_confirmed_milestone(MilestoneIndex(10));

    assert_eq!(warp_sync.current_checkpoint(), MilestoneIndex(11));
    assert_eq!(drain(&mut events).len(), 1);
}
