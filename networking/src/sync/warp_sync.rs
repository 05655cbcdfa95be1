use containers::{MilestoneIndex, MilestoneIndexDelta};
use parking_lot::Mutex;
/// Checkpoint controller for bulk synchronization.
///
/// A node far behind its peers does not request the whole gap at once.
/// Warp sync splits the gap into windows of `advancement_range` milestones
/// and moves the window forward as the local confirmed milestone catches up.
///
/// ## State Machine
///
/// - **Dormant**: `current_checkpoint == 0`, no run in progress
/// - **Running**: started once the target is more than one milestone ahead
///   of the confirmed milestone, ends when confirmed reaches the target
use std::time::Duration;
use tokio::{sync::mpsc, time::Instant};
use tracing::debug;

use super::config::WarpSyncConfig;

/// Decides whether to move on to the next checkpoint, given the confirmed
/// milestone, the previous checkpoint and the current checkpoint.
pub type AdvanceCheckpointCriteria =
    Box<dyn Fn(MilestoneIndex, MilestoneIndex, MilestoneIndex) -> bool + Send + Sync>;

/// Advances once the confirmed milestone covered `threshold` of the window
/// between the previous and the current checkpoint.
pub fn advance_at_percentage_reached(threshold: f64) -> AdvanceCheckpointCriteria {
    Box::new(move |current_confirmed, previous_checkpoint, current_checkpoint| {
        // advancements move the window above the confirmed milestone
        if current_confirmed < previous_checkpoint {
            return false;
        }

        let checkpoint_delta = previous_checkpoint.delta_to(current_checkpoint);
        if checkpoint_delta == 0 {
            return true;
        }
        let progress = previous_checkpoint.delta_to(current_confirmed);

        f64::from(progress) / f64::from(checkpoint_delta) >= threshold
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarpSyncEvent {
    /// A run started, the milestones up to `checkpoint` should be requested.
    Start {
        target: MilestoneIndex,
        checkpoint: MilestoneIndex,
        advancement_range: MilestoneIndexDelta,
    },
    /// The window moved, milestones after `old_checkpoint` up to
    /// `checkpoint` should be requested.
    CheckpointUpdated {
        checkpoint: MilestoneIndex,
        old_checkpoint: MilestoneIndex,
        advancement_range: MilestoneIndexDelta,
        target: MilestoneIndex,
    },
    TargetUpdated {
        checkpoint: MilestoneIndex,
        target: MilestoneIndex,
    },
    /// The run reached its target.
    Done {
        delta_synced: MilestoneIndexDelta,
        referenced_blocks_total: usize,
        took: Duration,
    },
}

/// Copy of the warp sync state, for introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarpSyncSnapshot {
    pub init: MilestoneIndex,
    pub current_confirmed: MilestoneIndex,
    pub target: MilestoneIndex,
    pub previous_checkpoint: MilestoneIndex,
    pub current_checkpoint: MilestoneIndex,
    pub referenced_blocks_total: usize,
}

#[derive(Debug, Default)]
struct WarpSyncState {
    start: Option<Instant>,
    init: MilestoneIndex,
    current_confirmed: MilestoneIndex,
    target: MilestoneIndex,
    previous_checkpoint: MilestoneIndex,
    current_checkpoint: MilestoneIndex,
    referenced_blocks_total: usize,
}

impl WarpSyncState {
    fn is_running(&self) -> bool {
        !self.current_checkpoint.is_zero()
    }

    /// Moves the checkpoint by one advancement range, never past the target.
    /// Returns the range actually covered.
    fn advance_checkpoint(&mut self, advancement_range: MilestoneIndexDelta) -> MilestoneIndexDelta {
        if self.is_running() {
            self.previous_checkpoint = self.current_checkpoint;
        }

        let to_target_from_confirmed = self.current_confirmed.delta_to(self.target);
        let to_target_from_checkpoint = self.current_checkpoint.delta_to(self.target);

        if to_target_from_confirmed <= advancement_range
            || to_target_from_checkpoint <= advancement_range
        {
            self.current_checkpoint = self.target;
            return to_target_from_checkpoint.min(to_target_from_confirmed);
        }

        // the first window starts at the confirmed milestone
        self.current_checkpoint = if self.current_checkpoint.is_zero() {
            self.current_confirmed + advancement_range
        } else {
            self.current_checkpoint + advancement_range
        };

        advancement_range
    }

    /// Back to dormant. The confirmed milestone keeps tracking the ledger.
    fn reset(&mut self) {
        self.start = None;
        self.init = MilestoneIndex::ZERO;
        self.target = MilestoneIndex::ZERO;
        self.previous_checkpoint = MilestoneIndex::ZERO;
        self.current_checkpoint = MilestoneIndex::ZERO;
        self.referenced_blocks_total = 0;
    }
}

pub struct WarpSync {
    advancement_range: MilestoneIndexDelta,
    criteria: AdvanceCheckpointCriteria,
    state: Mutex<WarpSyncState>,
    events: mpsc::UnboundedSender<WarpSyncEvent>,
}

impl WarpSync {
    /// Creates a warp sync advancing at the configured percentage threshold.
    pub fn new(config: &WarpSyncConfig) -> (Self, mpsc::UnboundedReceiver<WarpSyncEvent>) {
        Self::with_criteria(
            config.advancement_range,
            advance_at_percentage_reached(config.advancement_threshold),
        )
    }

    pub fn with_criteria(
        advancement_range: MilestoneIndexDelta,
        criteria: AdvanceCheckpointCriteria,
    ) -> (Self, mpsc::UnboundedReceiver<WarpSyncEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let warp_sync = Self {
            advancement_range,
            criteria,
            state: Mutex::new(WarpSyncState::default()),
            events,
        };
        (warp_sync, receiver)
    }

    pub fn advancement_range(&self) -> MilestoneIndexDelta {
        self.advancement_range
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    pub fn current_checkpoint(&self) -> MilestoneIndex {
        self.state.lock().current_checkpoint
    }

    pub fn snapshot(&self) -> WarpSyncSnapshot {
        let state = self.state.lock();
        WarpSyncSnapshot {
            init: state.init,
            current_confirmed: state.current_confirmed,
            target: state.target,
            previous_checkpoint: state.previous_checkpoint,
            current_checkpoint: state.current_checkpoint,
            referenced_blocks_total: state.referenced_blocks_total,
        }
    }

    fn emit(&self, event: WarpSyncEvent) {
        if self.events.send(event).is_err() {
            debug!("Warp sync event receiver dropped");
        }
    }

    /// Records local confirmation progress.
    ///
    /// Finishes the run once the target is reached, otherwise advances the
    /// checkpoint when the criteria allows it.
    pub fn update_current_confirmed_milestone(&self, current: MilestoneIndex) {
        let mut state = self.state.lock();

        if current <= state.current_confirmed {
            return;
        }
        state.current_confirmed = current;

        if !state.is_running() {
            return;
        }

        if !state.target.is_zero() && state.current_confirmed >= state.target {
            let delta_synced = state.init.delta_to(state.target);
            let referenced_blocks_total = state.referenced_blocks_total;
            let took = state.start.map(|start| start.elapsed()).unwrap_or_default();
            state.reset();
            self.emit(WarpSyncEvent::Done {
                delta_synced,
                referenced_blocks_total,
                took,
            });
            return;
        }

        if !(self.criteria)(
            state.current_confirmed,
            state.previous_checkpoint,
            state.current_checkpoint,
        ) {
            return;
        }

        let old_checkpoint = state.current_checkpoint;
        let advancement_range = state.advance_checkpoint(self.advancement_range);
        if advancement_range != 0 {
            self.emit(WarpSyncEvent::CheckpointUpdated {
                checkpoint: state.current_checkpoint,
                old_checkpoint,
                advancement_range,
                target: state.target,
            });
        }
    }

    /// Raises the synchronization target. Targets never decrease.
    ///
    /// Starts a run when dormant and the gap to the confirmed milestone is at
    /// least two. While running, a target inside the current window pulls the
    /// checkpoint onto it.
    pub fn update_target_milestone(&self, target: MilestoneIndex) {
        let mut state = self.state.lock();

        if target <= state.target {
            return;
        }
        state.target = target;

        if state.is_running() {
            if state.current_checkpoint + self.advancement_range > state.target {
                let old_checkpoint = state.current_checkpoint;
                let advancement_range = old_checkpoint.delta_to(state.target);
                state.current_checkpoint = state.target;
                self.emit(WarpSyncEvent::CheckpointUpdated {
                    checkpoint: state.current_checkpoint,
                    old_checkpoint,
                    advancement_range,
                    target: state.target,
                });
            } else {
                self.emit(WarpSyncEvent::TargetUpdated {
                    checkpoint: state.current_checkpoint,
                    target: state.target,
                });
            }
            return;
        }

        if state.current_confirmed.delta_to(state.target) < 2 {
            return;
        }

        state.start = Some(Instant::now());
        state.init = state.current_confirmed;
        state.previous_checkpoint = state.current_confirmed;
        let advancement_range = state.advance_checkpoint(self.advancement_range);
        self.emit(WarpSyncEvent::Start {
            target: state.target,
            checkpoint: state.current_checkpoint,
            advancement_range,
        });
    }

    /// Adds to the number of blocks referenced during the current run.
    pub fn add_referenced_blocks_count(&self, count: usize) {
        self.state.lock().referenced_blocks_total += count;
    }
}
