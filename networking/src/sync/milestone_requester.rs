use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use containers::{BlockId, MilestoneIndex, MilestoneIndexDelta};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::requester::Requester;
use crate::{error::SyncError, ledger::Ledger};

/// Outcome of a milestone range request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedRange {
    /// Milestones missing from the ledger that were requested.
    pub requested: MilestoneIndexDelta,
    pub start: MilestoneIndex,
    pub end: MilestoneIndex,
}

/// Requests the milestones of a warp sync window.
///
/// Milestones already stored but not yet solid get their parent cone walked
/// instead, requesting whatever blocks are missing. Walked blocks are
/// remembered until `cleanup`, so overlapping cones are only walked once.
pub struct MilestoneRangeRequester {
    ledger: Arc<dyn Ledger>,
    requester: Arc<Requester>,
    prevent_discard: bool,
    traversed: Mutex<HashSet<BlockId>>,
}

impl MilestoneRangeRequester {
    pub fn new(ledger: Arc<dyn Ledger>, requester: Arc<Requester>, prevent_discard: bool) -> Self {
        Self {
            ledger,
            requester,
            prevent_discard,
            traversed: Mutex::new(HashSet::new()),
        }
    }

    /// Requests the milestones `from + 1 ..= from + range`.
    ///
    /// `from` defaults to the local confirmed milestone.
    pub fn request_milestone_range(
        &self,
        range: MilestoneIndexDelta,
        from: Option<MilestoneIndex>,
        cancel: &CancellationToken,
    ) -> Result<RequestedRange, SyncError> {
        let mut traversed = self.traversed.lock();

        let starting_point =
            from.unwrap_or_else(|| self.ledger.sync_status().confirmed_milestone_index);

        let mut missing = Vec::new();
        for offset in 1..=range {
            let index = starting_point + offset;

            if !self.ledger.contains_milestone(index) {
                missing.push(index);
                continue;
            }

            match self.request_missing_milestone_parents(index, &mut traversed, cancel) {
                Ok(()) => {}
                Err(SyncError::OperationAborted) => return Err(SyncError::OperationAborted),
                Err(err) => {
                    debug!(milestone_index = index.0, error = %err, "Failed to walk milestone cone");
                }
            }
        }

        for index in &missing {
            self.requester.request(*index, *index, false);
        }

        Ok(RequestedRange {
            requested: missing.len() as MilestoneIndexDelta,
            start: starting_point + 1,
            end: starting_point + range,
        })
    }

    /// Walks the cone of a stored milestone and requests missing blocks.
    ///
    /// The walk stops at solid blocks, solid entry points and blocks walked
    /// before.
    fn request_missing_milestone_parents(
        &self,
        index: MilestoneIndex,
        traversed: &mut HashSet<BlockId>,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if index <= self.ledger.sync_status().confirmed_milestone_index {
            return Ok(());
        }

        let parents = self
            .ledger
            .milestone_parents(index)
            .ok_or(SyncError::MilestoneMissing(index))?;

        let mut to_visit: VecDeque<BlockId> = parents.into();
        let mut seen: HashSet<BlockId> = HashSet::new();

        while let Some(block_id) = to_visit.pop_front() {
            if cancel.is_cancelled() {
                return Err(SyncError::OperationAborted);
            }

            if !seen.insert(block_id) || self.ledger.is_solid_entry_point(&block_id) {
                continue;
            }

            let Some(metadata) = self.ledger.block_metadata(&block_id) else {
                self.requester.request(block_id, index, self.prevent_discard);
                continue;
            };

            if !traversed.insert(block_id) || metadata.is_solid {
                continue;
            }

            to_visit.extend(metadata.parents);
        }

        Ok(())
    }

    /// Forgets walked blocks.
    pub fn cleanup(&self) {
        let mut traversed = self.traversed.lock();
        traversed.clear();
        traversed.shrink_to_fit();
    }

    pub fn traversed_count(&self) -> usize {
        self.traversed.lock().len()
    }
}
