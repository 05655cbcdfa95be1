//! Ledger state consumed by the sync core.
//!
//! The sync core never writes to the ledger. It only asks whether data is
//! already present, walks parent references of stored blocks, and reads the
//! local sync progress.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use containers::{BlockId, BlockMetadata, MilestoneIndex, SyncStatus};
use parking_lot::RwLock;

pub trait Ledger: Send + Sync {
    fn contains_block(&self, block_id: &BlockId) -> bool;

    fn contains_milestone(&self, index: MilestoneIndex) -> bool;

    /// Solid entry points mark the historical boundary below which nothing
    /// is requested anymore.
    fn is_solid_entry_point(&self, block_id: &BlockId) -> bool;

    fn milestone_parents(&self, index: MilestoneIndex) -> Option<Vec<BlockId>>;

    fn block_metadata(&self, block_id: &BlockId) -> Option<BlockMetadata>;

    fn sync_status(&self) -> SyncStatus;

    /// Kicks the milestone solidifier, used when a requested range turns out
    /// to be present locally already.
    fn trigger_solidifier(&self);
}

#[derive(Debug, Default)]
struct MemoryLedgerState {
    blocks: HashMap<BlockId, BlockMetadata>,
    milestones: HashMap<MilestoneIndex, Vec<BlockId>>,
    solid_entry_points: HashSet<BlockId>,
    status: SyncStatus,
}

/// Ledger kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<MemoryLedgerState>,
    solidifier_triggers: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&self, metadata: BlockMetadata) {
        self.state.write().blocks.insert(metadata.block_id, metadata);
    }

    pub fn add_milestone(&self, index: MilestoneIndex, parents: Vec<BlockId>) {
        self.state.write().milestones.insert(index, parents);
    }

    pub fn add_solid_entry_point(&self, block_id: BlockId) {
        self.state.write().solid_entry_points.insert(block_id);
    }

    pub fn set_sync_status(&self, status: SyncStatus) {
        self.state.write().status = status;
    }

    pub fn set_confirmed_milestone_index(&self, index: MilestoneIndex) {
        self.state.write().status.confirmed_milestone_index = index;
    }

    /// Number of times the solidifier was kicked.
    pub fn solidifier_triggers(&self) -> usize {
        self.solidifier_triggers.load(Ordering::Relaxed)
    }
}

impl Ledger for MemoryLedger {
    fn contains_block(&self, block_id: &BlockId) -> bool {
        self.state.read().blocks.contains_key(block_id)
    }

    fn contains_milestone(&self, index: MilestoneIndex) -> bool {
        self.state.read().milestones.contains_key(&index)
    }

    fn is_solid_entry_point(&self, block_id: &BlockId) -> bool {
        self.state.read().solid_entry_points.contains(block_id)
    }

    fn milestone_parents(&self, index: MilestoneIndex) -> Option<Vec<BlockId>> {
        self.state.read().milestones.get(&index).cloned()
    }

    fn block_metadata(&self, block_id: &BlockId) -> Option<BlockMetadata> {
        self.state.read().blocks.get(block_id).cloned()
    }

    fn sync_status(&self) -> SyncStatus {
        self.state.read().status
    }

    fn trigger_solidifier(&self) {
        self.solidifier_triggers.fetch_add(1, Ordering::Relaxed);
    }
}
