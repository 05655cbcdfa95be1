//! Priority queue of outstanding data requests.
//!
//! Every request is in exactly one of three states:
//!
//! - **queued**: waiting to be sent to a peer
//! - **pending**: sent, waiting for the response
//! - **processing**: response arrived, the ledger layer is applying it
//!
//! Requests pop in ascending milestone index order. The order among requests
//! of the same index is unspecified.
//!
//! ## Lazy deletion
//!
//! The `queued` map is authoritative. The heap may hold entries whose request
//! has since been filtered out, received or re-queued under a different
//! index. Such entries are dropped when they reach the top of the heap.
use containers::{BlockId, MilestoneIndex};
use parking_lot::RwLock;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    fmt::{self, Display},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::trace;

use super::config::DEFAULT_LATENCY_RESOLUTION;

/// Identity of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKey {
    Block(BlockId),
    Milestone(MilestoneIndex),
}

impl From<BlockId> for RequestKey {
    fn from(block_id: BlockId) -> Self {
        RequestKey::Block(block_id)
    }
}

impl From<MilestoneIndex> for RequestKey {
    fn from(index: MilestoneIndex) -> Self {
        RequestKey::Milestone(index)
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::Block(block_id) => write!(f, "block {block_id}"),
            RequestKey::Milestone(index) => write!(f, "milestone {index}"),
        }
    }
}

/// One outstanding need for a unit of ledger data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: RequestKey,
    /// Milestone this request belongs to. Lower indices are served first.
    pub milestone_index: MilestoneIndex,
    /// Exempts the request from the staleness discard.
    pub prevent_discard: bool,
    enqueue_time: Option<Instant>,
}

impl Request {
    pub fn new(key: RequestKey, milestone_index: MilestoneIndex) -> Self {
        Self {
            key,
            milestone_index,
            prevent_discard: false,
            enqueue_time: None,
        }
    }

    /// Request for a block referenced under `milestone_index`.
    pub fn block(block_id: BlockId, milestone_index: MilestoneIndex) -> Self {
        Self::new(RequestKey::Block(block_id), milestone_index)
    }

    /// Request for the milestone itself.
    pub fn milestone(index: MilestoneIndex) -> Self {
        Self::new(RequestKey::Milestone(index), index)
    }

    pub fn with_prevent_discard(mut self, prevent_discard: bool) -> Self {
        self.prevent_discard = prevent_discard;
        self
    }

    /// Time of the first insertion into a queue. `None` until enqueued.
    pub fn enqueue_time(&self) -> Option<Instant> {
        self.enqueue_time
    }
}

/// Admission predicate. Requests failing it are neither enqueued nor kept.
pub type RequestFilter = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    milestone_index: MilestoneIndex,
    key: RequestKey,
}

impl Ord for HeapEntry {
    // `BinaryHeap` is a max-heap, lowest milestone index must come out first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .milestone_index
            .cmp(&self.milestone_index)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Snapshot of all requests held by a queue.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub queued: Vec<Request>,
    pub pending: Vec<Request>,
    pub processing: Vec<Request>,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    queued: HashMap<RequestKey, Request>,
    pending: HashMap<RequestKey, Request>,
    processing: HashMap<RequestKey, Request>,
    filter: Option<RequestFilter>,
    latency_sum_ms: u64,
    latency_entries: usize,
}

impl QueueState {
    fn contains(&self, key: &RequestKey) -> bool {
        self.queued.contains_key(key)
            || self.pending.contains_key(key)
            || self.processing.contains_key(key)
    }

    fn passes_filter(&self, request: &Request) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(request))
    }

    fn push(&mut self, request: Request) {
        self.heap.push(HeapEntry {
            milestone_index: request.milestone_index,
            key: request.key,
        });
        self.queued.insert(request.key, request);
    }

    /// Drops stale heap entries until the top refers to a queued request.
    fn discard_stale_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            match self.queued.get(&top.key) {
                Some(request) if request.milestone_index == top.milestone_index => return,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    fn pop(&mut self) -> Option<Request> {
        self.discard_stale_top();
        let entry = self.heap.pop()?;
        self.queued.remove(&entry.key)
    }
}

/// Request queue prioritised by milestone index.
pub struct RequestQueue {
    state: RwLock<QueueState>,
    latency_resolution: usize,
    avg_latency_ms: AtomicU64,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::with_latency_resolution(DEFAULT_LATENCY_RESOLUTION)
    }

    /// Creates a queue averaging latency over `latency_resolution` samples.
    pub fn with_latency_resolution(latency_resolution: usize) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            latency_resolution: latency_resolution.max(1),
            avg_latency_ms: AtomicU64::new(0),
        }
    }

    /// Enqueues the request unless it is already queued, pending or
    /// processing, or fails the installed filter.
    pub fn enqueue(&self, mut request: Request) -> bool {
        let mut state = self.state.write();

        if state.contains(&request.key) {
            return false;
        }
        if !state.passes_filter(&request) {
            return false;
        }

        request.enqueue_time = Some(Instant::now());
        state.push(request);
        true
    }

    /// Pops the request with the lowest milestone index and marks it pending.
    pub fn next(&self) -> Option<Request> {
        let mut state = self.state.write();
        let request = state.pop()?;
        state.pending.insert(request.key, request.clone());
        Some(request)
    }

    /// Returns the next request without changing its state.
    pub fn peek(&self) -> Option<Request> {
        let mut state = self.state.write();
        state.discard_stale_top();
        let top = state.heap.peek()?;
        state.queued.get(&top.key).cloned()
    }

    pub fn is_queued(&self, key: &RequestKey) -> bool {
        self.state.read().queued.contains_key(key)
    }

    pub fn is_pending(&self, key: &RequestKey) -> bool {
        self.state.read().pending.contains_key(key)
    }

    pub fn is_processing(&self, key: &RequestKey) -> bool {
        self.state.read().processing.contains_key(key)
    }

    /// Marks the request as received and moves it to processing.
    ///
    /// Requests re-queued after a timeout are accepted as well. Returns `None`
    /// if the data was never requested.
    pub fn received(&self, key: &RequestKey) -> Option<Request> {
        let mut state = self.state.write();

        if let Some(request) = state.pending.remove(key) {
            if let Some(enqueue_time) = request.enqueue_time {
                let latency_ms = u64::try_from(enqueue_time.elapsed().as_millis()).unwrap_or(u64::MAX);
                state.latency_sum_ms = state.latency_sum_ms.saturating_add(latency_ms);
                state.latency_entries += 1;
                if state.latency_entries >= self.latency_resolution {
                    let avg = state.latency_sum_ms / self.latency_resolution as u64;
                    self.avg_latency_ms.store(avg, AtomicOrdering::Relaxed);
                    state.latency_sum_ms = 0;
                    state.latency_entries = 0;
                }
            }
            state.processing.insert(*key, request.clone());
            return Some(request);
        }

        // the heap entry is dropped lazily on pop
        let request = state.queued.remove(key)?;
        state.processing.insert(*key, request.clone());
        Some(request)
    }

    /// Removes a fulfilled request.
    pub fn processed(&self, key: &RequestKey) -> Option<Request> {
        self.state.write().processing.remove(key)
    }

    /// Moves pending requests back into the queue.
    ///
    /// Requests failing the filter are dropped. Requests older than
    /// `discard_older_than` are discarded unless they prevent discarding, a
    /// zero duration disables discarding. Does nothing while requests are
    /// still queued. Returns the number of queued requests.
    pub fn enqueue_pending(&self, discard_older_than: Duration) -> usize {
        let mut state = self.state.write();

        if !state.queued.is_empty() {
            return state.queued.len();
        }

        let now = Instant::now();
        let pending = std::mem::take(&mut state.pending);
        for (key, request) in pending {
            if !state.passes_filter(&request) {
                trace!(request = %key, "Dropped pending request not matching filter");
                continue;
            }

            let is_stale = request
                .enqueue_time
                .is_some_and(|time| now.duration_since(time) >= discard_older_than);

            if discard_older_than.is_zero() || request.prevent_discard || !is_stale {
                state.push(request);
                continue;
            }

            trace!(request = %key, "Discarded stale pending request");
        }

        state.queued.len()
    }

    /// Returns `(queued, pending, processing)` counts.
    pub fn size(&self) -> (usize, usize, usize) {
        let state = self.state.read();
        (state.queued.len(), state.pending.len(), state.processing.len())
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.queued.is_empty() && state.pending.is_empty() && state.processing.is_empty()
    }

    pub fn requests(&self) -> QueueSnapshot {
        let state = self.state.read();
        QueueSnapshot {
            queued: state.queued.values().cloned().collect(),
            pending: state.pending.values().cloned().collect(),
            processing: state.processing.values().cloned().collect(),
        }
    }

    /// Average time between enqueueing and receiving, in milliseconds, over
    /// the last full sampling window.
    pub fn avg_latency(&self) -> u64 {
        self.avg_latency_ms.load(AtomicOrdering::Relaxed)
    }

    /// Installs a filter, `None` removes the current one.
    ///
    /// Queued and pending requests failing the new filter are evicted.
    /// Processing requests are kept.
    pub fn filter(&self, filter: Option<RequestFilter>) {
        let mut state = self.state.write();

        if let Some(filter) = &filter {
            state.queued.retain(|_, request| filter(request));
            state.pending.retain(|_, request| filter(request));
        }

        state.filter = filter;
    }

    /// Reallocates the internal maps and rebuilds the heap without stale
    /// entries.
    pub fn free_memory(&self) {
        let mut state = self.state.write();

        state.queued.shrink_to_fit();
        state.pending.shrink_to_fit();
        state.processing.shrink_to_fit();

        let heap = state
            .queued
            .values()
            .map(|request| HeapEntry {
                milestone_index: request.milestone_index,
                key: request.key,
            })
            .collect();
        state.heap = heap;
    }

    #[cfg(test)]
    pub(crate) fn heap_len(&self) -> usize {
        self.state.read().heap.len()
    }
}
