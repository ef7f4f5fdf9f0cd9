//! Priority dissemination engine: a global ranked index of every local status
//! and one bounded dispatch queue per connected peer.
//!
//! Lock order is peer queue, then index. Admission releases the index lock
//! before fanning out, so a busy peer queue never holds up the index.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::scoring::score;
use crate::status::{is_expired, now_millis};
use crate::store::{ScoringRecord, StatusStore, StoreError};

/// A status id paired with its score. Higher scores sort first; equal scores
/// fall back to the id so distinct statuses never collapse in a set.
#[derive(Debug, Clone, Copy)]
pub struct ScoredEntry {
    pub id: u64,
    pub score: f64,
}

impl Ord for ScoredEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredEntry {}

#[derive(Default)]
struct GlobalIndex {
    ranked: BTreeSet<ScoredEntry>,
    records: HashMap<u64, ScoringRecord>,
}

impl GlobalIndex {
    fn insert(&mut self, record: ScoringRecord, now: u64) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.ranked.insert(ScoredEntry {
            id: record.id,
            score: score(&record, now),
        });
        self.records.insert(record.id, record);
        true
    }
}

type SharedIndex = Arc<Mutex<GlobalIndex>>;

pub struct MessageQueue {
    index: SharedIndex,
    peers: Mutex<HashMap<String, Arc<PeerQueue>>>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            index: Arc::new(Mutex::new(GlobalIndex::default())),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Load every unexpired status from storage into the index. Returns how
    /// many were added.
    pub fn rebuild(&self, store: &dyn StatusStore) -> Result<usize, StoreError> {
        let records = store.statuses_for_scoring()?;
        let now = now_millis();
        let mut index = self.index.lock();
        let mut added = 0;
        for record in records {
            if is_expired(record.time_of_creation, record.ttl, now) {
                continue;
            }
            if index.insert(record, now) {
                added += 1;
            }
        }
        info!(added, total = index.records.len(), "message index rebuilt");
        Ok(added)
    }

    /// Score and index a new status, then offer it to every open peer queue.
    /// Returns false if the id was already indexed.
    pub fn admit(&self, record: ScoringRecord) -> bool {
        if !self.index.lock().insert(record, now_millis()) {
            return false;
        }
        let peers: Vec<_> = self.peers.lock().values().cloned().collect();
        for peer in peers {
            if !peer.offer(record.id) {
                debug!(peer = %peer.key, id = record.id, "peer queue full, left for refill");
            }
        }
        true
    }

    /// Bump the replication count used the next time the status is scored.
    pub fn increment_replication(&self, id: u64) {
        if let Some(record) = self.index.lock().records.get_mut(&id) {
            record.replication = record.replication.saturating_add(1);
        }
    }

    /// Open the dispatch queue for a peer. An existing queue under the same key
    /// is closed and replaced.
    pub fn open_peer_queue(&self, key: impl Into<String>, capacity: usize) -> Arc<PeerQueue> {
        let key = key.into();
        let queue = Arc::new(PeerQueue::new(key.clone(), capacity, self.index.clone()));
        if let Some(old) = self.peers.lock().insert(key, queue.clone()) {
            old.close();
        }
        queue
    }

    pub fn close_peer_queue(&self, key: &str) {
        if let Some(queue) = self.peers.lock().remove(key) {
            queue.close();
        }
    }

    pub fn close_all(&self) {
        let peers: Vec<_> = self.peers.lock().drain().map(|(_, q)| q).collect();
        for queue in peers {
            queue.close();
        }
    }

    pub fn len(&self) -> usize {
        self.index.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index order, best first.
    pub fn ranked(&self) -> Vec<ScoredEntry> {
        self.index.lock().ranked.iter().copied().collect()
    }
}

struct PeerState {
    pending: Vec<u64>,
    /// Ids ever queued for this peer. Never shrinks while the queue lives.
    seen: HashSet<u64>,
    closed: bool,
}

/// Bounded per-peer view of the index. Holds at most `capacity` ids not yet
/// handed to the peer; `take` re-scores them and returns the best.
pub struct PeerQueue {
    key: String,
    capacity: usize,
    index: SharedIndex,
    state: Mutex<PeerState>,
    notify: Notify,
}

impl PeerQueue {
    fn new(key: String, capacity: usize, index: SharedIndex) -> Self {
        Self {
            key,
            capacity: capacity.max(1),
            index,
            state: Mutex::new(PeerState {
                pending: Vec::new(),
                seen: HashSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Non-blocking push of a freshly admitted id. False when full, closed or
    /// already seen; a rejected id stays eligible for the next refill.
    fn offer(&self, id: u64) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed || state.seen.contains(&id) || state.pending.len() >= self.capacity {
                return false;
            }
            state.pending.push(id);
            state.seen.insert(id);
        }
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Next status to send, best score first. Waits while nothing unseen is
    /// indexed; returns `None` once the queue is closed.
    pub async fn take(&self) -> Option<ScoringRecord> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.try_take() {
                return next;
            }
            notified.await;
        }
    }

    /// `Some(None)` when closed, `Some(record)` when one is ready, `None` when
    /// the caller has to wait.
    fn try_take(&self) -> Option<Option<ScoringRecord>> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(None);
        }
        let index = self.index.lock();
        if state.pending.len() < self.capacity {
            let room = self.capacity - state.pending.len();
            let fresh: Vec<u64> = index
                .ranked
                .iter()
                .map(|e| e.id)
                .filter(|id| !state.seen.contains(id))
                .take(room)
                .collect();
            for id in fresh {
                state.seen.insert(id);
                state.pending.push(id);
            }
        }

        let now = now_millis();
        let best = state
            .pending
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| {
                index.records.get(id).map(|r| {
                    (
                        pos,
                        ScoredEntry {
                            id: *id,
                            score: score(r, now),
                        },
                    )
                })
            })
            .min_by(|(_, x), (_, y)| x.cmp(y))?;
        let (pos, entry) = best;
        state.pending.swap_remove(pos);
        index.records.get(&entry.id).copied().map(Some)
    }
}
