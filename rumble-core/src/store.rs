//! Storage collaborator interfaces and an in-memory implementation.
//!
//! The engine never owns persistence: it inserts received statuses, reads
//! scoring inputs and fetches records through these traits.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::identity::StatusUid;
use crate::status::{ChatMessage, StatusMessage};

/// Result of a deduplicated status insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub row_id: u64,
    pub duplicate: bool,
}

/// Inputs of the scoring function for one stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringRecord {
    pub id: u64,
    pub hop_count: u8,
    pub like: u16,
    pub replication: u32,
    pub time_of_creation: u64,
    pub ttl: u8,
}

impl ScoringRecord {
    pub fn from_status(id: u64, status: &StatusMessage) -> Self {
        Self {
            id,
            hop_count: status.hop_count,
            like: status.like,
            replication: status.replication,
            time_of_creation: status.time_of_creation,
            ttl: status.ttl,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("status {0} not found")]
    NotFound(u64),
}

pub trait StatusStore: Send + Sync {
    /// Insert unless a status with the same UID exists; a duplicate returns the existing row.
    fn insert_status(&self, status: &StatusMessage) -> Result<InsertOutcome, StoreError>;

    fn statuses_for_scoring(&self) -> Result<Vec<ScoringRecord>, StoreError>;

    /// Full records for `ids`; unknown ids are skipped.
    fn batch_status(&self, ids: &[u64]) -> Result<Vec<(u64, StatusMessage)>, StoreError>;

    fn increment_replication(&self, id: u64) -> Result<(), StoreError>;
}

pub trait ChatStore: Send + Sync {
    /// Returns true when the message was already stored.
    fn insert_chat(&self, message: &ChatMessage) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct MemoryTables {
    statuses: BTreeMap<u64, StatusMessage>,
    by_uid: HashMap<StatusUid, u64>,
    next_row: u64,
    chats: HashMap<String, ChatMessage>,
}

/// Thread-safe in-memory store. Row ids start at 1 and only increase.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_count(&self) -> usize {
        self.tables.read().statuses.len()
    }

    pub fn status(&self, id: u64) -> Option<StatusMessage> {
        self.tables.read().statuses.get(&id).cloned()
    }

    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        let mut out: Vec<_> = self.tables.read().chats.values().cloned().collect();
        out.sort_by_key(|m| m.timestamp);
        out
    }
}

impl StatusStore for MemoryStore {
    fn insert_status(&self, status: &StatusMessage) -> Result<InsertOutcome, StoreError> {
        let mut t = self.tables.write();
        if let Some(&row_id) = t.by_uid.get(&status.uid) {
            // Keep the shortest path and remember every peer that sent it.
            if let Some(existing) = t.statuses.get_mut(&row_id) {
                existing.hop_count = existing.hop_count.min(status.hop_count);
                for f in &status.forwarders {
                    existing.add_forwarder(f);
                }
            }
            return Ok(InsertOutcome {
                row_id,
                duplicate: true,
            });
        }
        t.next_row += 1;
        let row_id = t.next_row;
        t.by_uid.insert(status.uid, row_id);
        t.statuses.insert(row_id, status.clone());
        Ok(InsertOutcome {
            row_id,
            duplicate: false,
        })
    }

    fn statuses_for_scoring(&self) -> Result<Vec<ScoringRecord>, StoreError> {
        let t = self.tables.read();
        Ok(t.statuses
            .iter()
            .map(|(&id, s)| ScoringRecord::from_status(id, s))
            .collect())
    }

    fn batch_status(&self, ids: &[u64]) -> Result<Vec<(u64, StatusMessage)>, StoreError> {
        let t = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| t.statuses.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    fn increment_replication(&self, id: u64) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let status = t.statuses.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        status.replication = status.replication.saturating_add(1);
        Ok(())
    }
}

impl ChatStore for MemoryStore {
    fn insert_chat(&self, message: &ChatMessage) -> Result<bool, StoreError> {
        let mut t = self.tables.write();
        if t.chats.contains_key(&message.id) {
            return Ok(true);
        }
        t.chats.insert(message.id.clone(), message.clone());
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_assigns_increasing_rows() {
        let store = MemoryStore::new();
        let a = store
            .insert_status(&StatusMessage::with_time("a", "one", 1))
            .unwrap();
        let b = store
            .insert_status(&StatusMessage::with_time("a", "two", 2))
            .unwrap();
        assert!(!a.duplicate);
        assert!(!b.duplicate);
        assert!(b.row_id > a.row_id);
        assert_eq!(store.status_count(), 2);
    }

    #[test]
    fn duplicate_insert_merges_forwarders() {
        let store = MemoryStore::new();
        let mut s = StatusMessage::with_time("a", "one", 1);
        s.hop_count = 3;
        s.add_forwarder("peer-1");
        let first = store.insert_status(&s).unwrap();

        let mut again = s.clone();
        again.hop_count = 1;
        again.forwarders = vec!["peer-2".into()];
        let second = store.insert_status(&again).unwrap();

        assert!(second.duplicate);
        assert_eq!(second.row_id, first.row_id);
        let stored = store.status(first.row_id).unwrap();
        assert_eq!(stored.hop_count, 1);
        assert_eq!(stored.forwarders, vec!["peer-1", "peer-2"]);
    }

    #[test]
    fn batch_skips_unknown_ids() {
        let store = MemoryStore::new();
        let row = store
            .insert_status(&StatusMessage::with_time("a", "one", 1))
            .unwrap()
            .row_id;
        let out = store.batch_status(&[row, 999]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, row);
    }

    #[test]
    fn replication_feeds_scoring_records() {
        let store = MemoryStore::new();
        let row = store
            .insert_status(&StatusMessage::with_time("a", "one", 1))
            .unwrap()
            .row_id;
        store.increment_replication(row).unwrap();
        store.increment_replication(row).unwrap();
        let records = store.statuses_for_scoring().unwrap();
        assert_eq!(records[0].replication, 2);
        assert!(matches!(
            store.increment_replication(404),
            Err(StoreError::NotFound(404))
        ));
    }

    #[test]
    fn chat_dedup_by_id() {
        let store = MemoryStore::new();
        let msg = ChatMessage::new("#Nearby", "bob", "hi");
        assert!(!store.insert_chat(&msg).unwrap());
        assert!(store.insert_chat(&msg).unwrap());
        assert_eq!(store.chat_messages().len(), 1);
    }
}
