//! Bounded message history with a staging set for propagation.
//!
//! `history` holds every message this node knows about, ordered by id, and
//! never reaches the configured limit: inserting the `limit`-th entry evicts
//! the oldest ids until the size is back below it.
//!
//! `pending` holds messages staged on this node since the last
//! [`MessageStore::clear_pending`]. The sync engine pushes them to peers once
//! per round and then clears the set.

use crate::message::{Message, MessageId};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Default)]
struct StoreState {
    history: BTreeMap<MessageId, Message>,
    pending: BTreeMap<MessageId, Message>,
    /// Highest id handed out by `add_new_message`
    last_assigned: MessageId,
}

/// Thread-safe message store, one lock per instance.
pub struct MessageStore {
    state: Mutex<StoreState>,
    limit: usize,
}

impl MessageStore {
    /// Create a store keeping fewer than `limit` messages.
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Insert or overwrite a message, then evict oldest ids down to the limit.
    ///
    /// Does not stage the message for propagation.
    pub fn add_message(&self, id: MessageId, peer_id: &str, content: &str) {
        let mut state = self.lock();
        debug!("Store message {} from peer {}", id, peer_id);
        Self::insert(&mut state, self.limit, id, Message::new(peer_id, content));
    }

    /// Store a message originating on this node and stage it for propagation.
    ///
    /// The id is the current time in milliseconds, bumped past the last id
    /// this store assigned so messages created in the same millisecond stay
    /// distinct. Returns the assigned id.
    pub fn add_new_message(&self, peer_id: &str, content: &str) -> MessageId {
        let mut state = self.lock();
        let id = now_millis().max(state.last_assigned + 1);
        state.last_assigned = id;
        debug!("Store new message {} from peer {}", id, peer_id);
        Self::stage(&mut state, self.limit, id, Message::new(peer_id, content));
        id
    }

    /// Store a message under a caller-supplied id and stage it for propagation.
    ///
    /// Used when a peer pushes a message that already has an id, so every node
    /// keeps it under the same key.
    pub fn stage_message(&self, id: MessageId, peer_id: &str, content: &str) {
        let mut state = self.lock();
        debug!("Stage message {} from peer {}", id, peer_id);
        Self::stage(&mut state, self.limit, id, Message::new(peer_id, content));
    }

    /// Snapshot of the history, ordered by id.
    pub fn get_messages(&self) -> BTreeMap<MessageId, Message> {
        let state = self.lock();
        debug!("Returning {} messages", state.history.len());
        state.history.clone()
    }

    /// Snapshot of messages staged since the last clear.
    pub fn get_pending_messages(&self) -> BTreeMap<MessageId, Message> {
        let state = self.lock();
        debug!("Returning {} pending messages", state.pending.len());
        state.pending.clone()
    }

    /// Drop every staged message.
    pub fn clear_pending(&self) {
        let mut state = self.lock();
        debug!("Clearing {} pending messages", state.pending.len());
        state.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stage(state: &mut StoreState, limit: usize, id: MessageId, message: Message) {
        Self::insert(state, limit, id, message.clone());
        // The id may have been evicted right away if it is older than the
        // whole retained window; pending never outlives history.
        if state.history.contains_key(&id) {
            state.pending.insert(id, message);
        }
    }

    fn insert(state: &mut StoreState, limit: usize, id: MessageId, message: Message) {
        state.history.insert(id, message);
        while state.history.len() >= limit {
            let Some((evicted, _)) = state.history.pop_first() else {
                break;
            };
            debug!(
                "Evicted message {} to stay below history limit {}",
                evicted, limit
            );
            state.pending.remove(&evicted);
        }
    }
}

fn now_millis() -> MessageId {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as MessageId)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ids(store: &MessageStore) -> Vec<MessageId> {
        store.get_messages().keys().copied().collect()
    }

    // ==================== add_message ====================

    #[test]
    fn test_add_message_is_upsert() {
        let store = MessageStore::new(100);
        store.add_message(1, "alice", "first");
        store.add_message(1, "bob", "second");
        store.add_message(1, "carol", "third");

        let messages = store.get_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[&1], Message::new("carol", "third"));
    }

    #[test]
    fn test_add_message_does_not_stage() {
        let store = MessageStore::new(100);
        store.add_message(1, "alice", "hi");
        assert!(store.get_pending_messages().is_empty());
    }

    #[test]
    fn test_history_is_ordered_by_id() {
        let store = MessageStore::new(100);
        store.add_message(30, "a", "c");
        store.add_message(10, "a", "a");
        store.add_message(20, "a", "b");
        assert_eq!(ids(&store), vec![10, 20, 30]);
    }

    // ==================== Eviction ====================

    #[test]
    fn test_history_stays_below_limit() {
        let store = MessageStore::new(5);
        for id in 1..=20 {
            store.add_message(id, "a", "m");
            assert!(store.len() < 5);
        }
        assert_eq!(ids(&store), vec![17, 18, 19, 20]);
    }

    #[test]
    fn test_eviction_keeps_largest_ids_regardless_of_insert_order() {
        let store = MessageStore::new(4);
        for id in [50, 10, 40, 20, 30, 60, 5] {
            store.add_message(id, "a", "m");
        }
        // An old id inserted into a full window is evicted straight away
        assert_eq!(ids(&store), vec![40, 50, 60]);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let store = MessageStore::new(3);
        store.add_message(1, "a", "m");
        store.add_message(2, "a", "m");
        store.add_message(2, "b", "updated");
        assert_eq!(ids(&store), vec![1, 2]);
    }

    #[test]
    fn test_limit_of_one_keeps_nothing() {
        let store = MessageStore::new(1);
        store.add_message(1, "a", "m");
        assert!(store.is_empty());
        store.add_new_message("a", "m");
        assert!(store.is_empty());
        assert!(store.get_pending_messages().is_empty());
    }

    // ==================== Pending ====================

    #[test]
    fn test_add_new_message_stages_and_returns_id() {
        let store = MessageStore::new(100);
        let id = store.add_new_message("alice", "hi");

        assert_eq!(store.get_messages()[&id], Message::new("alice", "hi"));
        assert_eq!(store.get_pending_messages()[&id], Message::new("alice", "hi"));
    }

    #[test]
    fn test_new_message_ids_are_time_based_and_increasing() {
        let store = MessageStore::new(100);
        let before = now_millis();
        let first = store.add_new_message("a", "1");
        let second = store.add_new_message("a", "2");
        let third = store.add_new_message("a", "3");

        assert!(first >= before);
        assert!(first < second && second < third);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_stage_message_keeps_supplied_id() {
        let store = MessageStore::new(100);
        store.stage_message(1234, "bob", "relayed");

        assert_eq!(store.get_messages()[&1234], Message::new("bob", "relayed"));
        assert!(store.get_pending_messages().contains_key(&1234));
    }

    #[test]
    fn test_clear_pending_keeps_history() {
        let store = MessageStore::new(100);
        let id = store.add_new_message("alice", "hi");
        store.clear_pending();

        assert!(store.get_pending_messages().is_empty());
        assert!(store.get_messages().contains_key(&id));
    }

    #[test]
    fn test_pending_is_subset_of_history_after_eviction() {
        let store = MessageStore::new(3);
        store.stage_message(1, "a", "m");
        store.stage_message(2, "a", "m");
        store.add_message(3, "b", "m");
        store.add_message(4, "b", "m");

        let history = store.get_messages();
        let pending = store.get_pending_messages();
        assert!(pending.keys().all(|id| history.contains_key(id)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_snapshots_are_detached() {
        let store = MessageStore::new(100);
        store.add_message(1, "a", "m");
        let snapshot = store.get_messages();
        store.add_message(2, "a", "m");
        assert_eq!(snapshot.len(), 1);
    }

    // ==================== Concurrency ====================

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(MessageStore::new(1_000_000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        store.add_new_message(&format!("peer-{}", t), &i.to_string());
                        store.add_message(t * 10_000 + i, "remote", "m");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.get_pending_messages().len(), 1000);
        assert_eq!(store.len(), 2000);
    }
}
