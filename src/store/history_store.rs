//! Bounded history cache keyed by content hash.

use crate::engine::CapTableHistory;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct StoredHistory {
    pub history: Arc<CapTableHistory>,
    /// When the history was first built and cached.
    pub stored_at: DateTime<Utc>,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, StoredHistory>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// Histories shared across requests; the oldest entry is evicted once
/// `capacity` is reached.
pub struct HistoryStore {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        HistoryStore {
            entries: RwLock::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    pub async fn get(&self, id: &str) -> Option<StoredHistory> {
        self.entries.read().await.by_id.get(id).cloned()
    }

    /// Store a history under `id`. Returns the entry already stored under the
    /// same id instead when there is one.
    pub async fn insert(&self, id: String, history: Arc<CapTableHistory>) -> StoredHistory {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.by_id.get(&id) {
            return existing.clone();
        }

        while entries.order.len() >= self.capacity {
            match entries.order.pop_front() {
                Some(oldest) => {
                    entries.by_id.remove(&oldest);
                    tracing::debug!(history_id = %oldest, "evicted history");
                }
                None => break,
            }
        }

        let stored = StoredHistory {
            history,
            stored_at: Utc::now(),
        };
        entries.by_id.insert(id.clone(), stored.clone());
        entries.order.push_back(id);
        stored
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allocation, ClassId, Decimal, HolderName, SecurityClass, SecurityKind, SecurityLedger};
    use crate::engine::HistoryBuilder;

    fn history() -> Arc<CapTableHistory> {
        let ledger = SecurityLedger::new(vec![SecurityClass {
            id: ClassId::new("common"),
            label: "Common".to_string(),
            kind: SecurityKind::Common,
            issue_price_per_share: Decimal::zero(),
            allocations: vec![Allocation::new(HolderName::new("Founder"), 1_000)],
            seniority_rank: None,
            pari_passu: false,
            pro_rata_eligible: false,
            round_index: None,
        }]);
        Arc::new(HistoryBuilder::build(&ledger, &[]).unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = HistoryStore::new(4);
        assert!(store.is_empty().await);
        store.insert("abc".to_string(), history()).await;
        assert!(store.get("abc").await.is_some());
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_evicts_oldest_at_capacity() {
        let store = HistoryStore::new(2);
        store.insert("first".to_string(), history()).await;
        store.insert("second".to_string(), history()).await;
        store.insert("third".to_string(), history()).await;
        assert_eq!(store.len().await, 2);
        assert!(store.get("first").await.is_none());
        assert!(store.get("third").await.is_some());
    }

    #[tokio::test]
    async fn test_reinsert_keeps_original_entry() {
        let store = HistoryStore::new(2);
        let first = store.insert("same".to_string(), history()).await;
        let second = store.insert("same".to_string(), history()).await;
        assert_eq!(first.stored_at, second.stored_at);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let store = HistoryStore::new(0);
        tokio_test::block_on(store.insert("only".to_string(), history()));
        assert_eq!(tokio_test::block_on(store.len()), 1);
    }
}
