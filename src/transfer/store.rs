//! Transfer Record Storage
//!
//! [`TransferStore`] is the persistence seam for the FSM. All state
//! updates are CAS: a transition only applies if the stored state is still
//! the one the caller read, so two workers can never both advance the same
//! transfer.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;

use super::error::TransferError;
use super::state::TransferState;
use super::types::{StateUpdate, TransferRecord};
use crate::idempotency::IdempotencyKey;

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new record unless its idempotency key already exists.
    ///
    /// Returns the stored record and whether this call created it.
    async fn insert_if_absent(
        &self,
        record: TransferRecord,
    ) -> Result<(TransferRecord, bool), TransferError>;

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<TransferRecord>, TransferError>;

    /// Atomic CAS transition with extra fields
    ///
    /// Returns true if the update applied, false if the state didn't match.
    async fn transition(
        &self,
        key: &IdempotencyKey,
        expected: TransferState,
        new_state: TransferState,
        update: StateUpdate,
    ) -> Result<bool, TransferError>;

    /// Atomic CAS transition without extra fields
    async fn update_state_if(
        &self,
        key: &IdempotencyKey,
        expected: TransferState,
        new_state: TransferState,
    ) -> Result<bool, TransferError> {
        self.transition(key, expected, new_state, StateUpdate::default())
            .await
    }

    /// ProviderUnknown transfers whose next status check is due
    async fn find_due_for_reconcile(
        &self,
        now_millis: i64,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;

    /// Records in a recoverable state untouched for longer than `threshold`
    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;

    /// Oldest first
    async fn list_by_state(
        &self,
        state: TransferState,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;
}

/// Process-local transfer store
#[derive(Default)]
pub struct InMemoryTransferStore {
    records: DashMap<IdempotencyKey, TransferRecord>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Test/ops hook: overwrite a record as-is
    pub fn put(&self, record: TransferRecord) {
        self.records.insert(record.idempotency_key.clone(), record);
    }

    fn collect(
        &self,
        limit: usize,
        pred: impl Fn(&TransferRecord) -> bool,
    ) -> Vec<TransferRecord> {
        let mut out: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by_key(|r| r.updated_at);
        out.truncate(limit);
        out
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn insert_if_absent(
        &self,
        record: TransferRecord,
    ) -> Result<(TransferRecord, bool), TransferError> {
        match self.records.entry(record.idempotency_key.clone()) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok((record, true))
            }
        }
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<TransferRecord>, TransferError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn transition(
        &self,
        key: &IdempotencyKey,
        expected: TransferState,
        new_state: TransferState,
        update: StateUpdate,
    ) -> Result<bool, TransferError> {
        let Some(mut record) = self.records.get_mut(key) else {
            return Ok(false);
        };
        if record.state != expected {
            return Ok(false);
        }
        update.apply(&mut record);
        record.state = new_state;
        record.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(true)
    }

    async fn find_due_for_reconcile(
        &self,
        now_millis: i64,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        Ok(self.collect(limit, |r| {
            r.state == TransferState::ProviderUnknown
                && r.next_reconcile_at.is_none_or(|t| t <= now_millis)
        }))
    }

    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let cutoff = chrono::Utc::now().timestamp_millis() - threshold.as_millis() as i64;
        Ok(self.collect(limit, |r| {
            TransferState::recoverable().contains(&r.state) && r.updated_at <= cutoff
        }))
    }

    async fn list_by_state(
        &self,
        state: TransferState,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        Ok(self.collect(limit, |r| r.state == state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(key: &str) -> TransferRecord {
        TransferRecord::new(
            IdempotencyKey::new(key).unwrap(),
            1,
            "0267781294".to_string(),
            100,
        )
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_idempotent() {
        let store = InMemoryTransferStore::new();
        let (first, created) = store.insert_if_absent(record("K1")).await.unwrap();
        assert!(created);

        let (second, created) = store.insert_if_absent(record("K1")).await.unwrap();
        assert!(!created);
        assert_eq!(first.transfer_id, second.transfer_id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_insert_single_winner() {
        let store = Arc::new(InMemoryTransferStore::new());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.insert_if_absent(record("SAME")).await })
            })
            .collect();

        let created = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok((_, true)))))
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_cas_transition() {
        let store = InMemoryTransferStore::new();
        let key = IdempotencyKey::new("K2").unwrap();
        store.insert_if_absent(record("K2")).await.unwrap();

        assert!(
            store
                .update_state_if(&key, TransferState::Requested, TransferState::Reserved)
                .await
                .unwrap()
        );
        // Stale expectation loses
        assert!(
            !store
                .update_state_if(&key, TransferState::Requested, TransferState::Failed)
                .await
                .unwrap()
        );

        assert!(
            store
                .transition(
                    &key,
                    TransferState::Reserved,
                    TransferState::ProviderUnknown,
                    StateUpdate {
                        failure_reason: Some("timeout".to_string()),
                        next_reconcile_at: Some(0),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
        );
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.state, TransferState::ProviderUnknown);
        assert_eq!(stored.failure_reason.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_queries() {
        let store = InMemoryTransferStore::new();

        let mut due = record("DUE");
        due.state = TransferState::ProviderUnknown;
        due.next_reconcile_at = Some(1_000);
        store.put(due);

        let mut later = record("LATER");
        later.state = TransferState::ProviderUnknown;
        later.next_reconcile_at = Some(i64::MAX);
        store.put(later);

        let mut review = record("REVIEW");
        review.state = TransferState::ManualReview;
        store.put(review);

        let found = store.find_due_for_reconcile(2_000, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].idempotency_key.as_str(), "DUE");

        let queue = store
            .list_by_state(TransferState::ManualReview, 10)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);

        // Only the Requested-free set here: nothing recoverable
        let stale = store.find_stale(Duration::ZERO, 10).await.unwrap();
        assert!(stale.is_empty());
    }
}
