//! InMemoryOutboxStore - 開発・テスト用の outbox store
//!
//! # 実装詳細
//! - `BTreeMap<RecordId, OutboxRecord>` が outbox テーブル
//! - 業務状態（key -> JSON）も同じ Mutex の下に置き、
//!   outbox 追記と同じトランザクションで commit できるようにする
//! - ID は insert 時に採番（rollback された ID は再利用しない）

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    ClaimToken, DeliveryState, NewOutboxRecord, OutboxRecord, RecordId, StoreError,
};
use crate::observability::OutboxCounts;
use crate::ports::{Clock, OutboxStore, OutboxTransaction};

struct StoreState {
    /// All outbox records (single source of truth).
    records: BTreeMap<RecordId, OutboxRecord>,

    /// Business state written alongside outbox records.
    business: HashMap<String, serde_json::Value>,

    next_id: u64,

    /// Injected faults: the next N `update_published` calls fail.
    failing_updates: usize,
}

impl StoreState {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            business: HashMap::new(),
            next_id: 1,
            failing_updates: 0,
        }
    }

    fn allocate_id(&mut self) -> RecordId {
        let id = RecordId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn record_mut(&mut self, id: RecordId) -> Result<&mut OutboxRecord, StoreError> {
        self.records.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

/// In-memory store. Clones share the same table.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryOutboxStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::new())),
            clock,
        }
    }

    /// Begin a transaction with access to business state.
    pub fn begin_local(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            staged: Vec::new(),
            business: Vec::new(),
        }
    }

    /// Committed business state for `key`.
    pub async fn business_state(&self, key: &str) -> Option<serde_json::Value> {
        let state = self.state.lock().await;
        state.business.get(key).cloned()
    }

    /// Every committed record, in id order.
    pub async fn records(&self) -> Vec<OutboxRecord> {
        let state = self.state.lock().await;
        state.records.values().cloned().collect()
    }

    /// Make the next `n` calls to `update_published` fail as if the
    /// database had gone away.
    pub async fn fail_next_updates(&self, n: usize) {
        let mut state = self.state.lock().await;
        state.failing_updates = n;
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, StoreError> {
        Ok(Box::new(self.begin_local()))
    }

    async fn find_pending(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<OutboxRecord> = state
            .records
            .values()
            .filter(|r| r.is_eligible(now))
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.created_at, r.id));
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn claim(
        &self,
        id: RecordId,
        token: ClaimToken,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        Ok(record.try_claim(token, lease_until, now))
    }

    async fn update_published(
        &self,
        id: RecordId,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(StoreError::Unavailable("injected update failure".into()));
        }
        state.record_mut(id)?.mark_published(published_at)
    }

    async fn record_failure(
        &self,
        id: RecordId,
        token: Option<ClaimToken>,
        error: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state
            .record_mut(id)?
            .record_failure(token, error, next_attempt_at, now)
    }

    async fn mark_failed_permanent(
        &self,
        id: RecordId,
        token: Option<ClaimToken>,
        error: String,
        failed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .record_mut(id)?
            .mark_failed_permanent(token, error, failed_at)
    }

    async fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn counts(&self) -> Result<OutboxCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = OutboxCounts::default();
        for record in state.records.values() {
            match record.state() {
                DeliveryState::Pending => counts.pending += 1,
                DeliveryState::Published => counts.published += 1,
                DeliveryState::FailedPermanent => counts.failed_permanent += 1,
            }
        }
        Ok(counts)
    }
}

/// Transaction on an [`InMemoryOutboxStore`].
///
/// Nothing is visible to readers until `commit`; dropping it is a rollback.
pub struct InMemoryTransaction {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
    staged: Vec<OutboxRecord>,
    business: Vec<(String, serde_json::Value)>,
}

impl InMemoryTransaction {
    /// Stage a business-state write committed together with the outbox rows.
    pub fn put_state(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.business.push((key.into(), value));
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for record in self.staged {
            state.records.insert(record.id, record);
        }
        for (key, value) in self.business {
            state.business.insert(key, value);
        }
        Ok(())
    }

    pub fn rollback(self) {}
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn insert(&mut self, record: NewOutboxRecord) -> Result<RecordId, StoreError> {
        let id = self.state.lock().await.allocate_id();
        self.staged.push(OutboxRecord::new(id, record, self.clock.now()));
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        (*self).commit().await
    }

    async fn rollback(self: Box<Self>) {
        (*self).rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AggregateId, EventType, Payload, RoutingKey};
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn new_record(key: &str) -> NewOutboxRecord {
        NewOutboxRecord {
            aggregate_id: AggregateId::new(format!("agg-{key}")),
            event_type: EventType::new("Square"),
            payload: Payload::new(r#"{"type":"Square"}"#),
            routing_key: RoutingKey::new(key),
        }
    }

    fn store() -> (InMemoryOutboxStore, FixedClock) {
        let clock = FixedClock::new(t0());
        (InMemoryOutboxStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn insert_assigns_monotonic_ids() {
        let (store, _) = store();
        let a = store.insert(new_record("a")).await.unwrap();
        let b = store.insert(new_record("b")).await.unwrap();
        assert!(a < b);

        let record = store.get(a).await.unwrap().unwrap();
        assert_eq!(record.state(), DeliveryState::Pending);
        assert_eq!(record.created_at, t0());
    }

    #[tokio::test]
    async fn uncommitted_records_are_invisible() {
        let (store, _) = store();
        let mut tx = store.begin_local();
        let id = tx.insert(new_record("a")).await.unwrap();

        assert!(store.get(id).await.unwrap().is_none());
        assert!(store.find_pending(t0(), None).await.unwrap().is_empty());

        tx.commit().await.unwrap();
        assert!(store.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rollback_discards_records_and_business_state() {
        let (store, _) = store();
        let mut tx = store.begin_local();
        tx.put_state("orders/1", serde_json::json!({"status": "placed"}));
        tx.insert(new_record("a")).await.unwrap();
        tx.rollback();

        assert!(store.records().await.is_empty());
        assert!(store.business_state("orders/1").await.is_none());
    }

    #[tokio::test]
    async fn find_pending_orders_by_created_at_then_id() {
        let (store, clock) = store();
        let first = store.insert(new_record("a")).await.unwrap();
        let second = store.insert(new_record("b")).await.unwrap();
        clock.advance(Duration::seconds(1));
        let third = store.insert(new_record("c")).await.unwrap();

        let ids: Vec<_> = store
            .find_pending(clock.now(), None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first, second, third]);

        let limited = store.find_pending(clock.now(), Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn claim_is_conditional() {
        let (store, clock) = store();
        let id = store.insert(new_record("a")).await.unwrap();
        let lease = clock.now() + Duration::seconds(30);

        let first = ClaimToken::from_ulid(Ulid::new());
        let second = ClaimToken::from_ulid(Ulid::new());
        assert!(store.claim(id, first, lease, clock.now()).await.unwrap());
        assert!(!store.claim(id, second, lease, clock.now()).await.unwrap());
        assert!(store.find_pending(clock.now(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_published_reports_missing_and_repeated_updates() {
        let (store, clock) = store();
        let missing = RecordId::new(99);
        assert_eq!(
            store.update_published(missing, clock.now()).await.unwrap_err(),
            StoreError::NotFound(missing)
        );

        let id = store.insert(new_record("a")).await.unwrap();
        store.update_published(id, clock.now()).await.unwrap();
        assert_eq!(
            store.update_published(id, clock.now()).await.unwrap_err(),
            StoreError::AlreadyPublished(id)
        );

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.published, 1);
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test]
    async fn injected_update_failures_are_consumed() {
        let (store, clock) = store();
        let id = store.insert(new_record("a")).await.unwrap();
        store.fail_next_updates(1).await;

        assert!(matches!(
            store.update_published(id, clock.now()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.update_published(id, clock.now()).await.unwrap();
    }

    #[tokio::test]
    async fn expired_claimant_cannot_release_a_newer_claim() {
        let (store, clock) = store();
        let id = store.insert(new_record("a")).await.unwrap();

        let a = ClaimToken::from_ulid(Ulid::new());
        assert!(store
            .claim(id, a, clock.now() + Duration::seconds(1), clock.now())
            .await
            .unwrap());

        clock.advance(Duration::seconds(2));
        let b = ClaimToken::from_ulid(Ulid::new());
        assert!(store
            .claim(id, b, clock.now() + Duration::seconds(30), clock.now())
            .await
            .unwrap());

        assert_eq!(
            store
                .record_failure(id, Some(a), "timeout".into(), None)
                .await
                .unwrap_err(),
            StoreError::ClaimedElsewhere(id)
        );

        assert!(store.find_pending(clock.now(), None).await.unwrap().is_empty());
        let c = ClaimToken::from_ulid(Ulid::new());
        assert!(!store
            .claim(id, c, clock.now() + Duration::seconds(30), clock.now())
            .await
            .unwrap());

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.attempts, 0);
        assert_eq!(record.claim.map(|claim| claim.token), Some(b));
    }
}
