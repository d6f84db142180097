//! OutboxStore port - outbox テーブルの正本（source of truth）
//!
//! # 設計原則
//! - record の insert は呼び出し元のトランザクション内で行う
//!   （業務状態の変更と outbox 追記は同時に commit / rollback される）
//! - relay は read → claim → send → conditional update の順で触る
//! - record は削除しない（監査・リプレイ用に残す）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ClaimToken, NewOutboxRecord, OutboxRecord, RecordId, StoreError};
use crate::observability::OutboxCounts;

/// A local transaction on the store.
///
/// Records inserted here become visible to the relay only after `commit`.
/// Dropping the transaction without committing discards its writes.
#[async_trait]
pub trait OutboxTransaction: Send {
    /// Stage one record. The returned id is final even though the row is
    /// not visible until commit.
    async fn insert(&mut self, record: NewOutboxRecord) -> Result<RecordId, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>);
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, StoreError>;

    /// Insert in a transaction of its own.
    async fn insert(&self, record: NewOutboxRecord) -> Result<RecordId, StoreError> {
        let mut tx = self.begin().await?;
        let id = match tx.insert(record).await {
            Ok(id) => id,
            Err(e) => {
                tx.rollback().await;
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(id)
    }

    /// Records eligible for delivery at `now`, ordered by (`created_at`, `id`).
    ///
    /// Excludes published and dead-lettered records, records still in
    /// backoff, and records held by an unexpired claim.
    async fn find_pending(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Claim the record if it is still pending and unclaimed.
    ///
    /// Returns `Ok(false)` when someone else got there first.
    async fn claim(
        &self,
        id: RecordId,
        token: ClaimToken,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Pending -> Published. Fails with `AlreadyPublished` instead of
    /// overwriting an earlier `published_at`.
    ///
    /// Not guarded by the claim: the broker already accepted the message.
    async fn update_published(
        &self,
        id: RecordId,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Count a failed attempt, schedule the next one, release the claim.
    ///
    /// `token` is the caller's claim, `None` without a claim step. Fails with
    /// `ClaimedElsewhere` while another relay holds an unexpired claim.
    async fn record_failure(
        &self,
        id: RecordId,
        token: Option<ClaimToken>,
        error: String,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Pending -> FailedPermanent. Same claim check as `record_failure`.
    async fn mark_failed_permanent(
        &self,
        id: RecordId,
        token: Option<ClaimToken>,
        error: String,
        failed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>, StoreError>;

    async fn counts(&self) -> Result<OutboxCounts, StoreError>;
}
