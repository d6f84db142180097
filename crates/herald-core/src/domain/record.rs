//! Outbox record: the row the writer appends and the relay mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;
use super::event::{AggregateId, EventType, Payload, RoutingKey};
use super::ids::{ClaimToken, RecordId};
use super::state::DeliveryState;

/// Insert input: everything the caller supplies. The store fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxRecord {
    pub aggregate_id: AggregateId,
    pub event_type: EventType,
    pub payload: Payload,
    pub routing_key: RoutingKey,
}

/// A poller's claim on a pending record. Expired leases count as no claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub token: ClaimToken,
    pub lease_until: DateTime<Utc>,
}

/// One outbox row.
///
/// Invariants:
/// - `published` goes false -> true once and never back.
/// - `published_at.is_some() == published`.
/// - `failed_at` is set only while `published` is false, and is terminal.
///
/// Mutation goes through the methods below so the store implementations
/// share one state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: RecordId,
    pub aggregate_id: AggregateId,
    pub event_type: EventType,
    pub payload: Payload,
    pub routing_key: RoutingKey,
    pub created_at: DateTime<Utc>,

    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,

    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,

    /// Backoff: not eligible before this instant.
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub claim: Option<Claim>,

    /// Set when the record is dead-lettered.
    pub failed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(id: RecordId, new: NewOutboxRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            payload: new.payload,
            routing_key: new.routing_key,
            created_at,
            published: false,
            published_at: None,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            claim: None,
            failed_at: None,
        }
    }

    pub fn state(&self) -> DeliveryState {
        if self.published {
            DeliveryState::Published
        } else if self.failed_at.is_some() {
            DeliveryState::FailedPermanent
        } else {
            DeliveryState::Pending
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == DeliveryState::Pending
    }

    /// Held by some poller with an unexpired lease?
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claim
            .as_ref()
            .is_some_and(|claim| claim.lease_until > now)
    }

    /// Should a relay cycle starting at `now` pick this record up?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.is_pending()
            && self.next_attempt_at.is_none_or(|at| at <= now)
            && !self.is_claimed(now)
    }

    /// Conditional claim: succeeds only if still pending and unclaimed.
    pub fn try_claim(
        &mut self,
        token: ClaimToken,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_pending() || self.is_claimed(now) {
            return false;
        }
        self.claim = Some(Claim { token, lease_until });
        true
    }

    /// Not guarded by the claim: the broker already has the message, so the
    /// fact is recorded whoever sent it. A later holder sees `AlreadyPublished`.
    pub fn mark_published(&mut self, at: DateTime<Utc>) -> Result<(), StoreError> {
        match self.state() {
            DeliveryState::Published => Err(StoreError::AlreadyPublished(self.id)),
            DeliveryState::FailedPermanent => Err(StoreError::PermanentlyFailed(self.id)),
            DeliveryState::Pending => {
                self.published = true;
                self.published_at = Some(at);
                self.next_attempt_at = None;
                self.claim = None;
                Ok(())
            }
        }
    }

    /// Count a failed send and release the claim. The record stays pending.
    ///
    /// `token` is the caller's claim (`None` without a claim step). Fails with
    /// `ClaimedElsewhere` if another relay holds an unexpired claim at `now`.
    pub fn record_failure(
        &mut self,
        token: Option<ClaimToken>,
        error: String,
        next_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_pending()?;
        self.ensure_not_claimed_by_other(token, now)?;
        self.attempts += 1;
        self.last_error = Some(error);
        self.next_attempt_at = next_attempt_at;
        self.claim = None;
        Ok(())
    }

    /// Dead-letter the record. Counts the final attempt too.
    pub fn mark_failed_permanent(
        &mut self,
        token: Option<ClaimToken>,
        error: String,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_pending()?;
        self.ensure_not_claimed_by_other(token, at)?;
        self.attempts += 1;
        self.last_error = Some(error);
        self.next_attempt_at = None;
        self.claim = None;
        self.failed_at = Some(at);
        Ok(())
    }

    fn ensure_not_claimed_by_other(
        &self,
        token: Option<ClaimToken>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match &self.claim {
            Some(claim) if claim.lease_until > now && Some(claim.token) != token => {
                Err(StoreError::ClaimedElsewhere(self.id))
            }
            _ => Ok(()),
        }
    }

    fn ensure_pending(&self) -> Result<(), StoreError> {
        match self.state() {
            DeliveryState::Pending => Ok(()),
            DeliveryState::Published => Err(StoreError::AlreadyPublished(self.id)),
            DeliveryState::FailedPermanent => Err(StoreError::PermanentlyFailed(self.id)),
        }
    }
}
