//! RelayPoller - outbox の pending record を broker に配送する
//!
//! # フロー（1 サイクル）
//! 1. OutboxStore::find_pending() で配送対象を作成順に取得（スナップショット）
//! 2. ClaimMode::Lease なら OutboxStore::claim() で先に確保
//! 3. Broker::send() で送信
//! 4. 成功: OutboxStore::update_published() / 失敗: record_failure() か dead-letter
//!
//! 1 件の失敗でサイクルは止めない。送信成功後に mark が失敗した record は
//! 次のサイクルで再送される（at-least-once）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use crate::domain::{ClaimToken, OutboxRecord, RelayError, RelayId, StoreError};
use crate::observability::CycleReport;
use crate::ports::{Broker, Clock, IdGenerator, OutboxStore};

/// How a relay keeps other relays off the records it is sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// No claim step. Only correct while exactly one relay runs against the
    /// store; two relays can send the same record twice.
    SingleInstance,

    /// Claim each record before sending. The claim lapses after the lease so a
    /// crashed relay does not strand its records.
    Lease(Duration),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub exchange: String,
    pub poll_interval: Duration,
    pub batch_size: Option<usize>,
    pub claim: ClaimMode,
    pub retry: RetryPolicy,
}

impl RelayConfig {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            poll_interval: Duration::from_secs(1),
            batch_size: None,
            claim: ClaimMode::Lease(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of relaying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Published,
    /// Send failed; record stays pending.
    Failed,
    /// Send failed and the attempt budget is spent.
    DeadLettered,
    /// Another relay holds the record.
    Skipped,
    /// Sent, but the store could not mark it. It will be sent again.
    Unconfirmed,
    /// Sent, but another relay had already published it.
    Duplicate,
    /// Send failed after our lease ran out and another relay claimed the
    /// record. Left to that relay.
    ClaimLost,
}

pub struct RelayPoller {
    id: RelayId,
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: RelayConfig,
}

impl RelayPoller {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: RelayConfig,
    ) -> Self {
        Self {
            id: ids.generate_relay_id(),
            store,
            broker,
            clock,
            ids,
            config,
        }
    }

    pub fn id(&self) -> RelayId {
        self.id
    }

    /// One pass over the pending records visible at the start of the cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, RelayError> {
        let now = self.clock.now();
        let records = self
            .store
            .find_pending(now, self.config.batch_size)
            .await
            .map_err(RelayError::Fetch)?;

        let mut report = CycleReport {
            fetched: records.len(),
            ..CycleReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        info!(relay_id = %self.id, count = records.len(), "found unpublished outbox records");

        for record in records {
            match self.relay_one(record).await {
                RecordOutcome::Published => report.published += 1,
                RecordOutcome::Failed => report.failed += 1,
                RecordOutcome::DeadLettered => report.dead_lettered += 1,
                RecordOutcome::Skipped => report.skipped += 1,
                RecordOutcome::Unconfirmed => report.unconfirmed += 1,
                RecordOutcome::Duplicate => report.duplicates += 1,
                RecordOutcome::ClaimLost => report.claim_lost += 1,
            }
        }

        Ok(report)
    }

    async fn relay_one(&self, record: OutboxRecord) -> RecordOutcome {
        let mut token = None;
        if let ClaimMode::Lease(lease) = self.config.claim {
            let now = self.clock.now();
            let claim = self.ids.generate_claim_token();
            match self
                .store
                .claim(record.id, claim, deadline_after(now, lease), now)
                .await
            {
                Ok(true) => token = Some(claim),
                Ok(false) => {
                    debug!(relay_id = %self.id, record_id = %record.id, "record claimed elsewhere, skipping");
                    return RecordOutcome::Skipped;
                }
                Err(e) => {
                    warn!(relay_id = %self.id, record_id = %record.id, error = %e, "claim failed, skipping");
                    return RecordOutcome::Skipped;
                }
            }
        }

        let sent = self
            .broker
            .send(
                &self.config.exchange,
                record.routing_key.as_str(),
                record.payload.as_bytes(),
            )
            .await;

        match sent {
            Ok(()) => self.confirm(&record).await,
            Err(e) => {
                self.handle_send_failure(&record, token, e.to_string())
                    .await
            }
        }
    }

    async fn confirm(&self, record: &OutboxRecord) -> RecordOutcome {
        match self.store.update_published(record.id, self.clock.now()).await {
            Ok(()) => {
                info!(
                    relay_id = %self.id,
                    record_id = %record.id,
                    routing_key = %record.routing_key,
                    "published outbox record"
                );
                RecordOutcome::Published
            }
            Err(StoreError::AlreadyPublished(_)) => {
                warn!(
                    relay_id = %self.id,
                    record_id = %record.id,
                    "record was already published by another relay; duplicate delivery"
                );
                RecordOutcome::Duplicate
            }
            Err(e) => {
                error!(
                    relay_id = %self.id,
                    record_id = %record.id,
                    routing_key = %record.routing_key,
                    error = %e,
                    "sent to broker but failed to mark published; it will be sent again"
                );
                RecordOutcome::Unconfirmed
            }
        }
    }

    async fn handle_send_failure(
        &self,
        record: &OutboxRecord,
        token: Option<ClaimToken>,
        error: String,
    ) -> RecordOutcome {
        let now = self.clock.now();
        let attempts = record.attempts + 1;
        let retry = &self.config.retry;

        let (stored, outcome) = if retry.is_exhausted(attempts) {
            error!(
                relay_id = %self.id,
                record_id = %record.id,
                routing_key = %record.routing_key,
                attempts,
                error = %error,
                "giving up on outbox record"
            );
            let stored = self
                .store
                .mark_failed_permanent(record.id, token, error, now)
                .await;
            (stored, RecordOutcome::DeadLettered)
        } else {
            let delay = retry.next_delay(attempts);
            let next_attempt_at = (!delay.is_zero()).then(|| deadline_after(now, delay));
            error!(
                relay_id = %self.id,
                record_id = %record.id,
                routing_key = %record.routing_key,
                attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "failed to publish outbox record"
            );
            let stored = self
                .store
                .record_failure(record.id, token, error, next_attempt_at)
                .await;
            (stored, RecordOutcome::Failed)
        };

        match stored {
            Ok(()) => outcome,
            Err(StoreError::ClaimedElsewhere(_)) => {
                warn!(
                    relay_id = %self.id,
                    record_id = %record.id,
                    "lease expired during send and another relay claimed the record; leaving it"
                );
                RecordOutcome::ClaimLost
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "failed to record delivery failure");
                outcome
            }
        }
    }

    /// Run cycles every `poll_interval` until shutdown is requested.
    ///
    /// The interval is measured from the end of one cycle to the start of the
    /// next. Shutdown is observed between cycles only, so an in-flight cycle
    /// always finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            relay_id = %self.id,
            exchange = %self.config.exchange,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            claim = ?self.config.claim,
            "outbox relay starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) if !report.is_idle() => {
                    debug!(relay_id = %self.id, ?report, "relay cycle finished");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(relay_id = %self.id, error = %e, "relay cycle failed");
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    // Sender dropped: nobody can stop us any more, so stop now.
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(relay_id = %self.id, "outbox relay stopped");
    }

    /// Run on a background task.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        RelayHandle { shutdown_tx, join }
    }
}

fn deadline_after(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Handle to a spawned relay.
/// - `request_shutdown()` で次のサイクル前に止まる
/// - `shutdown_and_join()` で実行中のサイクルを待ってから終了
pub struct RelayHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the relay may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(error = %e, "outbox relay task ended abnormally");
        }
    }
}
