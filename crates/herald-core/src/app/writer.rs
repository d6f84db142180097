//! EventWriter - 業務トランザクション内で outbox に event を追記
//!
//! # フロー
//! 1. event を一度だけ serialize（serde_json）
//! 2. RoutingTable から routing key を解決
//! 3. routing key ごとに 1 record を呼び出し元のトランザクションへ insert
//!
//! 失敗は `WriteError` として返す。握りつぶさない：呼び出し元が
//! 業務トランザクションごと rollback するかを決める。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RoutingTable;
use crate::domain::{
    AggregateId, EventType, NewOutboxRecord, OutboxEvent, Payload, RecordId, RoutingKey,
    WriteError,
};
use crate::ports::{IdGenerator, OutboxStore, OutboxTransaction};

pub struct EventWriter {
    store: Arc<dyn OutboxStore>,
    routes: Arc<RoutingTable>,
    ids: Arc<dyn IdGenerator>,
}

impl EventWriter {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        routes: Arc<RoutingTable>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { store, routes, ids }
    }

    /// Append exactly one pending record inside `tx`.
    ///
    /// `payload` must already be in its final wire form.
    pub async fn write(
        &self,
        tx: &mut dyn OutboxTransaction,
        aggregate_id: AggregateId,
        event_type: EventType,
        payload: Payload,
        routing_key: RoutingKey,
    ) -> Result<RecordId, WriteError> {
        if aggregate_id.is_blank() {
            return Err(WriteError::MissingField("aggregate_id"));
        }
        if event_type.is_blank() {
            return Err(WriteError::MissingField("event_type"));
        }
        if routing_key.is_blank() {
            return Err(WriteError::MissingField("routing_key"));
        }

        let record = NewOutboxRecord {
            aggregate_id,
            event_type,
            payload,
            routing_key,
        };
        let (event_type, routing_key) = (record.event_type.clone(), record.routing_key.clone());
        let id = tx.insert(record).await?;
        debug!(record_id = %id, %event_type, %routing_key, "outbox record staged");
        Ok(id)
    }

    /// One record per routing key, all sharing `payload`.
    ///
    /// Every record gets its own generated aggregate id and is delivered
    /// independently of its siblings.
    pub async fn write_to_keys(
        &self,
        tx: &mut dyn OutboxTransaction,
        event_type: &EventType,
        payload: &Payload,
        routing_keys: &[RoutingKey],
    ) -> Result<Vec<RecordId>, WriteError> {
        if routing_keys.is_empty() {
            return Err(WriteError::UnroutedEventType(event_type.clone()));
        }

        let mut ids = Vec::with_capacity(routing_keys.len());
        for routing_key in routing_keys {
            let id = self
                .write(
                    tx,
                    self.ids.generate_aggregate_id(),
                    event_type.clone(),
                    payload.clone(),
                    routing_key.clone(),
                )
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Serialize `event` and write it to every routing key configured for
    /// its event type.
    pub async fn publish<E: OutboxEvent>(
        &self,
        tx: &mut dyn OutboxTransaction,
        event: &E,
    ) -> Result<Vec<RecordId>, WriteError> {
        let event_type = EventType::new(E::EVENT_TYPE);
        let routing_keys = self
            .routes
            .routing_keys(&event_type)
            .ok_or_else(|| WriteError::UnroutedEventType(event_type.clone()))?;
        let payload = Payload::to_json(event).map_err(|source| WriteError::Serialization {
            event_type: event_type.clone(),
            source,
        })?;

        self.write_to_keys(tx, &event_type, &payload, routing_keys)
            .await
    }

    /// `publish` in a transaction of its own, for callers with no other
    /// state to change. Nothing is written if any key fails.
    pub async fn publish_committed<E: OutboxEvent>(
        &self,
        event: &E,
    ) -> Result<Vec<RecordId>, WriteError> {
        let mut tx = self.store.begin().await?;
        let ids = match self.publish(tx.as_mut(), event).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(event_type = E::EVENT_TYPE, error = %e, "outbox write failed, rolling back");
                tx.rollback().await;
                return Err(e);
            }
        };
        tx.commit().await?;
        info!(event_type = E::EVENT_TYPE, records = ids.len(), "event written to outbox");
        Ok(ids)
    }
}
