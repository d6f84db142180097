//! Errors - 書き込み・配送・store 操作のエラー分類
//!
//! - `WriteError`: event 書き込み時（呼び出し元に返す）
//! - `BrokerError`: 配送失敗（relay 内で回復、record は pending のまま）
//! - `StoreError`: store 操作の失敗（送信後の mark 失敗は重複配送になる）

use thiserror::Error;

use super::event::EventType;
use super::ids::RecordId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("outbox record {0} not found")]
    NotFound(RecordId),

    #[error("outbox record {0} is already published")]
    AlreadyPublished(RecordId),

    #[error("outbox record {0} has permanently failed")]
    PermanentlyFailed(RecordId),

    #[error("outbox record {0} is claimed by another relay")]
    ClaimedElsewhere(RecordId),

    #[error("outbox store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("required field `{0}` is empty")]
    MissingField(&'static str),

    #[error("no routing keys configured for event type {0}")]
    UnroutedEventType(EventType),

    #[error("failed to serialize {event_type} payload")]
    Serialization {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },

    #[error("outbox insert failed")]
    Store(#[from] StoreError),
}

/// Broker send failure. The relay retries every variant identically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("broker send timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to fetch pending outbox records")]
    Fetch(#[source] StoreError),
}
