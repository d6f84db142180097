//! Domain model (IDs, events, records, delivery state, errors).

pub mod errors;
pub mod event;
pub mod ids;
pub mod record;
pub mod state;

pub use self::errors::{BrokerError, RelayError, StoreError, WriteError};
pub use self::event::{AggregateId, EventType, OutboxEvent, Payload, RoutingKey};
pub use self::ids::{ClaimToken, RecordId, RelayId};
pub use self::record::{Claim, NewOutboxRecord, OutboxRecord};
pub use self::state::DeliveryState;
