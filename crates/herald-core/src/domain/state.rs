//! Delivery state machine of an outbox record.

use serde::{Deserialize, Serialize};

/// Delivery state, derived from the record's flags.
///
/// State transitions:
/// - Pending -> Published (broker accepted the send)
/// - Pending -> Pending (send failed; retried on a later cycle)
/// - Pending -> FailedPermanent (attempt limit reached, when one is configured)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Published,
    FailedPermanent,
}
