//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::{AggregateId, ClaimToken, RelayId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で衝突しない ID を生成
///
/// RecordId は store が採番するので、ここでは扱わない。
pub trait IdGenerator: Send + Sync {
    /// Default aggregate id for a record written without one.
    fn generate_aggregate_id(&self) -> AggregateId;

    fn generate_claim_token(&self) -> ClaimToken;

    fn generate_relay_id(&self) -> RelayId;
}

/// UlidGenerator は Clock の時刻を timestamp 部分に使う
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_aggregate_id(&self) -> AggregateId {
        AggregateId::new(self.next_ulid().to_string())
    }

    fn generate_claim_token(&self) -> ClaimToken {
        ClaimToken::from_ulid(self.next_ulid())
    }

    fn generate_relay_id(&self) -> RelayId {
        RelayId::from_ulid(self.next_ulid())
    }
}
