//! Broker port - メッセージブローカーへの送信
//!
//! exchange / queue / binding のトポロジーは外部で事前に用意されている前提。

use async_trait::async_trait;

use crate::domain::BrokerError;

/// Broker は payload を exchange + routing key に送る
///
/// # 契約
/// - at-least-once: relay は同じ payload を複数回送ることがある
/// - 失敗はすべて一時的なものとして扱われ、次のサイクルで再送される
/// - timeout は実装側が持つ（relay 側では強制しない）
#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError>;
}
