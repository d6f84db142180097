//! InMemoryBroker - 開発・テスト用の broker
//!
//! 送信された message を記録するだけ。障害注入（停止・N 回失敗・
//! 特定 routing key の拒否・遅延）でリレーの挙動を再現できます。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{BrokerError, Payload};
use crate::ports::Broker;

/// One message the broker accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Payload,
}

#[derive(Default)]
struct BrokerState {
    deliveries: Vec<Delivery>,

    /// Number of `send` calls so far (successful or not).
    attempts: usize,

    down: bool,
    fail_next: usize,

    /// 1-indexed attempt numbers that fail.
    failing_attempts: HashSet<usize>,

    rejected_keys: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    latency: Option<Duration>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send waits `latency` before it is accepted.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency: Some(latency),
        }
    }

    pub async fn set_down(&self, down: bool) {
        self.state.lock().await.down = down;
    }

    pub async fn fail_next(&self, n: usize) {
        self.state.lock().await.fail_next = n;
    }

    /// Fail the given send attempts (1-indexed, counted across all keys).
    pub async fn fail_attempts(&self, attempts: &[usize]) {
        self.state
            .lock()
            .await
            .failing_attempts
            .extend(attempts.iter().copied());
    }

    pub async fn reject_routing_key(&self, routing_key: &str) {
        self.state
            .lock()
            .await
            .rejected_keys
            .insert(routing_key.to_string());
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().await.deliveries.clone()
    }

    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let attempt = {
            let mut state = self.state.lock().await;
            state.attempts += 1;
            let attempt = state.attempts;

            if state.down {
                return Err(BrokerError::Unavailable("broker is down".into()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(BrokerError::Unavailable("connection reset".into()));
            }
            if state.failing_attempts.contains(&attempt) {
                return Err(BrokerError::Unavailable(format!("attempt {attempt} failed")));
            }
            if state.rejected_keys.contains(routing_key) {
                return Err(BrokerError::Rejected(format!(
                    "no binding for routing key {routing_key}"
                )));
            }
            attempt
        };

        // Lock is not held across the simulated network round trip.
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.state.lock().await.deliveries.push(Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: Payload::new(payload),
        });
        debug!(exchange, routing_key, attempt, "message accepted");
        Ok(())
    }
}
