//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryOutboxStore**: 業務状態と outbox を同じトランザクションで扱う store
//! - **InMemoryBroker**: 送信内容を記録し、障害を注入できる broker
//!
//! # 本番用実装
//! PostgreSQL / RabbitMQ の実装は別クレートに置く想定です。

pub mod memory_broker;
pub mod memory_store;

pub use self::memory_broker::{Delivery, InMemoryBroker};
pub use self::memory_store::{InMemoryOutboxStore, InMemoryTransaction};
