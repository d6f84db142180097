//! herald-core
//!
//! Transactional outbox: events are written to an outbox table in the same
//! transaction as the business change, and a relay delivers them to the
//! message broker afterwards (at-least-once).
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, event, record, state, errors）
//! - **ports**: 抽象化レイヤー（OutboxStore, Broker, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（EventWriter, RelayPoller, RetryPolicy）
//! - **impls**: 実装（InMemoryOutboxStore, InMemoryBroker など開発用）
//! - **config**: ルーティング表と relay 設定
//! - **observability**: 件数・サイクル結果のビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
