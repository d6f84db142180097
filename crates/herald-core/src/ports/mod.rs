//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。store（正本）と broker（配送先）、
//! それに時刻と ID 生成をここで抽象化します。

pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod outbox_store;

pub use self::broker::Broker;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::outbox_store::{OutboxStore, OutboxTransaction};
