//! App - アプリケーション層
//!
//! ports を組み合わせて outbox の書き込みと配送を実装します。
//!
//! # 主要コンポーネント
//! - **EventWriter**: 業務トランザクション内で outbox に record を追記
//! - **RelayPoller**: pending record を broker に配送するループ
//! - **RetryPolicy**: 送信失敗時の backoff と dead-letter の閾値

pub mod relay;
pub mod retry;
pub mod writer;

pub use self::relay::{ClaimMode, RecordOutcome, RelayConfig, RelayHandle, RelayPoller};
pub use self::retry::RetryPolicy;
pub use self::writer::EventWriter;
