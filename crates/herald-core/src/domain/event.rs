//! Event - outbox に書き込むイベントの型
//!
//! `OutboxEvent` は event_type と型を対応付けます。
//! routing key の解決は writer が設定（RoutingTable）から行います。

use serde::{Deserialize, Serialize};
use std::fmt;

/// OutboxEvent は event_type とペイロード型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize)]
/// struct Square { timestamp: i64 }
///
/// impl OutboxEvent for Square {
///     const EVENT_TYPE: &'static str = "Square";
/// }
/// ```
pub trait OutboxEvent: Serialize + Send + Sync {
    const EVENT_TYPE: &'static str;
}

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_newtype!(
    /// Logical type tag of a payload (e.g. "Square").
    EventType
);

string_newtype!(
    /// Broker-side address for a message (e.g. "shape.square").
    RoutingKey
);

string_newtype!(
    /// Originating business entity of an outbox record. Free-form.
    AggregateId
);

/// Serialized event body. Stored and forwarded byte-for-byte.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// UTF-8 view, if the payload is text.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => write!(f, "Payload({text:?})"),
            None => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}
