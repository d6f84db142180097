//! Demo event payloads.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use herald_core::domain::OutboxEvent;

macro_rules! shape_event {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(rename = "type")]
            pub kind: String,
            /// Milliseconds since the Unix epoch.
            pub timestamp: i64,
        }

        impl $name {
            pub fn now() -> Self {
                Self {
                    kind: stringify!($name).to_string(),
                    timestamp: Utc::now().timestamp_millis(),
                }
            }
        }

        impl OutboxEvent for $name {
            const EVENT_TYPE: &'static str = stringify!($name);
        }
    };
}

shape_event!(Hello);
shape_event!(Square);
shape_event!(Circle);
shape_event!(Pentagon);
