//! Config - ルーティングと relay の設定
//!
//! 以前は exchange 名や routing key が定数として散らばっていたものを、
//! writer と relay に構築時に渡す 1 つの構造体にまとめています。
//!
//! ```json
//! {
//!   "exchange": "shapes.exchange",
//!   "routes": { "Pentagon": ["shape.pentagon.1", "shape.pentagon.2"] },
//!   "relay": { "poll_interval_ms": 1000, "claim_lease_ms": 30000 }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::relay::{ClaimMode, RelayConfig};
use crate::app::retry::RetryPolicy;
use crate::domain::{EventType, RoutingKey};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub exchange: String,

    /// event_type -> routing keys (one outbox record per key).
    pub routes: BTreeMap<String, Vec<String>>,

    pub relay: RelaySettings,
}

/// Relay settings as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub poll_interval_ms: u64,

    /// Max records per cycle. `None` takes every pending record.
    pub batch_size: Option<usize>,

    /// Claim lease. `None` means a single relay instance with no claim step.
    pub claim_lease_ms: Option<u64>,

    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,

    /// Dead-letter threshold. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        let routes = [
            ("Hello", vec!["hello"]),
            ("Square", vec!["shape.square"]),
            ("Circle", vec!["shape.circle"]),
            ("Pentagon", vec!["shape.pentagon.1", "shape.pentagon.2"]),
        ]
        .into_iter()
        .map(|(event_type, keys)| {
            (
                event_type.to_string(),
                keys.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();

        Self {
            exchange: "shapes.exchange".to_string(),
            routes,
            relay: RelaySettings::default(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            poll_interval_ms: 1_000,
            batch_size: None,
            claim_lease_ms: Some(30_000),
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            retry_multiplier: retry.multiplier,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
            max_attempts: retry.max_attempts,
        }
    }
}

impl OutboxConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::Invalid("exchange must not be empty".into()));
        }
        if self.routes.is_empty() {
            return Err(ConfigError::Invalid("at least one route is required".into()));
        }
        for (event_type, keys) in &self.routes {
            if event_type.trim().is_empty() {
                return Err(ConfigError::Invalid("event type must not be empty".into()));
            }
            if keys.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "event type {event_type} has no routing keys"
                )));
            }
            if keys.iter().any(|k| k.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "event type {event_type} has an empty routing key"
                )));
            }
        }

        let relay = &self.relay;
        if relay.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if relay.batch_size == Some(0) {
            return Err(ConfigError::Invalid("batch_size must be > 0".into()));
        }
        if relay.claim_lease_ms == Some(0) {
            return Err(ConfigError::Invalid("claim_lease_ms must be > 0".into()));
        }
        if !relay.retry_multiplier.is_finite() || relay.retry_multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry_multiplier must be >= 1.0".into()));
        }
        if relay.retry_max_delay_ms < relay.retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry_max_delay_ms must be >= retry_base_delay_ms".into(),
            ));
        }
        if relay.max_attempts == Some(0) {
            return Err(ConfigError::Invalid("max_attempts must be > 0".into()));
        }
        Ok(())
    }

    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::new(
            self.routes
                .iter()
                .map(|(event_type, keys)| {
                    (
                        EventType::new(event_type.as_str()),
                        keys.iter().map(|k| RoutingKey::new(k.as_str())).collect(),
                    )
                })
                .collect(),
        )
    }

    pub fn relay_config(&self) -> RelayConfig {
        let relay = &self.relay;
        RelayConfig {
            exchange: self.exchange.clone(),
            poll_interval: Duration::from_millis(relay.poll_interval_ms),
            batch_size: relay.batch_size,
            claim: match relay.claim_lease_ms {
                Some(ms) => ClaimMode::Lease(Duration::from_millis(ms)),
                None => ClaimMode::SingleInstance,
            },
            retry: RetryPolicy {
                base_delay: Duration::from_millis(relay.retry_base_delay_ms),
                multiplier: relay.retry_multiplier,
                max_delay: Duration::from_millis(relay.retry_max_delay_ms),
                max_attempts: relay.max_attempts,
            },
        }
    }
}

/// event_type -> routing keys, resolved at write time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<EventType, Vec<RoutingKey>>,
}

impl RoutingTable {
    pub fn new(routes: BTreeMap<EventType, Vec<RoutingKey>>) -> Self {
        Self { routes }
    }

    /// Add or replace the keys for one event type.
    pub fn with_route(mut self, event_type: impl Into<EventType>, keys: &[&str]) -> Self {
        self.routes.insert(
            event_type.into(),
            keys.iter().map(|k| RoutingKey::new(*k)).collect(),
        );
        self
    }

    pub fn routing_keys(&self, event_type: &EventType) -> Option<&[RoutingKey]> {
        self.routes
            .get(event_type)
            .map(Vec::as_slice)
            .filter(|keys| !keys.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_config_routes_pentagon_to_two_keys() {
        let config = OutboxConfig::default();
        config.validate().unwrap();

        let table = config.routing_table();
        let keys = table.routing_keys(&EventType::new("Pentagon")).unwrap();
        assert_eq!(
            keys,
            &[RoutingKey::new("shape.pentagon.1"), RoutingKey::new("shape.pentagon.2")]
        );
        assert_eq!(config.exchange, "shapes.exchange");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = OutboxConfig::from_json_str(
            r#"{ "exchange": "orders.exchange", "routes": { "OrderPlaced": ["order.placed"] } }"#,
        )
        .unwrap();

        assert_eq!(config.exchange, "orders.exchange");
        assert_eq!(config.relay, RelaySettings::default());
        assert!(config
            .routing_table()
            .routing_keys(&EventType::new("Square"))
            .is_none());
    }

    #[test]
    fn relay_config_maps_settings() {
        let config = OutboxConfig::from_json_str(
            r#"{ "relay": { "poll_interval_ms": 250, "claim_lease_ms": null, "max_attempts": 5, "batch_size": 10 } }"#,
        )
        .unwrap();

        let relay = config.relay_config();
        assert_eq!(relay.poll_interval, Duration::from_millis(250));
        assert_eq!(relay.claim, ClaimMode::SingleInstance);
        assert_eq!(relay.batch_size, Some(10));
        assert_eq!(relay.retry.max_attempts, Some(5));
        assert_eq!(relay.exchange, "shapes.exchange");
    }

    #[rstest]
    #[case::empty_exchange(r#"{ "exchange": " " }"#)]
    #[case::no_routes(r#"{ "routes": {} }"#)]
    #[case::route_without_keys(r#"{ "routes": { "Square": [] } }"#)]
    #[case::blank_key(r#"{ "routes": { "Square": [""] } }"#)]
    #[case::zero_interval(r#"{ "relay": { "poll_interval_ms": 0 } }"#)]
    #[case::zero_lease(r#"{ "relay": { "claim_lease_ms": 0 } }"#)]
    #[case::shrinking_backoff(r#"{ "relay": { "retry_multiplier": 0.5 } }"#)]
    #[case::cap_below_base(r#"{ "relay": { "retry_base_delay_ms": 5000, "retry_max_delay_ms": 1000 } }"#)]
    #[case::zero_max_attempts(r#"{ "relay": { "max_attempts": 0 } }"#)]
    fn invalid_configs_are_rejected(#[case] json: &str) {
        let err = OutboxConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err:?}");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = OutboxConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref path, .. } if path.ends_with("here.json")));
    }
}
