//! # Controller Configuration
//!
//! Everything a [`crate::FeedController`] needs to run. All fields have
//! defaults, so a JSON document only has to name what it changes.

use serde::{Deserialize, Serialize};

use crate::engine::coalescer::DEFAULT_WINDOW;
use crate::engine::feed_store::DEFAULT_CAPACITY;
use crate::engine::lifecycle_gate::{CoverPolicy, GateTimeline};
use crate::error::ConfigError;
use crate::ingestors::backoff::ReconnectPolicy;

/// Default feed endpoint, matching the backend's development setup.
pub const DEFAULT_FEED_URL: &str = "ws://localhost:8000/ws";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub timeout_ms: u64,
    /// Retries for transient failures (connect errors, 5xx, 429).
    pub retries: u32,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub auth_token: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retries: 3,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// WebSocket endpoint of the live feed.
    pub feed_url: String,
    /// Base URL of the REST backend. Without it there is no start-up
    /// snapshot and plate corrections are refused.
    pub api_url: Option<String>,
    pub capacity: usize,
    pub coalesce_window_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub cover_policy: CoverPolicy,
    pub gate: GateTimeline,
    pub http: HttpOptions,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            api_url: None,
            capacity: DEFAULT_CAPACITY,
            coalesce_window_ms: DEFAULT_WINDOW.as_millis() as u64,
            reconnect: ReconnectPolicy::default(),
            cover_policy: CoverPolicy::default(),
            gate: GateTimeline::default(),
            http: HttpOptions::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_json(text: &str, path: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Rejects values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "feed_url",
                reason: "must not be empty".into(),
            });
        }
        if !(self.feed_url.starts_with("ws://") || self.feed_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                field: "feed_url",
                reason: format!("expected a ws:// or wss:// URL, got {}", self.feed_url),
            });
        }
        if let Some(api) = &self.api_url {
            if !(api.starts_with("http://") || api.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "api_url",
                    reason: format!("expected an http(s) URL, got {api}"),
                });
            }
        }
        if self.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.coalesce_window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "coalesce_window_ms",
                reason: "must be at least 1".into(),
            });
        }
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "reconnect",
                reason: format!(
                    "need 0 < base_delay_ms <= max_delay_ms, got {} and {}",
                    self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
                ),
            });
        }
        if self.http.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "http.timeout_ms",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ControllerConfig::default();
        assert_eq!(config.capacity, 100);
        assert_eq!(config.coalesce_window_ms, 500);
        assert_eq!(config.reconnect.base_delay_ms, 2000);
        assert_eq!(config.cover_policy, CoverPolicy::RecoverOnDisconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = ControllerConfig::from_json(
            r#"{"capacity": 3, "reconnect": {"jitter_ms": 0}, "cover_policy": "reveal_once"}"#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.capacity, 3);
        assert_eq!(config.reconnect.jitter_ms, 0);
        assert_eq!(config.reconnect.max_delay_ms, 4000);
        assert_eq!(config.cover_policy, CoverPolicy::RevealOnce);
        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
    }

    #[test]
    fn invalid_values_name_their_field() {
        let config = ControllerConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "capacity", .. })));

        let config = ControllerConfig {
            feed_url: "http://localhost:8000/ws".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "feed_url", .. })));

        let config = ControllerConfig {
            reconnect: ReconnectPolicy {
                base_delay_ms: 5000,
                max_delay_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "reconnect", .. })));
    }

    #[test]
    fn unparseable_json_reports_the_path() {
        let err = ControllerConfig::from_json("{", "feed_monitor.conf").unwrap_err();
        assert!(err.to_string().contains("feed_monitor.conf"));
    }
}
