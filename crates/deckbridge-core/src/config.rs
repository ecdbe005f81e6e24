//! Client configuration.
//!
//! Configuration comes from two places: a settings document (the host's
//! settings store, as JSON) and the process environment. Every field has a
//! default, so an empty document yields a usable configuration pointing at
//! the local companion.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::Endpoint;

/// Default companion host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default companion port.
pub const DEFAULT_PORT: u16 = 48969;

/// Settings section holding the client keys.
pub const SETTINGS_SECTION: &str = "streamdeck";
/// Settings key for the companion host.
pub const HOST_SETTING: &str = "serverHost";
/// Settings key for the companion port.
pub const PORT_SETTING: &str = "serverPort";
/// Settings key for the reconnect policy.
pub const RECONNECT_SETTING: &str = "reconnect";

/// Environment variable overriding the host.
pub const HOST_ENV: &str = "DECKBRIDGE_HOST";
/// Environment variable overriding the port.
pub const PORT_ENV: &str = "DECKBRIDGE_PORT";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Invalid setting {key}: {source}")]
    InvalidSetting {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Delay strategy between reconnect attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Backoff {
    /// Reconnect as soon as the connection drops.
    #[default]
    Immediate,
    /// Wait the same delay before every attempt.
    Fixed { delay_ms: u64 },
    /// Double the delay after every failed attempt, up to `max_ms`.
    Exponential { initial_ms: u64, max_ms: u64 },
}

/// Reconnect policy settings.
///
/// The default (immediate, unlimited) suits a companion on the same machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    /// Delay strategy.
    pub backoff: Backoff,
    /// Give up after this many consecutive failed attempts.
    pub max_attempts: Option<u32>,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeckConfig {
    /// Companion host.
    pub host: String,
    /// Companion port.
    pub port: u16,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl DeckConfig {
    /// Read the configuration from a settings document.
    ///
    /// Keys may be flat (`"streamdeck.serverHost"`) or nested under a
    /// `"streamdeck"` object. Missing or `null` keys keep their defaults.
    ///
    /// # Errors
    /// Returns error if a present key has the wrong shape.
    pub fn from_settings(settings: &Value) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = read_setting(settings, HOST_SETTING)? {
            config.host = host;
        }
        if let Some(port) = read_setting(settings, PORT_SETTING)? {
            config.port = port;
        }
        if let Some(reconnect) = read_setting(settings, RECONNECT_SETTING)? {
            config.reconnect = reconnect;
        }

        Ok(config)
    }

    /// Read the configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if `DECKBRIDGE_PORT` is not a valid port.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Override host and port with values from `lookup`.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    /// Returns error if the port value is not a valid port.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        if let Some(port) = lookup(PORT_ENV).filter(|p| !p.trim().is_empty()) {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        Ok(self)
    }

    /// Endpoint described by this configuration.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

fn read_setting<T: DeserializeOwned>(settings: &Value, key: &str) -> Result<Option<T>, ConfigError> {
    let flat = format!("{SETTINGS_SECTION}.{key}");
    let value = settings
        .get(&flat)
        .or_else(|| settings.get(SETTINGS_SECTION).and_then(|s| s.get(key)))
        .filter(|v| !v.is_null());

    value
        .map(|v| {
            serde_json::from_value(v.clone())
                .map_err(|source| ConfigError::InvalidSetting { key: flat, source })
        })
        .transpose()
}

/// Remembers the endpoint last applied to the session manager.
///
/// The host calls [`ConfigTracker::observe`] whenever its settings change;
/// only a real endpoint change comes back as `Some`.
#[derive(Debug, Clone)]
pub struct ConfigTracker {
    current: Endpoint,
}

impl ConfigTracker {
    /// Start tracking from the endpoint in use.
    #[must_use]
    pub const fn new(current: Endpoint) -> Self {
        Self { current }
    }

    /// The endpoint last applied.
    #[must_use]
    pub const fn current(&self) -> &Endpoint {
        &self.current
    }

    /// Record `config` and return its endpoint if it differs from the current one.
    pub fn observe(&mut self, config: &DeckConfig) -> Option<Endpoint> {
        let endpoint = config.endpoint();
        if endpoint == self.current {
            return None;
        }
        tracing::debug!(from = %self.current, to = %endpoint, "endpoint changed");
        self.current = endpoint.clone();
        Some(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeckConfig::from_settings(&json!({})).unwrap();
        assert_eq!(config.endpoint(), Endpoint::new("127.0.0.1", 48969));
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_flat_keys() {
        let settings = json!({
            "streamdeck.serverHost": "deck.local",
            "streamdeck.serverPort": 5000,
            "editor.fontSize": 12
        });
        let config = DeckConfig::from_settings(&settings).unwrap();
        assert_eq!(config.endpoint(), Endpoint::new("deck.local", 5000));
    }

    #[test]
    fn test_nested_keys_and_null() {
        let settings = json!({
            "streamdeck": { "serverHost": null, "serverPort": 6000 }
        });
        let config = DeckConfig::from_settings(&settings).unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, 6000);
    }

    #[test]
    fn test_reconnect_setting() {
        let settings = json!({
            "streamdeck.reconnect": {
                "backoff": { "strategy": "exponential", "initialMs": 100, "maxMs": 5000 },
                "maxAttempts": 10
            }
        });
        let config = DeckConfig::from_settings(&settings).unwrap();
        assert_eq!(
            config.reconnect.backoff,
            Backoff::Exponential {
                initial_ms: 100,
                max_ms: 5000
            }
        );
        assert_eq!(config.reconnect.max_attempts, Some(10));
    }

    #[test]
    fn test_invalid_port_setting() {
        let settings = json!({ "streamdeck.serverPort": "not-a-port" });
        let err = DeckConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == "streamdeck.serverPort"));
    }

    #[test]
    fn test_overlay() {
        let env: HashMap<&str, &str> = HashMap::from([(HOST_ENV, "10.0.0.2"), (PORT_ENV, " 7000 ")]);
        let config = DeckConfig::default()
            .overlay(|key| env.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.endpoint(), Endpoint::new("10.0.0.2", 7000));

        let empty = DeckConfig::default().overlay(|_| Some(String::new())).unwrap();
        assert_eq!(empty, DeckConfig::default());

        let bad = DeckConfig::default().overlay(|key| (key == PORT_ENV).then(|| "99999".to_string()));
        assert!(matches!(bad, Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn test_tracker_reports_only_changes() {
        let mut tracker = ConfigTracker::new(Endpoint::new(DEFAULT_HOST, DEFAULT_PORT));
        assert_eq!(tracker.observe(&DeckConfig::default()), None);

        let moved = DeckConfig {
            port: 48970,
            ..DeckConfig::default()
        };
        assert_eq!(tracker.observe(&moved), Some(Endpoint::new(DEFAULT_HOST, 48970)));
        assert_eq!(tracker.observe(&moved), None);
        assert_eq!(tracker.current().port, 48970);
    }
}
