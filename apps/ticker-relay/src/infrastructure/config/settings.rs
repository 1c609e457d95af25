//! Relay Configuration Settings
//!
//! Configuration types for the ticker relay, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::ticker::DEFAULT_DISPLAY_FIELD;
use crate::infrastructure::upbit::market_api::{
    DEFAULT_MARKET_PREFIX, DEFAULT_REFERENCE_TIMEOUT, DEFAULT_REFERENCE_URL,
};
use crate::infrastructure::upbit::reconnect::DEFAULT_RECONNECT_DELAY;
use crate::infrastructure::upbit::session::{DEFAULT_KEEPALIVE, DEFAULT_UPSTREAM_URL};
use crate::infrastructure::upbit::subscription::{DEFAULT_CHUNK_SIZE, DEFAULT_TICKET_PREFIX};

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub relay_port: u16,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            relay_port: 8080,
            health_port: 8082,
        }
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// WebSocket URL.
    pub url: String,
    /// Maximum codes per subscription frame.
    pub chunk_size: usize,
    /// Delay before each reconnection attempt.
    pub reconnect_delay: Duration,
    /// Keepalive ping interval (`None` = disabled).
    pub keepalive: Option<Duration>,
    /// Ticket prefix for subscription frames.
    pub ticket_prefix: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive: Some(DEFAULT_KEEPALIVE),
            ticket_prefix: DEFAULT_TICKET_PREFIX.to_string(),
        }
    }
}

/// Reference data settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSettings {
    /// Market list URL.
    pub url: String,
    /// Market code prefix to keep (empty = all).
    pub market_prefix: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_REFERENCE_URL.to_string(),
            market_prefix: DEFAULT_MARKET_PREFIX.to_string(),
            timeout: DEFAULT_REFERENCE_TIMEOUT,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream feed settings.
    pub upstream: UpstreamSettings,
    /// Reference data settings.
    pub reference: ReferenceSettings,
    /// Field that carries the display name on enriched records.
    pub display_field: String,
    /// Capacity of the upstream event channel.
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            upstream: UpstreamSettings::default(),
            reference: ReferenceSettings::default(),
            display_field: DEFAULT_DISPLAY_FIELD.to_string(),
            event_capacity: 4096,
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable or invalid
    /// value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is unparseable or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = EnvReader { lookup: &lookup };

        let server = ServerSettings {
            relay_port: env.parse("WEBSOCKET_RELAY_PORT", defaults.server.relay_port)?,
            health_port: env.parse("TICKER_RELAY_HEALTH_PORT", defaults.server.health_port)?,
        };

        let upstream = UpstreamSettings {
            url: env.string("TICKER_RELAY_UPSTREAM_URL", &defaults.upstream.url),
            chunk_size: env.parse(
                "TICKER_RELAY_SUBSCRIBE_CHUNK_SIZE",
                defaults.upstream.chunk_size,
            )?,
            reconnect_delay: env
                .parse_opt::<u64>("TICKER_RELAY_RECONNECT_DELAY_MS")?
                .map_or(defaults.upstream.reconnect_delay, Duration::from_millis),
            keepalive: match env.parse_opt::<u64>("TICKER_RELAY_KEEPALIVE_SECS")? {
                None => defaults.upstream.keepalive,
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
            },
            ticket_prefix: env.string(
                "TICKER_RELAY_TICKET_PREFIX",
                &defaults.upstream.ticket_prefix,
            ),
        };

        let reference = ReferenceSettings {
            url: env.string("TICKER_RELAY_REFERENCE_URL", &defaults.reference.url),
            market_prefix: env
                .lookup_raw("TICKER_RELAY_MARKET_PREFIX")
                .unwrap_or(defaults.reference.market_prefix),
            timeout: env
                .parse_opt::<u64>("TICKER_RELAY_REFERENCE_TIMEOUT_SECS")?
                .map_or(defaults.reference.timeout, Duration::from_secs),
        };

        let config = Self {
            server,
            upstream,
            reference,
            display_field: env.string("TICKER_RELAY_DISPLAY_FIELD", &defaults.display_field),
            event_capacity: env.parse("TICKER_RELAY_EVENT_CAPACITY", defaults.event_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(
            "TICKER_RELAY_UPSTREAM_URL",
            &self.upstream.url,
            &["ws", "wss"],
        )?;
        validate_url(
            "TICKER_RELAY_REFERENCE_URL",
            &self.reference.url,
            &["http", "https"],
        )?;

        if self.upstream.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_RELAY_SUBSCRIBE_CHUNK_SIZE".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TICKER_RELAY_EVENT_CAPACITY".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.display_field.is_empty() {
            return Err(ConfigError::EmptyValue(
                "TICKER_RELAY_DISPLAY_FIELD".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable could not be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// URL is malformed or has the wrong scheme.
    #[error("invalid URL for {key}: {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Raw value, including empty strings.
    fn lookup_raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    /// Non-empty trimmed value or the default.
    fn string(&self, key: &str, default: &str) -> String {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse_opt<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.lookup)(key) else {
            return Ok(None);
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        trimmed
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }
}

fn validate_url(key: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            reason: format!(
                "scheme {:?} not one of {}",
                url.scheme(),
                schemes.join(", ")
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.server.relay_port, 8080);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.upstream.url, "wss://api.upbit.com/websocket/v1");
        assert_eq!(config.upstream.chunk_size, 500);
        assert_eq!(config.upstream.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.upstream.keepalive, Some(Duration::from_secs(60)));
        assert_eq!(config.upstream.ticket_prefix, "relay-server-ticker");
        assert_eq!(config.reference.market_prefix, "KRW-");
        assert_eq!(config.reference.timeout, Duration::from_secs(10));
        assert_eq!(config.display_field, "korean_name");
        assert_eq!(config.event_capacity, 4096);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("WEBSOCKET_RELAY_PORT", "9001"),
            ("TICKER_RELAY_HEALTH_PORT", "0"),
            ("TICKER_RELAY_UPSTREAM_URL", "ws://127.0.0.1:7000"),
            ("TICKER_RELAY_SUBSCRIBE_CHUNK_SIZE", "100"),
            ("TICKER_RELAY_RECONNECT_DELAY_MS", "250"),
            ("TICKER_RELAY_KEEPALIVE_SECS", "0"),
            ("TICKER_RELAY_TICKET_PREFIX", "test"),
            ("TICKER_RELAY_MARKET_PREFIX", ""),
            ("TICKER_RELAY_DISPLAY_FIELD", "display_name"),
        ])
        .unwrap();

        assert_eq!(config.server.relay_port, 9001);
        assert_eq!(config.server.health_port, 0);
        assert_eq!(config.upstream.url, "ws://127.0.0.1:7000");
        assert_eq!(config.upstream.chunk_size, 100);
        assert_eq!(config.upstream.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.upstream.keepalive, None);
        assert_eq!(config.upstream.ticket_prefix, "test");
        assert_eq!(config.reference.market_prefix, "");
        assert_eq!(config.display_field, "display_name");
    }

    #[test_case("WEBSOCKET_RELAY_PORT", "eighty" ; "non numeric port")]
    #[test_case("WEBSOCKET_RELAY_PORT", "70000" ; "port out of range")]
    #[test_case("TICKER_RELAY_RECONNECT_DELAY_MS", "-1" ; "negative delay")]
    #[test_case("TICKER_RELAY_SUBSCRIBE_CHUNK_SIZE", "0" ; "zero chunk size")]
    #[test_case("TICKER_RELAY_EVENT_CAPACITY", "0" ; "zero capacity")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        let err = config_from(&[(key, value)]).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key),
            "unexpected error: {err}"
        );
    }

    #[test_case("TICKER_RELAY_UPSTREAM_URL", "not a url" ; "unparseable upstream")]
    #[test_case("TICKER_RELAY_UPSTREAM_URL", "https://api.upbit.com" ; "upstream not websocket")]
    #[test_case("TICKER_RELAY_REFERENCE_URL", "wss://api.upbit.com" ; "reference not http")]
    fn invalid_urls_are_rejected(key: &str, value: &str) {
        let err = config_from(&[(key, value)]).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidUrl { key: ref k, .. } if k == key),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("WEBSOCKET_RELAY_PORT", "  "),
            ("TICKER_RELAY_UPSTREAM_URL", ""),
        ])
        .unwrap();

        assert_eq!(config.server.relay_port, 8080);
        assert_eq!(config.upstream.url, DEFAULT_UPSTREAM_URL);
    }
}
