//! Connection configuration
//!
//! Configuration is assembled from layers of [`PoolOverrides`], applied field
//! by field in a fixed order (later layers win):
//!
//! 1. built-in defaults ([`PoolOverrides::defaults`])
//! 2. environment ([`PoolOverrides::from_env`])
//! 3. explicit caller overrides
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | REDIS_URL | Endpoint URL, `redis://[user[:password]@]host[:port][/db]` |
//! | REDIS_PORT | Local port; wins over any URL (`redis://127.0.0.1:<port>`) |
//! | REDIS_CONNECT_TIMEOUT_MS | Bound on TCP connect + handshake |
//! | REDIS_KEEP_ALIVE | Enable TCP keep-alive (`true`/`false`) |
//! | REDIS_KEEP_ALIVE_INITIAL_DELAY_MS | Idle time before the first probe |
//! | REDIS_LAZY_CONNECT | Defer connecting until first use |
//! | REDIS_MAX_RETRIES | Reconnect attempts before a lost link is abandoned |
//! | REDIS_RECONNECT_DELAY_MS | Fixed reconnect delay; `0` disables reconnects |

pub mod endpoint;
pub mod reconnect;

pub use endpoint::{redact_url, Endpoint, DEFAULT_PORT};
pub use reconnect::{ReconnectFn, ReconnectStrategy, BACKOFF_MAX, BACKOFF_STEP};

use crate::error::{StoreError, StoreResult};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_KEEP_ALIVE_INITIAL_DELAY_MS: u64 = 5_000;
pub const DEFAULT_MAX_RETRIES: u32 = 10;

pub const ENV_URL: &str = "REDIS_URL";
pub const ENV_PORT: &str = "REDIS_PORT";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "REDIS_CONNECT_TIMEOUT_MS";
pub const ENV_KEEP_ALIVE: &str = "REDIS_KEEP_ALIVE";
pub const ENV_KEEP_ALIVE_INITIAL_DELAY_MS: &str = "REDIS_KEEP_ALIVE_INITIAL_DELAY_MS";
pub const ENV_LAZY_CONNECT: &str = "REDIS_LAZY_CONNECT";
pub const ENV_MAX_RETRIES: &str = "REDIS_MAX_RETRIES";
pub const ENV_RECONNECT_DELAY_MS: &str = "REDIS_RECONNECT_DELAY_MS";

/// Fully resolved configuration for one connection
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub endpoint: Endpoint,
    /// Bound on TCP connect plus handshake
    pub connect_timeout: Duration,
    pub keep_alive: bool,
    pub keep_alive_initial_delay: Duration,
    pub reconnect_strategy: ReconnectStrategy,
    /// When set, `ConnectionManager::start` does not connect eagerly
    pub lazy_connect: bool,
    /// Reconnect attempt cap for the built-in strategies
    pub max_retries: u32,
}

impl PoolConfig {
    /// Resolve defaults, then each layer in order, into a complete config.
    ///
    /// The endpoint comes from the merged `port` if present, else the merged
    /// `url`; with neither this is a `Configuration` error.
    pub fn resolve(layers: &[&PoolOverrides]) -> StoreResult<PoolConfig> {
        let merged = layers
            .iter()
            .fold(PoolOverrides::defaults(), |acc, layer| acc.merge(layer));

        let endpoint = match (merged.port, merged.url.as_deref()) {
            (Some(port), _) => Endpoint::local(port)?,
            (None, Some(url)) => Endpoint::parse(url)?,
            (None, None) => {
                return Err(StoreError::Configuration(format!(
                    "no endpoint configured: set {} or {}",
                    ENV_URL, ENV_PORT
                )))
            }
        };

        // defaults() populates every remaining field
        Ok(PoolConfig {
            endpoint,
            connect_timeout: Duration::from_millis(
                merged.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            keep_alive: merged.keep_alive.unwrap_or(true),
            keep_alive_initial_delay: Duration::from_millis(
                merged
                    .keep_alive_initial_delay_ms
                    .unwrap_or(DEFAULT_KEEP_ALIVE_INITIAL_DELAY_MS),
            ),
            reconnect_strategy: merged.strategy().unwrap_or_default(),
            lazy_connect: merged.lazy_connect.unwrap_or(true),
            max_retries: merged.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }
}

/// One configuration layer; `None` fields defer to earlier layers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolOverrides {
    pub url: Option<String>,
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub keep_alive: Option<bool>,
    pub keep_alive_initial_delay_ms: Option<u64>,
    pub lazy_connect: Option<bool>,
    pub max_retries: Option<u32>,
    /// Fixed-delay shorthand; `0` disables reconnects
    pub reconnect_delay_ms: Option<u64>,
    /// Programmatic strategy; wins over `reconnect_delay_ms` within a layer
    #[serde(skip)]
    pub reconnect_strategy: Option<ReconnectStrategy>,
}

impl PoolOverrides {
    /// Built-in defaults. Every field except the endpoint is populated.
    pub fn defaults() -> Self {
        PoolOverrides {
            url: None,
            port: None,
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            keep_alive: Some(true),
            keep_alive_initial_delay_ms: Some(DEFAULT_KEEP_ALIVE_INITIAL_DELAY_MS),
            lazy_connect: Some(true),
            max_retries: Some(DEFAULT_MAX_RETRIES),
            reconnect_delay_ms: None,
            reconnect_strategy: Some(ReconnectStrategy::LinearBackoff),
        }
    }

    /// Load the environment layer from process environment variables
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the environment layer through an arbitrary lookup.
    ///
    /// Unset or empty variables leave the field unset; malformed values are
    /// a `Configuration` error rather than being silently ignored.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(PoolOverrides {
            url: get(ENV_URL),
            port: parse_env(ENV_PORT, get(ENV_PORT))?,
            connect_timeout_ms: parse_env(ENV_CONNECT_TIMEOUT_MS, get(ENV_CONNECT_TIMEOUT_MS))?,
            keep_alive: parse_flag(ENV_KEEP_ALIVE, get(ENV_KEEP_ALIVE))?,
            keep_alive_initial_delay_ms: parse_env(
                ENV_KEEP_ALIVE_INITIAL_DELAY_MS,
                get(ENV_KEEP_ALIVE_INITIAL_DELAY_MS),
            )?,
            lazy_connect: parse_flag(ENV_LAZY_CONNECT, get(ENV_LAZY_CONNECT))?,
            max_retries: parse_env(ENV_MAX_RETRIES, get(ENV_MAX_RETRIES))?,
            reconnect_delay_ms: parse_env(ENV_RECONNECT_DELAY_MS, get(ENV_RECONNECT_DELAY_MS))?,
            reconnect_strategy: None,
        })
    }

    /// Parse a layer from TOML, using the same field names as this struct
    pub fn from_toml_str(input: &str) -> StoreResult<Self> {
        toml::from_str(input)
            .map_err(|e| StoreError::Configuration(format!("invalid TOML configuration: {}", e)))
    }

    /// Field-by-field merge; `upper` wins where it is set.
    pub fn merge(self, upper: &PoolOverrides) -> PoolOverrides {
        let strategy = upper.strategy().or_else(|| self.strategy());
        PoolOverrides {
            url: upper.url.clone().or(self.url),
            port: upper.port.or(self.port),
            connect_timeout_ms: upper.connect_timeout_ms.or(self.connect_timeout_ms),
            keep_alive: upper.keep_alive.or(self.keep_alive),
            keep_alive_initial_delay_ms: upper
                .keep_alive_initial_delay_ms
                .or(self.keep_alive_initial_delay_ms),
            lazy_connect: upper.lazy_connect.or(self.lazy_connect),
            max_retries: upper.max_retries.or(self.max_retries),
            reconnect_delay_ms: None,
            reconnect_strategy: strategy,
        }
    }

    /// The strategy this layer sets, if any
    fn strategy(&self) -> Option<ReconnectStrategy> {
        self.reconnect_strategy.clone().or_else(|| {
            self.reconnect_delay_ms.map(|ms| match ms {
                0 => ReconnectStrategy::Disabled,
                ms => ReconnectStrategy::FixedDelay(Duration::from_millis(ms)),
            })
        })
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_keep_alive_initial_delay(mut self, delay: Duration) -> Self {
        self.keep_alive_initial_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn with_lazy_connect(mut self, lazy: bool) -> Self {
        self.lazy_connect = Some(lazy);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    #[must_use]
    pub fn with_reconnect_strategy(mut self, strategy: ReconnectStrategy) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: Option<String>) -> StoreResult<Option<T>> {
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|_| {
            StoreError::Configuration(format!("{} has invalid value {:?}", name, value))
        })
    })
    .transpose()
}

fn parse_flag(name: &str, raw: Option<String>) -> StoreResult<Option<bool>> {
    raw.map(|value| match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(StoreError::Configuration(format!(
            "{} has invalid value {:?}",
            name, value
        ))),
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> PoolOverrides {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PoolOverrides::from_lookup(|name| map.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let result = PoolConfig::resolve(&[&PoolOverrides::default()]);
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_defaults_fill_every_field() {
        let layer = PoolOverrides::default().with_url("redis://localhost:6379");
        let config = PoolConfig::resolve(&[&layer]).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS));
        assert!(config.keep_alive);
        assert_eq!(
            config.keep_alive_initial_delay,
            Duration::from_millis(DEFAULT_KEEP_ALIVE_INITIAL_DELAY_MS)
        );
        assert!(config.lazy_connect);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(matches!(config.reconnect_strategy, ReconnectStrategy::LinearBackoff));
    }

    #[test]
    fn test_port_wins_over_url() {
        let env_layer = env(&[(ENV_URL, "redis://remote:6379")]);
        let explicit = PoolOverrides::default().with_port(7001);
        let config = PoolConfig::resolve(&[&env_layer, &explicit]).unwrap();
        assert_eq!(config.endpoint.address(), "127.0.0.1:7001");

        let env_layer = env(&[(ENV_URL, "redis://remote:6379"), (ENV_PORT, "7002")]);
        let config = PoolConfig::resolve(&[&env_layer]).unwrap();
        assert_eq!(config.endpoint.address(), "127.0.0.1:7002");
    }

    #[test]
    fn test_explicit_layer_wins_field_by_field() {
        let env_layer = env(&[
            (ENV_URL, "redis://remote:6379"),
            (ENV_CONNECT_TIMEOUT_MS, "1500"),
            (ENV_KEEP_ALIVE, "false"),
            (ENV_MAX_RETRIES, "3"),
        ]);
        let explicit = PoolOverrides::default()
            .with_connect_timeout(Duration::from_millis(250))
            .with_lazy_connect(false);

        let config = PoolConfig::resolve(&[&env_layer, &explicit]).unwrap();
        // explicit
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert!(!config.lazy_connect);
        // environment
        assert!(!config.keep_alive);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.endpoint.host(), "remote");
    }

    #[test]
    fn test_reconnect_delay_shorthand() {
        let disabled = env(&[(ENV_PORT, "6379"), (ENV_RECONNECT_DELAY_MS, "0")]);
        let config = PoolConfig::resolve(&[&disabled]).unwrap();
        assert!(config.reconnect_strategy.is_disabled());

        let fixed = env(&[(ENV_PORT, "6379"), (ENV_RECONNECT_DELAY_MS, "40")]);
        let config = PoolConfig::resolve(&[&fixed]).unwrap();
        assert!(matches!(
            config.reconnect_strategy,
            ReconnectStrategy::FixedDelay(d) if d == Duration::from_millis(40)
        ));
    }

    #[test]
    fn test_explicit_strategy_beats_env_shorthand() {
        let env_layer = env(&[(ENV_PORT, "6379"), (ENV_RECONNECT_DELAY_MS, "0")]);
        let explicit = PoolOverrides::default()
            .with_reconnect_strategy(ReconnectStrategy::FixedDelay(Duration::from_millis(5)));
        let config = PoolConfig::resolve(&[&env_layer, &explicit]).unwrap();
        assert!(matches!(config.reconnect_strategy, ReconnectStrategy::FixedDelay(_)));
    }

    #[test]
    fn test_malformed_env_values_are_rejected() {
        let lookup = |name: &str| (name == ENV_MAX_RETRIES).then(|| "lots".to_string());
        assert!(matches!(
            PoolOverrides::from_lookup(lookup),
            Err(StoreError::Configuration(msg)) if msg.contains(ENV_MAX_RETRIES)
        ));

        let lookup = |name: &str| (name == ENV_KEEP_ALIVE).then(|| "maybe".to_string());
        assert!(PoolOverrides::from_lookup(lookup).is_err());
    }

    #[test]
    fn test_empty_env_values_are_unset() {
        let layer = env(&[(ENV_URL, ""), (ENV_PORT, "  ")]);
        assert!(layer.url.is_none());
        assert!(layer.port.is_none());
    }

    #[test]
    fn test_from_toml_str() {
        let layer = PoolOverrides::from_toml_str(
            r#"
            url = "redis://cache:6379/1"
            connect_timeout_ms = 750
            keep_alive = false
            reconnect_delay_ms = 20
            "#,
        )
        .unwrap();
        let config = PoolConfig::resolve(&[&layer]).unwrap();
        assert_eq!(config.endpoint.database(), Some(1));
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
        assert!(!config.keep_alive);
        assert!(matches!(config.reconnect_strategy, ReconnectStrategy::FixedDelay(_)));
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        assert!(matches!(
            PoolOverrides::from_toml_str("hostname = \"x\""),
            Err(StoreError::Configuration(_))
        ));
    }
}
