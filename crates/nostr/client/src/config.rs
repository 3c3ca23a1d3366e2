//! Client configuration from environment variables.

use crate::pool::PoolConfig;
use crate::relay::{ReconnectPolicy, RelayConfig};
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Relays used when `NOSTR_CLIENT_RELAYS` is unset.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub relays: Vec<String>,
    pub pool: PoolConfig,
    pub fetch_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|url| (*url).to_string()).collect(),
            pool: PoolConfig::default(),
            fetch_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid NOSTR_CLIENT_RELAYS: {0}")]
    InvalidRelays(String),
    #[error("invalid NOSTR_CLIENT_CONNECT_TIMEOUT_MS: {0}")]
    InvalidConnectTimeoutMs(String),
    #[error("invalid NOSTR_CLIENT_FETCH_TIMEOUT_MS: {0}")]
    InvalidFetchTimeoutMs(String),
    #[error("invalid NOSTR_CLIENT_PUBLISH_TIMEOUT_MS: {0}")]
    InvalidPublishTimeoutMs(String),
    #[error("invalid NOSTR_CLIENT_MAX_RELAYS: {0}")]
    InvalidMaxRelays(String),
    #[error("invalid NOSTR_CLIENT_RECONNECT: {0}")]
    InvalidReconnect(String),
    #[error("invalid NOSTR_CLIENT_RECONNECT_MAX_ATTEMPTS: {0}")]
    InvalidReconnectMaxAttempts(String),
    #[error("invalid NOSTR_CLIENT_RESUME_SUBSCRIPTIONS: {0}")]
    InvalidResumeSubscriptions(String),
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let default_relay = RelayConfig::default();
        let default_reconnect = ReconnectPolicy::default();

        let relays = match lookup("NOSTR_CLIENT_RELAYS") {
            Some(raw) => parse_relays(&raw)?,
            None => defaults.relays,
        };

        let connect_timeout = parse_millis(
            &lookup,
            "NOSTR_CLIENT_CONNECT_TIMEOUT_MS",
            default_relay.connect_timeout,
        )
        .map_err(ConfigError::InvalidConnectTimeoutMs)?;
        let fetch_timeout = parse_millis(
            &lookup,
            "NOSTR_CLIENT_FETCH_TIMEOUT_MS",
            defaults.fetch_timeout,
        )
        .map_err(ConfigError::InvalidFetchTimeoutMs)?;
        let publish_timeout = parse_millis(
            &lookup,
            "NOSTR_CLIENT_PUBLISH_TIMEOUT_MS",
            defaults.publish_timeout,
        )
        .map_err(ConfigError::InvalidPublishTimeoutMs)?;

        let max_relays = lookup("NOSTR_CLIENT_MAX_RELAYS")
            .unwrap_or_else(|| defaults.pool.max_relays.to_string())
            .trim()
            .parse::<usize>()
            .map_err(|error| ConfigError::InvalidMaxRelays(error.to_string()))?;
        if max_relays == 0 {
            return Err(ConfigError::InvalidMaxRelays("must be at least 1".to_string()));
        }
        if relays.len() > max_relays {
            return Err(ConfigError::InvalidRelays(format!(
                "{} relays configured but NOSTR_CLIENT_MAX_RELAYS is {}",
                relays.len(),
                max_relays
            )));
        }

        let reconnect_enabled =
            parse_bool(&lookup, "NOSTR_CLIENT_RECONNECT", default_reconnect.enabled)
                .map_err(ConfigError::InvalidReconnect)?;
        let max_attempts = lookup("NOSTR_CLIENT_RECONNECT_MAX_ATTEMPTS")
            .unwrap_or_else(|| default_reconnect.max_attempts.to_string())
            .trim()
            .parse::<u32>()
            .map_err(|error| ConfigError::InvalidReconnectMaxAttempts(error.to_string()))?;
        let resume_subscriptions = parse_bool(
            &lookup,
            "NOSTR_CLIENT_RESUME_SUBSCRIPTIONS",
            default_reconnect.resume_subscriptions,
        )
        .map_err(ConfigError::InvalidResumeSubscriptions)?;

        Ok(Self {
            relays,
            pool: PoolConfig {
                max_relays,
                relay_config: RelayConfig {
                    connect_timeout,
                    publish_timeout,
                    reconnect: ReconnectPolicy {
                        enabled: reconnect_enabled,
                        max_attempts,
                        resume_subscriptions,
                        ..default_reconnect
                    },
                },
            },
            fetch_timeout,
            publish_timeout,
        })
    }
}

fn parse_relays(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut relays: Vec<String> = Vec::new();
    for value in raw.split(',').map(str::trim).filter(|value| !value.is_empty()) {
        let url = Url::parse(value)
            .map_err(|error| ConfigError::InvalidRelays(format!("{value}: {error}")))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ConfigError::InvalidRelays(format!(
                "{value}: expected ws:// or wss://"
            )));
        }
        if !relays.iter().any(|existing| existing == value) {
            relays.push(value.to_string());
        }
    }
    Ok(relays)
}

fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, String>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let millis = raw.trim().parse::<u64>().map_err(|error| error.to_string())?;
    if millis == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(millis))
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, String>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(other.to_string()),
    }
}
