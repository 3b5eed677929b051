//! Worker configuration from the environment.
//!
//! A `.env` file in the working directory is loaded first when present; real environment
//! variables take precedence over it.

use std::str::FromStr;
use std::time::Duration;

use crate::broker::{DEFAULT_CONSUMER_GROUP, DEFAULT_JOBS_STREAM, DEFAULT_STATUS_STREAM};
use crate::yandex::DEFAULT_API_URL;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// A value that must not end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for Secret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub redis_url: Secret,
    pub database_url: Secret,
    pub jobs_stream: String,
    pub status_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub reconnect_delay: Duration,
    pub db_max_connections: u32,
    /// Yandex is only registered when a token is configured.
    pub yandex_oauth_token: Option<Secret>,
    pub yandex_api_url: String,
    pub confirm_delay: Duration,
    /// `None` keeps incomplete chunk buffers until their job completes.
    pub chunk_buffer_ttl: Option<Duration>,
    pub default_country: Option<String>,
    pub default_city: Option<String>,
}

impl WorkerConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            redis_url: Secret(get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string())),
            database_url: Secret(get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?),
            jobs_stream: get("JOBS_STREAM").unwrap_or_else(|| DEFAULT_JOBS_STREAM.to_string()),
            status_stream: get("STATUS_STREAM").unwrap_or_else(|| DEFAULT_STATUS_STREAM.to_string()),
            consumer_group: get("CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer_name: get("CONSUMER_NAME")
                .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::now_v7())),
            reconnect_delay: Duration::from_secs(parse_or(
                "RECONNECT_DELAY_SECS",
                get("RECONNECT_DELAY_SECS"),
                5,
            )?),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), 5)?,
            yandex_oauth_token: get("YANDEX_OAUTH_TOKEN").map(Secret),
            yandex_api_url: get("YANDEX_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            confirm_delay: Duration::from_secs(parse_or(
                "CONFIRM_DELAY_SECS",
                get("CONFIRM_DELAY_SECS"),
                5,
            )?),
            chunk_buffer_ttl: get("CHUNK_BUFFER_TTL_SECS")
                .map(|v| parse("CHUNK_BUFFER_TTL_SECS", v))
                .transpose()?
                .map(Duration::from_secs),
            default_country: get("DEFAULT_COUNTRY"),
            default_city: get("DEFAULT_CITY"),
        })
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    value.map_or(Ok(default), |v| parse(key, v))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config =
            WorkerConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/crm")]))
                .unwrap();

        assert_eq!(config.redis_url.expose(), DEFAULT_REDIS_URL);
        assert_eq!(config.jobs_stream, "audsync:jobs");
        assert_eq!(config.status_stream, "audsync:status");
        assert_eq!(config.consumer_group, "audsync");
        assert!(config.consumer_name.starts_with("worker-"));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.confirm_delay, Duration::from_secs(5));
        assert_eq!(config.yandex_oauth_token, None);
        assert_eq!(config.yandex_api_url, DEFAULT_API_URL);
        assert_eq!(config.chunk_buffer_ttl, None);
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(
            WorkerConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn numbers_are_validated() {
        let err = WorkerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/crm"),
            ("CHUNK_BUFFER_TTL_SECS", "ten"),
        ]))
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid { key: "CHUNK_BUFFER_TTL_SECS", ref value, .. } if value == "ten"
        ));
    }

    #[test]
    fn optional_settings_are_read() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/crm"),
            ("YANDEX_OAUTH_TOKEN", "y0_token"),
            ("CHUNK_BUFFER_TTL_SECS", "3600"),
            ("CONFIRM_DELAY_SECS", "30"),
            ("DEFAULT_COUNTRY", "Uzbekistan"),
        ]))
        .unwrap();

        assert_eq!(config.yandex_oauth_token.as_ref().map(Secret::expose), Some("y0_token"));
        assert_eq!(config.chunk_buffer_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.confirm_delay, Duration::from_secs(30));
        assert_eq!(config.default_country.as_deref(), Some("Uzbekistan"));
        assert_eq!(config.default_city, None);
        assert!(!format!("{config:?}").contains("y0_token"));
    }
}
