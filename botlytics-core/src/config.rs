// File: botlytics-core/src/config.rs

use std::time::Duration;
use tracing::debug;

use botlytics_common::models::KnownEventType;
use crate::Error;

pub const DEFAULT_SESSION_START_TYPE: KnownEventType = KnownEventType::BotStarted;
pub const DEFAULT_PLATFORM: &str = "telegram";
pub const DEFAULT_SOURCE: &str = "direct";
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Runtime settings for the ingestion pipeline and the query side.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Event types that open a session and therefore carry attribution.
    pub session_start_types: Vec<String>,
    /// Written into `platform` when the producer leaves it out.
    pub default_platform: Option<String>,
    /// Written into `source` of session-start events without attribution.
    pub default_source: Option<String>,
    /// Deadline for a single aggregation; `None` lets it run to completion.
    pub query_timeout: Option<Duration>,
    /// Rows fetched per page while streaming query results.
    pub page_size: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://analytics_user@localhost:5432/analytics".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            session_start_types: vec![DEFAULT_SESSION_START_TYPE.as_str().to_string()],
            default_platform: Some(DEFAULT_PLATFORM.to_string()),
            default_source: Some(DEFAULT_SOURCE.to_string()),
            query_timeout: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl AnalyticsConfig {
    /// Loads settings from the environment, reading a `.env` file first if present.
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        cfg.database_url = match lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()) {
            Some(url) => url,
            None => {
                let host = lookup("DB_HOST").unwrap_or_else(|| "localhost".into());
                let port: u16 = parse_var(&lookup, "DB_PORT")?.unwrap_or(5432);
                let name = lookup("DB_NAME").unwrap_or_else(|| "analytics".into());
                let user = lookup("DB_USER").unwrap_or_else(|| "analytics_user".into());
                match lookup("DB_PASSWORD").filter(|p| !p.is_empty()) {
                    Some(pw) => format!("postgres://{}:{}@{}:{}/{}", user, pw, host, port, name),
                    None => format!("postgres://{}@{}:{}/{}", user, host, port, name),
                }
            }
        };

        if let Some(n) = parse_var(&lookup, "DB_MAX_CONNECTIONS")? {
            cfg.max_connections = n;
        }

        if let Some(types) = lookup("ANALYTICS_SESSION_START_TYPES") {
            cfg.session_start_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(platform) = lookup("ANALYTICS_DEFAULT_PLATFORM") {
            cfg.default_platform = Some(platform.trim().to_string()).filter(|p| !p.is_empty());
        }

        if let Some(source) = lookup("ANALYTICS_DEFAULT_SOURCE") {
            cfg.default_source = Some(source.trim().to_string()).filter(|s| !s.is_empty());
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "ANALYTICS_QUERY_TIMEOUT_SECS")? {
            cfg.query_timeout = Some(Duration::from_secs(secs)).filter(|d| !d.is_zero());
        }

        if let Some(size) = parse_var::<usize, _>(&lookup, "ANALYTICS_PAGE_SIZE")? {
            if size == 0 {
                return Err(Error::Config("ANALYTICS_PAGE_SIZE must be positive".into()));
            }
            cfg.page_size = size;
        }

        debug!(
            "Loaded analytics config: session_start_types={:?} page_size={} timeout={:?}",
            cfg.session_start_types, cfg.page_size, cfg.query_timeout
        );
        Ok(cfg)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}='{}': {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AnalyticsConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg, AnalyticsConfig::default());
        assert_eq!(cfg.session_start_types, vec![KnownEventType::BotStarted.as_str()]);
    }

    #[test]
    fn test_database_url_from_parts() {
        let cfg = AnalyticsConfig::from_lookup(lookup_from(&[
            ("DB_HOST", "db"),
            ("DB_PORT", "6543"),
            ("DB_NAME", "events"),
            ("DB_USER", "bot"),
            ("DB_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url, "postgres://bot:secret@db:6543/events");
    }

    #[test]
    fn test_database_url_wins_over_parts() {
        let cfg = AnalyticsConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x@y/z"),
            ("DB_HOST", "ignored"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url, "postgres://x@y/z");
    }

    #[test]
    fn test_overrides_and_disabling_defaults() {
        let cfg = AnalyticsConfig::from_lookup(lookup_from(&[
            ("ANALYTICS_SESSION_START_TYPES", "bot_started, session_started,"),
            ("ANALYTICS_DEFAULT_PLATFORM", ""),
            ("ANALYTICS_QUERY_TIMEOUT_SECS", "30"),
            ("ANALYTICS_PAGE_SIZE", "50"),
        ]))
        .unwrap();
        assert_eq!(cfg.session_start_types, vec!["bot_started", "session_started"]);
        assert_eq!(cfg.default_platform, None);
        assert_eq!(cfg.default_source.as_deref(), Some("direct"));
        assert_eq!(cfg.query_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.page_size, 50);
    }

    #[test]
    fn test_bad_numbers_are_config_errors() {
        let err = AnalyticsConfig::from_lookup(lookup_from(&[("DB_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = AnalyticsConfig::from_lookup(lookup_from(&[("ANALYTICS_PAGE_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
