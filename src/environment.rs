use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::entity::normalizer::{DEFAULT_IDENTITY_THRESHOLD, DEFAULT_LOOKUP_THRESHOLD};
use crate::scheduler::{DEFAULT_INTERVAL, DEFAULT_MAX_CONCURRENT};

/// Runtime settings, read from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_path: String,
    pub listen_addr: String,
    pub source_url: String,
    pub fetch_timeout: Duration,
    pub refresh_interval: Duration,
    pub max_concurrent_refreshes: usize,
    pub lookup_threshold: f64,
    pub identity_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "sportcache.db".to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
            source_url: "http://localhost:9000".to_string(),
            fetch_timeout: Duration::from_secs(60),
            refresh_interval: DEFAULT_INTERVAL,
            max_concurrent_refreshes: DEFAULT_MAX_CONCURRENT,
            lookup_threshold: DEFAULT_LOOKUP_THRESHOLD,
            identity_threshold: DEFAULT_IDENTITY_THRESHOLD,
        }
    }
}

/// Parse a variable, keeping `default` when it is unset or unparseable.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> T {
    match lookup(var) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}='{}'", var, raw);
            default
        }),
        None => default,
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Settings::default();
        Self {
            database_path: lookup("DATABASE_PATH").unwrap_or(defaults.database_path),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            source_url: lookup("SOURCE_URL").unwrap_or(defaults.source_url),
            fetch_timeout: Duration::from_secs(parsed(
                &lookup,
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )),
            refresh_interval: Duration::from_secs(parsed(
                &lookup,
                "REFRESH_INTERVAL_SECS",
                defaults.refresh_interval.as_secs(),
            )),
            max_concurrent_refreshes: parsed(
                &lookup,
                "MAX_CONCURRENT_REFRESHES",
                defaults.max_concurrent_refreshes,
            ),
            lookup_threshold: parsed(&lookup, "LOOKUP_THRESHOLD", defaults.lookup_threshold),
            identity_threshold: parsed(&lookup, "IDENTITY_THRESHOLD", defaults.identity_threshold),
        }
    }
}
