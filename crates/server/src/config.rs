//! Process configuration read from the environment.

use std::time::Duration;

use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite://referral.db?mode=rwc";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RANK_JOB_INTERVAL_SECS: u64 = 300;
const DEFAULT_QUERY_CACHE_TTL_SECS: u64 = 30;

#[derive(Debug, Error)]
#[error("invalid value for {key}: {value}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// `None` disables the background rank job
    pub rank_job_interval: Option<Duration>,
    pub query_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let rank_secs = parse(&lookup, "RANK_JOB_INTERVAL_SECS", DEFAULT_RANK_JOB_INTERVAL_SECS)?;
        let cache_secs = parse(&lookup, "QUERY_CACHE_TTL_SECS", DEFAULT_QUERY_CACHE_TTL_SECS)?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse(&lookup, "PORT", DEFAULT_PORT)?,
            rank_job_interval: (rank_secs > 0).then(|| Duration::from_secs(rank_secs)),
            query_cache_ttl: Duration::from_secs(cache_secs),
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.port, 3000);
        assert_eq!(config.rank_job_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.query_cache_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_interval_disables_rank_job() {
        let config = config(&[("RANK_JOB_INTERVAL_SECS", "0"), ("PORT", "8080")]).unwrap();
        assert!(config.rank_job_interval.is_none());
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_invalid_port_is_reported() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(err.key, "PORT");
        assert_eq!(err.to_string(), "invalid value for PORT: eighty");
    }
}
