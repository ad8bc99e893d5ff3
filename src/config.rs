//! Runtime configuration, read from `CLASSTIME_*` environment variables.
//!
//! A `.env` file in the working directory is honoured outside of tests.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::engine::EngineOptions;
use crate::limits::{DEFAULT_COMPACT_THRESHOLD, DEFAULT_LOCK_TIMEOUT_MS};

pub const DATA_DIR_VAR: &str = "CLASSTIME_DATA_DIR";
pub const TIMEZONE_VAR: &str = "CLASSTIME_TIMEZONE";
pub const COMPACT_THRESHOLD_VAR: &str = "CLASSTIME_COMPACT_THRESHOLD";
pub const LOCK_TIMEOUT_VAR: &str = "CLASSTIME_LOCK_TIMEOUT_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one WAL file per tenant.
    pub data_dir: PathBuf,
    /// Zone that local dates, weekdays and wall-clock times are taken in.
    pub timezone: Tz,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            timezone: Tz::UTC,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

fn parse_number(var: &str, raw: &str) -> Result<u64, ConfigError> {
    let value = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), format!("'{raw}': {e}")))?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(var.to_string(), "must be positive".to_string()));
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup(DATA_DIR_VAR).filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(zone) = lookup(TIMEZONE_VAR) {
            config.timezone = zone
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidValue(TIMEZONE_VAR.to_string(), format!("unknown time zone '{zone}'")))?;
        }
        if let Some(raw) = lookup(COMPACT_THRESHOLD_VAR) {
            config.compact_threshold = parse_number(COMPACT_THRESHOLD_VAR, &raw)?;
        }
        if let Some(raw) = lookup(LOCK_TIMEOUT_VAR) {
            config.lock_timeout = Duration::from_millis(parse_number(LOCK_TIMEOUT_VAR, &raw)?);
        }
        Ok(config)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            zone: self.timezone,
            lock_timeout: self.lock_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.compact_threshold, DEFAULT_COMPACT_THRESHOLD);
        assert_eq!(config.lock_timeout, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS));
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            (DATA_DIR_VAR, "/var/lib/classtime"),
            (TIMEZONE_VAR, "America/Sao_Paulo"),
            (COMPACT_THRESHOLD_VAR, "250"),
            (LOCK_TIMEOUT_VAR, " 1500 "),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/classtime"));
        assert_eq!(config.timezone, chrono_tz::America::Sao_Paulo);
        assert_eq!(config.compact_threshold, 250);
        assert_eq!(config.lock_timeout, Duration::from_millis(1500));

        let options = config.engine_options();
        assert_eq!(options.zone, chrono_tz::America::Sao_Paulo);
        assert_eq!(options.lock_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_unknown_zone() {
        let err = Config::from_lookup(lookup(&[(TIMEZONE_VAR, "Mars/Olympus")])).unwrap_err();
        assert!(err.to_string().contains(TIMEZONE_VAR));
        assert!(err.to_string().contains("Mars/Olympus"));
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Config::from_lookup(lookup(&[(COMPACT_THRESHOLD_VAR, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref var, _) if var == COMPACT_THRESHOLD_VAR));

        let err = Config::from_lookup(lookup(&[(LOCK_TIMEOUT_VAR, "0")])).unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn blank_data_dir_keeps_default() {
        let config = Config::from_lookup(lookup(&[(DATA_DIR_VAR, "  ")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }
}
