//! Process configuration from `CREDITGATE_*` environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `CREDITGATE_BIND_ADDR` | `0.0.0.0:8080` |
//! | `CREDITGATE_JWT_SECRET` | required |
//! | `DATABASE_URL` / `CREDITGATE_DATABASE_URL` | unset (in-memory store) |
//! | `CREDITGATE_DB_MAX_CONNECTIONS` | `10` |
//! | `CREDITGATE_WORKERS` | `4` |
//! | `CREDITGATE_POLL_INTERVAL_MS` | `500` |
//! | `CREDITGATE_AWAIT_TIMEOUT_SECS` | `300` |
//! | `CREDITGATE_RATE_LIMIT_PER_MINUTE` | `10` |
//! | `CREDITGATE_RATE_LIMIT_MIN_INTERVAL_MS` | `2000` |
//! | `CREDITGATE_ABUSE_SUSPICIOUS_SCORE` | `50` |
//! | `CREDITGATE_ABUSE_BLOCK_SCORE` | `80` |
//! | `CREDITGATE_ABUSE_BLOCK_SECS` | `3600` |
//! | `CREDITGATE_ABUSE_SWEEP_SECS` | `60` |
//! | `CREDITGATE_PROVIDER_URL` | unset (provider calls fail) |
//! | `CREDITGATE_PROVIDER_API_KEY` | unset |
//! | `CREDITGATE_PROVIDER_TIMEOUT_SECS` | `60` |
//! | `CREDITGATE_MODEL` | `gpt-4o-mini` |
//! | `CREDITGATE_SYSTEM_PROMPT` | unset |
//! | `CREDITGATE_MAX_TOKENS` | `500` |
//! | `CREDITGATE_TEMPERATURE` | `0.7` |
//! | `CREDITGATE_LOW_CREDIT_THRESHOLD` | `3` |
//! | `CREDITGATE_LOG_FORMAT` | `json` |
//! | `CREDITGATE_LOG_FILTER` | `info` |
//! | `CREDITGATE_BOOTSTRAP_ADMIN` | `false` |

use core::str::FromStr;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use creditgate_ai::{AbuseThresholds, PromptDefaults};
use creditgate_observability::{LogConfig, LogFormat};

use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbuseSettings {
    pub thresholds: AbuseThresholds,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub workers: usize,
    pub poll_interval: Duration,
    pub await_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub abuse: AbuseSettings,
    pub provider: ProviderSettings,
    pub prompts: PromptDefaults,
    pub low_credit_threshold: i64,
    pub log: LogConfig,
    /// Provision an admin account at startup and log a token for it.
    pub bootstrap_admin: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("CREDITGATE_JWT_SECRET").ok_or(ConfigError::Missing("CREDITGATE_JWT_SECRET"))?;

        let workers: usize = parse(&get, "CREDITGATE_WORKERS", 4)?;
        if workers == 0 {
            return Err(invalid("CREDITGATE_WORKERS", "0", "must be at least 1"));
        }

        let mut thresholds = AbuseThresholds::default();
        thresholds.suspicious_score = parse(&get, "CREDITGATE_ABUSE_SUSPICIOUS_SCORE", thresholds.suspicious_score)?;
        thresholds.block_score = parse(&get, "CREDITGATE_ABUSE_BLOCK_SCORE", thresholds.block_score)?;
        thresholds.block_duration_secs = parse(&get, "CREDITGATE_ABUSE_BLOCK_SECS", thresholds.block_duration_secs)?;
        if thresholds.block_score < thresholds.suspicious_score {
            return Err(invalid(
                "CREDITGATE_ABUSE_BLOCK_SCORE",
                &thresholds.block_score.to_string(),
                "must not be below the suspicious score",
            ));
        }
        if thresholds.block_duration_secs <= 0 {
            return Err(invalid(
                "CREDITGATE_ABUSE_BLOCK_SECS",
                &thresholds.block_duration_secs.to_string(),
                "must be positive",
            ));
        }

        let defaults = PromptDefaults::default();
        let temperature: f32 = parse(&get, "CREDITGATE_TEMPERATURE", defaults.temperature)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid("CREDITGATE_TEMPERATURE", &temperature.to_string(), "must be within 0..=2"));
        }
        let prompts = PromptDefaults {
            model: get("CREDITGATE_MODEL").unwrap_or(defaults.model),
            system_prompt: get("CREDITGATE_SYSTEM_PROMPT"),
            max_tokens: parse(&get, "CREDITGATE_MAX_TOKENS", defaults.max_tokens)?,
            temperature,
        };

        let log_format = match get("CREDITGATE_LOG_FORMAT") {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| invalid("CREDITGATE_LOG_FORMAT", &raw, &e.to_string()))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr: parse(&get, "CREDITGATE_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            jwt_secret,
            database_url: get("DATABASE_URL").or_else(|| get("CREDITGATE_DATABASE_URL")),
            database_max_connections: parse(&get, "CREDITGATE_DB_MAX_CONNECTIONS", 10)?,
            workers,
            poll_interval: Duration::from_millis(parse(&get, "CREDITGATE_POLL_INTERVAL_MS", 500)?),
            await_timeout: Duration::from_secs(parse(&get, "CREDITGATE_AWAIT_TIMEOUT_SECS", 300)?),
            rate_limit: RateLimitConfig {
                max_per_minute: parse(&get, "CREDITGATE_RATE_LIMIT_PER_MINUTE", 10)?,
                min_interval: Duration::from_millis(parse(&get, "CREDITGATE_RATE_LIMIT_MIN_INTERVAL_MS", 2000)?),
            },
            abuse: AbuseSettings {
                thresholds,
                sweep_interval: Duration::from_secs(parse::<u64, _>(&get, "CREDITGATE_ABUSE_SWEEP_SECS", 60)?.max(1)),
            },
            provider: ProviderSettings {
                base_url: get("CREDITGATE_PROVIDER_URL"),
                api_key: get("CREDITGATE_PROVIDER_API_KEY"),
                request_timeout: Duration::from_secs(parse(&get, "CREDITGATE_PROVIDER_TIMEOUT_SECS", 60)?),
            },
            prompts,
            low_credit_threshold: parse(&get, "CREDITGATE_LOW_CREDIT_THRESHOLD", 3)?,
            log: LogConfig {
                format: log_format,
                filter: get("CREDITGATE_LOG_FILTER").unwrap_or_else(|| "info".to_string()),
            },
            bootstrap_admin: parse(&get, "CREDITGATE_BOOTSTRAP_ADMIN", false)?,
        })
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse::<T>().map_err(|e| invalid(key, &raw, &e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_the_secret() {
        let s = settings(&[("CREDITGATE_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(s.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(s.workers, 4);
        assert_eq!(s.await_timeout, Duration::from_secs(300));
        assert_eq!(s.rate_limit, RateLimitConfig::default());
        assert_eq!(s.low_credit_threshold, 3);
        assert_eq!(s.abuse.thresholds, AbuseThresholds::default());
        assert_eq!(s.prompts, PromptDefaults::default());
        assert_eq!(s.log, LogConfig::default());
        assert!(s.database_url.is_none());
        assert!(!s.bootstrap_admin);
    }

    #[test]
    fn secret_is_required() {
        assert_eq!(settings(&[]), Err(ConfigError::Missing("CREDITGATE_JWT_SECRET")));
        assert_eq!(
            settings(&[("CREDITGATE_JWT_SECRET", "   ")]),
            Err(ConfigError::Missing("CREDITGATE_JWT_SECRET"))
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("CREDITGATE_JWT_SECRET", "x"),
            ("DATABASE_URL", "postgres://localhost/creditgate"),
            ("CREDITGATE_WORKERS", "8"),
            ("CREDITGATE_RATE_LIMIT_PER_MINUTE", "30"),
            ("CREDITGATE_MODEL", "small-model"),
            ("CREDITGATE_LOG_FORMAT", "pretty"),
            ("CREDITGATE_ABUSE_BLOCK_SECS", "600"),
        ])
        .unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/creditgate"));
        assert_eq!(s.workers, 8);
        assert_eq!(s.rate_limit.max_per_minute, 30);
        assert_eq!(s.prompts.model, "small-model");
        assert_eq!(s.log.format, LogFormat::Pretty);
        assert_eq!(s.abuse.thresholds.block_duration_secs, 600);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            settings(&[("CREDITGATE_JWT_SECRET", "x"), ("CREDITGATE_WORKERS", "many")]),
            Err(ConfigError::Invalid { key: "CREDITGATE_WORKERS", .. })
        ));
        assert!(matches!(
            settings(&[("CREDITGATE_JWT_SECRET", "x"), ("CREDITGATE_WORKERS", "0")]),
            Err(ConfigError::Invalid { key: "CREDITGATE_WORKERS", .. })
        ));
        assert!(matches!(
            settings(&[
                ("CREDITGATE_JWT_SECRET", "x"),
                ("CREDITGATE_ABUSE_SUSPICIOUS_SCORE", "90"),
                ("CREDITGATE_ABUSE_BLOCK_SCORE", "60"),
            ]),
            Err(ConfigError::Invalid { key: "CREDITGATE_ABUSE_BLOCK_SCORE", .. })
        ));
        assert!(matches!(
            settings(&[("CREDITGATE_JWT_SECRET", "x"), ("CREDITGATE_TEMPERATURE", "3.5")]),
            Err(ConfigError::Invalid { key: "CREDITGATE_TEMPERATURE", .. })
        ));
        assert!(matches!(
            settings(&[("CREDITGATE_JWT_SECRET", "x"), ("CREDITGATE_LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { key: "CREDITGATE_LOG_FORMAT", .. })
        ));
    }
}
