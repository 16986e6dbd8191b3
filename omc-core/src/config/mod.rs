//! Flat environment-variable configuration.
//!
//! Every recognized key is documented on `Config`'s fields; unset keys
//! fall back to the defaults in `types.rs`, following the
//! `#[serde(default = "fn")]` convention even though this loader reads
//! flat env vars rather than a TOML file.

pub mod types;

pub use types::{Config, RateLimitConfig, RetryConfig};

use std::env;
use std::path::PathBuf;
use types::*;

/// A config load/validation failure. Callers map this to exit code `2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(ConfigError(format!("{} has non-boolean value {:?}", key, other))),
        },
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError(format!("{} has invalid value {:?}", key, v))),
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

impl Config {
    /// Load every recognized key from the process environment, falling
    /// back to documented defaults. Does not validate the live-arming
    /// combination -- call `validate()` before constructing an adapter.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_db_path());

        let retry = RetryConfig {
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", default_retry_max_attempts_pub())?,
            base_ms: env_parse("RETRY_BASE_MS", 250)?,
            max_ms: env_parse("RETRY_MAX_MS", 4_000)?,
            total_cap_ms: env_parse("RETRY_TOTAL_CAP_MS", 8_000)?,
        };

        let rate_limit = RateLimitConfig {
            rps: env_parse("RATE_LIMIT_RPS", 10.0)?,
            burst: env_parse("RATE_LIMIT_BURST", 20)?,
        };

        Ok(Config {
            db_path,
            dry_run: env_bool("DRY_RUN", true)?,
            kill_switch: env_bool("KILL_SWITCH", false)?,
            safe_mode: env_bool("SAFE_MODE", false)?,
            live_trading: env_bool("LIVE_TRADING", false)?,
            live_trading_ack: env_string("LIVE_TRADING_ACK", String::new()),
            retry,
            rate_limit,
            clock_sync_max_abs_offset_ms: env_parse(
                "CLOCK_SYNC_MAX_ABS_OFFSET_MS",
                default_clock_sync_max_abs_offset_ms(),
            )?,
            action_dedupe_bucket_seconds: env_parse(
                "ACTION_DEDUPE_BUCKET_SECONDS",
                default_action_dedupe_bucket_seconds(),
            )?,
            stale_order_ttl_seconds: env_parse(
                "STALE_ORDER_TTL_SECONDS",
                default_stale_order_ttl_seconds(),
            )?,
            reconcile_window_seconds: env_parse(
                "RECONCILE_WINDOW_SECONDS",
                default_reconcile_window_seconds(),
            )?,
            reconcile_window_max_seconds: env_parse(
                "RECONCILE_WINDOW_MAX_SECONDS",
                default_reconcile_window_max_seconds(),
            )?,
            ledger_snapshot_version: env_parse(
                "LEDGER_SNAPSHOT_VERSION",
                default_ledger_snapshot_version(),
            )?,
            log_level: env_string("LOG_LEVEL", default_log_level()),
            json_logs: env_bool("JSON_LOGS", false)?,
            exchange_base_url: env_string(
                "EXCHANGE_BASE_URL",
                "https://api.btcturk.com".to_string(),
            ),
            api_key: env::var("API_KEY").ok(),
            api_secret: env::var("API_SECRET").ok(),
        })
    }

    /// Enforce the live-arming combination and basic sanity bounds.
    /// Returns `Err` (exit code `2`) on any violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.live_trading {
            if self.live_trading_ack != "I_UNDERSTAND" {
                return Err(ConfigError(
                    "LIVE_TRADING=true requires LIVE_TRADING_ACK=\"I_UNDERSTAND\"".into(),
                ));
            }
            if self.dry_run {
                return Err(ConfigError("LIVE_TRADING=true is incompatible with DRY_RUN=true".into()));
            }
            if self.kill_switch {
                return Err(ConfigError(
                    "LIVE_TRADING=true is incompatible with KILL_SWITCH=true".into(),
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError("RETRY_MAX_ATTEMPTS must be at least 1".into()));
        }
        if self.retry.base_ms == 0 || self.retry.base_ms > self.retry.max_ms {
            return Err(ConfigError("RETRY_BASE_MS must be positive and <= RETRY_MAX_MS".into()));
        }
        if self.rate_limit.rps <= 0.0 {
            return Err(ConfigError("RATE_LIMIT_RPS must be positive".into()));
        }
        if self.reconcile_window_seconds <= 0
            || self.reconcile_window_seconds > self.reconcile_window_max_seconds
        {
            return Err(ConfigError(
                "RECONCILE_WINDOW_SECONDS must be positive and <= RECONCILE_WINDOW_MAX_SECONDS".into(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError(format!(
                "LOG_LEVEL {:?} is not one of {:?}",
                self.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// `true` once `validate()` would accept live network side effects.
    pub fn is_live_armed(&self) -> bool {
        self.live_trading && self.live_trading_ack == "I_UNDERSTAND" && !self.dry_run && !self.kill_switch
    }
}

fn default_retry_max_attempts_pub() -> u32 {
    4
}

#[cfg(test)]
impl Config {
    /// A validated, dry-run-by-default `Config` for tests that need a
    /// complete struct without going through env vars. Not part of the
    /// public API surface of a shipped binary.
    pub fn for_tests() -> Config {
        Config {
            db_path: PathBuf::from("./test.sqlite3"),
            dry_run: true,
            kill_switch: false,
            safe_mode: false,
            live_trading: false,
            live_trading_ack: String::new(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            clock_sync_max_abs_offset_ms: 5_000,
            action_dedupe_bucket_seconds: 5,
            stale_order_ttl_seconds: 3_600,
            reconcile_window_seconds: 300,
            reconcile_window_max_seconds: 86_400,
            ledger_snapshot_version: 1,
            log_level: "info".into(),
            json_logs: false,
            exchange_base_url: "https://example.invalid".into(),
            api_key: None,
            api_secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::for_tests()
    }

    #[test]
    fn dry_run_default_config_validates() {
        assert!(base_config().validate().is_ok());
        assert!(!base_config().is_live_armed());
    }

    #[test]
    fn live_trading_requires_exact_ack_phrase() {
        let mut cfg = base_config();
        cfg.live_trading = true;
        cfg.dry_run = false;
        cfg.live_trading_ack = "yes please".into();
        assert!(cfg.validate().is_err());

        cfg.live_trading_ack = "I_UNDERSTAND".into();
        assert!(cfg.validate().is_ok());
        assert!(cfg.is_live_armed());
    }

    #[test]
    fn live_trading_rejects_dry_run_combination() {
        let mut cfg = base_config();
        cfg.live_trading = true;
        cfg.live_trading_ack = "I_UNDERSTAND".into();
        cfg.dry_run = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_log_level_fails_validation() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }
}
