use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Flat runtime configuration, loaded once from environment variables at
/// process start. Every key here corresponds to a documented env var;
/// see `Config::from_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db_path: PathBuf,

    pub dry_run: bool,
    pub kill_switch: bool,
    pub safe_mode: bool,
    pub live_trading: bool,
    pub live_trading_ack: String,

    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,

    pub clock_sync_max_abs_offset_ms: i64,
    pub action_dedupe_bucket_seconds: i64,
    pub stale_order_ttl_seconds: i64,

    pub reconcile_window_seconds: i64,
    pub reconcile_window_max_seconds: i64,

    pub ledger_snapshot_version: i32,

    pub log_level: String,
    pub json_logs: bool,

    pub exchange_base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_retry_total_cap_ms")]
    pub total_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_ms: default_retry_base_ms(),
            max_ms: default_retry_max_ms(),
            total_cap_ms: default_retry_total_cap_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_rps")]
    pub rps: f64,
    #[serde(default = "default_rate_limit_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: default_rate_limit_rps(),
            burst: default_rate_limit_burst(),
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    4
}
fn default_retry_base_ms() -> u64 {
    250
}
fn default_retry_max_ms() -> u64 {
    4_000
}
fn default_retry_total_cap_ms() -> u64 {
    8_000
}
fn default_rate_limit_rps() -> f64 {
    10.0
}
fn default_rate_limit_burst() -> u32 {
    20
}

pub fn default_db_path() -> PathBuf {
    PathBuf::from("./data/omc.sqlite3")
}

pub fn default_reconcile_window_seconds() -> i64 {
    300
}

pub fn default_reconcile_window_max_seconds() -> i64 {
    86_400
}

pub fn default_action_dedupe_bucket_seconds() -> i64 {
    5
}

pub fn default_stale_order_ttl_seconds() -> i64 {
    3_600
}

pub fn default_clock_sync_max_abs_offset_ms() -> i64 {
    5_000
}

pub fn default_ledger_snapshot_version() -> i32 {
    1
}

pub fn default_log_level() -> String {
    "info".to_string()
}
