//! Exchange adapter error taxonomy.
//!
//! Each variant carries enough context to drive the retry policy
//! (`crate::adapter::retry`) and the `reason_code` surfaced to callers,
//! following the hand-rolled `Display`/`Error` convention from
//! `crate::core::errors` rather than `thiserror` derives.

use std::fmt;

/// A single call into the exchange failed. `is_retryable` is what
/// `retry::execute` consults to decide whether to loop again.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// Connect/read timeout, DNS failure, connection reset.
    Network { detail: String },
    /// HTTP 429. `retry_after_ms`, when present, overrides the computed
    /// backoff delay.
    RateLimit { retry_after_ms: Option<u64> },
    /// HTTP 5xx.
    Server { status: u16, detail: String },
    /// HTTP 4xx other than 429/401, not retryable except the well-known
    /// idempotent cases handled explicitly by safe-cancel.
    Client { status: u16, detail: String },
    /// Parsed `success=false` venue payload.
    Exchange { code: String, message: String },
    /// Signature/stamp rejection. Triggers a clock resync upstream.
    Auth { detail: String },
    /// Response did not match the expected schema.
    Malformed { detail: String },
}

/// The set of `Exchange` codes the venue documents as transient
/// (momentary matching-engine overload, etc). Kept as a plain slice --
/// no config plumbing needed for a handful of known-safe retry codes.
const TRANSIENT_EXCHANGE_CODES: &[&str] = &["MATCHING_ENGINE_BUSY", "TEMPORARY_UNAVAILABLE"];

impl AdapterError {
    /// `true` iff the retry policy should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Network { .. } => true,
            AdapterError::RateLimit { .. } => true,
            AdapterError::Server { .. } => true,
            AdapterError::Client { .. } => false,
            AdapterError::Exchange { code, .. } => TRANSIENT_EXCHANGE_CODES.contains(&code.as_str()),
            AdapterError::Auth { .. } => false,
            AdapterError::Malformed { .. } => false,
        }
    }

    /// Stable machine-readable tag for logs and `CycleReport.reasons`.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AdapterError::Network { .. } => "adapter_network",
            AdapterError::RateLimit { .. } => "adapter_rate_limit",
            AdapterError::Server { .. } => "adapter_server",
            AdapterError::Client { .. } => "adapter_client",
            AdapterError::Exchange { .. } => "adapter_exchange",
            AdapterError::Auth { .. } => "adapter_auth",
            AdapterError::Malformed { .. } => "adapter_malformed",
        }
    }

    /// Retry-After hint in milliseconds, when the venue supplied one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            AdapterError::RateLimit { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }

    /// `true` when no acknowledgement of any kind was observed from the
    /// venue for this attempt -- the condition that triggers the
    /// existence probe in safe-submit/safe-cancel.
    pub fn no_ack_observed(&self) -> bool {
        matches!(
            self,
            AdapterError::Network { .. } | AdapterError::Server { .. } | AdapterError::RateLimit { .. }
        )
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Network { detail } => write!(f, "network error: {}", detail),
            AdapterError::RateLimit { retry_after_ms } => {
                write!(f, "rate limited (retry_after_ms={:?})", retry_after_ms)
            }
            AdapterError::Server { status, detail } => write!(f, "server error {}: {}", status, detail),
            AdapterError::Client { status, detail } => write!(f, "client error {}: {}", status, detail),
            AdapterError::Exchange { code, message } => write!(f, "exchange error {}: {}", code, message),
            AdapterError::Auth { detail } => write!(f, "auth error: {}", detail),
            AdapterError::Malformed { detail } => write!(f, "malformed response: {}", detail),
        }
    }
}

impl std::error::Error for AdapterError {}
