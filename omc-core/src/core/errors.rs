//! Error taxonomy for the order management core.
//!
//! Hand-rolled `Display`/`Error` impls on tagged enums rather than
//! `thiserror`-derived types, so callers match on variants directly
//! instead of parsing message strings.

use std::fmt;

/// An illegal state machine transition was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    /// The event is not a legal transition from the current status.
    IllegalTransition {
        from: &'static str,
        event: &'static str,
    },
    /// The order is in a terminal status; all further events are rejected.
    Terminal { status: &'static str },
    /// Event carried `(ts, event_seq)` older than the order's
    /// `last_event_seq` and was dropped rather than applied.
    StaleEvent { last_event_seq: i64, event_seq: i64 },
}

impl fmt::Display for FsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsmError::IllegalTransition { from, event } => {
                write!(f, "illegal transition: {} does not accept {}", from, event)
            }
            FsmError::Terminal { status } => {
                write!(f, "order is in terminal status {}, rejecting transition", status)
            }
            FsmError::StaleEvent {
                last_event_seq,
                event_seq,
            } => write!(
                f,
                "stale event dropped: event_seq {} older than last_event_seq {}",
                event_seq, last_event_seq
            ),
        }
    }
}

impl std::error::Error for FsmError {}

/// Local pre-submit validation failure (quantization, min-notional, bounds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    PriceNotOnTick { price: String, tick: String },
    QtyNotOnStep { qty: String, step: String },
    BelowMinQty { qty: String, min_qty: String },
    AboveMaxQty { qty: String, max_qty: String },
    BelowMinNotional { notional: String, min_notional: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::PriceNotOnTick { price, tick } => {
                write!(f, "price {} is not a multiple of tick size {}", price, tick)
            }
            ValidationError::QtyNotOnStep { qty, step } => {
                write!(f, "qty {} is not a multiple of step size {}", qty, step)
            }
            ValidationError::BelowMinQty { qty, min_qty } => {
                write!(f, "qty {} is below min qty {}", qty, min_qty)
            }
            ValidationError::AboveMaxQty { qty, max_qty } => {
                write!(f, "qty {} is above max qty {}", qty, max_qty)
            }
            ValidationError::BelowMinNotional {
                notional,
                min_notional,
            } => write!(
                f,
                "notional {} is below min notional {}",
                notional, min_notional
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Hard idempotency conflict: same `(action_type, key)` reserved with a
/// different payload hash. Indicates a programming bug or a compromised id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConflict {
    pub action_type: String,
    pub key: String,
}

impl fmt::Display for IdempotencyConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "idempotency conflict: ({}, {}) already reserved with a different payload hash",
            self.action_type, self.key
        )
    }
}

impl std::error::Error for IdempotencyConflict {}

/// State store failure: transaction aborted, constraint violated, or the
/// underlying connection is unusable. Per the error-handling design this
/// propagates out of the cycle; the caller releases the instance lock on
/// unwind rather than attempting to continue with a store in an unknown
/// state.
#[derive(Debug)]
pub enum StoreError {
    Connection(rusqlite::Error),
    Transaction(String),
    Constraint(String),
    Serialization(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(e) => write!(f, "store connection error: {}", e),
            StoreError::Transaction(msg) => write!(f, "store transaction error: {}", msg),
            StoreError::Constraint(msg) => write!(f, "store constraint violation: {}", msg),
            StoreError::Serialization(e) => write!(f, "store serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Connection(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e)
    }
}

/// Reconciliation-layer failure: an invariant was violated, or a local
/// order could not be unambiguously matched against the exchange's
/// reported state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    InvariantViolated { reason: String },
    AmbiguousMatch { client_order_id: String, candidates: usize },
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::InvariantViolated { reason } => {
                write!(f, "invariant violated: {}", reason)
            }
            ReconcileError::AmbiguousMatch {
                client_order_id,
                candidates,
            } => write!(
                f,
                "ambiguous match for {}: {} candidate orders",
                client_order_id, candidates
            ),
        }
    }
}

impl std::error::Error for ReconcileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsm_error_messages() {
        let e = FsmError::IllegalTransition {
            from: "FILLED",
            event: "cancel",
        };
        assert!(e.to_string().contains("FILLED"));
    }

    #[test]
    fn store_error_from_rusqlite() {
        let sql_err = rusqlite::Error::QueryReturnedNoRows;
        let e: StoreError = sql_err.into();
        assert!(matches!(e, StoreError::Connection(_)));
    }
}
