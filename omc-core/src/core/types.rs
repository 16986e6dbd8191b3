//! Core data model: symbols, intents, orders, fills, ledger events.
//!
//! Prices, quantities and fees are `rust_decimal::Decimal`, serialized as
//! strings (`serde-str` feature) so ledger replay is byte-for-byte
//! deterministic across processes -- see the representation note in
//! `DESIGN.md`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque venue symbol identifier, e.g. `"BTCTRY"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Venue-declared trading rules for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRules {
    pub price_tick: Decimal,
    pub qty_step: Decimal,
    pub min_notional: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
}

/// Round `value` down to the nearest non-zero multiple of `step`.
pub fn quantize_down(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).trunc() * step
}

/// `true` iff `value` is an exact multiple of `step`.
pub fn is_on_step(value: Decimal, step: Decimal) -> bool {
    if step.is_zero() {
        return true;
    }
    (value % step).is_zero()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// The canonical order status set. Terminal: `Filled, Canceled, Rejected`.
/// `Unknown` is non-terminal and must be re-probed by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Planned,
    Submitted,
    Acked,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Planned => "PLANNED",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Acked => "ACKED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deterministic, venue-safe identifier for an intent. Derived once from
/// the intent's quantized contents and stable across processes/restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(pub String);

impl ClientOrderId {
    const VENUE_MAX_LEN: usize = 32;

    /// `id = prefix || base32(sha256(symbol || side || quantized_price ||
    /// quantized_qty || intent_bucket))`, truncated and sanitized to the
    /// venue-allowed charset (uppercase alphanumeric).
    pub fn derive(
        prefix: &str,
        symbol: &Symbol,
        side: Side,
        quantized_price: Decimal,
        quantized_qty: Decimal,
        intent_bucket: i64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(symbol.as_str().as_bytes());
        hasher.update(match side {
            Side::Buy => b"BUY" as &[u8],
            Side::Sell => b"SELL" as &[u8],
        });
        hasher.update(quantized_price.normalize().to_string().as_bytes());
        hasher.update(quantized_qty.normalize().to_string().as_bytes());
        hasher.update(intent_bucket.to_string().as_bytes());
        let digest = hasher.finalize();

        let encoded = data_encoding::BASE32_NOPAD.encode(&digest);
        let sanitized: String = encoded.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

        let mut id = String::with_capacity(Self::VENUE_MAX_LEN);
        id.push_str(prefix);
        let remaining = Self::VENUE_MAX_LEN.saturating_sub(id.len());
        id.push_str(&sanitized[..remaining.min(sanitized.len())]);
        ClientOrderId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An approved trading decision handed to the execution engine. Immutable
/// once created; strategy/risk-filtering that produces these is out of
/// scope for this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub limit_price: Decimal,
    pub qty: Decimal,
    pub created_at: i64,
    pub origin: String,
}

impl OrderIntent {
    /// Bucket the intent's creation time so repeated submits of the "same"
    /// intent within one window collapse to the same client order id.
    pub fn intent_bucket(&self, bucket_seconds: i64) -> i64 {
        if bucket_seconds <= 0 {
            return self.created_at;
        }
        self.created_at / bucket_seconds
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOrigin {
    Local,
    External,
}

/// Persisted order row. `client_order_id` is the primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: ClientOrderId,
    pub exchange_order_id: Option<String>,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub status: OrderStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_event_seq: i64,
    pub origin: OrderOrigin,
    pub reason_code: Option<String>,
    pub unknown_attempts: i32,
}

impl Order {
    pub fn planned(cid: ClientOrderId, symbol: Symbol, side: Side, price: Decimal, qty: Decimal, now: i64) -> Self {
        Self {
            client_order_id: cid,
            exchange_order_id: None,
            symbol,
            side,
            price,
            qty,
            filled_qty: Decimal::ZERO,
            status: OrderStatus::Planned,
            created_at: now,
            updated_at: now,
            last_event_seq: 0,
            origin: OrderOrigin::Local,
            reason_code: None,
            unknown_attempts: 0,
        }
    }

    pub fn remaining_qty(&self) -> Decimal {
        (self.qty - self.filled_qty).max(Decimal::ZERO)
    }
}

/// A single exchange fill. `fill_id` deduplicates: re-inserting an
/// already-seen `fill_id` is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<ClientOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub ts: i64,
    pub meta: Option<String>,
}

/// Append-only audit/dedupe row for the action-layer dedupe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_id: i64,
    pub cycle_id: i64,
    pub action_type: String,
    pub payload_hash: String,
    pub dedupe_key: String,
    pub created_at: i64,
    pub outcome: Option<String>,
}

impl Action {
    /// `dedupe_key = action_type ":" payload_hash ":" floor(now/bucket)`.
    pub fn dedupe_key(action_type: &str, payload_hash: &str, now: i64, bucket_seconds: i64) -> String {
        let bucket = if bucket_seconds <= 0 { now } else { now / bucket_seconds };
        format!("{}:{}:{}", action_type, payload_hash, bucket)
    }
}

/// Hard per-intent idempotency outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyState {
    Pending,
    Committed,
    Failed,
    Unknown,
    Simulated,
}

impl IdempotencyState {
    pub fn as_str(self) -> &'static str {
        match self {
            IdempotencyState::Pending => "PENDING",
            IdempotencyState::Committed => "COMMITTED",
            IdempotencyState::Failed => "FAILED",
            IdempotencyState::Unknown => "UNKNOWN",
            IdempotencyState::Simulated => "SIMULATED",
        }
    }
}

impl fmt::Display for IdempotencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyKeyRow {
    pub action_type: String,
    pub key: String,
    pub payload_hash: String,
    pub state: IdempotencyState,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEventType {
    Fill,
    Fee,
    Adjust,
}

/// An append-only, totally-ordered (by `(ts, event_id)`) ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub rowid: i64,
    pub event_id: String,
    pub ts: i64,
    pub symbol: Symbol,
    pub event_type: LedgerEventType,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub exchange_trade_id: Option<String>,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<ClientOrderId>,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCheckpoint {
    pub scope_id: String,
    pub last_rowid: i64,
    pub snapshot_blob: String,
    pub snapshot_version: i32,
    pub updated_at: i64,
}

/// Derived position state, recomputable from the ledger. `fees_paid` is
/// keyed by fee currency rather than converted to a single scalar -- see
/// the non-quote-fee-currency design note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub fees_paid: BTreeMap<String, Decimal>,
}

impl Position {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unrealized_pnl_at(&self, market_price: Decimal) -> Decimal {
        if self.qty.is_zero() {
            return Decimal::ZERO;
        }
        (market_price - self.avg_cost) * self.qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_down_rounds_toward_zero_multiple() {
        assert_eq!(quantize_down(dec!(100.07), dec!(0.05)), dec!(100.05));
        assert_eq!(quantize_down(dec!(1.0), dec!(0.1)), dec!(1.0));
    }

    #[test]
    fn is_on_step_checks_exact_multiples() {
        assert!(is_on_step(dec!(1.50), dec!(0.1)));
        assert!(!is_on_step(dec!(1.55), dec!(0.1)));
    }

    #[test]
    fn client_order_id_is_deterministic() {
        let symbol = Symbol::new("BTCTRY");
        let a = ClientOrderId::derive("omc", &symbol, Side::Buy, dec!(100000.00), dec!(0.001), 42);
        let b = ClientOrderId::derive("omc", &symbol, Side::Buy, dec!(100000.00), dec!(0.001), 42);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("omc"));
        assert!(a.as_str().len() <= ClientOrderId::VENUE_MAX_LEN);
    }

    #[test]
    fn client_order_id_changes_with_content() {
        let symbol = Symbol::new("BTCTRY");
        let a = ClientOrderId::derive("omc", &symbol, Side::Buy, dec!(100000.00), dec!(0.001), 42);
        let b = ClientOrderId::derive("omc", &symbol, Side::Sell, dec!(100000.00), dec!(0.001), 42);
        assert_ne!(a, b);
    }

    #[test]
    fn action_dedupe_key_buckets_by_time() {
        let k1 = Action::dedupe_key("submit", "hash", 100, 30);
        let k2 = Action::dedupe_key("submit", "hash", 110, 30);
        let k3 = Action::dedupe_key("submit", "hash", 131, 30);
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn order_status_terminal_classification() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Unknown.is_terminal());
        assert!(!OrderStatus::Acked.is_terminal());
    }

    #[test]
    fn order_remaining_qty_never_negative() {
        let mut o = Order::planned(
            ClientOrderId("cid".into()),
            Symbol::new("BTCTRY"),
            Side::Buy,
            dec!(100000),
            dec!(1.0),
            0,
        );
        o.filled_qty = dec!(1.5);
        assert_eq!(o.remaining_qty(), Decimal::ZERO);
    }

    proptest! {
        /// Universal invariant: `ClientOrderId::derive` is a pure function
        /// of its inputs -- same inputs always produce the same id,
        /// regardless of how many times or in what process it's called.
        #[test]
        fn client_order_id_derive_is_deterministic(
            price_cents in 1i64..10_000_000,
            qty_millis in 1i64..1_000_000,
            bucket in 0i64..1_000_000,
            buy in proptest::bool::ANY,
        ) {
            let symbol = Symbol::new("BTCTRY");
            let side = if buy { Side::Buy } else { Side::Sell };
            let price = Decimal::new(price_cents, 2);
            let qty = Decimal::new(qty_millis, 3);

            let a = ClientOrderId::derive("omc", &symbol, side, price, qty, bucket);
            let b = ClientOrderId::derive("omc", &symbol, side, price, qty, bucket);
            prop_assert_eq!(a, b);
        }

        /// Universal invariant: the action dedupe key only depends on
        /// `floor(now / bucket_seconds)`, never on `now` itself -- two
        /// timestamps in the same bucket always collapse to one key, two
        /// timestamps in different buckets never collide.
        #[test]
        fn action_dedupe_key_depends_only_on_bucket_floor(
            now_a in 0i64..10_000_000,
            now_b in 0i64..10_000_000,
            bucket_seconds in 1i64..10_000,
        ) {
            let key_a = Action::dedupe_key("submit", "hash", now_a, bucket_seconds);
            let key_b = Action::dedupe_key("submit", "hash", now_b, bucket_seconds);
            let same_bucket = now_a / bucket_seconds == now_b / bucket_seconds;
            prop_assert_eq!(key_a == key_b, same_bucket);
        }
    }
}
