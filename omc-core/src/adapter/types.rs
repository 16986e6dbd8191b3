//! Wire-agnostic request/response types exchanged between the execution
//! engine and the `ExchangeAdapter` trait.

use crate::core::types::{ClientOrderId, Fill, Side, Symbol, SymbolRules};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A limit order submit request. The adapter must pass `client_order_id`
/// on every submit -- it is how the existence probe finds the order
/// again after an uncertain outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub client_order_id: ClientOrderId,
}

/// The venue's raw order status string, passed through uninterpreted so
/// the execution engine maps it via `map_exchange_status` rather than
/// the adapter baking in state-machine knowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOrderStatus(pub String);

/// Outcome of `submit_limit_order_safe`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The exchange acknowledged the order (directly, or found by the
    /// existence probe after a retryable failure).
    Submitted { exchange_order_id: String, raw_status: RawOrderStatus },
    /// The exchange rejected the order outright (no probe needed).
    Rejected { reason: String },
    /// Neither the direct response nor the existence probe could confirm
    /// whether the order reached the exchange. The engine must persist
    /// `UNKNOWN` and let the reconciler resolve it later.
    Uncertain { unknown_reason: String },
}

/// Outcome of `cancel_order_safe`.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Canceled,
    /// 404/409/"already closed" treated as idempotent success, classified
    /// by probing `get_order_by_id`.
    AlreadyCanceled,
    AlreadyFilled,
    NotFound,
    Uncertain { unknown_reason: String },
}

/// A single row from `get_open_orders`/`get_all_orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrderView {
    pub exchange_order_id: String,
    pub client_order_id: Option<ClientOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub raw_status: RawOrderStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orderbook {
    pub symbol: Symbol,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub ts: i64,
}

pub type FillBatch = Vec<Fill>;
pub type ExchangeInfo = Vec<(Symbol, SymbolRules)>;

/// A coarse classification of a venue's raw order status string, used
/// by the execution engine and reconciler to pick an `OrderEvent`
/// without either of them hard-coding venue string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl RawOrderStatus {
    /// Map the venue's free-form status string onto `MappedStatus`.
    /// Unrecognized strings classify as `Open` -- the conservative
    /// choice, since the reconciler re-probes open orders on every
    /// cycle and a wrongly-terminal classification would be unrecoverable.
    pub fn classify(&self) -> MappedStatus {
        match self.0.to_ascii_lowercase().as_str() {
            "filled" | "closed" => MappedStatus::Filled,
            "partiallyfilled" | "partially_filled" => MappedStatus::PartiallyFilled,
            "canceled" | "cancelled" => MappedStatus::Canceled,
            "rejected" => MappedStatus::Rejected,
            _ => MappedStatus::Open,
        }
    }
}
