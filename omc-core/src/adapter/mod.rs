//! Exchange adapter: typed request/response over the venue's REST API,
//! with retry classification, token-bucket rate limiting, signed auth,
//! and the "safe" idempotent submit/cancel wrappers.
//!
//! `ExchangeAdapter` is the dependency-injected capability the execution
//! engine and reconciler depend on, rather than depending on each other;
//! `safe_ops` implements the uncertain-outcome resolution generically
//! over any implementation, live or mock.

pub mod auth;
pub mod clock;
pub mod dry_run;
pub mod errors;
pub mod rate_limit;
pub mod rest;
pub mod retry;
pub mod safe_ops;
pub mod types;

pub use dry_run::DryRunAdapter;
pub use errors::AdapterError;
pub use rest::RestAdapter;
pub use safe_ops::{cancel_order_safe, submit_limit_order_safe};
pub use types::{
    Balance, CancelOutcome, ExchangeInfo, ExchangeOrderView, FillBatch, MappedStatus, Orderbook,
    OrderbookLevel, RawOrderStatus, SubmitOutcome, SubmitRequest,
};

use crate::core::types::{ClientOrderId, Symbol};
use async_trait::async_trait;

/// Low-level venue operations. Implementations (live REST, replay,
/// dry-run mock) apply their own retry internally via `retry::execute`
/// so every call already reflects the adapter's own retry policy; only
/// the uncertain-outcome resolution in `safe_ops` sits above this trait.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_exchange_info(&self) -> Result<ExchangeInfo, AdapterError>;

    async fn get_orderbook(&self, symbol: &Symbol) -> Result<Orderbook, AdapterError>;

    async fn get_balances(&self) -> Result<Vec<Balance>, AdapterError>;

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<ExchangeOrderView>, AdapterError>;

    async fn get_all_orders(
        &self,
        symbol: &Symbol,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<ExchangeOrderView>, AdapterError>;

    async fn get_order_by_id(
        &self,
        symbol: &Symbol,
        exchange_order_id: &str,
    ) -> Result<Option<ExchangeOrderView>, AdapterError>;

    async fn get_recent_fills(
        &self,
        symbol: &Symbol,
        since_ts: Option<i64>,
    ) -> Result<FillBatch, AdapterError>;

    /// Submit exactly once, no retry, no probing -- `safe_ops` layers
    /// retry and the existence probe on top of this.
    async fn submit_limit_order(&self, req: &SubmitRequest) -> Result<ExchangeOrderView, AdapterError>;

    /// Cancel exactly once by exchange id or client id (at least one
    /// must be `Some`); no retry, no probing.
    async fn cancel_order(
        &self,
        symbol: &Symbol,
        exchange_order_id: Option<&str>,
        client_order_id: Option<&ClientOrderId>,
    ) -> Result<(), AdapterError>;
}
