//! Scriptable `ExchangeAdapter` for end-to-end tests: a `HashMap`-style
//! queue of canned responses plus a set of read-path fixtures, so a
//! test can script exactly the sequence of submit/cancel outcomes it
//! wants without a live venue.

use crate::adapter::{
    AdapterError, Balance, ExchangeAdapter, ExchangeInfo, ExchangeOrderView, FillBatch, Orderbook,
    SubmitRequest,
};
use crate::core::types::{ClientOrderId, Symbol};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One scripted response for a queue-based mock call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse<T> {
    Ok(T),
    Err(AdapterError),
}

#[derive(Default)]
struct Inner {
    submit_queue: VecDeque<ScriptedResponse<ExchangeOrderView>>,
    cancel_queue: VecDeque<ScriptedResponse<()>>,
    open_orders: Vec<ExchangeOrderView>,
    all_orders: Vec<ExchangeOrderView>,
    order_by_id: Option<ExchangeOrderView>,
    recent_fills: FillBatch,
    exchange_info: ExchangeInfo,
    probe_calls: u32,
}

/// A fully in-memory, queue-driven `ExchangeAdapter`. Tests enqueue the
/// exact sequence of responses they want `submit_limit_order`/
/// `cancel_order` to return, and preload the read-path fixtures
/// (`set_open_orders`, `set_all_orders`, `set_order_by_id`) the probe
/// logic in `adapter::safe_ops` consults afterwards.
#[derive(Default)]
pub struct MockAdapter {
    inner: Mutex<Inner>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_submit(&self, response: ScriptedResponse<ExchangeOrderView>) {
        self.inner.lock().submit_queue.push_back(response);
    }

    pub fn queue_cancel(&self, response: ScriptedResponse<()>) {
        self.inner.lock().cancel_queue.push_back(response);
    }

    pub fn set_open_orders(&self, orders: Vec<ExchangeOrderView>) {
        self.inner.lock().open_orders = orders;
    }

    pub fn set_all_orders(&self, orders: Vec<ExchangeOrderView>) {
        self.inner.lock().all_orders = orders;
    }

    pub fn set_order_by_id(&self, order: Option<ExchangeOrderView>) {
        self.inner.lock().order_by_id = order;
    }

    pub fn set_recent_fills(&self, fills: FillBatch) {
        self.inner.lock().recent_fills = fills;
    }

    pub fn set_exchange_info(&self, info: ExchangeInfo) {
        self.inner.lock().exchange_info = info;
    }

    /// Number of read-path probe calls made so far (open/all orders +
    /// order-by-id), used by tests asserting a probe was or wasn't run.
    pub fn probe_call_count(&self) -> u32 {
        self.inner.lock().probe_calls
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    async fn get_exchange_info(&self) -> Result<ExchangeInfo, AdapterError> {
        Ok(self.inner.lock().exchange_info.clone())
    }

    async fn get_orderbook(&self, symbol: &Symbol) -> Result<Orderbook, AdapterError> {
        Ok(Orderbook { symbol: symbol.clone(), bids: Vec::new(), asks: Vec::new(), ts: 0 })
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, AdapterError> {
        Ok(Vec::new())
    }

    async fn get_open_orders(&self, _symbol: &Symbol) -> Result<Vec<ExchangeOrderView>, AdapterError> {
        let mut inner = self.inner.lock();
        inner.probe_calls += 1;
        Ok(inner.open_orders.clone())
    }

    async fn get_all_orders(
        &self,
        _symbol: &Symbol,
        _start_ts: i64,
        _end_ts: i64,
    ) -> Result<Vec<ExchangeOrderView>, AdapterError> {
        let mut inner = self.inner.lock();
        inner.probe_calls += 1;
        Ok(inner.all_orders.clone())
    }

    async fn get_order_by_id(
        &self,
        _symbol: &Symbol,
        _exchange_order_id: &str,
    ) -> Result<Option<ExchangeOrderView>, AdapterError> {
        let mut inner = self.inner.lock();
        inner.probe_calls += 1;
        Ok(inner.order_by_id.clone())
    }

    async fn get_recent_fills(
        &self,
        _symbol: &Symbol,
        _since_ts: Option<i64>,
    ) -> Result<FillBatch, AdapterError> {
        Ok(self.inner.lock().recent_fills.clone())
    }

    async fn submit_limit_order(&self, _req: &SubmitRequest) -> Result<ExchangeOrderView, AdapterError> {
        let next = self.inner.lock().submit_queue.pop_front();
        match next {
            Some(ScriptedResponse::Ok(view)) => Ok(view),
            Some(ScriptedResponse::Err(err)) => Err(err),
            None => Err(AdapterError::Malformed { detail: "mock submit queue exhausted".into() }),
        }
    }

    async fn cancel_order(
        &self,
        _symbol: &Symbol,
        _exchange_order_id: Option<&str>,
        _client_order_id: Option<&ClientOrderId>,
    ) -> Result<(), AdapterError> {
        let next = self.inner.lock().cancel_queue.pop_front();
        match next {
            Some(ScriptedResponse::Ok(())) => Ok(()),
            Some(ScriptedResponse::Err(err)) => Err(err),
            None => Err(AdapterError::Malformed { detail: "mock cancel queue exhausted".into() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_queue_drains_in_fifo_order() {
        let mock = MockAdapter::new();
        mock.queue_submit(ScriptedResponse::Err(AdapterError::Network { detail: "1st".into() }));
        mock.queue_submit(ScriptedResponse::Err(AdapterError::Network { detail: "2nd".into() }));

        let req = SubmitRequest {
            symbol: Symbol::new("BTCTRY"),
            side: crate::core::types::Side::Buy,
            price: rust_decimal::Decimal::ZERO,
            qty: rust_decimal::Decimal::ZERO,
            client_order_id: ClientOrderId("cid".into()),
        };

        let first = mock.submit_limit_order(&req).await.unwrap_err();
        assert!(matches!(first, AdapterError::Network { detail } if detail == "1st"));
        let second = mock.submit_limit_order(&req).await.unwrap_err();
        assert!(matches!(second, AdapterError::Network { detail } if detail == "2nd"));
    }

    #[tokio::test]
    async fn empty_queue_reports_malformed_rather_than_panicking() {
        let mock = MockAdapter::new();
        let req = SubmitRequest {
            symbol: Symbol::new("BTCTRY"),
            side: crate::core::types::Side::Buy,
            price: rust_decimal::Decimal::ZERO,
            qty: rust_decimal::Decimal::ZERO,
            client_order_id: ClientOrderId("cid".into()),
        };
        assert!(matches!(
            mock.submit_limit_order(&req).await,
            Err(AdapterError::Malformed { .. })
        ));
    }
}
