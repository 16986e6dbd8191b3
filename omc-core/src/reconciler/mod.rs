//! Reconciler (C6): makes local state agree with the exchange's
//! authoritative state. Runs the same algorithm at startup and at the
//! top of every cycle, and is reused at single-`cid` granularity by
//! `adapter::safe_ops`'s uncertain-outcome probes.
//!
//! The reconciler depends on the `ExchangeAdapter` trait and the
//! `Store` directly rather than on the Execution Engine, so the two
//! services never reference each other.

use crate::adapter::{ExchangeAdapter, MappedStatus};
use crate::core::order_fsm::{self, OrderEvent};
use crate::core::types::{Order, OrderOrigin, OrderStatus, Symbol};
use crate::execution::SafetyContext;
use crate::store::{orders, Store};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub advanced: u32,
    pub imported: u32,
    pub still_unknown: u32,
    pub invariant_violations: Vec<String>,
}

pub struct Reconciler<'a> {
    pub store: &'a Store,
    pub adapter: &'a dyn ExchangeAdapter,
    pub ctx: &'a SafetyContext,
    pub reconcile_window_seconds: i64,
    pub reconcile_window_max_seconds: i64,
}

impl<'a> Reconciler<'a> {
    /// Run the full startup/per-cycle pass over every symbol with a
    /// locally open or unknown order.
    pub async fn run(&self, now: i64) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let local_open = match self.store.with_transaction(|tx| orders::find_open_or_unknown_orders(tx)) {
            Ok(rows) => rows,
            Err(e) => {
                report.invariant_violations.push(format!("failed to load local open orders: {e}"));
                return report;
            }
        };

        let mut by_symbol: HashMap<Symbol, Vec<Order>> = HashMap::new();
        for order in local_open {
            by_symbol.entry(order.symbol.clone()).or_default().push(order);
        }

        for (symbol, local_orders) in by_symbol {
            self.reconcile_symbol(&symbol, local_orders, now, &mut report).await;
        }

        report
    }

    /// Scoped to a single `cid`: used inline by `adapter::safe_ops` when
    /// an uncertain submit/cancel needs resolution outside the normal
    /// cycle cadence. Delegates to the same open/historical probes.
    pub async fn reconcile_one(&self, cid: &crate::core::types::ClientOrderId, now: i64) -> Option<Order> {
        let order = self.store.with_transaction(|tx| orders::get_order_by_client_id(tx, cid)).ok().flatten()?;
        if order.status.is_terminal() {
            return Some(order);
        }

        let open = self.adapter.get_open_orders(&order.symbol).await.ok()?;
        if let Some(found) = open.iter().find(|o| o.client_order_id.as_ref() == Some(cid)) {
            let mut updated = order;
            advance_from_exchange_view(&mut updated, found, now);
            let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &updated));
            return Some(updated);
        }

        let historical = self
            .adapter
            .get_all_orders(&order.symbol, now - self.reconcile_window_seconds, now)
            .await
            .ok()?;
        if let Some(found) = historical.iter().find(|o| o.client_order_id.as_ref() == Some(cid)) {
            let mut updated = order;
            advance_from_exchange_view(&mut updated, found, now);
            let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &updated));
            return Some(updated);
        }

        None
    }

    async fn reconcile_symbol(
        &self,
        symbol: &Symbol,
        local_orders: Vec<Order>,
        now: i64,
        report: &mut ReconcileReport,
    ) {
        let exchange_open = match self.adapter.get_open_orders(symbol).await {
            Ok(rows) => rows,
            Err(e) => {
                report.invariant_violations.push(format!("get_open_orders({symbol}) failed: {e}"));
                return;
            }
        };

        let open_by_cid: HashMap<&str, &crate::adapter::ExchangeOrderView> = exchange_open
            .iter()
            .filter_map(|v| v.client_order_id.as_ref().map(|c| (c.as_str(), v)))
            .collect();

        let mut unresolved = Vec::new();
        for mut order in local_orders {
            if let Some(view) = open_by_cid.get(order.client_order_id.as_str()) {
                if advance_from_exchange_view(&mut order, view, now) {
                    let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &order));
                    report.advanced += 1;
                }
            } else {
                unresolved.push(order);
            }
        }

        if !unresolved.is_empty() {
            let window = self.reconcile_window_seconds.min(self.reconcile_window_max_seconds);
            match self.adapter.get_all_orders(symbol, now - window, now).await {
                Ok(historical) => {
                    let historical_by_xid: HashMap<&str, &crate::adapter::ExchangeOrderView> =
                        historical.iter().map(|v| (v.exchange_order_id.as_str(), v)).collect();
                    let historical_by_cid: HashMap<&str, &crate::adapter::ExchangeOrderView> = historical
                        .iter()
                        .filter_map(|v| v.client_order_id.as_ref().map(|c| (c.as_str(), v)))
                        .collect();

                    for mut order in unresolved {
                        let matched = order
                            .exchange_order_id
                            .as_deref()
                            .and_then(|xid| historical_by_xid.get(xid))
                            .or_else(|| historical_by_cid.get(order.client_order_id.as_str()));

                        match matched {
                            Some(view) => {
                                if advance_from_exchange_view(&mut order, view, now) {
                                    let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &order));
                                    report.advanced += 1;
                                }
                            }
                            None => {
                                order.unknown_attempts += 1;
                                if order.status != OrderStatus::Unknown {
                                    let next_seq = order.last_event_seq + 1;
                                    let _ = order_fsm::apply_event(&mut order, OrderEvent::Unknown, now, next_seq);
                                }
                                let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &order));
                                report.still_unknown += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    report.invariant_violations.push(format!("get_all_orders({symbol}) failed: {e}"));
                }
            }
        }

        self.import_external_orders(symbol, &exchange_open, now, report);
        self.check_invariants(symbol, now, report);
    }

    /// Exchange open orders whose `cid` has no local row at all are
    /// imported as externally-originated orders.
    fn import_external_orders(
        &self,
        symbol: &Symbol,
        exchange_open: &[crate::adapter::ExchangeOrderView],
        now: i64,
        report: &mut ReconcileReport,
    ) {
        let known_cids: HashSet<String> = match self.store.with_transaction(|tx| orders::find_orders_by_symbol(tx, symbol)) {
            Ok(rows) => rows.into_iter().map(|o| o.client_order_id.0).collect(),
            Err(_) => return,
        };

        for view in exchange_open {
            let Some(cid) = &view.client_order_id else { continue };
            if known_cids.contains(cid.as_str()) {
                continue;
            }
            let mut order = Order::planned(cid.clone(), view.symbol.clone(), view.side, view.price, view.qty, now);
            order.origin = OrderOrigin::External;
            order.exchange_order_id = Some(view.exchange_order_id.clone());
            order.filled_qty = view.filled_qty;
            order.status = match view.raw_status.classify() {
                MappedStatus::Open => OrderStatus::Acked,
                MappedStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
                MappedStatus::Filled => OrderStatus::Filled,
                MappedStatus::Canceled => OrderStatus::Canceled,
                MappedStatus::Rejected => OrderStatus::Rejected,
            };
            if self.store.with_transaction(|tx| orders::upsert_order(tx, &order)).is_ok() {
                report.imported += 1;
            }
        }
    }

    /// Global invariant check: no order with `filled_qty > qty`.
    /// Trips `safe_mode` on violation.
    fn check_invariants(&self, symbol: &Symbol, _now: i64, report: &mut ReconcileReport) {
        let rows = match self.store.with_transaction(|tx| orders::find_orders_by_symbol(tx, symbol)) {
            Ok(rows) => rows,
            Err(_) => return,
        };
        for order in rows {
            if order.filled_qty > order.qty {
                let reason = format!(
                    "order {} has filled_qty {} > qty {}",
                    order.client_order_id.as_str(),
                    order.filled_qty,
                    order.qty
                );
                self.ctx.set_safe_mode(true);
                report.invariant_violations.push(reason);
            }
        }
    }
}

/// Advance `order` to whatever status the exchange's view implies,
/// refreshing `filled_qty` along the way. Returns `true` if anything
/// changed (status or quantity).
fn advance_from_exchange_view(order: &mut Order, view: &crate::adapter::ExchangeOrderView, now: i64) -> bool {
    let before_status = order.status;
    let before_qty = order.filled_qty;

    order.exchange_order_id = Some(view.exchange_order_id.clone());
    order.filled_qty = view.filled_qty;

    let completes = view.filled_qty >= view.qty;
    let event = match view.raw_status.classify() {
        MappedStatus::Open if matches!(order.status, OrderStatus::Submitted | OrderStatus::Unknown) => {
            Some(OrderEvent::Ack)
        }
        MappedStatus::Open => None,
        MappedStatus::PartiallyFilled => Some(OrderEvent::Fill { completes_qty: false }),
        MappedStatus::Filled => Some(OrderEvent::Fill { completes_qty: completes }),
        MappedStatus::Canceled => Some(OrderEvent::Cancel),
        MappedStatus::Rejected => Some(OrderEvent::Reject),
    };

    if let Some(event) = event {
        let next_seq = order.last_event_seq + 1;
        let _ = order_fsm::apply_event(order, event, now, next_seq);
    } else {
        order.updated_at = now;
    }

    order.status != before_status || order.filled_qty != before_qty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::types::ExchangeOrderView;
    use crate::adapter::RawOrderStatus;
    use crate::core::types::{ClientOrderId, Side};
    use crate::testing::{in_memory_store, MockAdapter};
    use rust_decimal_macros::dec;

    fn view(cid: &str, status: &str, filled: rust_decimal::Decimal) -> ExchangeOrderView {
        ExchangeOrderView {
            exchange_order_id: format!("X-{cid}"),
            client_order_id: Some(ClientOrderId(cid.into())),
            symbol: Symbol::new("BTCTRY"),
            side: Side::Buy,
            price: dec!(100000),
            qty: dec!(0.001),
            filled_qty: filled,
            raw_status: RawOrderStatus(status.into()),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn open_order_found_on_exchange_advances_to_acked() {
        let store = in_memory_store();
        let mock = MockAdapter::new();
        let ctx = SafetyContext::new(false, false, false, true);

        let mut order = Order::planned(ClientOrderId("cid1".into()), Symbol::new("BTCTRY"), Side::Buy, dec!(100000), dec!(0.001), 0);
        order.status = OrderStatus::Submitted;
        store.with_transaction(|tx| orders::upsert_order(tx, &order)).unwrap();

        mock.set_open_orders(vec![view("cid1", "Untouched", dec!(0))]);

        let reconciler = Reconciler {
            store: &store,
            adapter: &mock,
            ctx: &ctx,
            reconcile_window_seconds: 300,
            reconcile_window_max_seconds: 86_400,
        };
        let report = reconciler.run(1_000).await;
        assert_eq!(report.advanced, 1);

        let loaded = store.with_transaction(|tx| orders::get_order_by_client_id(tx, &ClientOrderId("cid1".into()))).unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Acked);
    }

    #[tokio::test]
    async fn order_missing_everywhere_stays_unknown_with_incremented_attempts() {
        let store = in_memory_store();
        let mock = MockAdapter::new();
        let ctx = SafetyContext::new(false, false, false, true);

        let mut order = Order::planned(ClientOrderId("cid2".into()), Symbol::new("BTCTRY"), Side::Buy, dec!(100000), dec!(0.001), 0);
        order.status = OrderStatus::Submitted;
        store.with_transaction(|tx| orders::upsert_order(tx, &order)).unwrap();

        let reconciler = Reconciler {
            store: &store,
            adapter: &mock,
            ctx: &ctx,
            reconcile_window_seconds: 300,
            reconcile_window_max_seconds: 86_400,
        };
        let report = reconciler.run(1_000).await;
        assert_eq!(report.still_unknown, 1);

        let loaded = store.with_transaction(|tx| orders::get_order_by_client_id(tx, &ClientOrderId("cid2".into()))).unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Unknown);
        assert_eq!(loaded.unknown_attempts, 1);
    }

    #[tokio::test]
    async fn external_open_order_is_imported() {
        let store = in_memory_store();
        let mock = MockAdapter::new();
        let ctx = SafetyContext::new(false, false, false, true);

        mock.set_open_orders(vec![view("external-cid", "Untouched", dec!(0))]);

        // An unrelated local order of the same symbol so reconcile_symbol runs.
        let mut order = Order::planned(ClientOrderId("cid3".into()), Symbol::new("BTCTRY"), Side::Buy, dec!(100000), dec!(0.001), 0);
        order.status = OrderStatus::Submitted;
        store.with_transaction(|tx| orders::upsert_order(tx, &order)).unwrap();

        let reconciler = Reconciler {
            store: &store,
            adapter: &mock,
            ctx: &ctx,
            reconcile_window_seconds: 300,
            reconcile_window_max_seconds: 86_400,
        };
        let report = reconciler.run(1_000).await;
        assert_eq!(report.imported, 1);

        let loaded = store
            .with_transaction(|tx| orders::get_order_by_client_id(tx, &ClientOrderId("external-cid".into())))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.origin, OrderOrigin::External);
    }

    #[tokio::test]
    async fn overfilled_order_trips_safe_mode() {
        let store = in_memory_store();
        let mock = MockAdapter::new();
        let ctx = SafetyContext::new(false, false, false, true);

        let mut order = Order::planned(ClientOrderId("cid4".into()), Symbol::new("BTCTRY"), Side::Buy, dec!(100000), dec!(0.001), 0);
        order.status = OrderStatus::PartiallyFilled;
        order.filled_qty = dec!(0.002);
        store.with_transaction(|tx| orders::upsert_order(tx, &order)).unwrap();

        let reconciler = Reconciler {
            store: &store,
            adapter: &mock,
            ctx: &ctx,
            reconcile_window_seconds: 300,
            reconcile_window_max_seconds: 86_400,
        };
        let _ = reconciler.run(1_000).await;
        assert!(ctx.safe_mode());
    }
}
