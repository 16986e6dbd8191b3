//! The Execution Engine (C5): turns one approved `OrderIntent` into a
//! persisted, exchange-acknowledged (or safely-uncertain) `Order`, and
//! sweeps stale open orders for cancellation once per cycle.
//!
//! A staged pipeline -- gate → dedupe → reserve → validate → persist →
//! submit, one stage per method -- this core's submit/cancel-only,
//! idempotency-first pipeline.

use super::context::{reason_code, SafetyContext};
use super::report::CycleReport;
use crate::adapter::{
    cancel_order_safe, submit_limit_order_safe, CancelOutcome, ExchangeAdapter, MappedStatus, SubmitOutcome,
    SubmitRequest,
};
use crate::config::RetryConfig;
use crate::core::order_fsm::{self, OrderEvent};
use crate::core::types::{
    is_on_step, quantize_down, ClientOrderId, IdempotencyState, Order, OrderIntent, OrderStatus, Symbol,
    SymbolRules,
};
use crate::store::{actions, idempotency, orders, Store};
use data_encoding::HEXLOWER;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

const CID_PREFIX: &str = "omc";
const SUBMIT_ACTION: &str = "submit";
const CANCEL_ACTION: &str = "cancel";

fn payload_hash(symbol: &Symbol, side: crate::core::types::Side, price: Decimal, qty: Decimal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_str().as_bytes());
    hasher.update(side.to_string().as_bytes());
    hasher.update(price.normalize().to_string().as_bytes());
    hasher.update(qty.normalize().to_string().as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

/// Map a venue status (as classified by `RawOrderStatus::classify`) onto
/// the `OrderEvent` that advances an order just past `Submitted`.
fn event_for_mapped_status(mapped: MappedStatus) -> OrderEvent {
    match mapped {
        MappedStatus::Open => OrderEvent::Ack,
        MappedStatus::PartiallyFilled => OrderEvent::Fill { completes_qty: false },
        MappedStatus::Filled => OrderEvent::Fill { completes_qty: true },
        MappedStatus::Canceled => OrderEvent::Cancel,
        MappedStatus::Rejected => OrderEvent::Reject,
    }
}

/// Everything a pipeline stage needs, bundled so `process_intent` and
/// `sweep_stale_orders` don't grow unwieldy parameter lists.
pub struct ExecutionEngine<'a> {
    pub store: &'a Store,
    pub adapter: &'a dyn ExchangeAdapter,
    pub retry_cfg: &'a RetryConfig,
    pub ctx: &'a SafetyContext,
    pub cycle_id: i64,
    pub action_dedupe_bucket_seconds: i64,
    pub stale_order_ttl_seconds: i64,
}

impl<'a> ExecutionEngine<'a> {
    /// Run one approved intent through the full submit pipeline,
    /// mutating `report` in place.
    pub async fn process_intent(
        &self,
        intent: &OrderIntent,
        rules: &SymbolRules,
        now: i64,
        report: &mut CycleReport,
    ) {
        // 1. Gate.
        if self.ctx.blocks_all_writes() {
            report.record(reason_code::GATED_KILL_SWITCH, None, &intent.intent_id);
            return;
        }
        if self.ctx.blocks_new_submits() {
            report.record(reason_code::GATED_SAFE_MODE, None, &intent.intent_id);
            return;
        }

        let quantized_price = quantize_down(intent.limit_price, rules.price_tick);
        let quantized_qty = quantize_down(intent.qty, rules.qty_step);
        let intent_bucket = intent.intent_bucket(self.action_dedupe_bucket_seconds);
        let cid = ClientOrderId::derive(
            CID_PREFIX,
            &intent.symbol,
            intent.side,
            quantized_price,
            quantized_qty,
            intent_bucket,
        );
        let hash = payload_hash(&intent.symbol, intent.side, quantized_price, quantized_qty);

        // 2. Action dedupe.
        let action_result = self.store.with_transaction(|tx| {
            actions::record_action(tx, self.cycle_id, SUBMIT_ACTION, &hash, now, self.action_dedupe_bucket_seconds)
        });
        match action_result {
            Ok(None) => {
                report.record(reason_code::ACTION_DEDUPED, Some(cid.as_str()), "");
                return;
            }
            Err(e) => {
                report.record(reason_code::VALIDATION_FAILED, Some(cid.as_str()), format!("store error: {e}"));
                return;
            }
            Ok(Some(_)) => {}
        }

        // 3. Reserve hard idempotency.
        let register = self
            .store
            .with_transaction(|tx| idempotency::try_register_idempotency_key(tx, SUBMIT_ACTION, cid.as_str(), &hash, now));
        match register {
            Ok(idempotency::RegisterOutcome::DuplicateSameHash { .. }) => {
                report.record(reason_code::IDEMPOTENCY_DUPLICATE, Some(cid.as_str()), "");
                return;
            }
            Ok(idempotency::RegisterOutcome::ConflictDifferentHash) => {
                report.record(reason_code::IDEMPOTENCY_CONFLICT, Some(cid.as_str()), "");
                return;
            }
            Err(e) => {
                report.record(reason_code::VALIDATION_FAILED, Some(cid.as_str()), format!("store error: {e}"));
                return;
            }
            Ok(idempotency::RegisterOutcome::Fresh) => {}
        }

        // 4. Quantize/validate.
        if let Err(validation_reason) = validate_against_rules(quantized_price, quantized_qty, rules) {
            let order = rejected_order(cid.clone(), intent, quantized_price, quantized_qty, now, &validation_reason);
            let persisted = self.store.with_transaction(|tx| orders::upsert_order(tx, &order));
            if let Err(e) = persisted {
                report.record(reason_code::VALIDATION_FAILED, Some(cid.as_str()), format!("store error: {e}"));
                return;
            }
            let _ = self.store.with_transaction(|tx| {
                idempotency::finalize_idempotency(tx, SUBMIT_ACTION, cid.as_str(), IdempotencyState::Failed, now)
            });
            report.rejected += 1;
            report.record(reason_code::VALIDATION_FAILED, Some(cid.as_str()), &validation_reason);
            return;
        }

        // 5. Persist PLANNED before any network call.
        let mut order = Order::planned(cid.clone(), intent.symbol.clone(), intent.side, quantized_price, quantized_qty, now);
        if let Err(e) = self.store.with_transaction(|tx| orders::upsert_order(tx, &order)) {
            report.record(reason_code::VALIDATION_FAILED, Some(cid.as_str()), format!("store error: {e}"));
            return;
        }

        // 6. Submit.
        let req = SubmitRequest {
            symbol: intent.symbol.clone(),
            side: intent.side,
            price: quantized_price,
            qty: quantized_qty,
            client_order_id: cid.clone(),
        };
        let outcome = submit_limit_order_safe(self.adapter, self.retry_cfg, &req, now).await;

        let finalize = |engine: &Self, state: IdempotencyState| {
            let _ = engine.store.with_transaction(|tx| {
                idempotency::finalize_idempotency(tx, SUBMIT_ACTION, cid.as_str(), state, now)
            });
        };

        match outcome {
            SubmitOutcome::Submitted { exchange_order_id, raw_status } => {
                order.exchange_order_id = Some(exchange_order_id);
                if apply_fsm(&mut order, OrderEvent::Submit, now).is_ok() {
                    let _ = apply_fsm(&mut order, event_for_mapped_status(raw_status.classify()), now);
                }
                if self.store.with_transaction(|tx| orders::upsert_order(tx, &order)).is_ok() {
                    finalize(self, IdempotencyState::Committed);
                    report.submitted += 1;
                    report.record(reason_code::SUBMITTED, Some(cid.as_str()), order.status.as_str());
                }
            }
            SubmitOutcome::Rejected { reason } => {
                order.reason_code = Some(reason.clone());
                let _ = apply_fsm(&mut order, OrderEvent::Reject, now);
                let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &order));
                finalize(self, IdempotencyState::Failed);
                report.rejected += 1;
                report.record(reason_code::REJECTED, Some(cid.as_str()), &reason);
            }
            SubmitOutcome::Uncertain { unknown_reason } => {
                order.status = OrderStatus::Unknown;
                order.reason_code = Some(unknown_reason.clone());
                order.updated_at = now;
                let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &order));
                finalize(self, IdempotencyState::Unknown);
                report.unknown += 1;
                report.record(reason_code::UNKNOWN_OUTCOME, Some(cid.as_str()), &unknown_reason);
            }
        }
    }

    /// Step 7: before new submits, cancel open orders past their TTL.
    pub async fn sweep_stale_orders(&self, now: i64, report: &mut CycleReport) {
        let open = match self.store.with_transaction(|tx| orders::find_open_or_unknown_orders(tx)) {
            Ok(found) => found,
            Err(e) => {
                report.record(reason_code::VALIDATION_FAILED, None, format!("sweep load failed: {e}"));
                return;
            }
        };

        for order in open {
            if order.status == OrderStatus::Unknown {
                continue;
            }
            if now - order.created_at < self.stale_order_ttl_seconds {
                continue;
            }
            self.cancel_one(order, now, report).await;
        }
    }

    async fn cancel_one(&self, mut order: Order, now: i64, report: &mut CycleReport) {
        let cid = order.client_order_id.clone();
        let hash = format!("cancel:{}", cid.as_str());
        let action_result = self.store.with_transaction(|tx| {
            actions::record_action(tx, self.cycle_id, CANCEL_ACTION, &hash, now, self.action_dedupe_bucket_seconds)
        });
        if matches!(action_result, Ok(None)) {
            return;
        }

        let outcome = cancel_order_safe(
            self.adapter,
            self.retry_cfg,
            &order.symbol,
            order.exchange_order_id.as_deref(),
            Some(&cid),
        )
        .await;

        let next_seq = order.last_event_seq + 1;
        let (event, reason, counted) = match outcome {
            CancelOutcome::Canceled => (Some(OrderEvent::Cancel), reason_code::CANCELED, "canceled"),
            CancelOutcome::AlreadyCanceled => (Some(OrderEvent::Cancel), reason_code::CANCEL_ALREADY_CANCELED, "already_canceled"),
            CancelOutcome::AlreadyFilled => {
                (Some(OrderEvent::Fill { completes_qty: true }), reason_code::CANCEL_ALREADY_FILLED, "already_filled")
            }
            CancelOutcome::NotFound => (Some(OrderEvent::Cancel), reason_code::CANCEL_NOT_FOUND, "not_found"),
            CancelOutcome::Uncertain { .. } => (Some(OrderEvent::Unknown), reason_code::CANCEL_UNKNOWN, "uncertain"),
        };

        if let Some(event) = event {
            if order_fsm::apply_event(&mut order, event, now, next_seq).is_ok() {
                if order.status == OrderStatus::Unknown {
                    order.unknown_attempts += 1;
                }
                let _ = self.store.with_transaction(|tx| orders::upsert_order(tx, &order));
                if order.status == OrderStatus::Canceled {
                    report.canceled += 1;
                } else if order.status == OrderStatus::Unknown {
                    report.unknown += 1;
                }
                report.record(reason, Some(cid.as_str()), counted);
            }
        }
    }
}

fn apply_fsm(order: &mut Order, event: OrderEvent, now: i64) -> Result<(), crate::core::errors::FsmError> {
    let next_seq = order.last_event_seq + 1;
    order_fsm::apply_event(order, event, now, next_seq)
}

fn validate_against_rules(price: Decimal, qty: Decimal, rules: &SymbolRules) -> Result<(), String> {
    if !is_on_step(price, rules.price_tick) {
        return Err(format!("price {} not on tick {}", price, rules.price_tick));
    }
    if !is_on_step(qty, rules.qty_step) {
        return Err(format!("qty {} not on step {}", qty, rules.qty_step));
    }
    if qty < rules.min_qty {
        return Err(format!("qty {} below min_qty {}", qty, rules.min_qty));
    }
    if qty > rules.max_qty {
        return Err(format!("qty {} above max_qty {}", qty, rules.max_qty));
    }
    let notional = price * qty;
    if notional < rules.min_notional {
        return Err(format!("notional {} below min_notional {}", notional, rules.min_notional));
    }
    Ok(())
}

fn rejected_order(
    cid: ClientOrderId,
    intent: &OrderIntent,
    price: Decimal,
    qty: Decimal,
    now: i64,
    reason: &str,
) -> Order {
    let mut order = Order::planned(cid, intent.symbol.clone(), intent.side, price, qty, now);
    order.reason_code = Some(reason.to_string());
    let _ = apply_fsm(&mut order, OrderEvent::Reject, now);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::types::ExchangeOrderView;
    use crate::adapter::RawOrderStatus;
    use crate::config::RetryConfig;
    use crate::core::types::Side;
    use crate::testing::{MockAdapter, ScriptedResponse};
    use rust_decimal_macros::dec;

    fn rules() -> SymbolRules {
        SymbolRules {
            price_tick: dec!(0.01),
            qty_step: dec!(0.001),
            min_notional: dec!(10),
            min_qty: dec!(0.0001),
            max_qty: dec!(1000),
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent {
            intent_id: "intent-1".into(),
            symbol: Symbol::new("BTCTRY"),
            side: Side::Buy,
            limit_price: dec!(100000.00),
            qty: dec!(0.001),
            created_at: 1_000,
            origin: "strategy".into(),
        }
    }

    fn retry_cfg() -> RetryConfig {
        RetryConfig { max_attempts: 2, base_ms: 1, max_ms: 2, total_cap_ms: 50 }
    }

    #[tokio::test]
    async fn happy_submit_advances_to_acked_and_commits_idempotency() {
        let store = crate::testing::in_memory_store();
        let mock = MockAdapter::new();
        mock.queue_submit(ScriptedResponse::Ok(ExchangeOrderView {
            exchange_order_id: "X1".into(),
            client_order_id: None,
            symbol: Symbol::new("BTCTRY"),
            side: Side::Buy,
            price: dec!(100000.00),
            qty: dec!(0.001),
            filled_qty: dec!(0),
            raw_status: RawOrderStatus("Untouched".into()),
            created_at: 0,
        }));

        let ctx = SafetyContext::new(false, false, false, true);
        let retry = retry_cfg();
        let engine = ExecutionEngine {
            store: &store,
            adapter: &mock,
            retry_cfg: &retry,
            ctx: &ctx,
            cycle_id: 1,
            action_dedupe_bucket_seconds: 5,
            stale_order_ttl_seconds: 3_600,
        };

        let mut report = CycleReport::new();
        engine.process_intent(&intent(), &rules(), 1_000, &mut report).await;

        assert_eq!(report.submitted, 1);
        assert_eq!(report.rejected, 0);
    }

    #[tokio::test]
    async fn kill_switch_blocks_submission() {
        let store = crate::testing::in_memory_store();
        let mock = MockAdapter::new();
        let ctx = SafetyContext::new(false, true, false, false);
        let retry = retry_cfg();
        let engine = ExecutionEngine {
            store: &store,
            adapter: &mock,
            retry_cfg: &retry,
            ctx: &ctx,
            cycle_id: 1,
            action_dedupe_bucket_seconds: 5,
            stale_order_ttl_seconds: 3_600,
        };

        let mut report = CycleReport::new();
        engine.process_intent(&intent(), &rules(), 1_000, &mut report).await;
        assert_eq!(report.submitted, 0);
        assert_eq!(report.reasons.len(), 1);
        assert!(report.reasons[0].contains(reason_code::GATED_KILL_SWITCH));
    }

    #[tokio::test]
    async fn below_min_notional_is_rejected_locally_without_network_call() {
        let store = crate::testing::in_memory_store();
        let mock = MockAdapter::new();
        let ctx = SafetyContext::new(false, false, false, true);
        let retry = retry_cfg();
        let engine = ExecutionEngine {
            store: &store,
            adapter: &mock,
            retry_cfg: &retry,
            ctx: &ctx,
            cycle_id: 1,
            action_dedupe_bucket_seconds: 5,
            stale_order_ttl_seconds: 3_600,
        };

        let mut tiny_intent = intent();
        tiny_intent.qty = dec!(0.0001);
        tiny_intent.limit_price = dec!(1.00);

        let mut report = CycleReport::new();
        engine.process_intent(&tiny_intent, &rules(), 1_000, &mut report).await;
        assert_eq!(report.rejected, 1);
        assert_eq!(mock.probe_call_count(), 0);

        let cid = ClientOrderId::derive(
            CID_PREFIX,
            &tiny_intent.symbol,
            tiny_intent.side,
            quantize_down(tiny_intent.limit_price, rules().price_tick),
            quantize_down(tiny_intent.qty, rules().qty_step),
            tiny_intent.intent_bucket(5),
        );
        let stored = store.with_transaction(|tx| orders::get_order_by_client_id(tx, &cid)).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn exchange_rejection_reaches_rejected_through_the_fsm() {
        let store = crate::testing::in_memory_store();
        let mock = MockAdapter::new();
        mock.queue_submit(ScriptedResponse::Err(crate::adapter::errors::AdapterError::Client {
            status: 400,
            detail: "bad price".into(),
        }));

        let ctx = SafetyContext::new(false, false, false, true);
        let retry = retry_cfg();
        let engine = ExecutionEngine {
            store: &store,
            adapter: &mock,
            retry_cfg: &retry,
            ctx: &ctx,
            cycle_id: 1,
            action_dedupe_bucket_seconds: 5,
            stale_order_ttl_seconds: 3_600,
        };

        let mut report = CycleReport::new();
        engine.process_intent(&intent(), &rules(), 1_000, &mut report).await;
        assert_eq!(report.rejected, 1);

        let cid = ClientOrderId::derive(
            CID_PREFIX,
            &intent().symbol,
            intent().side,
            quantize_down(intent().limit_price, rules().price_tick),
            quantize_down(intent().qty, rules().qty_step),
            intent().intent_bucket(5),
        );
        let stored = store.with_transaction(|tx| orders::get_order_by_client_id(tx, &cid)).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Rejected);
        // reached PLANNED -> REJECTED through the state machine, not a direct field write
        assert_eq!(stored.last_event_seq, 1);
    }

    #[tokio::test]
    async fn duplicate_intent_in_same_cycle_only_submits_once() {
        let store = crate::testing::in_memory_store();
        let mock = MockAdapter::new();
        mock.queue_submit(ScriptedResponse::Ok(ExchangeOrderView {
            exchange_order_id: "X1".into(),
            client_order_id: None,
            symbol: Symbol::new("BTCTRY"),
            side: Side::Buy,
            price: dec!(100000.00),
            qty: dec!(0.001),
            filled_qty: dec!(0),
            raw_status: RawOrderStatus("Untouched".into()),
            created_at: 0,
        }));

        let ctx = SafetyContext::new(false, false, false, true);
        let retry = retry_cfg();
        let engine = ExecutionEngine {
            store: &store,
            adapter: &mock,
            retry_cfg: &retry,
            ctx: &ctx,
            cycle_id: 1,
            action_dedupe_bucket_seconds: 5,
            stale_order_ttl_seconds: 3_600,
        };

        let mut report = CycleReport::new();
        engine.process_intent(&intent(), &rules(), 1_000, &mut report).await;
        engine.process_intent(&intent(), &rules(), 1_000, &mut report).await;

        assert_eq!(report.submitted, 1);
    }
}
