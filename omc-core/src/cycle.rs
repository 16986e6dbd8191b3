//! One cycle: reconcile, execute approved intents, sweep stale orders,
//! refresh the ledger-derived position snapshot. This is the single
//! entry point `omc-bin` drives in a loop; strategy/risk (out of this
//! core's scope) hand it the `OrderIntent`s they already approved.
//!
//! One method sequences the sub-systems and returns a stats/report
//! value, matching this core's reconcile-then-execute cadence.

use crate::adapter::ExchangeAdapter;
use crate::config::Config;
use crate::core::errors::StoreError;
use crate::core::types::{OrderIntent, SymbolRules};
use crate::execution::{CycleReport, ExecutionEngine, SafetyContext};
use crate::ledger;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::store::{meta, Store};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Everything one `run_cycle` call produces, beyond the execution-layer
/// `CycleReport`: the reconciler's findings and the refreshed ledger
/// positions, so a caller can log/export them without re-deriving.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: i64,
    pub reconcile: ReconcileReport,
    pub execution: CycleReport,
    pub positions: HashMap<String, crate::core::types::Position>,
}

/// Run one full cycle against `adapter`/`store` for the given batch of
/// already-approved intents. `now` is the caller-supplied current Unix
/// timestamp (kept as a parameter, not `SystemTime::now()`, so the whole
/// core stays deterministic under test).
pub async fn run_cycle(
    store: &Store,
    adapter: &dyn ExchangeAdapter,
    ctx: &SafetyContext,
    config: &Config,
    intents: Vec<OrderIntent>,
    now: i64,
) -> Result<CycleOutcome, StoreError> {
    let cycle_id = store.with_transaction(|tx| {
        let next = meta::get_last_cycle_id(tx)? + 1;
        meta::set_last_cycle_id(tx, next)?;
        Ok(next)
    })?;

    // A process that died between `Fresh` registration and finalize would
    // otherwise leave a permanent false-conflict trap for retries of the
    // same intent; clear anything that has been PENDING for a full cycle
    // of slack before it can collide with a legitimate retry.
    let pruned = store.with_transaction(|tx| {
        crate::store::idempotency::prune_stale_pending(tx, now - config.stale_order_ttl_seconds)
    })?;
    if pruned > 0 {
        info!(cycle_id, pruned, "pruned stale pending idempotency keys");
    }

    info!(cycle_id, intents = intents.len(), "cycle start");

    // C6: reconcile first, so execution sees up-to-date local state.
    let reconciler = Reconciler {
        store,
        adapter,
        ctx,
        reconcile_window_seconds: config.reconcile_window_seconds,
        reconcile_window_max_seconds: config.reconcile_window_max_seconds,
    };
    let reconcile = reconciler.run(now).await;
    if !reconcile.invariant_violations.is_empty() {
        for reason in &reconcile.invariant_violations {
            warn!(cycle_id, %reason, "reconciler invariant violation");
        }
    }

    // Exchange-wide symbol rules, fetched once per cycle; a per-symbol
    // cache with TTL refresh would also work, but one fetch per cycle is
    // simpler and the rules change rarely enough that staleness within a
    // cycle is immaterial.
    let rules_by_symbol: HashMap<_, _> = match adapter.get_exchange_info().await {
        Ok(rows) => rows.into_iter().collect(),
        Err(e) => {
            warn!(cycle_id, error = %e, "get_exchange_info failed; cycle will reject intents lacking cached rules");
            HashMap::new()
        }
    };

    let engine = ExecutionEngine {
        store,
        adapter,
        retry_cfg: &config.retry,
        ctx,
        cycle_id,
        action_dedupe_bucket_seconds: config.action_dedupe_bucket_seconds,
        stale_order_ttl_seconds: config.stale_order_ttl_seconds,
    };

    // Stale-order cancels run before new submits.
    let mut execution = CycleReport::new();
    engine.sweep_stale_orders(now, &mut execution).await;

    let mut touched_symbols: HashSet<String> = HashSet::new();
    for intent in &intents {
        touched_symbols.insert(intent.symbol.as_str().to_string());
        match rules_by_symbol.get(&intent.symbol) {
            Some(rules) => {
                engine.process_intent(intent, rules, now, &mut execution).await;
            }
            None => {
                execution.rejected += 1;
                execution.record(
                    crate::execution::reason_code::VALIDATION_FAILED,
                    None,
                    format!("no symbol rules cached for {}", intent.symbol.as_str()),
                );
            }
        }
    }

    // C7: refresh the derived position for every symbol this cycle
    // touched (new intents plus whatever the reconciler advanced).
    let positions = refresh_positions(store, &touched_symbols, now)?;

    info!(
        cycle_id,
        submitted = execution.submitted,
        canceled = execution.canceled,
        rejected = execution.rejected,
        unknown = execution.unknown,
        "cycle end"
    );

    Ok(CycleOutcome { cycle_id, reconcile, execution, positions })
}

fn refresh_positions(
    store: &Store,
    symbols: &HashSet<String>,
    now: i64,
) -> Result<HashMap<String, crate::core::types::Position>, StoreError> {
    let mut positions = HashMap::new();
    for symbol in symbols {
        let scope_id = format!("pos:{symbol}");
        let position = ledger::load_state_incremental(store, &scope_id, now)?;
        positions.insert(symbol.clone(), position);
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::types::ExchangeOrderView;
    use crate::adapter::RawOrderStatus;
    use crate::core::types::{Side, Symbol};
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
            limit_price: dec!(100_000.00),
            qty: dec!(0.001),
            created_at: 1_000,
            origin: "strategy".into(),
        }
    }

    #[tokio::test]
    async fn happy_path_cycle_submits_and_bumps_cycle_id() {
        let store = crate::testing::in_memory_store();
        let mock = MockAdapter::new();
        mock.set_exchange_info(vec![(Symbol::new("BTCTRY"), rules())]);
        mock.queue_submit(ScriptedResponse::Ok(ExchangeOrderView {
            exchange_order_id: "X1".into(),
            client_order_id: None,
            symbol: Symbol::new("BTCTRY"),
            side: Side::Buy,
            price: dec!(100_000.00),
            qty: dec!(0.001),
            filled_qty: dec!(0),
            raw_status: RawOrderStatus("Untouched".into()),
            created_at: 0,
        }));

        let ctx = SafetyContext::new(false, false, false, true);
        let config = Config::for_tests();

        let outcome = run_cycle(&store, &mock, &ctx, &config, vec![intent()], 1_000).await.unwrap();
        assert_eq!(outcome.cycle_id, 1);
        assert_eq!(outcome.execution.submitted, 1);

        let next = run_cycle(&store, &mock, &ctx, &config, vec![], 2_000).await.unwrap();
        assert_eq!(next.cycle_id, 2);
    }

    #[tokio::test]
    async fn intent_for_symbol_without_cached_rules_is_rejected() {
        let store = crate::testing::in_memory_store();
        let mock = MockAdapter::new();
        let ctx = SafetyContext::new(false, false, false, true);
        let config = Config::for_tests();

        let outcome = run_cycle(&store, &mock, &ctx, &config, vec![intent()], 1_000).await.unwrap();
        assert_eq!(outcome.execution.rejected, 1);
        assert_eq!(outcome.execution.submitted, 0);
    }
}
