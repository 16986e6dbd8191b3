//! Uncertain-outcome reconciliation for submit and cancel. Generic
//! over any `ExchangeAdapter` so live, replay and dry-run
//! implementations all get the same probe behavior for free.

use super::errors::AdapterError;
use super::types::{CancelOutcome, MappedStatus, SubmitOutcome, SubmitRequest};
use super::ExchangeAdapter;
use crate::config::RetryConfig;
use crate::core::types::{ClientOrderId, Symbol};

/// Window searched by the existence probe's `get_all_orders` call when
/// the open-orders probe doesn't find the order. Spec.md leaves the
/// exact probe window to implementations; this mirrors the reconciler's
/// narrowest window since a just-submitted order is recent by definition.
const PROBE_WINDOW_SECONDS: i64 = 5 * 60;

/// `submit_limit_order_safe`: attempt submit with retry; on a retryable
/// failure where no ack was observed, probe open/historical orders by
/// `client_order_id` before giving up and reporting `Uncertain`.
pub async fn submit_limit_order_safe(
    adapter: &dyn ExchangeAdapter,
    retry_cfg: &RetryConfig,
    req: &SubmitRequest,
    now: i64,
) -> SubmitOutcome {
    let outcome = super::retry::execute(retry_cfg, || adapter.submit_limit_order(req)).await;

    match outcome {
        Ok(view) => SubmitOutcome::Submitted {
            exchange_order_id: view.exchange_order_id,
            raw_status: view.raw_status,
        },
        Err(err) => {
            if !err.no_ack_observed() {
                return SubmitOutcome::Rejected { reason: err.to_string() };
            }
            probe_for_submit(adapter, &req.symbol, &req.client_order_id, now, &err).await
        }
    }
}

async fn probe_for_submit(
    adapter: &dyn ExchangeAdapter,
    symbol: &Symbol,
    cid: &ClientOrderId,
    now: i64,
    original_err: &AdapterError,
) -> SubmitOutcome {
    if let Ok(open) = adapter.get_open_orders(symbol).await {
        if let Some(found) = open.into_iter().find(|o| o.client_order_id.as_ref() == Some(cid)) {
            return SubmitOutcome::Submitted {
                exchange_order_id: found.exchange_order_id,
                raw_status: found.raw_status,
            };
        }
    }

    if let Ok(historical) = adapter.get_all_orders(symbol, now - PROBE_WINDOW_SECONDS, now).await {
        if let Some(found) = historical.into_iter().find(|o| o.client_order_id.as_ref() == Some(cid)) {
            return SubmitOutcome::Submitted {
                exchange_order_id: found.exchange_order_id,
                raw_status: found.raw_status,
            };
        }
    }

    SubmitOutcome::Uncertain {
        unknown_reason: format!("submit probe found no trace of {}: {}", cid.as_str(), original_err),
    }
}

/// `cancel_order_safe`: attempt cancel with retry; a 404/409/"already
/// closed" response is not a failure -- probe `get_order_by_id` to tell
/// `AlreadyFilled` apart from `AlreadyCanceled`/`NotFound`.
pub async fn cancel_order_safe(
    adapter: &dyn ExchangeAdapter,
    retry_cfg: &RetryConfig,
    symbol: &Symbol,
    exchange_order_id: Option<&str>,
    client_order_id: Option<&ClientOrderId>,
) -> CancelOutcome {
    let outcome =
        super::retry::execute(retry_cfg, || adapter.cancel_order(symbol, exchange_order_id, client_order_id))
            .await;

    match outcome {
        Ok(()) => CancelOutcome::Canceled,
        Err(AdapterError::Client { status: 404, .. }) => {
            probe_for_cancel(adapter, symbol, exchange_order_id, "not found (404)").await
        }
        Err(AdapterError::Client { status: 409, .. }) => {
            probe_for_cancel(adapter, symbol, exchange_order_id, "conflict (409)").await
        }
        Err(err) if err.no_ack_observed() => {
            CancelOutcome::Uncertain { unknown_reason: format!("cancel probe incomplete: {}", err) }
        }
        Err(err) => CancelOutcome::Uncertain { unknown_reason: err.to_string() },
    }
}

async fn probe_for_cancel(
    adapter: &dyn ExchangeAdapter,
    symbol: &Symbol,
    exchange_order_id: Option<&str>,
    reason: &str,
) -> CancelOutcome {
    let Some(xid) = exchange_order_id else {
        return CancelOutcome::Uncertain { unknown_reason: format!("{reason}, no exchange_order_id to probe") };
    };

    match adapter.get_order_by_id(symbol, xid).await {
        Ok(Some(view)) => match view.raw_status.classify() {
            MappedStatus::Filled => CancelOutcome::AlreadyFilled,
            MappedStatus::Canceled => CancelOutcome::AlreadyCanceled,
            MappedStatus::Rejected => CancelOutcome::AlreadyCanceled,
            MappedStatus::Open | MappedStatus::PartiallyFilled => {
                CancelOutcome::Uncertain { unknown_reason: format!("{reason} but order still open on probe") }
            }
        },
        Ok(None) => CancelOutcome::NotFound,
        Err(err) => CancelOutcome::Uncertain { unknown_reason: format!("{reason}, probe failed: {err}") },
    }
}
