//! Ledger Reducer (C7): folds the append-only `ledger_events` log into a
//! derived `Position`, incrementally and deterministically.
//!
//! The fold itself (`apply_events`) is a pure function over `(Position,
//! &[LedgerEvent]) -> Position` -- no I/O, fully replayable. The
//! persistence wrapper (`load_state_incremental`) is what makes it
//! incremental: it reads the last checkpoint, fetches only the events
//! past that cursor, folds them in, and writes back a new checkpoint.

use crate::core::errors::StoreError;
use crate::core::types::{LedgerEvent, LedgerEventType, Position};
use crate::store::ledger as store_ledger;
use crate::store::Store;
use rust_decimal::Decimal;
use rusqlite::Transaction;

/// Bump when `Position`'s shape changes in a way that breaks
/// deserializing an old `snapshot_blob`. A version mismatch on load
/// triggers a full rebuild from rowid 0 rather than a failed deserialize.
pub const SNAPSHOT_VERSION: i32 = 1;

/// Fold `batch` (assumed already ordered by `rowid ASC`) onto `state`,
/// returning the new position. Average cost uses weighted-average cost
/// basis; a fill that flips the position's sign realizes the old side in
/// full and opens the new side fresh, matching spot (no short-selling)
/// semantics.
pub fn apply_events(mut state: Position, batch: &[LedgerEvent]) -> Position {
    for event in batch {
        match event.event_type {
            LedgerEventType::Fill => apply_fill(&mut state, event),
            LedgerEventType::Fee => apply_fee(&mut state, event),
            LedgerEventType::Adjust => apply_adjust(&mut state, event),
        }
    }
    state
}

fn apply_fill(state: &mut Position, event: &LedgerEvent) {
    use crate::core::types::Side;

    let signed_qty = match event.side {
        Side::Buy => event.qty,
        Side::Sell => -event.qty,
    };

    if state.qty.is_zero() || state.qty.signum() == signed_qty.signum() {
        // Adding to (or opening) a position: extend the weighted average cost.
        let new_qty = state.qty + signed_qty;
        if !new_qty.is_zero() {
            let old_notional = state.avg_cost * state.qty.abs();
            let added_notional = event.price * signed_qty.abs();
            state.avg_cost = (old_notional + added_notional) / new_qty.abs();
        }
        state.qty = new_qty;
    } else if signed_qty.abs() <= state.qty.abs() {
        // Reducing (or flat-closing) the existing position: realize PnL
        // on the closed portion at the existing average cost.
        let closed_qty = signed_qty.abs();
        let direction = state.qty.signum();
        state.realized_pnl += (event.price - state.avg_cost) * closed_qty * direction;
        state.qty += signed_qty;
        if state.qty.is_zero() {
            state.avg_cost = Decimal::ZERO;
        }
    } else {
        // Flips sign: realize the full existing position, then open the
        // remainder fresh at this fill's price.
        let direction = state.qty.signum();
        let closing_qty = state.qty.abs();
        state.realized_pnl += (event.price - state.avg_cost) * closing_qty * direction;
        state.qty = signed_qty + state.qty;
        state.avg_cost = event.price;
    }

    apply_fee_amount(state, &event.fee_currency, event.fee);
}

fn apply_fee(state: &mut Position, event: &LedgerEvent) {
    apply_fee_amount(state, &event.fee_currency, event.fee);
}

/// Fees are tracked per currency rather than netted into PnL, since a
/// non-quote fee currency (e.g. a maker rebate paid in the base asset)
/// can't be converted to the quote currency without a market price this
/// reducer doesn't have.
fn apply_fee_amount(state: &mut Position, currency: &str, amount: Decimal) {
    if amount.is_zero() {
        return;
    }
    *state.fees_paid.entry(currency.to_string()).or_insert(Decimal::ZERO) += amount;
}

/// A manual correction event: adjusts `qty`/`realized_pnl` directly by
/// the amounts carried in `qty`/`price` (reused as the adjustment deltas)
/// rather than interpreting them as a trade.
fn apply_adjust(state: &mut Position, event: &LedgerEvent) {
    state.qty += event.qty;
    state.realized_pnl += event.price;
}

/// Load (or rebuild) the reducer state for `scope_id`, applying every
/// event since the last checkpoint and persisting the advanced cursor.
/// The cursor advances to the max rowid seen *in this call's batch*, not
/// to "now" -- so a concurrent writer's later-committed events are picked
/// up on the next call rather than skipped.
pub fn load_state_incremental(store: &Store, scope_id: &str, now: i64) -> Result<Position, StoreError> {
    store.with_transaction(|tx| load_state_incremental_tx(tx, scope_id, now))
}

fn load_state_incremental_tx(tx: &Transaction<'_>, scope_id: &str, now: i64) -> Result<Position, StoreError> {
    let checkpoint = store_ledger::read_checkpoint(tx, scope_id)?;

    let (mut state, cursor) = match &checkpoint {
        Some(cp) if cp.snapshot_version == SNAPSHOT_VERSION => {
            let state: Position = serde_json::from_str(&cp.snapshot_blob)?;
            (state, cp.last_rowid)
        }
        Some(_) => (Position::new(), 0),
        None => (Position::new(), 0),
    };

    let batch = store_ledger::fetch_events_after(tx, cursor)?;
    if batch.is_empty() {
        return Ok(state);
    }

    let new_cursor = batch.iter().map(|e| e.rowid).max().unwrap_or(cursor);
    state = apply_events(state, &batch);

    let blob = serde_json::to_string(&state)?;
    store_ledger::write_checkpoint(tx, scope_id, new_cursor, &blob, SNAPSHOT_VERSION, now)?;

    Ok(state)
}
