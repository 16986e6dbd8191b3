//! Append-only ledger event log and reducer checkpoints.
//!
//! This module is pure persistence: the incremental fold over
//! `LedgerEvent` rows into a `Position` lives in `crate::ledger::reducer`.

use crate::core::errors::StoreError;
use crate::core::types::{ClientOrderId, LedgerCheckpoint, LedgerEvent, LedgerEventType, Side, Symbol};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn side_from_str(s: &str) -> Result<Side, StoreError> {
    match s {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(StoreError::Constraint(format!("unknown side {:?}", other))),
    }
}

fn event_type_to_str(t: LedgerEventType) -> &'static str {
    match t {
        LedgerEventType::Fill => "FILL",
        LedgerEventType::Fee => "FEE",
        LedgerEventType::Adjust => "ADJUST",
    }
}

fn event_type_from_str(s: &str) -> Result<LedgerEventType, StoreError> {
    Ok(match s {
        "FILL" => LedgerEventType::Fill,
        "FEE" => LedgerEventType::Fee,
        "ADJUST" => LedgerEventType::Adjust,
        other => return Err(StoreError::Constraint(format!("unknown ledger event type {:?}", other))),
    })
}

fn decimal_from_col(row: &Row, idx: &str) -> Result<Decimal, StoreError> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| StoreError::Constraint(format!("bad decimal {:?}: {}", raw, e)))
}

fn row_to_event(row: &Row) -> Result<LedgerEvent, StoreError> {
    Ok(LedgerEvent {
        rowid: row.get("rowid")?,
        event_id: row.get("event_id")?,
        ts: row.get("ts")?,
        symbol: Symbol(row.get("symbol")?),
        event_type: event_type_from_str(&row.get::<_, String>("event_type")?)?,
        side: side_from_str(&row.get::<_, String>("side")?)?,
        qty: decimal_from_col(row, "qty")?,
        price: decimal_from_col(row, "price")?,
        fee: decimal_from_col(row, "fee")?,
        fee_currency: row.get("fee_currency")?,
        exchange_trade_id: row.get("exchange_trade_id")?,
        exchange_order_id: row.get("exchange_order_id")?,
        client_order_id: row.get::<_, Option<String>>("client_order_id")?.map(ClientOrderId),
        meta: row.get("meta")?,
    })
}

const SELECT_COLUMNS: &str = "rowid, event_id, ts, symbol, event_type, side, qty, price, fee, fee_currency, \
     exchange_trade_id, exchange_order_id, client_order_id, meta";

/// Append `events`, skipping any whose `event_id` was already recorded.
/// Ledger events are append-only: there is no update path, only dedupe.
pub fn append_ledger_events(conn: &Connection, events: &[LedgerEvent]) -> Result<usize, StoreError> {
    let mut inserted = 0usize;
    for event in events {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO ledger_events
                (event_id, ts, symbol, event_type, side, qty, price, fee, fee_currency,
                 exchange_trade_id, exchange_order_id, client_order_id, meta)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                event.event_id,
                event.ts,
                event.symbol.as_str(),
                event_type_to_str(event.event_type),
                side_to_str(event.side),
                event.qty.to_string(),
                event.price.to_string(),
                event.fee.to_string(),
                event.fee_currency,
                event.exchange_trade_id,
                event.exchange_order_id,
                event.client_order_id.as_ref().map(|c| c.as_str()),
                event.meta,
            ],
        )?;
        inserted += changed;
    }
    Ok(inserted)
}

/// Events with `rowid > after_rowid`, ordered by `rowid ASC` -- the
/// reducer's incremental-load cursor.
pub fn fetch_events_after(conn: &Connection, after_rowid: i64) -> Result<Vec<LedgerEvent>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ledger_events WHERE rowid > ?1 ORDER BY rowid ASC",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![after_rowid], row_to_event)?;
    rows.collect::<Result<Vec<_>, rusqlite::Error>>()
        .map_err(StoreError::from)?
        .into_iter()
        .map(Ok)
        .collect()
}

pub fn read_checkpoint(conn: &Connection, scope_id: &str) -> Result<Option<LedgerCheckpoint>, StoreError> {
    conn.query_row(
        "SELECT scope_id, last_rowid, snapshot_blob, snapshot_version, updated_at
         FROM ledger_reducer_checkpoints WHERE scope_id = ?1",
        params![scope_id],
        |row| {
            Ok(LedgerCheckpoint {
                scope_id: row.get(0)?,
                last_rowid: row.get(1)?,
                snapshot_blob: row.get(2)?,
                snapshot_version: row.get(3)?,
                updated_at: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn write_checkpoint(
    conn: &Connection,
    scope_id: &str,
    last_rowid: i64,
    snapshot_blob: &str,
    snapshot_version: i32,
    now: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO ledger_reducer_checkpoints (scope_id, last_rowid, snapshot_blob, snapshot_version, updated_at)
         VALUES (?1,?2,?3,?4,?5)
         ON CONFLICT(scope_id) DO UPDATE SET
            last_rowid = excluded.last_rowid,
            snapshot_blob = excluded.snapshot_blob,
            snapshot_version = excluded.snapshot_version,
            updated_at = excluded.updated_at",
        params![scope_id, last_rowid, snapshot_blob, snapshot_version, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::migrate;
    use rust_decimal_macros::dec;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        migrate(&c).unwrap();
        c
    }

    fn sample_event(event_id: &str, ts: i64) -> LedgerEvent {
        LedgerEvent {
            rowid: 0,
            event_id: event_id.into(),
            ts,
            symbol: Symbol::new("BTCTRY"),
            event_type: LedgerEventType::Fill,
            side: Side::Buy,
            qty: dec!(0.001),
            price: dec!(100000),
            fee: dec!(0.01),
            fee_currency: "TRY".into(),
            exchange_trade_id: None,
            exchange_order_id: None,
            client_order_id: Some(ClientOrderId("cid1".into())),
            meta: None,
        }
    }

    #[test]
    fn append_then_fetch_after_orders_by_rowid() {
        let c = conn();
        append_ledger_events(&c, &[sample_event("e1", 100), sample_event("e2", 200)]).unwrap();

        let all = fetch_events_after(&c, 0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_id, "e1");
        assert_eq!(all[1].event_id, "e2");

        let tail = fetch_events_after(&c, all[0].rowid).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_id, "e2");
    }

    #[test]
    fn append_is_idempotent_on_event_id() {
        let c = conn();
        append_ledger_events(&c, &[sample_event("e1", 100)]).unwrap();
        let second = append_ledger_events(&c, &[sample_event("e1", 100)]).unwrap();
        assert_eq!(second, 0);
        assert_eq!(fetch_events_after(&c, 0).unwrap().len(), 1);
    }

    #[test]
    fn checkpoint_round_trips_and_upserts() {
        let c = conn();
        assert!(read_checkpoint(&c, "scope-1").unwrap().is_none());

        write_checkpoint(&c, "scope-1", 5, "{}", 1, 1000).unwrap();
        let cp = read_checkpoint(&c, "scope-1").unwrap().unwrap();
        assert_eq!(cp.last_rowid, 5);

        write_checkpoint(&c, "scope-1", 9, "{\"qty\":\"1\"}", 1, 2000).unwrap();
        let cp = read_checkpoint(&c, "scope-1").unwrap().unwrap();
        assert_eq!(cp.last_rowid, 9);
        assert_eq!(cp.snapshot_blob, "{\"qty\":\"1\"}");
    }
}
