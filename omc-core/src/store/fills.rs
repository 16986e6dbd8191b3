//! Fill persistence and dedupe.

use crate::core::errors::StoreError;
use crate::core::types::{ClientOrderId, Fill, Side, Symbol};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

/// Insert `fill`, or report `Duplicate` if `fill.fill_id` was already
/// recorded. Per the global invariant, a duplicate never mutates
/// positions: callers must branch on the returned outcome rather than
/// assume every call produces a ledger event.
pub fn insert_fill_if_absent(conn: &Connection, fill: &Fill) -> Result<InsertOutcome, StoreError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO fills
            (fill_id, exchange_order_id, client_order_id, symbol, side, qty, price, fee, fee_currency, ts, meta)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            fill.fill_id,
            fill.exchange_order_id,
            fill.client_order_id.as_ref().map(|c| c.as_str()),
            fill.symbol.as_str(),
            side_to_str(fill.side),
            fill.qty.to_string(),
            fill.price.to_string(),
            fill.fee.to_string(),
            fill.fee_currency,
            fill.ts,
            fill.meta,
        ],
    )?;

    Ok(if changed == 1 { InsertOutcome::Inserted } else { InsertOutcome::Duplicate })
}

pub fn fills_for_client_order_id(conn: &Connection, cid: &ClientOrderId) -> Result<Vec<Fill>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT fill_id, exchange_order_id, client_order_id, symbol, side, qty, price, fee, fee_currency, ts, meta
         FROM fills WHERE client_order_id = ?1 ORDER BY ts ASC",
    )?;
    let rows = stmt.query_map(params![cid.as_str()], |row| {
        Ok(Fill {
            fill_id: row.get(0)?,
            exchange_order_id: row.get(1)?,
            client_order_id: row.get::<_, Option<String>>(2)?.map(ClientOrderId),
            symbol: Symbol(row.get(3)?),
            side: if row.get::<_, String>(4)? == "BUY" { Side::Buy } else { Side::Sell },
            qty: Decimal::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
            price: Decimal::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
            fee: Decimal::from_str(&row.get::<_, String>(7)?).unwrap_or_default(),
            fee_currency: row.get(8)?,
            ts: row.get(9)?,
            meta: row.get(10)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, rusqlite::Error>>().map_err(StoreError::from)
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

    fn sample_fill() -> Fill {
        Fill {
            fill_id: "f1".into(),
            exchange_order_id: Some("X1".into()),
            client_order_id: Some(ClientOrderId("cid1".into())),
            symbol: Symbol::new("BTCTRY"),
            side: Side::Buy,
            qty: dec!(0.001),
            price: dec!(100000),
            fee: dec!(0.01),
            fee_currency: "TRY".into(),
            ts: 1000,
            meta: None,
        }
    }

    #[test]
    fn duplicate_fill_id_is_a_no_op() {
        let c = conn();
        let fill = sample_fill();
        assert_eq!(insert_fill_if_absent(&c, &fill).unwrap(), InsertOutcome::Inserted);
        assert_eq!(insert_fill_if_absent(&c, &fill).unwrap(), InsertOutcome::Duplicate);

        let all = fills_for_client_order_id(&c, &ClientOrderId("cid1".into())).unwrap();
        assert_eq!(all.len(), 1);
    }
}
