//! Order persistence.

use crate::core::errors::StoreError;
use crate::core::types::{ClientOrderId, Order, OrderOrigin, OrderStatus, Side, Symbol};
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

fn status_to_str(status: OrderStatus) -> &'static str {
    status.as_str()
}

fn status_from_str(s: &str) -> Result<OrderStatus, StoreError> {
    Ok(match s {
        "PLANNED" => OrderStatus::Planned,
        "SUBMITTED" => OrderStatus::Submitted,
        "ACKED" => OrderStatus::Acked,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "UNKNOWN" => OrderStatus::Unknown,
        other => return Err(StoreError::Constraint(format!("unknown order status {:?}", other))),
    })
}

fn origin_to_str(origin: OrderOrigin) -> &'static str {
    match origin {
        OrderOrigin::Local => "LOCAL",
        OrderOrigin::External => "EXTERNAL",
    }
}

fn origin_from_str(s: &str) -> Result<OrderOrigin, StoreError> {
    match s {
        "LOCAL" => Ok(OrderOrigin::Local),
        "EXTERNAL" => Ok(OrderOrigin::External),
        other => Err(StoreError::Constraint(format!("unknown order origin {:?}", other))),
    }
}

fn decimal_from_col(row: &Row, idx: &str) -> Result<Decimal, StoreError> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| StoreError::Constraint(format!("bad decimal {:?}: {}", raw, e)))
}

fn row_to_order(row: &Row) -> Result<Order, StoreError> {
    Ok(Order {
        client_order_id: ClientOrderId(row.get("client_order_id")?),
        exchange_order_id: row.get("exchange_order_id")?,
        symbol: Symbol(row.get("symbol")?),
        side: side_from_str(&row.get::<_, String>("side")?)?,
        price: decimal_from_col(row, "price")?,
        qty: decimal_from_col(row, "qty")?,
        filled_qty: decimal_from_col(row, "filled_qty")?,
        status: status_from_str(&row.get::<_, String>("status")?)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_event_seq: row.get("last_event_seq")?,
        origin: origin_from_str(&row.get::<_, String>("origin")?)?,
        reason_code: row.get("reason_code")?,
        unknown_attempts: row.get("unknown_attempts")?,
    })
}

const SELECT_COLUMNS: &str = "client_order_id, exchange_order_id, symbol, side, price, qty, filled_qty, \
     status, created_at, updated_at, last_event_seq, origin, reason_code, unknown_attempts";

/// Insert or fully overwrite the order row for `order.client_order_id`.
/// The execution engine and reconciler are the sole writers for a given
/// `cid` at any one time (single-writer model, see `crate::lock`), so a
/// blind upsert of the latest in-memory snapshot is safe.
pub fn upsert_order(conn: &Connection, order: &Order) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO orders ({cols}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(client_order_id) DO UPDATE SET
                exchange_order_id = excluded.exchange_order_id,
                symbol = excluded.symbol,
                side = excluded.side,
                price = excluded.price,
                qty = excluded.qty,
                filled_qty = excluded.filled_qty,
                status = excluded.status,
                updated_at = excluded.updated_at,
                last_event_seq = excluded.last_event_seq,
                origin = excluded.origin,
                reason_code = excluded.reason_code,
                unknown_attempts = excluded.unknown_attempts",
            cols = SELECT_COLUMNS
        ),
        params![
            order.client_order_id.as_str(),
            order.exchange_order_id,
            order.symbol.as_str(),
            side_to_str(order.side),
            order.price.to_string(),
            order.qty.to_string(),
            order.filled_qty.to_string(),
            status_to_str(order.status),
            order.created_at,
            order.updated_at,
            order.last_event_seq,
            origin_to_str(order.origin),
            order.reason_code,
            order.unknown_attempts,
        ],
    )?;
    Ok(())
}

/// Load the order for `cid`, apply `guard_fn` against its current state
/// (e.g. reject if already terminal), then persist `new_status`.
pub fn update_order_status(
    conn: &Connection,
    cid: &ClientOrderId,
    new_status: OrderStatus,
    now: i64,
    guard_fn: impl FnOnce(&Order) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let mut order = get_order_by_client_id(conn, cid)?
        .ok_or_else(|| StoreError::Constraint(format!("no order for cid {}", cid.as_str())))?;
    guard_fn(&order)?;
    order.status = new_status;
    order.updated_at = now;
    upsert_order(conn, &order)
}

pub fn get_order_by_client_id(conn: &Connection, cid: &ClientOrderId) -> Result<Option<Order>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM orders WHERE client_order_id = ?1", SELECT_COLUMNS),
        params![cid.as_str()],
        row_to_order,
    )
    .optional()
    .map_err(StoreError::from)?
    .transpose()
}

pub fn get_order_by_exchange_id(conn: &Connection, exchange_order_id: &str) -> Result<Option<Order>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM orders WHERE exchange_order_id = ?1", SELECT_COLUMNS),
        params![exchange_order_id],
        row_to_order,
    )
    .optional()
    .map_err(StoreError::from)?
    .transpose()
}

/// Orders in any non-terminal status: `SUBMITTED, ACKED, PARTIALLY_FILLED,
/// UNKNOWN` -- the reconciler's working set.
pub fn find_open_or_unknown_orders(conn: &Connection) -> Result<Vec<Order>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM orders WHERE status IN ('SUBMITTED','ACKED','PARTIALLY_FILLED','UNKNOWN')",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([], row_to_order)?;
    rows.collect::<Result<Vec<_>, rusqlite::Error>>()
        .map_err(StoreError::from)?
        .into_iter()
        .map(Ok)
        .collect()
}

pub fn find_orders_by_symbol(conn: &Connection, symbol: &Symbol) -> Result<Vec<Order>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM orders WHERE symbol = ?1", SELECT_COLUMNS))?;
    let rows = stmt.query_map(params![symbol.as_str()], row_to_order)?;
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

    fn sample_order() -> Order {
        Order::planned(
            ClientOrderId("cid1".into()),
            Symbol::new("BTCTRY"),
            Side::Buy,
            dec!(100000),
            dec!(1.0),
            100,
        )
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let c = conn();
        let order = sample_order();
        upsert_order(&c, &order).unwrap();
        let loaded = get_order_by_client_id(&c, &order.client_order_id).unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Planned);
        assert_eq!(loaded.price, dec!(100000));
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let c = conn();
        let mut order = sample_order();
        upsert_order(&c, &order).unwrap();

        order.status = OrderStatus::Submitted;
        order.exchange_order_id = Some("X1".into());
        upsert_order(&c, &order).unwrap();

        let loaded = get_order_by_client_id(&c, &order.client_order_id).unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Submitted);
        assert_eq!(loaded.exchange_order_id.as_deref(), Some("X1"));
    }

    #[test]
    fn update_order_status_runs_guard_before_writing() {
        let c = conn();
        let order = sample_order();
        upsert_order(&c, &order).unwrap();

        let result = update_order_status(&c, &order.client_order_id, OrderStatus::Canceled, 200, |o| {
            if o.status.is_terminal() {
                Err(StoreError::Constraint("already terminal".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());

        let result = update_order_status(&c, &order.client_order_id, OrderStatus::Submitted, 300, |o| {
            if o.status.is_terminal() {
                Err(StoreError::Constraint("already terminal".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn find_open_or_unknown_excludes_terminal_statuses() {
        let c = conn();
        let mut open = sample_order();
        open.status = OrderStatus::Acked;
        upsert_order(&c, &open).unwrap();

        let mut terminal = sample_order();
        terminal.client_order_id = ClientOrderId("cid2".into());
        terminal.status = OrderStatus::Filled;
        upsert_order(&c, &terminal).unwrap();

        let found = find_open_or_unknown_orders(&c).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].client_order_id.as_str(), "cid1");
    }
}
