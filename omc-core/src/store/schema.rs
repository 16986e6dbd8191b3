//! Forward-only, versioned schema migrations.

use rusqlite::Connection;

/// Current schema version. Bump and append a migration when the schema
/// changes; never rewrite an already-shipped migration.
pub const SCHEMA_VERSION: i32 = 1;

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS orders (
            client_order_id   TEXT PRIMARY KEY,
            exchange_order_id TEXT,
            symbol            TEXT NOT NULL,
            side              TEXT NOT NULL,
            price             TEXT NOT NULL,
            qty               TEXT NOT NULL,
            filled_qty        TEXT NOT NULL,
            status            TEXT NOT NULL,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL,
            last_event_seq    INTEGER NOT NULL,
            origin            TEXT NOT NULL,
            reason_code       TEXT,
            unknown_attempts  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_exchange_order_id ON orders(exchange_order_id);
        CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);

        CREATE TABLE IF NOT EXISTS fills (
            fill_id           TEXT PRIMARY KEY,
            exchange_order_id TEXT,
            client_order_id   TEXT,
            symbol            TEXT NOT NULL,
            side              TEXT NOT NULL,
            qty               TEXT NOT NULL,
            price             TEXT NOT NULL,
            fee               TEXT NOT NULL,
            fee_currency      TEXT NOT NULL,
            ts                INTEGER NOT NULL,
            meta              TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_fills_client_order_id ON fills(client_order_id);

        CREATE TABLE IF NOT EXISTS actions (
            action_id    INTEGER PRIMARY KEY AUTOINCREMENT,
            cycle_id     INTEGER NOT NULL,
            action_type  TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            dedupe_key   TEXT NOT NULL UNIQUE,
            created_at   INTEGER NOT NULL,
            outcome      TEXT
        );

        CREATE TABLE IF NOT EXISTS idempotency_keys (
            action_type  TEXT NOT NULL,
            key          TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            state        TEXT NOT NULL,
            created_at   INTEGER NOT NULL,
            updated_at   INTEGER NOT NULL,
            PRIMARY KEY (action_type, key)
        );

        CREATE TABLE IF NOT EXISTS ledger_events (
            rowid             INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id          TEXT NOT NULL UNIQUE,
            ts                INTEGER NOT NULL,
            symbol            TEXT NOT NULL,
            event_type        TEXT NOT NULL,
            side              TEXT NOT NULL,
            qty               TEXT NOT NULL,
            price             TEXT NOT NULL,
            fee               TEXT NOT NULL,
            fee_currency      TEXT NOT NULL,
            exchange_trade_id TEXT,
            exchange_order_id TEXT,
            client_order_id   TEXT,
            meta              TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_ledger_events_ts ON ledger_events(ts, event_id);

        CREATE TABLE IF NOT EXISTS ledger_reducer_checkpoints (
            scope_id        TEXT PRIMARY KEY,
            last_rowid      INTEGER NOT NULL,
            snapshot_blob   TEXT NOT NULL,
            snapshot_version INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );
        ",
    )?;

    conn.execute(
        "INSERT INTO meta(key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value WHERE meta.key = 'schema_version' AND CAST(meta.value AS INTEGER) < ?2",
        rusqlite::params![SCHEMA_VERSION.to_string(), SCHEMA_VERSION],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}
