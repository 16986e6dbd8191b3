//! Durable, transactional state store backed by SQLite (WAL journaling,
//! single writer). All multi-row mutations go through `with_transaction`,
//! which commits on `Ok` and rolls back on `Err` or panic-unwind.

pub mod actions;
pub mod fills;
pub mod idempotency;
pub mod ledger;
pub mod meta;
pub mod orders;
pub mod schema;

use crate::core::errors::StoreError;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Single-writer durable store. Holds one `rusqlite::Connection` behind a
/// mutex: this crate's cycle model is already single-writer and
/// sequential (see the single-instance lock in `crate::lock`), so a
/// connection pool would add complexity with no concurrency to exploit.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn configure(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction: it acquires the
    /// write lock up front (rather than on first write) so two callers
    /// never interleave reads before one of them loses a write race.
    /// Commits on `Ok`, rolls back on `Err`.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let result = f(&tx);
        match result {
            Ok(value) => {
                tx.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_transaction(|tx| {
                tx.execute("SELECT 1 FROM orders WHERE 1 = 0", []).map_err(StoreError::from)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<(), StoreError> = store.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO meta(key, value) VALUES ('probe', '1')",
                [],
            )
            .map_err(StoreError::from)?;
            Err(StoreError::Transaction("forced rollback".into()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_transaction(|tx| {
                tx.query_row("SELECT count(*) FROM meta WHERE key = 'probe'", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
