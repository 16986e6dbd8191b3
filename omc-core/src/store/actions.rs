//! Action-layer dedupe: the coarse, bucketed guard against double-submits
//! from the application layer (see `crate::core::types::Action`).

use crate::core::errors::StoreError;
use crate::core::types::Action;
use rusqlite::{params, Connection};

/// Record an action if its `dedupe_key` hasn't been seen. Returns
/// `Some(action_id)` when a fresh row was inserted, `None` when a prior
/// call within the same dedupe bucket already recorded this payload --
/// the caller should return the prior outcome rather than act again.
pub fn record_action(
    conn: &Connection,
    cycle_id: i64,
    action_type: &str,
    payload_hash: &str,
    now: i64,
    bucket_seconds: i64,
) -> Result<Option<i64>, StoreError> {
    let dedupe_key = Action::dedupe_key(action_type, payload_hash, now, bucket_seconds);

    let changed = conn.execute(
        "INSERT OR IGNORE INTO actions (cycle_id, action_type, payload_hash, dedupe_key, created_at)
         VALUES (?1,?2,?3,?4,?5)",
        params![cycle_id, action_type, payload_hash, dedupe_key, now],
    )?;

    if changed == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

pub fn set_action_outcome(conn: &Connection, action_id: i64, outcome: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE actions SET outcome = ?1 WHERE action_id = ?2",
        params![outcome, action_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::migrate;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        migrate(&c).unwrap();
        c
    }

    #[test]
    fn repeated_payload_within_bucket_is_deduped() {
        let c = conn();
        let first = record_action(&c, 1, "submit", "hash-a", 100, 30).unwrap();
        assert!(first.is_some());

        let second = record_action(&c, 1, "submit", "hash-a", 110, 30).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn different_bucket_allows_a_new_action_row() {
        let c = conn();
        let first = record_action(&c, 1, "submit", "hash-a", 100, 30).unwrap();
        assert!(first.is_some());

        let second = record_action(&c, 1, "submit", "hash-a", 500, 30).unwrap();
        assert!(second.is_some());
        assert_ne!(first, second);
    }
}
