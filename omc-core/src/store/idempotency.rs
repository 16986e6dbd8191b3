//! Hard per-intent idempotency table.

use crate::core::errors::StoreError;
use crate::core::types::IdempotencyState;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// No prior row: the caller may proceed.
    Fresh,
    /// Prior row with the same payload hash: short-circuit to its outcome.
    DuplicateSameHash { state: IdempotencyState },
    /// Prior row with a *different* payload hash: a hard error -- the
    /// same `(action_type, key)` must never represent two different
    /// logical actions.
    ConflictDifferentHash,
}

fn state_to_str(state: IdempotencyState) -> &'static str {
    state.as_str()
}

fn state_from_str(s: &str) -> Result<IdempotencyState, StoreError> {
    Ok(match s {
        "PENDING" => IdempotencyState::Pending,
        "COMMITTED" => IdempotencyState::Committed,
        "FAILED" => IdempotencyState::Failed,
        "UNKNOWN" => IdempotencyState::Unknown,
        "SIMULATED" => IdempotencyState::Simulated,
        other => return Err(StoreError::Constraint(format!("unknown idempotency state {:?}", other))),
    })
}

pub fn try_register_idempotency_key(
    conn: &Connection,
    action_type: &str,
    key: &str,
    payload_hash: &str,
    now: i64,
) -> Result<RegisterOutcome, StoreError> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT payload_hash, state FROM idempotency_keys WHERE action_type = ?1 AND key = ?2",
            params![action_type, key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((existing_hash, existing_state)) = existing {
        return Ok(if existing_hash == payload_hash {
            RegisterOutcome::DuplicateSameHash { state: state_from_str(&existing_state)? }
        } else {
            RegisterOutcome::ConflictDifferentHash
        });
    }

    conn.execute(
        "INSERT INTO idempotency_keys (action_type, key, payload_hash, state, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?5)",
        params![action_type, key, payload_hash, state_to_str(IdempotencyState::Pending), now],
    )?;
    Ok(RegisterOutcome::Fresh)
}

pub fn finalize_idempotency(
    conn: &Connection,
    action_type: &str,
    key: &str,
    outcome: IdempotencyState,
    now: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE idempotency_keys SET state = ?1, updated_at = ?2 WHERE action_type = ?3 AND key = ?4",
        params![state_to_str(outcome), now, action_type, key],
    )?;
    Ok(())
}

/// Delete `PENDING` rows older than `older_than` -- crash-recovery
/// housekeeping so a process that died between `Fresh` registration and
/// finalize doesn't leave a permanent false-conflict trap for retries of
/// the same intent under a fresh process.
pub fn prune_stale_pending(conn: &Connection, older_than: i64) -> Result<usize, StoreError> {
    let changed = conn.execute(
        "DELETE FROM idempotency_keys WHERE state = 'PENDING' AND created_at < ?1",
        params![older_than],
    )?;
    Ok(changed)
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
    fn fresh_registration_then_duplicate_same_hash() {
        let c = conn();
        let first = try_register_idempotency_key(&c, "submit", "cid1", "hash-a", 100).unwrap();
        assert_eq!(first, RegisterOutcome::Fresh);

        let second = try_register_idempotency_key(&c, "submit", "cid1", "hash-a", 101).unwrap();
        assert_eq!(second, RegisterOutcome::DuplicateSameHash { state: IdempotencyState::Pending });
    }

    #[test]
    fn different_hash_is_a_conflict() {
        let c = conn();
        try_register_idempotency_key(&c, "submit", "cid1", "hash-a", 100).unwrap();
        let conflict = try_register_idempotency_key(&c, "submit", "cid1", "hash-b", 101).unwrap();
        assert_eq!(conflict, RegisterOutcome::ConflictDifferentHash);
    }

    #[test]
    fn finalize_updates_state_for_subsequent_lookups() {
        let c = conn();
        try_register_idempotency_key(&c, "submit", "cid1", "hash-a", 100).unwrap();
        finalize_idempotency(&c, "submit", "cid1", IdempotencyState::Committed, 105).unwrap();

        let after = try_register_idempotency_key(&c, "submit", "cid1", "hash-a", 110).unwrap();
        assert_eq!(after, RegisterOutcome::DuplicateSameHash { state: IdempotencyState::Committed });
    }

    #[test]
    fn prune_stale_pending_removes_only_old_pending_rows() {
        let c = conn();
        try_register_idempotency_key(&c, "submit", "cid1", "hash-a", 100).unwrap();
        try_register_idempotency_key(&c, "submit", "cid2", "hash-b", 9_999).unwrap();

        let pruned = prune_stale_pending(&c, 1_000).unwrap();
        assert_eq!(pruned, 1);

        let still_fresh = try_register_idempotency_key(&c, "submit", "cid1", "hash-c", 2_000).unwrap();
        assert_eq!(still_fresh, RegisterOutcome::Fresh);
    }
}
