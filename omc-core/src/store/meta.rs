//! Small single-row key/value facts that don't warrant their own table.

use crate::core::errors::StoreError;
use rusqlite::{params, Connection, OptionalExtension};

const LAST_CYCLE_ID_KEY: &str = "last_cycle_id";

pub fn get_last_cycle_id(conn: &Connection) -> Result<i64, StoreError> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![LAST_CYCLE_ID_KEY], |row| row.get(0))
        .optional()?;
    match raw {
        Some(v) => v
            .parse::<i64>()
            .map_err(|e| StoreError::Constraint(format!("bad last_cycle_id {:?}: {}", v, e))),
        None => Ok(0),
    }
}

pub fn set_last_cycle_id(conn: &Connection, cycle_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO meta(key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![LAST_CYCLE_ID_KEY, cycle_id.to_string()],
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
    fn last_cycle_id_defaults_to_zero() {
        let c = conn();
        assert_eq!(get_last_cycle_id(&c).unwrap(), 0);
    }

    #[test]
    fn set_then_get_round_trips_and_overwrites() {
        let c = conn();
        set_last_cycle_id(&c, 7).unwrap();
        assert_eq!(get_last_cycle_id(&c).unwrap(), 7);

        set_last_cycle_id(&c, 42).unwrap();
        assert_eq!(get_last_cycle_id(&c).unwrap(), 42);
    }
}
