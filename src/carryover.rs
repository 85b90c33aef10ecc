//! Previous-close resolution for a new session's opening.
//!
//! Decides how much cash is assumed already in the till when a session
//! opens. Absence of history is a valid zero case, not a failure.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::settings::CashSettings;

/// Compute the carryover for a store's next session.
///
/// - `base_value_enabled` short-circuits to the configured base value,
///   history ignored.
/// - Otherwise the most recently dated **closed** session decides: none →
///   0; already deposited → 0 (the float was swept to the bank); still
///   pending → its closing total (the cash is assumed physically present).
pub fn resolve(conn: &Connection, store_id: &str, settings: &CashSettings) -> Result<f64> {
    if settings.base_value_enabled {
        return Ok(settings.base_value);
    }

    let last: Option<(String, f64)> = conn
        .query_row(
            "SELECT deposit_status, closing_total FROM cash_sessions
             WHERE store_id = ?1 AND status = 'closed'
             ORDER BY business_date DESC LIMIT 1",
            params![store_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(match last {
        None => 0.0,
        Some((deposit_status, _)) if deposit_status == "deposited" => 0.0,
        Some((_, closing_total)) => closing_total,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::settings::CashSettings;

    fn insert_closed(
        conn: &Connection,
        id: &str,
        store: &str,
        day: &str,
        closing_total: f64,
        deposit_status: &str,
    ) {
        conn.execute(
            "INSERT INTO cash_sessions
                (id, store_id, business_date, status, closing_total, deposit_status)
             VALUES (?1, ?2, ?3, 'closed', ?4, ?5)",
            params![id, store, day, closing_total, deposit_status],
        )
        .unwrap();
    }

    fn base_settings(enabled: bool, amount: f64) -> CashSettings {
        CashSettings {
            base_value_enabled: enabled,
            base_value: amount,
            ..Default::default()
        }
    }

    #[test]
    fn test_base_value_wins_regardless_of_history() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();

        let settings = base_settings(true, 150.0);
        // Empty history
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 150.0);

        // History present and pending — still the base value
        insert_closed(&conn, "s1", "store-a", "2026-08-01", 900.0, "pending");
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 150.0);
    }

    #[test]
    fn test_no_history_resolves_to_zero() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        let settings = base_settings(false, 0.0);
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 0.0);
    }

    #[test]
    fn test_deposited_last_close_resolves_to_zero() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        insert_closed(&conn, "s1", "store-a", "2026-08-01", 700.0, "deposited");
        let settings = base_settings(false, 0.0);
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 0.0);
    }

    #[test]
    fn test_pending_last_close_carries_its_total() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        insert_closed(&conn, "s1", "store-a", "2026-08-01", 700.0, "pending");
        let settings = base_settings(false, 0.0);
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 700.0);
    }

    #[test]
    fn test_most_recent_closed_session_decides() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        insert_closed(&conn, "s1", "store-a", "2026-08-01", 700.0, "pending");
        insert_closed(&conn, "s2", "store-a", "2026-08-02", 350.0, "deposited");
        let settings = base_settings(false, 0.0);
        // s2 is most recent and deposited → zero, despite s1 still pending
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 0.0);
    }

    #[test]
    fn test_other_stores_history_is_ignored() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        insert_closed(&conn, "s1", "store-b", "2026-08-01", 999.0, "pending");
        let settings = base_settings(false, 0.0);
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 0.0);
    }

    #[test]
    fn test_open_sessions_do_not_count_as_history() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cash_sessions (id, store_id, business_date, status, closing_total)
             VALUES ('s1', 'store-a', '2026-08-01', 'open', 400.0)",
            [],
        )
        .unwrap();
        let settings = base_settings(false, 0.0);
        assert_eq!(resolve(&conn, "store-a", &settings).unwrap(), 0.0);
    }
}
