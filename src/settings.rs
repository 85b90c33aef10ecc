//! Cash settings: the two administrator knobs the ledger reads.
//!
//! Stored in `local_settings` under category `cash`. Settings are loaded as
//! an immutable snapshot and passed explicitly into carryover and
//! reconciliation — nothing in this crate reads them ambiently, so both
//! stay pure and testable with injected snapshots. A snapshot taken at
//! open/close time is never re-applied to already-closed sessions.

use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db;
use crate::error::Result;

const CATEGORY: &str = "cash";
const KEY_BASE_VALUE_ENABLED: &str = "base_value_enabled";
const KEY_BASE_VALUE: &str = "base_value";
const KEY_EXTRAS_STORES: &str = "extras_considered_stores";

/// Process-wide cash configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashSettings {
    /// When true, every new session opens with `base_value` as its
    /// previous close, regardless of store history.
    pub base_value_enabled: bool,
    pub base_value: f64,
    /// Stores whose manual inflow/outflow entries count toward the
    /// reconciliation total.
    pub extras_considered_stores: HashSet<String>,
}

impl Default for CashSettings {
    fn default() -> Self {
        CashSettings {
            base_value_enabled: false,
            base_value: 0.0,
            extras_considered_stores: HashSet::new(),
        }
    }
}

impl CashSettings {
    /// Whether the given store's extras enter the declared total.
    pub fn considers_extras(&self, store_id: &str) -> bool {
        self.extras_considered_stores.contains(store_id)
    }
}

/// Normalize a settings string to a bool. Accepts the forms that have
/// historically ended up in the settings table.
fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Load the current settings snapshot, falling back to defaults for any
/// unset or malformed key.
pub fn load(conn: &Connection) -> CashSettings {
    let base_value_enabled = db::get_setting(conn, CATEGORY, KEY_BASE_VALUE_ENABLED)
        .map(|v| parse_bool(&v))
        .unwrap_or(false);

    let base_value = db::get_setting(conn, CATEGORY, KEY_BASE_VALUE)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    let extras_considered_stores = db::get_setting(conn, CATEGORY, KEY_EXTRAS_STORES)
        .and_then(|v| match serde_json::from_str::<Vec<String>>(&v) {
            Ok(ids) => Some(ids.into_iter().collect()),
            Err(e) => {
                warn!("malformed {KEY_EXTRAS_STORES} setting, ignoring: {e}");
                None
            }
        })
        .unwrap_or_default();

    CashSettings {
        base_value_enabled,
        base_value,
        extras_considered_stores,
    }
}

/// Persist a full settings snapshot.
pub fn save(conn: &Connection, settings: &CashSettings) -> Result<()> {
    set_base_value(conn, settings.base_value_enabled, settings.base_value)?;
    let stores: Vec<&String> = {
        let mut v: Vec<&String> = settings.extras_considered_stores.iter().collect();
        v.sort();
        v
    };
    db::set_setting(
        conn,
        CATEGORY,
        KEY_EXTRAS_STORES,
        &serde_json::to_string(&stores)?,
    )?;
    Ok(())
}

/// Admin action: toggle the fixed opening base value.
pub fn set_base_value(conn: &Connection, enabled: bool, amount: f64) -> Result<()> {
    db::set_setting(
        conn,
        CATEGORY,
        KEY_BASE_VALUE_ENABLED,
        if enabled { "true" } else { "false" },
    )?;
    db::set_setting(conn, CATEGORY, KEY_BASE_VALUE, &amount.to_string())?;
    Ok(())
}

/// Admin action: replace the set of stores whose extras are considered.
pub fn set_extras_considered<I, S>(conn: &Connection, stores: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ids: Vec<String> = stores.into_iter().map(Into::into).collect();
    ids.sort();
    ids.dedup();
    db::set_setting(
        conn,
        CATEGORY,
        KEY_EXTRAS_STORES,
        &serde_json::to_string(&ids)?,
    )?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_defaults_when_unset() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        let settings = load(&conn);
        assert_eq!(settings, CashSettings::default());
        assert!(!settings.considers_extras("store-1"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();

        let mut settings = CashSettings {
            base_value_enabled: true,
            base_value: 150.0,
            extras_considered_stores: HashSet::new(),
        };
        settings.extras_considered_stores.insert("store-2".into());
        settings.extras_considered_stores.insert("store-7".into());

        save(&conn, &settings).unwrap();
        let loaded = load(&conn);
        assert_eq!(loaded, settings);
        assert!(loaded.considers_extras("store-2"));
        assert!(!loaded.considers_extras("store-3"));
    }

    #[test]
    fn test_set_base_value_admin_action() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();

        set_base_value(&conn, true, 200.0).unwrap();
        let loaded = load(&conn);
        assert!(loaded.base_value_enabled);
        assert_eq!(loaded.base_value, 200.0);

        set_base_value(&conn, false, 0.0).unwrap();
        assert!(!load(&conn).base_value_enabled);
    }

    #[test]
    fn test_bool_parsing_accepts_legacy_forms() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        db::set_setting(&conn, "cash", "base_value_enabled", "1").unwrap();
        db::set_setting(&conn, "cash", "base_value", "75.5").unwrap();
        let loaded = load(&conn);
        assert!(loaded.base_value_enabled);
        assert_eq!(loaded.base_value, 75.5);
    }

    #[test]
    fn test_malformed_extras_list_ignored() {
        let db = db::test_db();
        let conn = db.conn.lock().unwrap();
        db::set_setting(&conn, "cash", "extras_considered_stores", "not json").unwrap();
        assert!(load(&conn).extras_considered_stores.is_empty());
    }
}
