//! Deposit ledger: banking accumulated till cash.
//!
//! Closed sessions whose balance has not been physically banked pile up per
//! store. A deposit operation sweeps *all* of them at once: it creates an
//! immutable [`DepositRecord`] referencing every pending session id and
//! flips each of those sessions to `deposited` in one transaction.
//!
//! The connection mutex plus the IMMEDIATE transaction serialize deposits
//! for a store, so the set of sessions pending at read time is exactly the
//! set marked deposited at write time.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{CashError, Result};
use crate::session::{self, CashSession, SessionComment};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Record of one banking operation. Immutable once created except for its
/// append-only comment trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub id: String,
    pub store_id: String,
    pub deposit_date: NaiveDate,
    /// Amount as declared by the operator — stored verbatim, never
    /// validated against the computed accumulation.
    pub amount: f64,
    pub comment: Option<String>,
    pub comments: Vec<SessionComment>,
    /// The cash session ids this deposit cleared.
    pub related_entry_ids: Vec<String>,
    pub created_at: String,
}

/// Aggregated view of a store's un-banked sessions.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub count: usize,
    pub accumulated_amount: f64,
    /// `accumulated_amount / count`, zero when nothing is pending.
    pub average_per_day: f64,
    pub entries: Vec<CashSession>,
}

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub store_id: String,
    pub amount: f64,
    pub deposit_date: NaiveDate,
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Pending aggregation
// ---------------------------------------------------------------------------

/// All closed, un-banked sessions for a store with their accumulated total.
pub fn pending_for(db: &DbState, store_id: &str) -> Result<PendingSummary> {
    let conn = db.lock()?;
    let entries = pending_entries(&conn, store_id)?;

    let count = entries.len();
    let accumulated_amount: f64 = entries.iter().map(|s| s.deposit_value).sum();
    let average_per_day = if count == 0 {
        0.0
    } else {
        accumulated_amount / count as f64
    };

    Ok(PendingSummary {
        count,
        accumulated_amount,
        average_per_day,
        entries,
    })
}

fn pending_entries(conn: &Connection, store_id: &str) -> Result<Vec<CashSession>> {
    let sql = format!(
        "SELECT {} FROM cash_sessions
         WHERE store_id = ?1 AND status = 'closed' AND deposit_status = 'pending'
         ORDER BY business_date ASC",
        session::SESSION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![store_id], session::session_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Deposit
// ---------------------------------------------------------------------------

/// Execute a deposit for a store.
///
/// Atomically creates the record and flips every currently-pending session
/// to `deposited`. The operator-entered amount is stored as declared; when
/// it differs from the accumulated total the discrepancy is logged but not
/// enforced (observed legacy behavior, kept pending product clarification).
pub fn deposit(db: &DbState, req: DepositRequest) -> Result<DepositRecord> {
    if req.store_id.trim().is_empty() {
        return Err(CashError::validation("Missing store selection"));
    }

    let conn = db.lock()?;
    let entries = pending_entries(&conn, &req.store_id)?;

    if entries.is_empty() {
        return Err(CashError::state(format!(
            "Store {} has no pending sessions — nothing to bank",
            req.store_id
        )));
    }

    let accumulated: f64 = entries.iter().map(|s| s.deposit_value).sum();
    if req.amount != accumulated {
        warn!(
            store_id = %req.store_id,
            entered = %req.amount,
            accumulated = %accumulated,
            "Deposit amount differs from accumulated pending total"
        );
    }

    let related_entry_ids: Vec<String> = entries.iter().map(|s| s.id.clone()).collect();
    let deposit_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<()> {
        conn.execute(
            "INSERT INTO deposit_records (
                id, store_id, deposit_date, amount, comment, related_entry_ids, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                deposit_id,
                req.store_id,
                req.deposit_date.to_string(),
                req.amount,
                req.comment,
                serde_json::to_string(&related_entry_ids)?,
                now,
            ],
        )?;

        for session_id in &related_entry_ids {
            conn.execute(
                "UPDATE cash_sessions SET deposit_status = 'deposited', updated_at = ?1
                 WHERE id = ?2",
                params![now, session_id],
            )?;
        }

        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        deposit_id = %deposit_id,
        store_id = %req.store_id,
        amount = %req.amount,
        sessions_cleared = related_entry_ids.len(),
        "Deposit recorded"
    );

    fetch(&conn, &deposit_id)
}

// ---------------------------------------------------------------------------
// History and comments
// ---------------------------------------------------------------------------

const DEPOSIT_COLUMNS: &str =
    "id, store_id, deposit_date, amount, comment, comments, related_entry_ids, created_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<DepositRecord> {
    let deposit_date: String = row.get(2)?;
    let comments: String = row.get(5)?;
    let related: String = row.get(6)?;
    Ok(DepositRecord {
        id: row.get(0)?,
        store_id: row.get(1)?,
        deposit_date: deposit_date.parse().unwrap_or_default(),
        amount: row.get(3)?,
        comment: row.get(4)?,
        comments: serde_json::from_str(&comments).unwrap_or_default(),
        related_entry_ids: serde_json::from_str(&related).unwrap_or_default(),
        created_at: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
    })
}

fn fetch(conn: &Connection, deposit_id: &str) -> Result<DepositRecord> {
    let sql = format!("SELECT {DEPOSIT_COLUMNS} FROM deposit_records WHERE id = ?1");
    conn.query_row(&sql, params![deposit_id], record_from_row)
        .optional()?
        .ok_or_else(|| CashError::state(format!("Deposit not found: {deposit_id}")))
}

/// Deposit history for a store, most recent first.
pub fn history(db: &DbState, store_id: &str) -> Result<Vec<DepositRecord>> {
    let conn = db.lock()?;
    let sql = format!(
        "SELECT {DEPOSIT_COLUMNS} FROM deposit_records
         WHERE store_id = ?1 ORDER BY deposit_date DESC, created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![store_id], record_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Append a free-text comment to a deposit record.
pub fn append_comment(db: &DbState, deposit_id: &str, text: &str) -> Result<DepositRecord> {
    if text.trim().is_empty() {
        return Err(CashError::validation("Comment text is empty"));
    }

    let conn = db.lock()?;
    let record = fetch(&conn, deposit_id)?;

    let now = Utc::now().to_rfc3339();
    let mut comments = record.comments;
    comments.push(SessionComment {
        text: text.to_string(),
        at: now,
    });

    conn.execute(
        "UPDATE deposit_records SET comments = ?1 WHERE id = ?2",
        params![serde_json::to_string(&comments)?, deposit_id],
    )?;

    fetch(&conn, deposit_id)
}

// ===========================================================================
// Tests
// ===========================================================================
