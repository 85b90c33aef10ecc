//! Cash session lifecycle: open → close for one store and business day.
//!
//! Opening seeds the session's previous close from the carryover resolver
//! using a settings snapshot taken at that moment. Closing is two-phase:
//! `close` runs the reconciliation and either finalizes (difference exactly
//! zero) or hands back a [`CloseProposal`] that the caller must pass to
//! `confirm_close` after the operator has acknowledged the mismatch. An
//! out-of-balance close is never silently accepted.
//!
//! Once closed, a session's numeric breakdown is frozen — only the deposit
//! status (via the deposit ledger) and the append-only comment trail may
//! still change.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::carryover;
use crate::db::DbState;
use crate::error::{CashError, Result};
use crate::reconciliation::{self, DeclaredCounts, Reconciliation, SystemClosing};
use crate::settings;

// ---------------------------------------------------------------------------
// Entity types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl SessionStatus {
    fn parse(raw: &str) -> SessionStatus {
        match raw {
            "closed" => SessionStatus::Closed,
            _ => SessionStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Deposited,
}

impl DepositStatus {
    fn parse(raw: &str) -> DepositStatus {
        match raw {
            "deposited" => DepositStatus::Deposited,
            _ => DepositStatus::Pending,
        }
    }
}

/// Opaque reference to an already-uploaded attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub timestamp: String,
}

/// One entry in a session's append-only comment trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionComment {
    pub text: String,
    pub at: String,
}

/// One store's one-day cash-register cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashSession {
    pub id: String,
    pub store_id: String,
    pub business_date: NaiveDate,
    pub status: SessionStatus,
    pub no_movement: bool,

    /// Float actually deposited into the till at open.
    pub opening_value: f64,
    /// Carryover computed at open time; immutable afterward even if
    /// settings change later.
    pub previous_close: f64,

    pub declared: DeclaredCounts,
    pub closing: SystemClosing,
    pub closing_total: f64,

    pub deposit_value: f64,
    pub deposit_status: DepositStatus,

    pub attachments: Vec<AttachmentRef>,
    pub comments: Vec<SessionComment>,
    pub opened_by: Option<String>,
    pub closed_by: Option<String>,

    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub store_id: String,
    pub business_date: NaiveDate,
    pub opening_value: f64,
    pub opened_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub session_id: String,
    pub declared: DeclaredCounts,
    pub closing: SystemClosing,
    /// Amount the operator keeps back from banking; the session's
    /// deposit value is `closing_total - withheld_value`. Zero by
    /// convention, leaving the full closing total to bank.
    pub withheld_value: f64,
    pub attachments: Vec<AttachmentRef>,
    pub comment: Option<String>,
    pub closed_by: Option<String>,
}

/// A mismatched close awaiting explicit operator acknowledgement.
/// Nothing has been persisted yet.
#[derive(Debug, Clone)]
pub struct CloseProposal {
    pub request: CloseRequest,
    pub reconciliation: Reconciliation,
}

/// Outcome of a close attempt.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// Difference was exactly zero; the session is closed and pending
    /// deposit.
    Closed(Box<CashSession>),
    /// Non-zero difference: the caller must surface it and re-invoke via
    /// `confirm_close` before anything is persisted.
    ConfirmationRequired(CloseProposal),
}

// ---------------------------------------------------------------------------
// Open
// ---------------------------------------------------------------------------

/// Open a session for (store, business date).
///
/// A session is uniquely keyed by (store, date) and created once, so this
/// fails with `Conflict` (carrying the existing record's id) whether the
/// day already has an open draft or an already-closed session — the caller
/// routes to the existing record instead of duplicating it.
pub fn open(db: &DbState, req: OpenRequest) -> Result<CashSession> {
    if req.store_id.trim().is_empty() {
        return Err(CashError::validation("Missing store selection"));
    }

    let conn = db.lock()?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM cash_sessions WHERE store_id = ?1 AND business_date = ?2",
            params![req.store_id, req.business_date.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(existing_id) = existing {
        return Err(CashError::conflict(
            format!(
                "Store {} already has a session for {}",
                req.store_id, req.business_date
            ),
            Some(existing_id),
        ));
    }

    // Settings snapshot at open time; never re-applied retroactively.
    let snapshot = settings::load(&conn);
    let previous_close = carryover::resolve(&conn, &req.store_id, &snapshot)?;

    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO cash_sessions (
            id, store_id, business_date, status, opening_value, previous_close,
            opened_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?6, ?7, ?7)",
        params![
            session_id,
            req.store_id,
            req.business_date.to_string(),
            req.opening_value,
            previous_close,
            req.opened_by,
            now,
        ],
    )?;

    info!(
        session_id = %session_id,
        store_id = %req.store_id,
        previous_close = %previous_close,
        "Cash session opened"
    );

    fetch(&conn, &session_id)
}

/// Record a day with no register activity: an all-zero session created
/// directly as closed and deposited, bypassing reconciliation entirely.
pub fn record_no_movement(
    db: &DbState,
    store_id: &str,
    business_date: NaiveDate,
    recorded_by: Option<&str>,
) -> Result<CashSession> {
    if store_id.trim().is_empty() {
        return Err(CashError::validation("Missing store selection"));
    }

    let conn = db.lock()?;

    // One session per store/day, created once — any existing record wins.
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM cash_sessions WHERE store_id = ?1 AND business_date = ?2",
            params![store_id, business_date.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(existing_id) = existing {
        return Err(CashError::conflict(
            format!("Store {store_id} already has a session for {business_date}"),
            Some(existing_id),
        ));
    }

    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO cash_sessions (
            id, store_id, business_date, status, no_movement,
            deposit_status, opened_by, closed_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, 'closed', 1, 'deposited', ?4, ?4, ?5, ?5)",
        params![
            session_id,
            store_id,
            business_date.to_string(),
            recorded_by,
            now,
        ],
    )?;

    info!(session_id = %session_id, store_id = %store_id, "No-movement day recorded");

    fetch(&conn, &session_id)
}

// ---------------------------------------------------------------------------
// Two-phase close
// ---------------------------------------------------------------------------

/// Attempt to close a session.
///
/// Runs the reconciliation against a settings snapshot taken now. Zero
/// difference finalizes immediately; otherwise nothing is persisted and the
/// computed reconciliation comes back as a [`CloseProposal`] for the
/// operator to acknowledge.
pub fn close(db: &DbState, req: CloseRequest) -> Result<CloseOutcome> {
    let conn = db.lock()?;

    let session = require_open(&conn, &req.session_id)?;
    let snapshot = settings::load(&conn);
    let reconciliation = reconciliation::compute(
        &req.declared,
        &req.closing,
        snapshot.considers_extras(&session.store_id),
    );

    if !reconciliation.is_reconciled() {
        info!(
            session_id = %req.session_id,
            diff_total = %reconciliation.diff_total,
            "Close proposal has a difference — confirmation required"
        );
        return Ok(CloseOutcome::ConfirmationRequired(CloseProposal {
            request: req,
            reconciliation,
        }));
    }

    let closed = finalize(&conn, &session, &req, &reconciliation)?;
    Ok(CloseOutcome::Closed(Box::new(closed)))
}

/// Persist a mismatched close after the operator has explicitly
/// acknowledged the difference.
pub fn confirm_close(db: &DbState, proposal: &CloseProposal) -> Result<CashSession> {
    let conn = db.lock()?;
    let session = require_open(&conn, &proposal.request.session_id)?;

    info!(
        session_id = %session.id,
        diff_total = %proposal.reconciliation.diff_total,
        "Mismatched close confirmed by operator"
    );

    finalize(&conn, &session, &proposal.request, &proposal.reconciliation)
}

/// Fetch a session that must still be open.
fn require_open(conn: &Connection, session_id: &str) -> Result<CashSession> {
    let session = fetch_optional(conn, session_id)?
        .ok_or_else(|| CashError::state(format!("Session not found: {session_id}")))?;

    if session.status != SessionStatus::Open {
        return Err(CashError::state(format!(
            "Session {session_id} is already closed; its breakdown is frozen"
        )));
    }
    Ok(session)
}

/// Write the close: declared counts, closing breakdown, deposit seed, and
/// status flip. `open` rejects any second session for the same store/day,
/// so the row being finalized is the only record for it.
fn finalize(
    conn: &Connection,
    session: &CashSession,
    req: &CloseRequest,
    reconciliation: &Reconciliation,
) -> Result<CashSession> {
    let now = Utc::now().to_rfc3339();
    let deposit_value = reconciliation.closing_total - req.withheld_value;

    let mut comments = session.comments.clone();
    if let Some(text) = req.comment.as_deref() {
        if !text.trim().is_empty() {
            comments.push(SessionComment {
                text: text.to_string(),
                at: now.clone(),
            });
        }
    }

    conn.execute(
        "UPDATE cash_sessions SET
            status = 'closed',
            cash_notes = ?1, cash_coins = ?2,
            card_items = ?3, delivery_items = ?4, extras = ?5,
            closing_cash = ?6, closing_card = ?7, closing_delivery = ?8,
            closing_total = ?9,
            deposit_value = ?10, deposit_status = 'pending',
            attachments = ?11, comments = ?12,
            closed_by = ?13, updated_at = ?14
         WHERE id = ?15",
        params![
            req.declared.cash_notes,
            req.declared.cash_coins,
            serde_json::to_string(&req.declared.card_items)?,
            serde_json::to_string(&req.declared.delivery_items)?,
            serde_json::to_string(&req.declared.extras)?,
            reconciliation.closing_cash,
            reconciliation.closing_card,
            reconciliation.closing_delivery,
            reconciliation.closing_total,
            deposit_value,
            serde_json::to_string(&req.attachments)?,
            serde_json::to_string(&comments)?,
            req.closed_by,
            now,
            session.id,
        ],
    )?;

    info!(
        session_id = %session.id,
        store_id = %session.store_id,
        closing_total = %reconciliation.closing_total,
        diff_total = %reconciliation.diff_total,
        "Cash session closed"
    );

    fetch(conn, &session.id)
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

/// Append a free-text comment. This is the only narrative mutation allowed
/// on a closed session.
pub fn append_comment(db: &DbState, session_id: &str, text: &str) -> Result<CashSession> {
    if text.trim().is_empty() {
        return Err(CashError::validation("Comment text is empty"));
    }

    let conn = db.lock()?;
    let session = fetch_optional(&conn, session_id)?
        .ok_or_else(|| CashError::state(format!("Session not found: {session_id}")))?;

    let now = Utc::now().to_rfc3339();
    let mut comments = session.comments;
    comments.push(SessionComment {
        text: text.to_string(),
        at: now.clone(),
    });

    conn.execute(
        "UPDATE cash_sessions SET comments = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(&comments)?, now, session_id],
    )?;

    fetch(&conn, session_id)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub(crate) const SESSION_COLUMNS: &str = "id, store_id, business_date, status, no_movement,
    opening_value, previous_close,
    cash_notes, cash_coins, card_items, delivery_items, extras,
    closing_cash, closing_card, closing_delivery, closing_total,
    deposit_value, deposit_status, attachments, comments,
    opened_by, closed_by, created_at, updated_at";

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<CashSession> {
    let business_date: String = row.get(2)?;
    let status: String = row.get(3)?;
    let deposit_status: String = row.get(17)?;

    let card_items: String = row.get(9)?;
    let delivery_items: String = row.get(10)?;
    let extras: String = row.get(11)?;
    let attachments: String = row.get(18)?;
    let comments: String = row.get(19)?;

    Ok(CashSession {
        id: row.get(0)?,
        store_id: row.get(1)?,
        business_date: business_date.parse().unwrap_or_default(),
        status: SessionStatus::parse(&status),
        no_movement: row.get::<_, i64>(4)? != 0,
        opening_value: row.get(5)?,
        previous_close: row.get(6)?,
        declared: DeclaredCounts {
            cash_notes: row.get(7)?,
            cash_coins: row.get(8)?,
            card_items: serde_json::from_str(&card_items).unwrap_or_default(),
            delivery_items: serde_json::from_str(&delivery_items).unwrap_or_default(),
            extras: serde_json::from_str(&extras).unwrap_or_default(),
        },
        closing: SystemClosing {
            cash: row.get(12)?,
            card: row.get(13)?,
            delivery: row.get(14)?,
        },
        closing_total: row.get(15)?,
        deposit_value: row.get(16)?,
        deposit_status: DepositStatus::parse(&deposit_status),
        attachments: serde_json::from_str(&attachments).unwrap_or_default(),
        comments: serde_json::from_str(&comments).unwrap_or_default(),
        opened_by: row.get(20)?,
        closed_by: row.get(21)?,
        created_at: row.get::<_, Option<String>>(22)?.unwrap_or_default(),
        updated_at: row.get::<_, Option<String>>(23)?.unwrap_or_default(),
    })
}

fn fetch(conn: &Connection, session_id: &str) -> Result<CashSession> {
    fetch_optional(conn, session_id)?
        .ok_or_else(|| CashError::state(format!("Session not found: {session_id}")))
}

fn fetch_optional(conn: &Connection, session_id: &str) -> Result<Option<CashSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM cash_sessions WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![session_id], session_from_row)
        .optional()?)
}

/// Get a session by id.
pub fn get(db: &DbState, session_id: &str) -> Result<Option<CashSession>> {
    let conn = db.lock()?;
    fetch_optional(&conn, session_id)
}

/// The current open draft for (store, date), if any.
pub fn open_session_for(
    db: &DbState,
    store_id: &str,
    business_date: NaiveDate,
) -> Result<Option<CashSession>> {
    let conn = db.lock()?;
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM cash_sessions
         WHERE store_id = ?1 AND business_date = ?2 AND status = 'open'"
    );
    Ok(conn
        .query_row(
            &sql,
            params![store_id, business_date.to_string()],
            session_from_row,
        )
        .optional()?)
}

/// All sessions for a store, most recent day first.
pub fn sessions_for_store(db: &DbState, store_id: &str) -> Result<Vec<CashSession>> {
    let conn = db.lock()?;
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM cash_sessions
         WHERE store_id = ?1 ORDER BY business_date DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![store_id], session_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Closed sessions for a store within [from, to], oldest first (the shape
/// the export and reporting consumers read).
pub fn closed_sessions_in_range(
    db: &DbState,
    store_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<CashSession>> {
    let conn = db.lock()?;
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM cash_sessions
         WHERE store_id = ?1 AND status = 'closed'
           AND business_date >= ?2 AND business_date <= ?3
         ORDER BY business_date ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![store_id, from.to_string(), to.to_string()],
            session_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ===========================================================================
// Tests
// ===========================================================================
