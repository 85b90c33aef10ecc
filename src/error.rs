//! Error taxonomy for the cash ledger.
//!
//! Everything here is an expected, anticipated condition — nothing is a
//! crash-level fault. Callers branch on the variant: `Validation` and
//! `Conflict` route the operator back to the form or to the existing draft,
//! `State` means the requested transition is simply not available.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CashError {
    /// Bad or missing input (no store selected, negative amount, …).
    #[error("{0}")]
    Validation(String),

    /// The operation collides with an existing record. When opening a
    /// session, `existing_id` carries the draft the caller should be
    /// routed to instead.
    #[error("{message}")]
    Conflict {
        message: String,
        existing_id: Option<String>,
    },

    /// The entity is not in a state that allows the requested transition
    /// (closing an already-closed session, depositing with nothing pending).
    #[error("{0}")]
    State(String),

    #[error("database: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encode/decode: {0}")]
    Codec(#[from] serde_json::Error),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("database lock poisoned")]
    Lock,
}

impl CashError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CashError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>, existing_id: Option<String>) -> Self {
        CashError::Conflict {
            message: msg.into(),
            existing_id,
        }
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CashError::State(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CashError>;
