//! cashbook — cash-session reconciliation and deposit ledger.
//!
//! For every store and business day a [`session::CashSession`] records an
//! opening float, itemized tender counts at close, and a reconciliation
//! against the point-of-sale's own closing totals. Closing is
//! confirmation-gated: a non-zero difference comes back as a
//! [`session::CloseProposal`] that the operator must acknowledge before
//! anything is persisted. Closed sessions with an un-banked balance
//! accumulate per store until [`deposit::deposit`] sweeps them into a
//! [`deposit::DepositRecord`].
//!
//! Presentation, routing, attachment storage, authentication and network
//! sync are external collaborators: the crate consumes only opaque store
//! ids, display-name strings, and already-resolved attachment references.

pub mod carryover;
pub mod db;
pub mod deposit;
pub mod error;
pub mod export;
pub mod reconciliation;
pub mod session;
pub mod settings;
pub mod telemetry;

pub use db::DbState;
pub use error::{CashError, Result};
