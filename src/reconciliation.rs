//! Declared-vs-system reconciliation.
//!
//! Pure computation: given the operator's itemized counts and the closing
//! breakdown reported by the point-of-sale, produce per-channel totals and
//! signed differences. No I/O, no side effects, no error paths — malformed
//! input is rejected upstream before it reaches this module.
//!
//! Sign convention: positive difference = surplus (more counted than the
//! POS reports), negative = shortfall. Exactly zero means reconciled.

use serde::{Deserialize, Serialize};

/// One labeled amount in a breakdown list (card brand, delivery app).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledAmount {
    pub label: String,
    pub amount: f64,
}

impl LabeledAmount {
    pub fn new(label: impl Into<String>, amount: f64) -> Self {
        LabeledAmount {
            label: label.into(),
            amount,
        }
    }
}

/// Direction of a manual till entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inflow,
    Outflow,
}

/// A manual inflow/outflow entry (tip, till-out, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraEntry {
    pub description: String,
    pub amount: f64,
    pub direction: Direction,
}

impl ExtraEntry {
    pub fn inflow(description: impl Into<String>, amount: f64) -> Self {
        ExtraEntry {
            description: description.into(),
            amount,
            direction: Direction::Inflow,
        }
    }

    pub fn outflow(description: impl Into<String>, amount: f64) -> Self {
        ExtraEntry {
            description: description.into(),
            amount,
            direction: Direction::Outflow,
        }
    }
}

/// Everything the operator physically counted or itemized at close.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredCounts {
    pub cash_notes: f64,
    pub cash_coins: f64,
    pub card_items: Vec<LabeledAmount>,
    pub delivery_items: Vec<LabeledAmount>,
    pub extras: Vec<ExtraEntry>,
}

/// The closing breakdown as reported by the point-of-sale. Entered as a
/// fact to reconcile against, never computed here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemClosing {
    pub cash: f64,
    pub card: f64,
    pub delivery: f64,
}

impl SystemClosing {
    /// `closing_total` is always the sum of its channels, never entered
    /// independently.
    pub fn total(&self) -> f64 {
        self.cash + self.card + self.delivery
    }
}

/// The computed reconciliation of a session close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub declared_cash: f64,
    pub declared_card: f64,
    pub declared_delivery: f64,
    /// Net manual entries (inflows minus outflows); zero when the store is
    /// not opted into extras consideration.
    pub extras_net: f64,
    pub declared_total: f64,

    pub closing_cash: f64,
    pub closing_card: f64,
    pub closing_delivery: f64,
    pub closing_total: f64,

    pub diff_cash: f64,
    pub diff_card: f64,
    pub diff_delivery: f64,
    pub diff_total: f64,
}

impl Reconciliation {
    /// A difference of exactly 0 is reconciled; anything else is a
    /// mismatch that needs human attention.
    pub fn is_reconciled(&self) -> bool {
        self.diff_total == 0.0
    }
}

/// Compute the reconciliation for one session close.
///
/// `consider_extras` comes from the settings snapshot taken at close time
/// (`settings.considers_extras(store_id)`).
pub fn compute(
    declared: &DeclaredCounts,
    closing: &SystemClosing,
    consider_extras: bool,
) -> Reconciliation {
    let declared_cash = declared.cash_notes + declared.cash_coins;
    let declared_card: f64 = declared.card_items.iter().map(|i| i.amount).sum();
    let declared_delivery: f64 = declared.delivery_items.iter().map(|i| i.amount).sum();

    let extras_net = if consider_extras {
        declared
            .extras
            .iter()
            .map(|e| match e.direction {
                Direction::Inflow => e.amount,
                Direction::Outflow => -e.amount,
            })
            .sum()
    } else {
        0.0
    };

    let declared_total = declared_cash + declared_card + declared_delivery + extras_net;
    let closing_total = closing.total();

    Reconciliation {
        declared_cash,
        declared_card,
        declared_delivery,
        extras_net,
        declared_total,
        closing_cash: closing.cash,
        closing_card: closing.card,
        closing_delivery: closing.delivery,
        closing_total,
        diff_cash: declared_cash - closing.cash,
        diff_card: declared_card - closing.card,
        diff_delivery: declared_delivery - closing.delivery,
        diff_total: declared_total - closing_total,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_counts() -> DeclaredCounts {
        DeclaredCounts {
            cash_notes: 250.0,
            cash_coins: 50.0,
            card_items: vec![
                LabeledAmount::new("VISA", 300.0),
                LabeledAmount::new("MASTERCARD", 267.0),
            ],
            delivery_items: vec![
                LabeledAmount::new("UBEREATS", 134.0),
                LabeledAmount::new("GLOVO", 100.0),
            ],
            extras: vec![ExtraEntry::inflow("entrada", 5.0)],
        }
    }

    #[test]
    fn test_mismatch_with_extras_considered() {
        // declared = 300 cash + 567 card + 234 delivery + 5 extras = 1106
        let closing = SystemClosing {
            cash: 300.0,
            card: 567.0,
            delivery: 234.0,
        };
        assert_eq!(closing.total(), 1101.0);

        let r = compute(&sample_counts(), &closing, true);
        assert_eq!(r.declared_cash, 300.0);
        assert_eq!(r.declared_card, 567.0);
        assert_eq!(r.declared_delivery, 234.0);
        assert_eq!(r.extras_net, 5.0);
        assert_eq!(r.declared_total, 1106.0);
        assert_eq!(r.diff_total, 5.0);
        assert!(!r.is_reconciled());
    }

    #[test]
    fn test_extras_ignored_when_store_not_opted_in() {
        let closing = SystemClosing {
            cash: 300.0,
            card: 567.0,
            delivery: 234.0,
        };
        let r = compute(&sample_counts(), &closing, false);
        assert_eq!(r.extras_net, 0.0);
        assert_eq!(r.declared_total, 1101.0);
        assert!(r.is_reconciled());
    }

    #[test]
    fn test_outflows_subtract_from_extras_net() {
        let declared = DeclaredCounts {
            extras: vec![
                ExtraEntry::inflow("gorjeta", 20.0),
                ExtraEntry::outflow("sangria", 35.0),
            ],
            ..Default::default()
        };
        let r = compute(&declared, &SystemClosing::default(), true);
        assert_eq!(r.extras_net, -15.0);
        assert_eq!(r.declared_total, -15.0);
        assert_eq!(r.diff_total, -15.0);
    }

    #[test]
    fn test_per_channel_differences() {
        let declared = DeclaredCounts {
            cash_notes: 100.0,
            card_items: vec![LabeledAmount::new("AMEX", 40.0)],
            ..Default::default()
        };
        let closing = SystemClosing {
            cash: 90.0,
            card: 50.0,
            delivery: 0.0,
        };
        let r = compute(&declared, &closing, false);
        assert_eq!(r.diff_cash, 10.0); // surplus
        assert_eq!(r.diff_card, -10.0); // shortfall
        assert_eq!(r.diff_delivery, 0.0);
        assert_eq!(r.diff_total, 0.0);
        assert!(r.is_reconciled());
    }

    #[test]
    fn test_compute_is_pure_and_repeatable() {
        let declared = sample_counts();
        let closing = SystemClosing {
            cash: 300.0,
            card: 567.0,
            delivery: 234.0,
        };
        let a = compute(&declared, &closing, true);
        let b = compute(&declared, &closing, true);
        assert_eq!(a, b);
    }
}
