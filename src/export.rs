//! Delimited export of closed sessions for spreadsheet hand-off.
//!
//! Reproduces the legacy export byte-for-byte: semicolon-delimited,
//! `dd/mm/yyyy` dates, amounts with `.` thousands grouping and `,` decimal
//! separator, one row per closed session and a trailing totals row.

use chrono::NaiveDate;

use crate::db::DbState;
use crate::error::Result;
use crate::session::{self, CashSession};

const HEADER: &str = "Data;Dinheiro;Cartao;Delivery;Total";

/// Format an amount with pt-BR conventions: `1234567.5` → `1.234.567,50`.
fn format_amount(value: f64) -> String {
    let negative = value < 0.0;
    let fixed = format!("{:.2}", value.abs());
    let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    let digits = int_part.as_bytes();
    for (i, b) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*b as char);
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}{grouped},{dec_part}")
}

fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn row(date: &str, cash: f64, card: f64, delivery: f64, total: f64) -> String {
    format!(
        "{date};{};{};{};{}",
        format_amount(cash),
        format_amount(card),
        format_amount(delivery),
        format_amount(total)
    )
}

/// Render the export for a store's closed sessions in [from, to].
fn render(sessions: &[CashSession]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');

    let mut sum_cash = 0.0;
    let mut sum_card = 0.0;
    let mut sum_delivery = 0.0;
    let mut sum_total = 0.0;

    for s in sessions {
        sum_cash += s.closing.cash;
        sum_card += s.closing.card;
        sum_delivery += s.closing.delivery;
        sum_total += s.closing_total;
        out.push_str(&row(
            &format_date(s.business_date),
            s.closing.cash,
            s.closing.card,
            s.closing.delivery,
            s.closing_total,
        ));
        out.push('\n');
    }

    out.push_str(&row("Total", sum_cash, sum_card, sum_delivery, sum_total));
    out.push('\n');
    out
}

/// Export a store's closed sessions as delimited text, oldest first, with
/// a trailing totals row.
pub fn closed_sessions_csv(
    db: &DbState,
    store_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<String> {
    let sessions = session::closed_sessions_in_range(db, store_id, from, to)?;
    Ok(render(&sessions))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::params;

    #[test]
    fn test_amount_formatting() {
        assert_eq!(format_amount(0.0), "0,00");
        assert_eq!(format_amount(5.0), "5,00");
        assert_eq!(format_amount(216.5), "216,50");
        assert_eq!(format_amount(1101.0), "1.101,00");
        assert_eq!(format_amount(1234567.5), "1.234.567,50");
        assert_eq!(format_amount(-42.25), "-42,25");
    }

    #[test]
    fn test_date_formatting_day_month_year() {
        let d: NaiveDate = "2026-08-03".parse().unwrap();
        assert_eq!(format_date(d), "03/08/2026");
    }

    #[test]
    fn test_export_is_byte_stable() {
        let db = db::test_db();
        {
            let conn = db.conn.lock().unwrap();
            for (id, day, cash, card, delivery) in [
                ("s1", "2026-08-01", 300.0, 567.0, 234.0),
                ("s2", "2026-08-02", 120.5, 80.0, 0.0),
            ] {
                conn.execute(
                    "INSERT INTO cash_sessions
                        (id, store_id, business_date, status,
                         closing_cash, closing_card, closing_delivery, closing_total)
                     VALUES (?1, 'store-a', ?2, 'closed', ?3, ?4, ?5, ?6)",
                    params![id, day, cash, card, delivery, cash + card + delivery],
                )
                .unwrap();
            }
            // Open session must not appear
            conn.execute(
                "INSERT INTO cash_sessions (id, store_id, business_date, status)
                 VALUES ('s3', 'store-a', '2026-08-03', 'open')",
                [],
            )
            .unwrap();
        }

        let out = closed_sessions_csv(
            &db,
            "store-a",
            "2026-08-01".parse().unwrap(),
            "2026-08-31".parse().unwrap(),
        )
        .unwrap();

        let expected = "\
Data;Dinheiro;Cartao;Delivery;Total
01/08/2026;300,00;567,00;234,00;1.101,00
02/08/2026;120,50;80,00;0,00;200,50
Total;420,50;647,00;234,00;1.301,50
";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_export_with_no_sessions_has_header_and_zero_totals() {
        let db = db::test_db();
        let out = closed_sessions_csv(
            &db,
            "store-a",
            "2026-08-01".parse().unwrap(),
            "2026-08-31".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(
            out,
            "Data;Dinheiro;Cartao;Delivery;Total\nTotal;0,00;0,00;0,00;0,00\n"
        );
    }
}
