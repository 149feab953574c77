//! Futures-contract rollover rule (spec §6 "Futures-symbol rule").
//!
//! `VN30F<YY><MM>` contracts roll from the current month to the next month on
//! the last Thursday of the month (inclusive). An environment override pins a
//! single contract and bypasses the rule entirely.

use chrono::{Datelike, NaiveDate, Utc, Weekday};

pub const FUTURES_PREFIX: &str = "VN30F";

/// The current and next-month contract symbols, honoring `override_symbol`.
pub fn futures_symbols(override_symbol: Option<&str>) -> Vec<String> {
    if let Some(sym) = override_symbol {
        return vec![sym.to_string()];
    }
    let now = Utc::now();
    let (cy, cm) = (now.year(), now.month());
    let (ny, nm) = if cm == 12 { (cy + 1, 1) } else { (cy, cm + 1) };
    vec![
        format!("{FUTURES_PREFIX}{:02}{:02}", cy % 100, cm),
        format!("{FUTURES_PREFIX}{:02}{:02}", ny % 100, nm),
    ]
}

fn last_thursday_of_month(year: i32, month: u32) -> NaiveDate {
    let last_day = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .unwrap()
    .pred_opt()
    .unwrap();

    let offset = (last_day.weekday().num_days_from_monday() as i64
        - Weekday::Thu.num_days_from_monday() as i64)
        .rem_euclid(7);
    last_day - chrono::Duration::days(offset)
}

/// The primary (actively-traded) contract: current month's until the last
/// Thursday of the month inclusive, then next month's. Bypassed entirely by
/// `override_symbol`.
pub fn primary_futures_symbol(override_symbol: Option<&str>) -> String {
    if let Some(sym) = override_symbol {
        return sym.to_string();
    }
    let symbols = futures_symbols(None);
    let now = Utc::now();
    let rollover = last_thursday_of_month(now.year(), now.month());
    if now.date_naive() >= rollover {
        symbols[1].clone()
    } else {
        symbols[0].clone()
    }
}
