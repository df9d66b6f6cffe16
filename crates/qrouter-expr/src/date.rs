use std::str::FromStr;

use chrono::{DateTime, Duration, Months, NaiveDate};
use serde_json::Value;

use qrouter_core::error::{Result, RouterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Days,
    Months,
    Years,
}

impl FromStr for DateUnit {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "day" | "days" => Ok(DateUnit::Days),
            "month" | "months" => Ok(DateUnit::Months),
            "year" | "years" => Ok(DateUnit::Years),
            other => Err(RouterError::Condition(format!("unknown date unit \"{other}\""))),
        }
    }
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp into a calendar date.
pub fn parse(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(input).ok().map(|dt| dt.date_naive()))
}

/// Amounts arrive as numbers or numeric strings (`"-18"`).
pub fn parse_amount(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| RouterError::Condition(format!("date amount must be an integer, got {value}")))
}

/// `from` moved by `amount` units; negative amounts go back in time.
pub fn shift(from: NaiveDate, amount: i64, unit: DateUnit) -> Result<NaiveDate> {
    let overflow = || RouterError::Condition(format!("date shift of {amount} {unit:?} overflows"));
    match unit {
        DateUnit::Days => Duration::try_days(amount)
            .and_then(|days| from.checked_add_signed(days))
            .ok_or_else(overflow),
        DateUnit::Months | DateUnit::Years => {
            let per = if unit == DateUnit::Years { 12 } else { 1 };
            let months = amount
                .checked_mul(per)
                .and_then(|m| u32::try_from(m.unsigned_abs()).ok())
                .ok_or_else(overflow)?;
            if amount < 0 {
                from.checked_sub_months(Months::new(months))
            } else {
                from.checked_add_months(Months::new(months))
            }
            .ok_or_else(overflow)
        }
    }
}
