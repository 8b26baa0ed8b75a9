//! Date-range parsing for note filtering.
//!
//! Two accepted shapes: a relative shorthand `"<int><unit>"` with units
//! s/m/h/d/w whose window ends now, or an explicit `{start, end}` pair
//! where each bound is epoch milliseconds, an RFC 3339 datetime, or a bare
//! `YYYY-MM-DD` interpreted as local-day bounds.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::Value;

/// An inclusive window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Parse a `dateRange` argument relative to `now`.
pub fn parse_date_range(input: &Value, now: DateTime<Local>) -> Result<DateWindow, String> {
    match input {
        Value::String(shorthand) => parse_relative(shorthand, now),
        Value::Object(map) => {
            let start = map
                .get("start")
                .ok_or_else(|| "date range object needs a start".to_string())?;
            let end = map
                .get("end")
                .ok_or_else(|| "date range object needs an end".to_string())?;
            let start_ms = parse_bound(start, false)?;
            let end_ms = parse_bound(end, true)?;
            if start_ms > end_ms {
                return Err("invalid date range: start is after end".into());
            }
            Ok(DateWindow { start_ms, end_ms })
        }
        other => Err(format!(
            "date range must be a shorthand string or {{start, end}} object, got {other}"
        )),
    }
}

/// `"2d"`, `"30m"`, `"1w"` — a window ending now.
fn parse_relative(shorthand: &str, now: DateTime<Local>) -> Result<DateWindow, String> {
    let shorthand = shorthand.trim();
    let split = shorthand
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("relative range '{shorthand}' is missing a unit"))?;
    let (digits, unit) = shorthand.split_at(split);
    let amount: i64 = digits
        .parse()
        .map_err(|_| format!("relative range '{shorthand}' has no leading integer"))?;

    let span = match unit {
        "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        "w" => Duration::weeks(amount),
        other => return Err(format!("unknown range unit '{other}' (use s/m/h/d/w)")),
    };

    let end_ms = now.timestamp_millis();
    Ok(DateWindow {
        start_ms: end_ms - span.num_milliseconds(),
        end_ms,
    })
}

/// One explicit bound. Bare dates expand to the start or end of that local
/// calendar day depending on which side of the range they sit on.
fn parse_bound(value: &Value, is_end: bool) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("epoch bound {n} is not an integer")),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(ms) = text.parse::<i64>() {
                return Ok(ms);
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.timestamp_millis());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
                return local_millis(naive);
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                let time = if is_end {
                    date.and_hms_milli_opt(23, 59, 59, 999)
                } else {
                    date.and_hms_milli_opt(0, 0, 0, 0)
                };
                let naive = time.ok_or_else(|| format!("day bounds overflow for {date}"))?;
                return local_millis(naive);
            }
            Err(format!(
                "bound '{text}' is not epoch millis, an ISO datetime, or YYYY-MM-DD"
            ))
        }
        other => Err(format!("bound must be a number or string, got {other}")),
    }
}

fn local_millis(naive: NaiveDateTime) -> Result<i64, String> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| format!("{naive} does not exist in the local timezone"))
}
