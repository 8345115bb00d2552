//! Timestamp normalization.
//!
//! Every instant is stored as `YYYY-MM-DDTHH:MM:SS.mmmZ` in UTC so that
//! SQLite's text comparison orders rows chronologically.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};

pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now() -> String {
    format_ts(Utc::now())
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC) or a
/// bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}

pub fn normalize(raw: &str) -> Option<String> {
    parse_instant(raw).map(format_ts)
}

/// Calendar day of a date or timestamp parameter.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    parse_instant(raw).map(|dt| dt.date_naive())
}

pub fn start_of_day(day: NaiveDate) -> String {
    format_ts(Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)))
}

/// 23:59:59.999 of the given day.
pub fn end_of_day(day: NaiveDate) -> String {
    let end = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    format_ts(Utc.from_utc_datetime(&day.and_time(end)))
}

pub fn minutes_between(start: &str, end: &str) -> Option<i64> {
    let start = parse_instant(start)?;
    let end = parse_instant(end)?;
    Some((end - start).num_minutes())
}
