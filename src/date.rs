//! Date keys and created labels.
//!
//! Daily files are keyed by `yyyy-MM-dd` in local calendar terms and every
//! memo carries a minute-precision `yyyy-MM-dd HH:mm` label.

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::{MemoError, Result};

/// Format of a date key.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Format of a created label.
pub const CREATED_LABEL_FORMAT: &str = "%Y-%m-%d %H:%M";

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Canonical date key for an instant, using its local calendar fields.
pub fn date_key(instant: &DateTime<Local>) -> String {
    instant.format(DATE_KEY_FORMAT).to_string()
}

/// Date key of a calendar date.
pub fn date_key_of(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Human readable created label, local time with minute precision.
pub fn created_label(instant: &DateTime<Local>) -> String {
    instant.format(CREATED_LABEL_FORMAT).to_string()
}

/// Parses a date key back into a calendar date.
pub fn parse_date_key(key: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), DATE_KEY_FORMAT).map_err(|_| MemoError::InvalidDateKey {
        key: key.to_string(),
    })
}

/// Local date key of an epoch-milliseconds instant.
pub fn date_key_of_millis(millis: i64) -> Option<String> {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|instant| date_key(&instant))
}

/// Parses a created label into epoch milliseconds.
///
/// The first space is replaced with a `T` and the result is read as an
/// RFC 3339 timestamp, a local date-time (with or without seconds) or a bare
/// date at UTC midnight. Anything else yields `None`; callers drop the memo.
pub fn parse_created_label(raw: &str) -> Option<i64> {
    let normalized = raw.trim().replacen(' ', "T", 1);
    if normalized.is_empty() {
        return None;
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(instant.timestamp_millis());
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|instant| instant.timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(&normalized, DATE_KEY_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// The last `days` calendar dates ending at `base` inclusive, most recent
/// first. Values below one clamp to one.
pub fn recent_dates(days: i64, base: NaiveDate) -> Vec<NaiveDate> {
    let safe_days = days.max(1) as u64;
    (0..safe_days)
        .map_while(|offset| base.checked_sub_days(Days::new(offset)))
        .collect()
}

/// Date keys for [`recent_dates`].
pub fn recent_date_keys(days: i64, base: NaiveDate) -> Vec<String> {
    recent_dates(days, base).into_iter().map(date_key_of).collect()
}

/// Date keys for the last `days` days ending today.
pub fn recent_date_keys_from_now(days: i64) -> Vec<String> {
    recent_date_keys(days, Local::now().date_naive())
}
