//! Permissive date interpretation.
//!
//! Accepts the spellings the archive exports (`January 5, 2020`), common
//! numeric forms (`01/05/2020`, `2020-01-05`), RFC 3339 / RFC 2822
//! timestamps, and the relative expressions people type on a command line
//! (`today`, `yesterday`, `3 weeks ago`, `-1 year`, `last month`).
//! Relative expressions are resolved against a caller-supplied `now`.
//! Everything without an explicit offset is taken as UTC.

use std::sync::LazyLock;

use chrono::{DateTime, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;

use crate::ArchiveError;

/// Date-only formats, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%b-%Y",
];

/// Date-time formats without an offset, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Interprets `input` as an absolute UTC timestamp.
///
/// # Errors
///
/// Returns [`ArchiveError::Parse`] if `input` matches none of the
/// supported spellings or the result is out of range.
pub fn interpret_date(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ArchiveError> {
    let trimmed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        return Err(ArchiveError::parse("empty date"));
    }

    parse_absolute(&trimmed)
        .or_else(|| parse_keyword(&trimmed.to_lowercase(), now))
        .or_else(|| parse_relative(&trimmed.to_lowercase(), now))
        .ok_or_else(|| ArchiveError::parse(format!("unrecognized date '{input}'")))
}

fn parse_absolute(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    if let Some(date) = parse_slash_date(s) {
        return Some(midnight(date));
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .map(midnight)
}

/// `MM/DD/YYYY` or `MM/DD/YY`. Two-digit years are read as 19xx/20xx the
/// way `%y` does.
fn parse_slash_date(s: &str) -> Option<NaiveDate> {
    let year = s.rsplit('/').next()?;
    if s.matches('/').count() != 2 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match year.len() {
        4 => NaiveDate::parse_from_str(s, "%m/%d/%Y").ok(),
        2 => NaiveDate::parse_from_str(s, "%m/%d/%y").ok(),
        _ => None,
    }
}

fn parse_keyword(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    match s {
        "now" => Some(now),
        "today" | "midnight" => Some(midnight(today)),
        "yesterday" => today.checked_sub_days(Days::new(1)).map(midnight),
        "tomorrow" => today.checked_add_days(Days::new(1)).map(midnight),
        _ => None,
    }
}

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<n>[+-]?\d+)|(?P<word>last|next|a|an)) ?(?P<unit>sec(?:ond)?|min(?:ute)?|hour|day|week|fortnight|month|year)s?(?P<ago> ago)?$",
    )
    .unwrap_or_else(|_| unreachable!())
});

/// `[+-]N unit[s] [ago]`, `N unit[s] ago`, `last unit`, `next unit`.
fn parse_relative(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = RELATIVE_RE.captures(s)?;
    let mut amount: i64 = match (caps.name("n"), caps.name("word").map(|m| m.as_str())) {
        (Some(n), _) => n.as_str().parse().ok()?,
        (None, Some("last")) => -1,
        (None, Some(_)) => 1,
        (None, None) => return None,
    };
    if caps.name("ago").is_some() {
        amount = -amount;
    }

    match caps.name("unit")?.as_str() {
        "sec" | "second" => now.checked_add_signed(Duration::try_seconds(amount)?),
        "min" | "minute" => now.checked_add_signed(Duration::try_minutes(amount)?),
        "hour" => now.checked_add_signed(Duration::try_hours(amount)?),
        "day" => now.checked_add_signed(Duration::try_days(amount)?),
        "week" => now.checked_add_signed(Duration::try_weeks(amount)?),
        "fortnight" => now.checked_add_signed(Duration::try_weeks(amount.checked_mul(2)?)?),
        "month" => shift_months(now, amount),
        "year" => shift_months(now, amount.checked_mul(12)?),
        _ => None,
    }
}

fn shift_months(now: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months < 0 {
        now.checked_sub_months(magnitude)
    } else {
        now.checked_add_months(magnitude)
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
