//! Partition naming.
//!
//! The database is a flat namespace of redb tables, one per (service, month)
//! pair, named `{service}/{YYYY-MM}`. The month component is fixed-width, so
//! names parse unambiguously from the right even when the service name
//! contains `/`. Months are always rendered in UTC.

use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Width of a rendered month, `YYYY-MM`.
pub const MONTH_LEN: usize = 7;

/// Table name for a service's month partition.
pub fn table_name(service: &str, month: &str) -> String {
    format!("{service}/{month}")
}

/// Split a table name into (service, month).
///
/// Returns `None` for names that do not end in `/YYYY-MM`; such tables are
/// ignored by every scan and preserved by cleanup.
pub fn parse_table_name(name: &str) -> Option<(&str, &str)> {
    if name.len() < MONTH_LEN + 1 {
        return None;
    }
    let split = name.len() - MONTH_LEN - 1;
    if !name.is_char_boundary(split) {
        return None;
    }
    let (service, rest) = name.split_at(split);
    let month = &rest[1..];
    if rest.as_bytes()[0] != b'/' || parse_month(month).is_none() {
        return None;
    }
    Some((service, month))
}

/// Render the month partition name for an instant.
pub fn month_name(t: DateTime<Utc>) -> String {
    t.format("%Y-%m").to_string()
}

/// Parse `YYYY-MM` into (year, month).
pub fn parse_month(s: &str) -> Option<(i32, u32)> {
    let bytes = s.as_bytes();
    if bytes.len() != MONTH_LEN || bytes[4] != b'-' {
        return None;
    }
    if !bytes[..4].iter().chain(&bytes[5..]).all(u8::is_ascii_digit) {
        return None;
    }
    let year: i32 = s[..4].parse().ok()?;
    let month: u32 = s[5..].parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// First instant of the month following `month`, i.e. the partition's end
/// boundary used by retention.
pub fn end_of_month(month: &str) -> Option<DateTime<Utc>> {
    let (year, month) = parse_month(month)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single()
}

/// Month names overlapping `[from, to]`, ascending, inclusive on both ends.
pub fn months_in_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<String> {
    let mut months = Vec::new();
    let (mut year, mut month) = (from.year(), from.month());
    let end = (to.year(), to.month());
    while (year, month) <= end {
        months.push(format!("{year:04}-{month:02}"));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    months
}
