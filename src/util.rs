// Utility helpers for parsing and number formatting.
//
// This module centralizes all the "dirty" cell handling (numbers as text,
// day-first dates, textual durations) so the rest of the code can work
// with tagged, typed values.
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use num_format::{Locale, ToFormattedString};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::Coerced;

/// `<int>h [<int>m]`, e.g. `9h 10m`, `5h`, `12h30m`.
static DURATION_RE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)\s*h(?:\s*(\d+)\s*m(?:in)?)?$"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in spreadsheet exports.
///
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters.
/// - A single comma with no dot is read as a decimal comma (`12,5`).
/// - Otherwise commas are stripped as thousands separators.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let s = if !s.contains('.') && s.matches(',').count() == 1 {
        s.replace(',', ".")
    } else {
        s.replace(',', "")
    };
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Day-first date parsing. ISO `YYYY-MM-DD` (what the store persists) is
/// accepted as well since a four-digit leading year is unambiguous. Any
/// time component is discarded.
pub fn parse_date_dayfirst(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // `%Y` happily reads `24` as year 24; such matches fall through to `%y`.
    let plausible = |d: &NaiveDate| d.year() >= 1000;
    for fmt in DATE_FORMATS {
        if let Some(d) = NaiveDate::parse_from_str(s, fmt).ok().filter(plausible) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Some(dt) = NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .filter(|dt| plausible(&dt.date()))
        {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(s, "%d/%m/%y").ok()
}

/// Best-effort duration coercion into hours.
///
/// Plain numbers are already hours. `<h>h [<m>m]` decomposes into
/// `h + m / 60`. Anything else is `Unparsed`, which aggregation treats as
/// zero hours. This is lossy: callers that care can inspect the tag.
pub fn parse_duration_hours(s: &str) -> Coerced<f64> {
    let t = s.trim();
    if t.is_empty() {
        return Coerced::Missing;
    }
    if let Some(v) = parse_f64_safe(Some(t)) {
        return Coerced::Value(v);
    }
    let Ok(re) = DURATION_RE.as_ref() else {
        return Coerced::Unparsed(s.to_string());
    };
    let Some(caps) = re.captures(t) else {
        return Coerced::Unparsed(s.to_string());
    };
    let hours = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
    let minutes = match caps.get(2) {
        Some(m) => m.as_str().parse::<u32>().ok(),
        None => Some(0),
    };
    match (hours, minutes) {
        (Some(h), Some(m)) => Coerced::Value(h as f64 + m as f64 / 60.0),
        _ => Coerced::Unparsed(s.to_string()),
    }
}

pub fn average(v: &[f64]) -> Option<f64> {
    // Arithmetic mean; an empty slice has none.
    if v.is_empty() {
        return None;
    }
    let sum: f64 = v.iter().copied().sum();
    Some(sum / v.len() as f64)
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Format a floating-point value with:
    // - a fixed number of decimal places, and
    // - locale-aware thousands separators (e.g., `1,234,567.89`).
    if !n.is_finite() {
        return n.to_string();
    }
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_val: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = parts.next() {
        res.push('.');
        res.push_str(frac);
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console messages (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_decompose_into_hours() {
        let Coerced::Value(h) = parse_duration_hours("9h 10m") else {
            panic!("expected a value");
        };
        assert!((h - 9.0 - 10.0 / 60.0).abs() < 1e-9);
        assert_eq!(parse_duration_hours("5h"), Coerced::Value(5.0));
        assert_eq!(parse_duration_hours("12H30m"), Coerced::Value(12.5));
        assert_eq!(parse_duration_hours("7.25"), Coerced::Value(7.25));
        assert_eq!(parse_duration_hours(""), Coerced::Missing);
    }

    #[test]
    fn malformed_duration_is_tagged_unparsed() {
        assert_eq!(
            parse_duration_hours("about nine hours"),
            Coerced::Unparsed("about nine hours".into())
        );
        assert!(parse_duration_hours("10m").is_unparsed());
        assert!(parse_duration_hours("h 5m").is_unparsed());
    }

    #[test]
    fn dates_are_day_first() {
        assert_eq!(parse_date_dayfirst("03/02/2024"), NaiveDate::from_ymd_opt(2024, 2, 3));
        assert_eq!(parse_date_dayfirst("2024-02-03"), NaiveDate::from_ymd_opt(2024, 2, 3));
        assert_eq!(
            parse_date_dayfirst("2024-02-03 14:30:00"),
            NaiveDate::from_ymd_opt(2024, 2, 3)
        );
        assert_eq!(parse_date_dayfirst("31/12/2024"), NaiveDate::from_ymd_opt(2024, 12, 31));
        assert_eq!(parse_date_dayfirst("03/02/24"), NaiveDate::from_ymd_opt(2024, 2, 3));
        assert_eq!(parse_date_dayfirst("12/31/2024"), None);
        assert_eq!(parse_date_dayfirst("ontem"), None);
        assert_eq!(parse_date_dayfirst("  "), None);
    }

    #[test]
    fn numbers_tolerate_separators() {
        assert_eq!(parse_f64_safe(Some("1,234.5")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("12,5")), Some(12.5));
        assert_eq!(parse_f64_safe(Some(" 42 ")), Some(42.0));
        assert_eq!(parse_f64_safe(Some("n/a")), None);
        assert_eq!(parse_f64_safe(None), None);
    }

    #[test]
    fn formats_with_thousands_separator() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-50.0, 1), "-50.0");
        assert_eq!(format_number(3.0, 0), "3");
        assert_eq!(format_int(9855), "9,855");
    }
}
