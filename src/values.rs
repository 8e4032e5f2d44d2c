//! Sentinel markers and scalar coercion shared by field bodies and table cells.

use crate::error::ValueError;
use url::Url;

pub const SKIP_MARKER: &str = "%SKIP%";
pub const ABORT_MARKER: &str = "%ABORT%";

/// A non-value answer written in place of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Sentinel {
    Skip(Option<String>),
    Abort(Option<String>),
}

/// What a value block or cell holds once sentinels and emptiness are accounted for.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue<'a> {
    Null,
    Sentinel(Sentinel),
    Text(&'a str),
}

pub fn classify(text: &str) -> RawValue<'_> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return RawValue::Null;
    }
    match parse_sentinel(trimmed) {
        Some(sentinel) => RawValue::Sentinel(sentinel),
        None => RawValue::Text(trimmed),
    }
}

/// Recognises `%SKIP%`, `%SKIP% (reason)`, `%ABORT%` and `%ABORT% (reason)`.
pub fn parse_sentinel(text: &str) -> Option<Sentinel> {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix(SKIP_MARKER) {
        return parse_reason(rest).map(Sentinel::Skip);
    }
    if let Some(rest) = trimmed.strip_prefix(ABORT_MARKER) {
        return parse_reason(rest).map(Sentinel::Abort);
    }
    None
}

fn parse_reason(rest: &str) -> Option<Option<String>> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Some(None);
    }
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?.trim();
    if inner.is_empty() {
        Some(None)
    } else {
        Some(Some(inner.to_string()))
    }
}

pub fn format_sentinel(sentinel: &Sentinel) -> String {
    let (marker, reason) = match sentinel {
        Sentinel::Skip(reason) => (SKIP_MARKER, reason),
        Sentinel::Abort(reason) => (ABORT_MARKER, reason),
    };
    match reason {
        Some(reason) if !reason.trim().is_empty() => format!("{marker} ({})", reason.trim()),
        _ => marker.to_string(),
    }
}

pub fn is_sentinel(text: &str) -> bool {
    parse_sentinel(text).is_some()
}

pub fn parse_number(text: &str) -> Result<f64, ValueError> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ValueError::NotANumber {
            input: trimmed.to_string(),
        }),
    }
}

pub fn format_number(n: f64) -> String {
    format!("{n}")
}

pub fn parse_url(text: &str) -> Result<String, ValueError> {
    let trimmed = text.trim();
    match Url::parse(trimmed) {
        Ok(_) => Ok(trimmed.to_string()),
        Err(_) => Err(ValueError::InvalidUrl {
            input: trimmed.to_string(),
        }),
    }
}

/// Accepts `YYYY-MM-DD` with a plausible month and day.
pub fn parse_date(text: &str) -> Result<String, ValueError> {
    let trimmed = text.trim();
    let bytes = trimmed.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    let in_range = shape_ok && {
        let month: u32 = trimmed[5..7].parse().unwrap_or(0);
        let day: u32 = trimmed[8..10].parse().unwrap_or(0);
        (1..=12).contains(&month) && (1..=31).contains(&day)
    };
    if in_range {
        Ok(trimmed.to_string())
    } else {
        Err(ValueError::InvalidDate {
            input: trimmed.to_string(),
        })
    }
}

pub fn parse_year(text: &str) -> Result<i32, ValueError> {
    let trimmed = text.trim();
    match trimmed.parse::<i32>() {
        Ok(year) if (1000..=9999).contains(&year) => Ok(year),
        _ => Err(ValueError::InvalidYear {
            input: trimmed.to_string(),
        }),
    }
}

pub fn year_from_number(n: f64) -> Result<i32, ValueError> {
    if n.fract() == 0.0 && (1000.0..=9999.0).contains(&n) {
        Ok(n as i32)
    } else {
        Err(ValueError::InvalidYear {
            input: format_number(n),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert_eq!(parse_sentinel("%SKIP%"), Some(Sentinel::Skip(None)));
        assert_eq!(
            parse_sentinel("  %SKIP% (No data) "),
            Some(Sentinel::Skip(Some("No data".to_string())))
        );
        assert_eq!(
            parse_sentinel("%ABORT% (gave up)"),
            Some(Sentinel::Abort(Some("gave up".to_string())))
        );
        assert_eq!(parse_sentinel("%SKIP% trailing words"), None);
        assert_eq!(parse_sentinel("skip"), None);
    }

    #[test]
    fn test_sentinel_formatting_round_trips() {
        for sentinel in [
            Sentinel::Skip(None),
            Sentinel::Skip(Some("No data".to_string())),
            Sentinel::Abort(Some("a (nested) reason".to_string())),
        ] {
            assert_eq!(parse_sentinel(&format_sentinel(&sentinel)), Some(sentinel));
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("   "), RawValue::Null);
        assert_eq!(classify(" 42 "), RawValue::Text("42"));
        assert_eq!(
            classify("%ABORT%"),
            RawValue::Sentinel(Sentinel::Abort(None))
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_number("42"), Ok(42.0));
        assert_eq!(parse_number("-1.5"), Ok(-1.5));
        assert!(parse_number("forty").is_err());
        assert!(parse_number("inf").is_err());
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(0.25), "0.25");
    }

    #[test]
    fn test_urls() {
        assert!(parse_url("https://example.com/a?b=c").is_ok());
        assert!(parse_url("example.com").is_err());
        assert!(parse_url("/relative/path").is_err());
    }

    #[test]
    fn test_dates() {
        assert_eq!(parse_date("2024-02-29"), Ok("2024-02-29".to_string()));
        assert!(parse_date("2024-2-29").is_err());
        assert!(parse_date("2024-13-01").is_err());
        assert!(parse_date("24-01-01xx").is_err());
    }

    #[test]
    fn test_years() {
        assert_eq!(parse_year("1999"), Ok(1999));
        assert!(parse_year("999").is_err());
        assert!(parse_year("10000").is_err());
        assert!(parse_year("19.5").is_err());
        assert_eq!(year_from_number(2024.0), Ok(2024));
        assert!(year_from_number(2024.5).is_err());
    }
}
