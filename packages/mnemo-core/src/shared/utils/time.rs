//! Timestamp formatting and `since`/`until` parsing.
//!
//! All stored timestamps are ISO-8601 UTC. Date filters accept either an
//! ISO-8601 duration (`P3D`, `P2W`, `PT6H`) interpreted relative to now, or
//! an ISO date / datetime.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};

use crate::shared::models::{MemoryError, Result};

/// Current UTC timestamp in ISO-8601 with microsecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The date part (YYYY-MM-DD) of an ISO timestamp.
pub fn date_of(iso: &str) -> String {
    iso.chars().take(10).collect()
}

/// Parse a stored ISO-8601 timestamp. Tolerates `Z`, offsets, and bare dates.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Python's isoformat() omits the offset for naive datetimes
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{}Z", value)) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(DateTime::from_naive_utc_and_offset(
            date.and_hms_opt(0, 0, 0)?,
            Utc,
        ));
    }
    None
}

/// Resolve a `since`/`until` value to an absolute instant.
///
/// `P3D`-style durations are subtracted from `now`; anything else must parse
/// as an ISO date or datetime.
pub fn resolve_point(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.starts_with('P') || trimmed.starts_with('p') {
        let duration = parse_iso_duration(trimmed)?;
        return Ok(now - duration);
    }
    parse_instant(trimmed).ok_or_else(|| {
        MemoryError::invalid_input(format!(
            "Expected ISO duration (e.g. P3D) or ISO date, got '{}'",
            value
        ))
    })
}

/// Minimal ISO-8601 duration parser: PnW | PnD | PnDTnHnMnS | PTnHnMnS.
fn parse_iso_duration(text: &str) -> Result<Duration> {
    let body = &text[1..];
    let invalid = || MemoryError::invalid_input(format!("Invalid ISO duration '{}'", text));

    let (date_part, time_part) = match body.split_once(['T', 't']) {
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };

    let mut total = Duration::zero();
    let mut number = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let value: i64 = number.parse().map_err(|_| invalid())?;
        number.clear();
        total = total
            + match ch.to_ascii_uppercase() {
                'Y' => Duration::days(value * 365),
                'M' => Duration::days(value * 30),
                'W' => Duration::weeks(value),
                'D' => Duration::days(value),
                _ => return Err(invalid()),
            };
    }
    if !number.is_empty() {
        return Err(invalid());
    }

    if let Some(time_part) = time_part {
        for ch in time_part.chars() {
            if ch.is_ascii_digit() {
                number.push(ch);
                continue;
            }
            let value: i64 = number.parse().map_err(|_| invalid())?;
            number.clear();
            total = total
                + match ch.to_ascii_uppercase() {
                    'H' => Duration::hours(value),
                    'M' => Duration::minutes(value),
                    'S' => Duration::seconds(value),
                    _ => return Err(invalid()),
                };
        }
        if !number.is_empty() {
            return Err(invalid());
        }
    }

    Ok(total)
}

/// Days elapsed between a stored timestamp and now (fractional).
pub fn days_since(iso: &str, now: DateTime<Utc>) -> Option<f64> {
    let then = parse_instant(iso)?;
    Some((now - then).num_seconds() as f64 / 86_400.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_now_iso_is_parseable() {
        assert!(parse_instant(&now_iso()).is_some());
    }

    #[test]
    fn test_parse_instant_variants() {
        assert!(parse_instant("2026-01-30T10:00:00Z").is_some());
        assert!(parse_instant("2026-01-30T10:00:00+00:00").is_some());
        assert!(parse_instant("2026-01-30T10:00:00.123456").is_some());
        assert!(parse_instant("2026-01-30").is_some());
        assert!(parse_instant("not a date").is_none());
    }

    #[test]
    fn test_resolve_duration_days() {
        let point = resolve_point("P3D", fixed_now()).unwrap();
        assert_eq!(point, fixed_now() - Duration::days(3));
    }

    #[test]
    fn test_resolve_duration_weeks_and_hours() {
        assert_eq!(
            resolve_point("P2W", fixed_now()).unwrap(),
            fixed_now() - Duration::weeks(2)
        );
        assert_eq!(
            resolve_point("PT6H", fixed_now()).unwrap(),
            fixed_now() - Duration::hours(6)
        );
        assert_eq!(
            resolve_point("P1DT12H", fixed_now()).unwrap(),
            fixed_now() - Duration::days(1) - Duration::hours(12)
        );
    }

    #[test]
    fn test_resolve_date() {
        let point = resolve_point("2026-01-15", fixed_now()).unwrap();
        assert_eq!(date_of(&point.to_rfc3339()), "2026-01-15");
    }

    #[test]
    fn test_resolve_garbage_is_error() {
        assert!(resolve_point("3 days ago", fixed_now()).is_err());
        assert!(resolve_point("PX", fixed_now()).is_err());
        assert!(resolve_point("P3", fixed_now()).is_err());
    }

    #[test]
    fn test_days_since() {
        let days = days_since("2026-07-31T12:00:00Z", fixed_now()).unwrap();
        assert!((days - 1.0).abs() < 1e-9);
    }
}
