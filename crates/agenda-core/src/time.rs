//! Timestamp parsing and local-day arithmetic
//!
//! Clients may send RFC 3339 timestamps (`2023-10-23T09:00:00Z`,
//! `2023-10-23T09:00:00+02:00`) or naive ones (`2023-10-23T09:00:00`).
//! Naive timestamps are interpreted in the server's local time zone, the
//! same zone used to compute day boundaries.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a client timestamp, resolving naive values in `tz`
pub fn parse_timestamp_in<Tz: TimeZone>(value: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a client timestamp in the server's local time zone
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    parse_timestamp_in(value, &Local)
}

/// Parse a `YYYY-MM-DD` path segment
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Half-open `[start, end)` bounds of a calendar day in `tz`
///
/// `end` is midnight of the following day. On days where local midnight does
/// not exist (DST gaps) the first valid instant after it is used.
pub fn day_bounds_in<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = day.succ_opt().unwrap_or(day);
    (local_midnight(day, tz), local_midnight(next, tz))
}

/// Half-open bounds of a calendar day in the server's local time zone
pub fn local_day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    day_bounds_in(day, &Local)
}

fn local_midnight<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = day.and_time(chrono::NaiveTime::MIN);

    // Walk forward over a DST gap in 15 minute steps; gaps never exceed a day.
    (0..96)
        .map(|step| midnight + Duration::minutes(15 * step))
        .find_map(|candidate| tz.from_local_datetime(&candidate).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Serde helper for required timestamp fields
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Serde helper for optional timestamp fields
pub fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_parse_rfc3339_keeps_offset() {
        let parsed = parse_timestamp("2023-10-23T09:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2023-10-23T07:00:00+00:00");
    }

    #[test]
    fn test_parse_naive_uses_zone() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let parsed = parse_timestamp_in("2023-10-23T09:00:00", &tz).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2023-10-23T08:00:00+00:00");

        let millis = parse_timestamp_in("2023-10-23T09:00:00.250", &tz).unwrap();
        assert_eq!(millis.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_day("2023-13-01").is_none());
        assert!(parse_day("23-10-2023").is_none());
    }

    #[test]
    fn test_day_bounds_half_open() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let day = parse_day("2023-10-23").unwrap();
        let (start, end) = day_bounds_in(day, &tz);

        assert_eq!(start.to_rfc3339(), "2023-10-23T05:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2023-10-24T05:00:00+00:00");

        let late_previous_day = parse_timestamp_in("2023-10-22T23:59:00", &tz).unwrap();
        assert!(late_previous_day < start);

        let last_millisecond = parse_timestamp_in("2023-10-23T23:59:59.999", &tz).unwrap();
        assert!(last_millisecond >= start && last_millisecond < end);
    }

    #[test]
    fn test_deserialize_helpers() {
        #[derive(Deserialize)]
        struct Body {
            #[serde(deserialize_with = "deserialize_timestamp")]
            at: DateTime<Utc>,
            #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
            until: Option<DateTime<Utc>>,
        }

        let body: Body = serde_json::from_str(r#"{"at":"2023-10-23T10:00:00Z"}"#).unwrap();
        assert_eq!(body.at.to_rfc3339(), "2023-10-23T10:00:00+00:00");
        assert!(body.until.is_none());

        let bad: Result<Body, _> = serde_json::from_str(r#"{"at":"soon"}"#);
        assert!(bad.is_err());
    }
}
