//! Event-time helpers
//!
//! Timestamps travel as `2024-05-01T12:30:00.123456Z`.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Current time truncated to the precision the log and store preserve
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_event_time(ts: &DateTime<Utc>) -> String {
    ts.format(EVENT_TIME_FORMAT).to_string()
}

/// Parse an event time
///
/// Accepts RFC 3339 as well as zone-less `YYYY-MM-DDTHH:MM:SS[.ffffff][Z]`,
/// which older producers emitted. Zone-less values are read as UTC.
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Serde adapter for `DateTime<Utc>` fields in the event-time format
pub mod serde_event_time {
    use super::{format_event_time, parse_event_time};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_event_time(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_event_time(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid event time: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_format_uses_microseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(format_event_time(&ts), "2024-05-01T12:30:00.000000Z");
    }

    #[test]
    fn test_parse_accepts_rfc3339_and_legacy_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_event_time("2024-05-01T12:30:00.000000Z"), Some(expected));
        assert_eq!(parse_event_time("2024-05-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_event_time("2024-05-01T12:30:00"), Some(expected));
        assert_eq!(parse_event_time("yesterday"), None);
    }

    #[test]
    fn test_now_micros_truncates() {
        let now = now_micros();
        assert_eq!(now.nanosecond() % 1_000, 0);
        assert_eq!(parse_event_time(&format_event_time(&now)), Some(now));
    }
}
