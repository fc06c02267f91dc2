//! Timestamp helpers: RFC 3339 serde support and relative time labels.
//!
//! Use as `#[serde(with = "crate::utils::time")]` on `OffsetDateTime` fields.

use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

/// Deserialize an RFC 3339 formatted string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

/// Returns the current time in UTC.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Formats `then` relative to `now` for history listings.
///
/// Produces "just now", "5m ago", "2h ago", "3d ago", "1w ago", and falls
/// back to a calendar date after roughly a month.  Timestamps in the future
/// read as "just now".
pub fn relative_time(now: OffsetDateTime, then: OffsetDateTime) -> String {
    let seconds = (now - then).whole_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }
    if seconds < 3_600 {
        return format!("{}m ago", seconds / 60);
    }
    if seconds < 86_400 {
        return format!("{}h ago", seconds / 3_600);
    }
    if seconds < 604_800 {
        return format!("{}d ago", seconds / 86_400);
    }
    if seconds < 2_592_000 {
        return format!("{}w ago", seconds / 604_800);
    }
    then.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| then.date().to_string())
}

/// Formats the wall-clock time of a message as `HH:MM`.
pub fn clock_time(at: OffsetDateTime) -> String {
    at.format(format_description!("[hour]:[minute]"))
        .unwrap_or_else(|_| String::from("--:--"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    #[test]
    fn relative_labels() {
        let now = datetime!(2025-03-10 12:00 UTC);
        assert_eq!(relative_time(now, now), "just now");
        assert_eq!(relative_time(now, now + Duration::minutes(5)), "just now");
        assert_eq!(relative_time(now, now - Duration::seconds(59)), "just now");
        assert_eq!(relative_time(now, now - Duration::minutes(5)), "5m ago");
        assert_eq!(relative_time(now, now - Duration::hours(2)), "2h ago");
        assert_eq!(relative_time(now, now - Duration::days(3)), "3d ago");
        assert_eq!(relative_time(now, now - Duration::days(8)), "1w ago");
        assert_eq!(
            relative_time(now, datetime!(2024-12-25 08:00 UTC)),
            "2024-12-25"
        );
    }

    #[test]
    fn clock_time_is_zero_padded() {
        assert_eq!(clock_time(datetime!(2025-03-10 09:05 UTC)), "09:05");
    }

    #[test]
    fn rfc3339_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Stamp {
            #[serde(with = "crate::utils::time")]
            at: OffsetDateTime,
        }
        let stamp = Stamp {
            at: datetime!(2025-03-10 12:34:56 UTC),
        };
        let json = serde_json::to_string(&stamp).unwrap();
        assert_eq!(json, r#"{"at":"2025-03-10T12:34:56Z"}"#);
        let back: Stamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back.at, stamp.at);
    }
}
