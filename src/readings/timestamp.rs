//! Logger timestamps look like `2021-07-09-13:40:59.530`: local layout, no zone marker,
//! a dash between date and time. They are UTC in practice.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::TelemetryError;

const DATE_TIME_SEPARATOR: usize = 10;

/// Rewrites a logger timestamp into RFC 3339 (`2021-07-09T13:40:59.530Z`).
/// Input already in RFC 3339 form comes back unchanged.
pub fn normalize(raw: &str) -> String {
    let raw = raw.trim();
    let mut normalized = if raw.as_bytes().get(DATE_TIME_SEPARATOR) == Some(&b'-') {
        format!(
            "{}T{}",
            &raw[..DATE_TIME_SEPARATOR],
            &raw[DATE_TIME_SEPARATOR + 1..]
        )
    } else {
        raw.to_string()
    };

    if !has_zone_marker(&normalized) {
        normalized.push('Z');
    }
    normalized
}

fn has_zone_marker(value: &str) -> bool {
    if value.ends_with('Z') || value.ends_with('z') {
        return true;
    }
    // `+01:00` / `-05:00` offsets sit after the time part.
    value
        .get(DATE_TIME_SEPARATOR + 1..)
        .map(|time| time.contains('+') || time.contains('-'))
        .unwrap_or(false)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TelemetryError> {
    let normalized = normalize(raw);
    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| TelemetryError::Parse {
            raw: raw.to_string(),
            source,
        })
}

/// Millisecond RFC 3339 with a `Z` suffix; fixed width, so it also sorts as text.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter that keeps document timestamps in [`format_timestamp`] form.
pub mod millis {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(D::Error::custom)
    }
}
