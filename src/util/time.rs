//! Time helpers and reset-time localization.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use crate::core::models::{DISPLAY_UTC_OFFSET_HOURS, UNKNOWN_RESET_TIME};

/// Offset-less layouts accepted in addition to RFC 3339, read as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a reset timestamp into UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Render a raw reset timestamp as `MM-DD HH:MM` in the display timezone.
///
/// Absent and malformed input both yield [`UNKNOWN_RESET_TIME`].
#[must_use]
pub fn localize(raw: Option<&str>) -> String {
    let Some(offset) = FixedOffset::east_opt(DISPLAY_UTC_OFFSET_HOURS * 3600) else {
        return UNKNOWN_RESET_TIME.to_string();
    };
    raw.and_then(parse_timestamp).map_or_else(
        || UNKNOWN_RESET_TIME.to_string(),
        |dt| dt.with_timezone(&offset).format("%m-%d %H:%M").to_string(),
    )
}
