//! Timestamp encoding for persisted records.
//!
//! Timestamps are stored as fixed-width UTC text with nanosecond precision,
//! which keeps lexical order identical to chronological order in SQL.

use crate::{Error, Result};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Encode a timestamp for storage, e.g. `2024-03-05T07:08:09.000000000Z`.
pub fn format_timestamp(ts: OffsetDateTime) -> Result<String> {
    ts.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
        ))
        .map_err(|e| Error::InvalidTimestamp(e.to_string()))
}

/// Decode a stored timestamp.
///
/// Accepts RFC 3339 and the legacy SQLite `CURRENT_TIMESTAMP` form
/// (`YYYY-MM-DD HH:MM:SS`, implicitly UTC). Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}
