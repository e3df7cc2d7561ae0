//! Conversion between agent timestamps and Unix epochs
//!
//! Agents publish `YYYY-MM-DDTHH:MM:SS` without an offset. The string is
//! read as local time of this host, so producer and consumer must share a
//! timezone for the resulting epoch to be correct.

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::error::ParseError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse an agent timestamp into seconds since the Unix epoch.
///
/// A trailing `Z` is accepted and ignored; older agents append one while
/// still writing local time. Ambiguous local times (DST fall-back) resolve
/// to the earlier instant, non-existent ones (DST spring-forward) fail.
pub fn to_epoch(ts: &str) -> Result<i64, ParseError> {
    let trimmed = ts.trim();
    let trimmed = trimmed.strip_suffix('Z').unwrap_or(trimmed);

    let naive = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT).map_err(|e| ParseError {
        input: ts.to_string(),
        reason: e.to_string(),
    })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| ParseError {
            input: ts.to_string(),
            reason: "time does not exist in the local timezone".to_string(),
        })
}

/// Render an epoch as a local agent timestamp.
///
/// Epochs outside the representable range are rendered as the plain number.
pub fn from_epoch(epoch: i64) -> String {
    Local
        .timestamp_opt(epoch, 0)
        .earliest()
        .map_or_else(|| epoch.to_string(), |dt| dt.format(TIMESTAMP_FORMAT).to_string())
}
