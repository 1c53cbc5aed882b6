//! Shared UTC timestamp helpers for incidents, locks and audit lines.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time truncated to second precision.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// RFC 3339 UTC with second precision (e.g. `2026-10-16T09:30:00Z`).
pub fn iso_seconds(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Filename-safe stamp (e.g. `20261016T093000Z`).
pub fn compact_stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn now_iso() -> String {
    iso_seconds(&now())
}
