//! Freshness policy for cached occupancy estimates.
//!
//! Pure functions only: callers pass `now` explicitly so the policy is
//! deterministic under test.

use crate::store::OccupancyRecord;
use std::time::Duration;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Parse a stored timestamp. Accepts RFC 3339 with an offset, or a naive
/// ISO 8601 date-time which is treated as UTC.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// True iff `raw` parses and `0 <= now - ts <= ttl`. An age of exactly
/// `ttl` is still fresh; a timestamp in the future is stale.
pub fn is_fresh(raw: &str, ttl: Duration, now: OffsetDateTime) -> bool {
    let Some(ts) = parse_timestamp(raw) else {
        return false;
    };
    let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
    let age = now - ts;
    age >= time::Duration::ZERO && age <= ttl
}

/// Missing record or missing timestamp is always stale.
pub fn record_is_fresh(record: Option<&OccupancyRecord>, ttl: Duration, now: OffsetDateTime) -> bool {
    match record {
        Some(record) => is_fresh(&record.last_updated, ttl, now),
        None => false,
    }
}

/// RFC 3339 rendering with a fixed fallback for the unrepresentable case.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
