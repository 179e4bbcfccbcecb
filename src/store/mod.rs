//! Estimate storage: the record model, the pluggable store contract, and
//! the write-priority gate shared by all backends.

use crate::error::AppError;
use crate::freshness::{is_fresh, parse_timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;

pub mod memory;
pub mod postgrest;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

/// How a record was produced. Downstream consumers use this to keep
/// placeholder data out of trust-sensitive displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    CameraDerived,
    CacheReused,
    SyntheticFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSampleStatus {
    Ok,
    NoImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSample {
    pub source_id: String,
    pub people: u32,
    pub status: CameraSampleStatus,
}

/// Latest occupancy/wait estimate for one facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub facility_id: String,
    pub people: u32,
    pub per_person_minutes: u32,
    pub doctors_on_duty: u32,
    pub estimated_wait_minutes: u32,
    #[serde(default)]
    pub cameras: Vec<CameraSample>,
    /// RFC 3339 UTC. Empty means "let the store stamp it on put".
    #[serde(default)]
    pub last_updated: String,
    pub provenance: Provenance,
}

/// Static facility metadata a durable backend keeps alongside estimates so
/// its bounding-box queries have coordinates to filter on.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityPosition {
    pub facility_id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub maps_url: Option<String>,
}

/// Coordinate bounding box for the batch-candidate prefetch path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    /// Smallest box containing all the given points, or None when empty.
    pub fn around(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut bounds: Option<GeoBounds> = None;
        for (lat, lng) in points {
            bounds = Some(match bounds {
                None => GeoBounds {
                    min_lat: lat,
                    max_lat: lat,
                    min_lng: lng,
                    max_lng: lng,
                },
                Some(b) => GeoBounds {
                    min_lat: b.min_lat.min(lat),
                    max_lat: b.max_lat.max(lat),
                    min_lng: b.min_lng.min(lng),
                    max_lng: b.max_lng.max(lng),
                },
            });
        }
        bounds
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// Aborted by the priority gate or the monotonicity rule; the stored
    /// record stands and callers should answer from it.
    Superseded,
}

/// The priority gate: a synthetic write may not replace a fresh
/// non-synthetic record. Camera-derived writes always pass.
pub(crate) fn write_allowed(
    current: Option<&OccupancyRecord>,
    incoming: &OccupancyRecord,
    ttl: Duration,
    now: OffsetDateTime,
) -> bool {
    let Some(current) = current else {
        return true;
    };
    if incoming.provenance != Provenance::SyntheticFallback {
        return true;
    }
    !(current.provenance != Provenance::SyntheticFallback
        && is_fresh(&current.last_updated, ttl, now))
}

/// `last_updated` is monotonically non-decreasing per facility: a write
/// older than the stored record is dropped.
pub(crate) fn write_is_monotonic(current: Option<&OccupancyRecord>, incoming: &OccupancyRecord) -> bool {
    let (Some(current), Some(incoming_ts)) = (current, parse_timestamp(&incoming.last_updated))
    else {
        return true;
    };
    match parse_timestamp(&current.last_updated) {
        Some(current_ts) => incoming_ts >= current_ts,
        None => true,
    }
}

/// Key-value store of the latest estimate per facility.
///
/// `put` is an atomic full-record overwrite; it never leaves a
/// half-written record behind. Backends may be volatile or durable; durable
/// ones additionally answer bounding-box range queries for batch prefetch.
#[async_trait]
pub trait EstimateStore: Send + Sync {
    async fn get(&self, facility_id: &str) -> Result<Option<OccupancyRecord>, AppError>;

    async fn get_many(
        &self,
        facility_ids: &[String],
    ) -> Result<HashMap<String, OccupancyRecord>, AppError>;

    /// Overwrite the record for its facility. Stamps `last_updated` when the
    /// caller left it empty; drops writes that would move time backwards.
    async fn put(&self, record: OccupancyRecord) -> Result<(), AppError>;

    /// `put` gated by the write-priority rule, executed as a
    /// check-then-write critical section for the record's facility key.
    async fn put_with_priority(
        &self,
        record: OccupancyRecord,
        ttl: Duration,
    ) -> Result<WriteOutcome, AppError>;

    /// Range query over facility coordinates. `Ok(None)` means the backend
    /// has no range support and callers should fall back to `get_many`.
    async fn get_in_bounds(
        &self,
        _bounds: &GeoBounds,
    ) -> Result<Option<HashMap<String, OccupancyRecord>>, AppError> {
        Ok(None)
    }

    /// Upsert candidate metadata (id, name, coordinates, map link) without
    /// touching estimates. No-op on backends that keep no metadata.
    async fn record_candidates(&self, _candidates: &[FacilityPosition]) -> Result<(), AppError> {
        Ok(())
    }
}
