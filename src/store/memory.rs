//! Volatile in-memory backend. Cleared on process restart.

use crate::error::AppError;
use crate::freshness::format_timestamp;
use crate::store::{
    EstimateStore, GeoBounds, OccupancyRecord, WriteOutcome, write_allowed, write_is_monotonic,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Default)]
pub struct MemoryStore {
    // One lock for the whole map: the check-then-write in
    // put_with_priority must be a critical section per facility key.
    records: Mutex<HashMap<String, OccupancyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(record: &mut OccupancyRecord, now: OffsetDateTime) {
        if record.last_updated.is_empty() {
            record.last_updated = format_timestamp(now);
        }
    }

    fn put_at(&self, mut record: OccupancyRecord, now: OffsetDateTime) -> Result<(), AppError> {
        let mut records = self.records.lock().map_err(|_| AppError::StateLock)?;
        Self::stamp(&mut record, now);
        if write_is_monotonic(records.get(&record.facility_id), &record) {
            records.insert(record.facility_id.clone(), record);
        }
        Ok(())
    }

    fn put_with_priority_at(
        &self,
        mut record: OccupancyRecord,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<WriteOutcome, AppError> {
        let mut records = self.records.lock().map_err(|_| AppError::StateLock)?;
        Self::stamp(&mut record, now);
        let current = records.get(&record.facility_id);
        if !write_allowed(current, &record, ttl, now) || !write_is_monotonic(current, &record) {
            return Ok(WriteOutcome::Superseded);
        }
        records.insert(record.facility_id.clone(), record);
        Ok(WriteOutcome::Stored)
    }
}

#[async_trait]
impl EstimateStore for MemoryStore {
    async fn get(&self, facility_id: &str) -> Result<Option<OccupancyRecord>, AppError> {
        let records = self.records.lock().map_err(|_| AppError::StateLock)?;
        Ok(records.get(facility_id).cloned())
    }

    async fn get_many(
        &self,
        facility_ids: &[String],
    ) -> Result<HashMap<String, OccupancyRecord>, AppError> {
        let records = self.records.lock().map_err(|_| AppError::StateLock)?;
        Ok(facility_ids
            .iter()
            .filter_map(|id| records.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn put(&self, record: OccupancyRecord) -> Result<(), AppError> {
        self.put_at(record, OffsetDateTime::now_utc())
    }

    async fn put_with_priority(
        &self,
        record: OccupancyRecord,
        ttl: Duration,
    ) -> Result<WriteOutcome, AppError> {
        self.put_with_priority_at(record, ttl, OffsetDateTime::now_utc())
    }

    async fn get_in_bounds(
        &self,
        _bounds: &GeoBounds,
    ) -> Result<Option<HashMap<String, OccupancyRecord>>, AppError> {
        // No coordinates kept in the volatile map; callers use get_many.
        Ok(None)
    }
}
