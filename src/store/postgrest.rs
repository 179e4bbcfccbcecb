//! Durable backend over a PostgREST-style table.
//!
//! Rows mirror `OccupancyRecord` plus facility coordinates and display
//! metadata, so the batch-candidate path can prefetch by bounding box
//! instead of issuing N point lookups. Schema internals beyond this wire
//! shape are the persistence collaborator's business.

use crate::error::AppError;
use crate::freshness::format_timestamp;
use crate::store::{
    CameraSample, EstimateStore, FacilityPosition, GeoBounds, OccupancyRecord, Provenance,
    WriteOutcome, write_allowed, write_is_monotonic,
};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

pub struct PostgrestStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    table: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EstimateRow {
    facility_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    maps_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    people: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    per_person_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doctors_on_duty: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estimated_wait_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cameras: Option<Vec<CameraSample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provenance: Option<Provenance>,
}

impl EstimateRow {
    fn from_record(record: OccupancyRecord) -> Self {
        Self {
            facility_id: record.facility_id,
            name: None,
            lat: None,
            lng: None,
            maps_url: None,
            people: Some(record.people),
            per_person_minutes: Some(record.per_person_minutes),
            doctors_on_duty: Some(record.doctors_on_duty),
            estimated_wait_minutes: Some(record.estimated_wait_minutes),
            cameras: Some(record.cameras),
            last_updated: Some(record.last_updated),
            provenance: Some(record.provenance),
        }
    }

    /// A row upserted only with candidate metadata carries no estimate yet.
    fn into_record(self) -> Option<OccupancyRecord> {
        Some(OccupancyRecord {
            facility_id: self.facility_id,
            people: self.people?,
            per_person_minutes: self.per_person_minutes?,
            doctors_on_duty: self.doctors_on_duty.unwrap_or(1),
            estimated_wait_minutes: self.estimated_wait_minutes?,
            cameras: self.cameras.unwrap_or_default(),
            last_updated: self.last_updated?,
            provenance: self.provenance?,
        })
    }
}

impl PostgrestStore {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>, table: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            table: table.to_string(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.base_url, self.table)
    }

    fn headers(&self, upsert: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("apikey", value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        if upsert {
            headers.insert(
                "Prefer",
                HeaderValue::from_static("resolution=merge-duplicates"),
            );
        }
        headers
    }

    async fn select(&self, filters: &[(&str, String)]) -> Result<Vec<EstimateRow>, AppError> {
        let response = self
            .client
            .get(self.table_url())
            .headers(self.headers(false))
            .query(filters)
            .send()
            .await
            .map_err(|e| AppError::Store(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!("select failed ({status}): {body}")));
        }
        response
            .json::<Vec<EstimateRow>>()
            .await
            .map_err(|e| AppError::Store(e.to_string()))
    }

    async fn upsert(&self, rows: Vec<EstimateRow>) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }
        debug!(table = %self.table, count = rows.len(), "upserting estimate rows");
        let response = self
            .client
            .post(self.table_url())
            .headers(self.headers(true))
            .json(&rows)
            .send()
            .await
            .map_err(|e| AppError::Store(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!("upsert failed ({status}): {body}")));
        }
        Ok(())
    }

    fn stamp(record: &mut OccupancyRecord, now: OffsetDateTime) {
        if record.last_updated.is_empty() {
            record.last_updated = format_timestamp(now);
        }
    }
}

#[async_trait]
impl EstimateStore for PostgrestStore {
    async fn get(&self, facility_id: &str) -> Result<Option<OccupancyRecord>, AppError> {
        let rows = self
            .select(&[("facility_id", format!("eq.{facility_id}"))])
            .await?;
        Ok(rows.into_iter().next().and_then(EstimateRow::into_record))
    }

    async fn get_many(
        &self,
        facility_ids: &[String],
    ) -> Result<HashMap<String, OccupancyRecord>, AppError> {
        if facility_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let quoted: Vec<String> = facility_ids.iter().map(|id| format!("\"{id}\"")).collect();
        let rows = self
            .select(&[("facility_id", format!("in.({})", quoted.join(",")))])
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(EstimateRow::into_record)
            .map(|r| (r.facility_id.clone(), r))
            .collect())
    }

    async fn put(&self, mut record: OccupancyRecord) -> Result<(), AppError> {
        Self::stamp(&mut record, OffsetDateTime::now_utc());
        let current = self.get(&record.facility_id).await?;
        if !write_is_monotonic(current.as_ref(), &record) {
            return Ok(());
        }
        self.upsert(vec![EstimateRow::from_record(record)]).await
    }

    async fn put_with_priority(
        &self,
        mut record: OccupancyRecord,
        ttl: Duration,
    ) -> Result<WriteOutcome, AppError> {
        let now = OffsetDateTime::now_utc();
        Self::stamp(&mut record, now);
        // Read-then-upsert: best effort across processes, the single upsert
        // is the atomicity unit.
        let current = self.get(&record.facility_id).await?;
        if !write_allowed(current.as_ref(), &record, ttl, now)
            || !write_is_monotonic(current.as_ref(), &record)
        {
            return Ok(WriteOutcome::Superseded);
        }
        self.upsert(vec![EstimateRow::from_record(record)]).await?;
        Ok(WriteOutcome::Stored)
    }

    async fn get_in_bounds(
        &self,
        bounds: &GeoBounds,
    ) -> Result<Option<HashMap<String, OccupancyRecord>>, AppError> {
        let rows = self
            .select(&[
                ("lat", format!("gte.{}", bounds.min_lat)),
                ("lat", format!("lte.{}", bounds.max_lat)),
                ("lng", format!("gte.{}", bounds.min_lng)),
                ("lng", format!("lte.{}", bounds.max_lng)),
            ])
            .await?;
        Ok(Some(
            rows.into_iter()
                .filter_map(EstimateRow::into_record)
                .map(|r| (r.facility_id.clone(), r))
                .collect(),
        ))
    }

    async fn record_candidates(&self, candidates: &[FacilityPosition]) -> Result<(), AppError> {
        let rows = candidates
            .iter()
            .map(|c| EstimateRow {
                facility_id: c.facility_id.clone(),
                name: Some(c.name.clone()),
                lat: Some(c.lat),
                lng: Some(c.lng),
                maps_url: c.maps_url.clone(),
                people: None,
                per_person_minutes: None,
                doctors_on_duty: None,
                estimated_wait_minutes: None,
                cameras: None,
                last_updated: None,
                provenance: None,
            })
            .collect();
        self.upsert(rows).await
    }
}
