//! The recommendation orchestrator.
//!
//! For each routed candidate: reuse a fresh cached estimate, otherwise
//! re-estimate from cameras, otherwise synthesize (when enabled), otherwise
//! degrade to no-data. Re-estimation runs under a global concurrency gate
//! with a per-facility time budget. Every failure is contained to its
//! facility; only routing and the final merge can fail the request.

use crate::error::AppError;
use crate::estimator::{self, SyntheticRanges, WaitFormula, estimate_wait};
use crate::freshness::{format_timestamp, record_is_fresh};
use crate::occupancy::CameraOccupancySource;
use crate::ranking::{self, RankedResult};
use crate::routing::FacilityCandidate;
use crate::store::{
    CameraSample, CameraSampleStatus, EstimateStore, FacilityPosition, GeoBounds, OccupancyRecord,
    Provenance, WriteOutcome,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Knobs the orchestrator needs, lifted out of the config once at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub ttl: Duration,
    pub concurrency: usize,
    pub facility_budget: Duration,
    pub formula: WaitFormula,
    pub synthetic_fallback: bool,
    pub ranges: SyntheticRanges,
    pub base_per_person_minutes: u32,
}

impl EngineSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            ttl: config.cache_ttl(),
            concurrency: config.concurrency(),
            facility_budget: config.facility_budget(),
            formula: config.wait_formula(),
            synthetic_fallback: config.synthetic_fallback(),
            ranges: config.synthetic_ranges(),
            base_per_person_minutes: config.base_per_person_minutes(),
        }
    }
}

pub struct RecommendationEngine {
    store: Arc<dyn EstimateStore>,
    source: Arc<CameraOccupancySource>,
    settings: EngineSettings,
    rng: Mutex<StdRng>,
}

impl RecommendationEngine {
    pub fn new(
        store: Arc<dyn EstimateStore>,
        source: Arc<CameraOccupancySource>,
        settings: EngineSettings,
        rng_seed: Option<u64>,
    ) -> Self {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            source,
            settings,
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &Arc<dyn EstimateStore> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn recommend(
        &self,
        candidates: Vec<FacilityCandidate>,
        cameras: &HashMap<String, Vec<String>>,
        limit: usize,
    ) -> Result<Vec<RankedResult>, AppError> {
        self.recommend_at(candidates, cameras, limit, OffsetDateTime::now_utc())
            .await
    }

    /// `recommend` with an injected clock.
    pub async fn recommend_at(
        &self,
        candidates: Vec<FacilityCandidate>,
        cameras: &HashMap<String, Vec<String>>,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<Vec<RankedResult>, AppError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let positions: Vec<FacilityPosition> = candidates
            .iter()
            .map(|c| FacilityPosition {
                facility_id: c.facility_id.clone(),
                name: c.name.clone(),
                lat: c.lat,
                lng: c.lng,
                maps_url: c.maps_url.clone(),
            })
            .collect();
        if let Err(err) = self.store.record_candidates(&positions).await {
            warn!(error = %err, "failed to record candidate metadata, continuing");
        }

        let prefetched = self.prefetch(&candidates).await;

        let gate = Arc::new(Semaphore::new(self.settings.concurrency));
        let tasks = candidates.iter().map(|candidate| {
            let gate = Arc::clone(&gate);
            let cached = prefetched.get(&candidate.facility_id);
            let refs = cameras
                .get(&candidate.facility_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            async move {
                // The budget covers time queued for the gate too, so the
                // whole request is bounded by one budget window.
                let budgeted = async {
                    let Ok(_permit) = gate.acquire().await else {
                        return None;
                    };
                    self.resolve_facility(&candidate.facility_id, cached, refs, now)
                        .await
                };
                match tokio::time::timeout(self.settings.facility_budget, budgeted).await {
                    Ok(record) => record,
                    Err(_) => {
                        warn!(
                            facility = %candidate.facility_id,
                            "facility budget exhausted, degrading to no-data"
                        );
                        None
                    }
                }
            }
        });
        let records = futures::future::join_all(tasks).await;

        let merged: Vec<RankedResult> = candidates
            .into_iter()
            .zip(records)
            .map(|(candidate, record)| merge(candidate, record))
            .collect();
        Ok(ranking::rank(merged, limit))
    }

    /// Bulk-read cached records for all candidates, by bounding box when the
    /// backend supports range queries and by id batch otherwise. A failed
    /// prefetch is treated as an empty cache.
    async fn prefetch(
        &self,
        candidates: &[FacilityCandidate],
    ) -> HashMap<String, OccupancyRecord> {
        if let Some(bounds) = GeoBounds::around(candidates.iter().map(|c| (c.lat, c.lng))) {
            match self.store.get_in_bounds(&bounds).await {
                Ok(Some(records)) => return records,
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "bounding-box prefetch failed, re-estimating all");
                    return HashMap::new();
                }
            }
        }
        let ids: Vec<String> = candidates.iter().map(|c| c.facility_id.clone()).collect();
        match self.store.get_many(&ids).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "batch prefetch failed, re-estimating all");
                HashMap::new()
            }
        }
    }

    /// One facility's estimate, all failures contained to `None`.
    async fn resolve_facility(
        &self,
        facility_id: &str,
        cached: Option<&OccupancyRecord>,
        camera_refs: &[String],
        now: OffsetDateTime,
    ) -> Option<OccupancyRecord> {
        if record_is_fresh(cached, self.settings.ttl, now) {
            let mut record = cached.cloned()?;
            debug!(facility = %facility_id, "reusing fresh cached estimate");
            record.provenance = Provenance::CacheReused;
            return Some(record);
        }

        if !camera_refs.is_empty() {
            match self.source.count_refs(camera_refs).await {
                // Every camera unreachable: no frame backs this estimate, so
                // it is not camera-derived. Fall through.
                Ok(count)
                    if count
                        .cameras
                        .iter()
                        .all(|c| c.status == CameraSampleStatus::NoImage) =>
                {
                    warn!(facility = %facility_id, "no camera delivered a frame");
                }
                Ok(count) => {
                    let record =
                        self.camera_record(facility_id, count.total, count.cameras, cached, now)?;
                    return self.write_through(record, cached).await;
                }
                Err(err) => {
                    warn!(facility = %facility_id, error = %err, "camera estimation failed");
                }
            }
        }

        if self.settings.synthetic_fallback {
            let record = self.synthesize(facility_id, now)?;
            return self.write_through(record, cached).await;
        }

        debug!(facility = %facility_id, "no cameras, no fresh cache, answering no-data");
        None
    }

    fn camera_record(
        &self,
        facility_id: &str,
        people: u32,
        cameras: Vec<CameraSample>,
        cached: Option<&OccupancyRecord>,
        now: OffsetDateTime,
    ) -> Option<OccupancyRecord> {
        let per_person_minutes = if people == 0 {
            self.settings.base_per_person_minutes
        } else {
            self.draw(self.settings.ranges.per_person_min, self.settings.ranges.per_person_max)?
        };
        let doctors_on_duty = match cached {
            Some(record) => record.doctors_on_duty,
            None => self.draw(self.settings.ranges.doctors_min, self.settings.ranges.doctors_max)?,
        };
        Some(OccupancyRecord {
            facility_id: facility_id.to_string(),
            people,
            per_person_minutes,
            doctors_on_duty,
            estimated_wait_minutes: estimate_wait(
                people,
                per_person_minutes,
                doctors_on_duty,
                self.settings.formula,
            ),
            cameras,
            last_updated: format_timestamp(now),
            provenance: Provenance::CameraDerived,
        })
    }

    fn synthesize(&self, facility_id: &str, now: OffsetDateTime) -> Option<OccupancyRecord> {
        let mut rng = self.lock_rng()?;
        Some(estimator::synthesize(
            &mut *rng,
            &self.settings.ranges,
            self.settings.formula,
            facility_id,
            now,
        ))
    }

    fn draw(&self, min: u32, max: u32) -> Option<u32> {
        let mut rng = self.lock_rng()?;
        Some(rng.gen_range(min..=max.max(min)))
    }

    fn lock_rng(&self) -> Option<std::sync::MutexGuard<'_, StdRng>> {
        match self.rng.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("entropy source lock poisoned");
                None
            }
        }
    }

    /// Persist a freshly computed record and decide which record the answer
    /// should carry. A superseded synthetic write yields to whatever won the
    /// race; a failed write falls back to the prior cached record when one
    /// exists, else the computed record is answered unpersisted.
    async fn write_through(
        &self,
        record: OccupancyRecord,
        cached: Option<&OccupancyRecord>,
    ) -> Option<OccupancyRecord> {
        let facility_id = record.facility_id.clone();
        match self
            .store
            .put_with_priority(record.clone(), self.settings.ttl)
            .await
        {
            Ok(WriteOutcome::Stored) => Some(record),
            Ok(WriteOutcome::Superseded) => match self.store.get(&facility_id).await {
                Ok(Some(winner)) => Some(winner),
                Ok(None) => Some(record),
                Err(err) => {
                    warn!(facility = %facility_id, error = %err, "re-read after superseded write failed");
                    Some(record)
                }
            },
            Err(err) => {
                warn!(facility = %facility_id, error = %err, "estimate write failed");
                Some(cached.cloned().unwrap_or(record))
            }
        }
    }
}

fn merge(candidate: FacilityCandidate, record: Option<OccupancyRecord>) -> RankedResult {
    let mut result = RankedResult {
        facility_id: candidate.facility_id,
        facility_name: candidate.name,
        maps_url: candidate.maps_url,
        distance_km: candidate.distance_km,
        eta_minutes: candidate.eta_minutes,
        current_people: None,
        per_person_minutes: None,
        active_doctors: None,
        estimated_wait_minutes: None,
        total_time_minutes: None,
        provenance: None,
        wait_last_updated: None,
        rank: 0,
    };
    if let Some(record) = record {
        result.current_people = Some(record.people);
        result.per_person_minutes = Some(record.per_person_minutes);
        result.active_doctors = Some(record.doctors_on_duty);
        result.estimated_wait_minutes = Some(record.estimated_wait_minutes);
        result.provenance = Some(record.provenance);
        result.wait_last_updated = Some(record.last_updated);
    }
    result
}
