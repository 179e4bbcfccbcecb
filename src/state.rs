//! Shared state handed to every request handler.

use crate::engine::RecommendationEngine;
use crate::occupancy::CameraOccupancySource;
use crate::routing::RoutingProvider;
use crate::store::EstimateStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct AppState {
    pub store: Arc<dyn EstimateStore>,
    pub source: Arc<CameraOccupancySource>,
    pub engine: Arc<RecommendationEngine>,
    /// Absent when no routing key is configured; recommendations then
    /// answer 502 instead of guessing.
    pub routing: Option<Arc<dyn RoutingProvider>>,
    /// Camera references registered per facility, consulted when a
    /// recommendation request does not carry its own.
    cameras: RwLock<HashMap<String, Vec<String>>>,
    pub default_limit: usize,
    pub max_candidates: usize,
    pub radius_m: f64,
    pub backend: &'static str,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn EstimateStore>,
        source: Arc<CameraOccupancySource>,
        engine: Arc<RecommendationEngine>,
        routing: Option<Arc<dyn RoutingProvider>>,
        default_limit: usize,
        max_candidates: usize,
        radius_m: f64,
        backend: &'static str,
    ) -> Self {
        Self {
            store,
            source,
            engine,
            routing,
            cameras: RwLock::new(HashMap::new()),
            default_limit,
            max_candidates,
            radius_m,
            backend,
        }
    }

    /// Replace the registered camera set for one facility.
    pub async fn register_cameras(&self, facility_id: &str, references: Vec<String>) -> usize {
        let count = references.len();
        self.cameras
            .write()
            .await
            .insert(facility_id.to_string(), references);
        count
    }

    pub async fn cameras_for(&self, facility_id: &str) -> Option<Vec<String>> {
        self.cameras.read().await.get(facility_id).cloned()
    }

    /// Registry cameras with per-facility request overrides layered on top.
    pub async fn merged_cameras(
        &self,
        overrides: &HashMap<String, Vec<String>>,
    ) -> HashMap<String, Vec<String>> {
        let mut merged = self.cameras.read().await.clone();
        for (facility_id, references) in overrides {
            merged.insert(facility_id.clone(), references.clone());
        }
        merged
    }

    pub fn vision_ready(&self) -> bool {
        self.source.counter().ready()
    }
}
