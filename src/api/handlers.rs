use crate::api::responses::{
    CamerasErrorCode, CamerasErrorResponse, CamerasSuccessResponse, FrameErrorCode,
    FrameErrorResponse, FrameSuccessResponse, HealthStatus, HealthSuccessResponse,
    RecommendErrorCode, RecommendErrorResponse, RecommendSuccessResponse, RegisterSuccessResponse,
    WaitTimeErrorCode, WaitTimeErrorResponse,
};
use crate::error::AppError;
use crate::estimator::estimate_wait;
use crate::freshness::format_timestamp;
use crate::occupancy::CameraFrame;
use crate::routing;
use crate::state::AppState;
use crate::store::{OccupancyRecord, Provenance};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Deserialize)]
pub struct FrameUpload {
    #[serde(default)]
    pub source_id: Option<String>,
    pub image_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct CameraFrameRequest {
    pub facility_id: String,
    pub frames: Vec<FrameUpload>,
    #[serde(default)]
    pub per_person_minutes: Option<u32>,
    #[serde(default)]
    pub doctors_on_duty: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub radius_m: Option<f64>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Per-facility camera references, shadowing the registry for this
    /// request only.
    #[serde(default)]
    pub cameras: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterCamerasRequest {
    pub facility_id: String,
    pub cameras: Vec<String>,
}

pub enum WaitTimeResponse {
    Success(crate::api::responses::RecordResponse),
    Error {
        status: StatusCode,
        body: WaitTimeErrorResponse,
    },
}

impl IntoResponse for WaitTimeResponse {
    fn into_response(self) -> Response {
        match self {
            WaitTimeResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            WaitTimeResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_wait_time(
    State(state): State<Arc<AppState>>,
    Path(facility_id): Path<String>,
) -> impl IntoResponse {
    build_wait_time_response(state, &facility_id, OffsetDateTime::now_utc()).await
}

pub enum FrameResponse {
    Success(FrameSuccessResponse),
    Error {
        status: StatusCode,
        body: FrameErrorResponse,
    },
}

impl IntoResponse for FrameResponse {
    fn into_response(self) -> Response {
        match self {
            FrameResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            FrameResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn post_camera_frame(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CameraFrameRequest>,
) -> impl IntoResponse {
    build_frame_response(state, request, OffsetDateTime::now_utc()).await
}

pub enum RecommendResponse {
    Success(RecommendSuccessResponse),
    Error {
        status: StatusCode,
        body: RecommendErrorResponse,
    },
}

impl IntoResponse for RecommendResponse {
    fn into_response(self) -> Response {
        match self {
            RecommendResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            RecommendResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn post_recommend(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecommendRequest>,
) -> impl IntoResponse {
    build_recommend_response(state, request, OffsetDateTime::now_utc()).await
}

pub enum CamerasResponse {
    Registered(RegisterSuccessResponse),
    Listed(CamerasSuccessResponse),
    Error {
        status: StatusCode,
        body: CamerasErrorResponse,
    },
}

impl IntoResponse for CamerasResponse {
    fn into_response(self) -> Response {
        match self {
            CamerasResponse::Registered(body) => (StatusCode::OK, Json(body)).into_response(),
            CamerasResponse::Listed(body) => (StatusCode::OK, Json(body)).into_response(),
            CamerasResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn post_register_cameras(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterCamerasRequest>,
) -> impl IntoResponse {
    build_register_response(state, request, OffsetDateTime::now_utc()).await
}

pub async fn get_cameras(
    State(state): State<Arc<AppState>>,
    Path(facility_id): Path<String>,
) -> impl IntoResponse {
    build_cameras_response(state, &facility_id, OffsetDateTime::now_utc()).await
}

pub async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(build_health_response(&state, OffsetDateTime::now_utc()))
}

async fn build_wait_time_response(
    state: Arc<AppState>,
    facility_id: &str,
    now: OffsetDateTime,
) -> WaitTimeResponse {
    match state.store.get(facility_id).await {
        Ok(Some(record)) => WaitTimeResponse::Success(record.into()),
        Ok(None) => WaitTimeResponse::Error {
            status: StatusCode::NOT_FOUND,
            body: WaitTimeErrorResponse {
                error_code: WaitTimeErrorCode::NoData,
                error_message: format!("no estimate recorded for {facility_id}"),
                timestamp: format_timestamp(now),
            },
        },
        Err(err) => {
            error!(facility = %facility_id, error = %err, "wait-time lookup failed");
            WaitTimeResponse::Error {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: WaitTimeErrorResponse {
                    error_code: WaitTimeErrorCode::InternalError,
                    error_message: INTERNAL_ERROR_MESSAGE.to_string(),
                    timestamp: format_timestamp(now),
                },
            }
        }
    }
}

async fn build_frame_response(
    state: Arc<AppState>,
    request: CameraFrameRequest,
    now: OffsetDateTime,
) -> FrameResponse {
    if request.facility_id.is_empty() {
        return frame_invalid("facility_id must not be empty", now);
    }
    if request.frames.is_empty() {
        return frame_invalid("at least one frame is required", now);
    }

    let mut frames = Vec::with_capacity(request.frames.len());
    for (index, upload) in request.frames.iter().enumerate() {
        let bytes = match BASE64.decode(&upload.image_base64) {
            Ok(bytes) => bytes,
            Err(err) => {
                return frame_invalid(&format!("frame {} is not valid base64: {err}", index + 1), now);
            }
        };
        frames.push(CameraFrame {
            source_id: upload
                .source_id
                .clone()
                .unwrap_or_else(|| format!("cam-{}", index + 1)),
            bytes,
        });
    }

    let count = match state.source.count_frames(&frames).await {
        Ok(count) => count,
        Err(err) => {
            error!(facility = %request.facility_id, error = %err, "frame counting failed");
            return FrameResponse::Error {
                status: StatusCode::BAD_GATEWAY,
                body: FrameErrorResponse {
                    error_code: FrameErrorCode::CountFailed,
                    error_message: err.to_string(),
                    timestamp: format_timestamp(now),
                },
            };
        }
    };

    let settings = state.engine.settings();
    let per_person_minutes = request
        .per_person_minutes
        .unwrap_or(settings.base_per_person_minutes);
    let doctors_on_duty = match request.doctors_on_duty {
        Some(doctors) => doctors,
        None => match state.store.get(&request.facility_id).await {
            Ok(Some(prior)) => prior.doctors_on_duty,
            _ => 1,
        },
    };

    let record = OccupancyRecord {
        facility_id: request.facility_id.clone(),
        people: count.total,
        per_person_minutes,
        doctors_on_duty,
        estimated_wait_minutes: estimate_wait(
            count.total,
            per_person_minutes,
            doctors_on_duty,
            settings.formula,
        ),
        cameras: count.cameras,
        last_updated: format_timestamp(now),
        provenance: Provenance::CameraDerived,
    };

    match state
        .store
        .put_with_priority(record.clone(), settings.ttl)
        .await
    {
        // Camera-derived writes always pass the priority gate; a monotonic
        // drop still answers with the computed record.
        Ok(_) => FrameResponse::Success(FrameSuccessResponse {
            record: record.into(),
            timestamp: format_timestamp(now),
        }),
        Err(err) => {
            error!(facility = %request.facility_id, error = %err, "frame estimate write failed");
            FrameResponse::Error {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: FrameErrorResponse {
                    error_code: FrameErrorCode::InternalError,
                    error_message: INTERNAL_ERROR_MESSAGE.to_string(),
                    timestamp: format_timestamp(now),
                },
            }
        }
    }
}

fn frame_invalid(message: &str, now: OffsetDateTime) -> FrameResponse {
    FrameResponse::Error {
        status: StatusCode::BAD_REQUEST,
        body: FrameErrorResponse {
            error_code: FrameErrorCode::InvalidRequest,
            error_message: message.to_string(),
            timestamp: format_timestamp(now),
        },
    }
}

async fn build_recommend_response(
    state: Arc<AppState>,
    request: RecommendRequest,
    now: OffsetDateTime,
) -> RecommendResponse {
    let Some(router) = state.routing.as_ref() else {
        return RecommendResponse::Error {
            status: StatusCode::BAD_GATEWAY,
            body: RecommendErrorResponse {
                error_code: RecommendErrorCode::RoutingUnavailable,
                error_message: "no routing collaborator is configured".to_string(),
                timestamp: format_timestamp(now),
            },
        };
    };

    let radius_m = request.radius_m.unwrap_or(state.radius_m);
    let limit = request
        .limit
        .filter(|&n| n > 0)
        .unwrap_or(state.default_limit);

    let mut candidates = match router
        .nearby_facilities(request.lat, request.lng, radius_m, state.max_candidates)
        .await
    {
        Ok(candidates) => candidates,
        Err(err) => return routing_failed(err, now),
    };

    if candidates.is_empty() {
        return RecommendResponse::Success(RecommendSuccessResponse {
            results: Vec::new(),
            count: 0,
            timestamp: format_timestamp(now),
        });
    }

    let legs = match router
        .route_matrix(request.lat, request.lng, &candidates)
        .await
    {
        Ok(legs) => legs,
        Err(err) => return routing_failed(err, now),
    };
    routing::apply_route_matrix(&mut candidates, &legs);

    let cameras = state.merged_cameras(&request.cameras).await;
    match state
        .engine
        .recommend_at(candidates, &cameras, limit, now)
        .await
    {
        Ok(results) => RecommendResponse::Success(RecommendSuccessResponse {
            count: results.len(),
            results,
            timestamp: format_timestamp(now),
        }),
        Err(err) => {
            error!(error = %err, "recommendation engine failed");
            RecommendResponse::Error {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: RecommendErrorResponse {
                    error_code: RecommendErrorCode::InternalError,
                    error_message: INTERNAL_ERROR_MESSAGE.to_string(),
                    timestamp: format_timestamp(now),
                },
            }
        }
    }
}

fn routing_failed(err: AppError, now: OffsetDateTime) -> RecommendResponse {
    error!(error = %err, "routing collaborator failed");
    RecommendResponse::Error {
        status: StatusCode::BAD_GATEWAY,
        body: RecommendErrorResponse {
            error_code: RecommendErrorCode::RoutingFailed,
            error_message: err.to_string(),
            timestamp: format_timestamp(now),
        },
    }
}

async fn build_register_response(
    state: Arc<AppState>,
    request: RegisterCamerasRequest,
    now: OffsetDateTime,
) -> CamerasResponse {
    if request.facility_id.is_empty() {
        return CamerasResponse::Error {
            status: StatusCode::BAD_REQUEST,
            body: CamerasErrorResponse {
                error_code: CamerasErrorCode::InvalidRequest,
                error_message: "facility_id must not be empty".to_string(),
                timestamp: format_timestamp(now),
            },
        };
    }
    let registered = state
        .register_cameras(&request.facility_id, request.cameras)
        .await;
    CamerasResponse::Registered(RegisterSuccessResponse {
        facility_id: request.facility_id,
        registered,
        timestamp: format_timestamp(now),
    })
}

async fn build_cameras_response(
    state: Arc<AppState>,
    facility_id: &str,
    now: OffsetDateTime,
) -> CamerasResponse {
    match state.cameras_for(facility_id).await {
        Some(cameras) => CamerasResponse::Listed(CamerasSuccessResponse {
            facility_id: facility_id.to_string(),
            cameras,
            timestamp: format_timestamp(now),
        }),
        None => CamerasResponse::Error {
            status: StatusCode::NOT_FOUND,
            body: CamerasErrorResponse {
                error_code: CamerasErrorCode::NotRegistered,
                error_message: format!("no cameras registered for {facility_id}"),
                timestamp: format_timestamp(now),
            },
        },
    }
}

fn build_health_response(state: &AppState, now: OffsetDateTime) -> HealthSuccessResponse {
    let vision_ready = state.vision_ready();
    HealthSuccessResponse {
        status: if vision_ready {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        },
        vision_ready,
        store_backend: state.backend,
        timestamp: format_timestamp(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{FacilityCandidate, RouteLeg, RoutingProvider};
    use crate::state::testing;
    use crate::store::CameraSampleStatus;
    use async_trait::async_trait;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-02-01 12:00:00 UTC);

    struct CannedRouting {
        candidates: Vec<FacilityCandidate>,
        legs: HashMap<usize, RouteLeg>,
        fail: bool,
    }

    #[async_trait]
    impl RoutingProvider for CannedRouting {
        async fn nearby_facilities(
            &self,
            _lat: f64,
            _lng: f64,
            _radius_m: f64,
            _max_results: usize,
        ) -> Result<Vec<FacilityCandidate>, AppError> {
            if self.fail {
                return Err(AppError::Routing("canned failure".to_string()));
            }
            Ok(self.candidates.clone())
        }

        async fn route_matrix(
            &self,
            _origin_lat: f64,
            _origin_lng: f64,
            _destinations: &[FacilityCandidate],
        ) -> Result<HashMap<usize, RouteLeg>, AppError> {
            Ok(self.legs.clone())
        }
    }

    fn candidate(id: &str) -> FacilityCandidate {
        FacilityCandidate {
            facility_id: id.to_string(),
            name: format!("Hospital {id}"),
            lat: 3.1,
            lng: 101.6,
            maps_url: None,
            distance_km: None,
            eta_minutes: None,
        }
    }

    fn recommend_request() -> RecommendRequest {
        RecommendRequest {
            lat: 3.1,
            lng: 101.6,
            radius_m: None,
            limit: None,
            cameras: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn wait_time_for_unknown_facility_is_not_found() {
        let state = Arc::new(testing::state());

        let response = build_wait_time_response(state, "fac-unknown", NOW).await;

        let WaitTimeResponse::Error { status, body } = response else {
            panic!("expected error response");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error_code, WaitTimeErrorCode::NoData);
        assert_eq!(body.timestamp, "2026-02-01T12:00:00Z");
    }

    #[tokio::test]
    async fn wait_time_answers_the_stored_record() {
        let state = Arc::new(testing::state());
        state
            .store
            .put(OccupancyRecord {
                facility_id: "fac-1".to_string(),
                people: 14,
                per_person_minutes: 10,
                doctors_on_duty: 2,
                estimated_wait_minutes: 70,
                cameras: Vec::new(),
                last_updated: "2026-02-01T11:59:00Z".to_string(),
                provenance: Provenance::CameraDerived,
            })
            .await
            .expect("seed");

        let response = build_wait_time_response(state, "fac-1", NOW).await;

        let WaitTimeResponse::Success(body) = response else {
            panic!("expected success response");
        };
        assert_eq!(body.facility_id, "fac-1");
        assert_eq!(body.estimated_wait_minutes, 70);
    }

    #[tokio::test]
    async fn frame_upload_counts_and_persists() {
        let state = Arc::new(testing::state());
        let request = CameraFrameRequest {
            facility_id: "fac-1".to_string(),
            frames: vec![FrameUpload {
                source_id: Some("entrance".to_string()),
                image_base64: BASE64.encode([7u8; 64]),
            }],
            per_person_minutes: None,
            doctors_on_duty: Some(2),
        };

        let response = build_frame_response(Arc::clone(&state), request, NOW).await;

        let FrameResponse::Success(body) = response else {
            panic!("expected success response");
        };
        // first byte 7 -> 7 people, ceil(7/2)*10 = 40
        assert_eq!(body.record.people, 7);
        assert_eq!(body.record.estimated_wait_minutes, 40);
        assert_eq!(body.record.cameras[0].source_id, "entrance");
        let stored = state
            .store
            .get("fac-1")
            .await
            .expect("get")
            .expect("record");
        assert_eq!(stored.provenance, Provenance::CameraDerived);
        assert_eq!(stored.last_updated, "2026-02-01T12:00:00Z");
    }

    #[tokio::test]
    async fn frame_upload_rejects_invalid_base64() {
        let state = Arc::new(testing::state());
        let request = CameraFrameRequest {
            facility_id: "fac-1".to_string(),
            frames: vec![FrameUpload {
                source_id: None,
                image_base64: "not-base64!!!".to_string(),
            }],
            per_person_minutes: None,
            doctors_on_duty: None,
        };

        let response = build_frame_response(state, request, NOW).await;

        let FrameResponse::Error { status, body } = response else {
            panic!("expected error response");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_code, FrameErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn frame_upload_requires_frames() {
        let state = Arc::new(testing::state());
        let request = CameraFrameRequest {
            facility_id: "fac-1".to_string(),
            frames: Vec::new(),
            per_person_minutes: None,
            doctors_on_duty: None,
        };

        let response = build_frame_response(state, request, NOW).await;

        let FrameResponse::Error { status, .. } = response else {
            panic!("expected error response");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_frame_is_recorded_as_no_image() {
        let state = Arc::new(testing::state());
        let request = CameraFrameRequest {
            facility_id: "fac-1".to_string(),
            frames: vec![FrameUpload {
                source_id: None,
                image_base64: String::new(),
            }],
            per_person_minutes: None,
            doctors_on_duty: None,
        };

        let response = build_frame_response(state, request, NOW).await;

        let FrameResponse::Success(body) = response else {
            panic!("expected success response");
        };
        assert_eq!(body.record.people, 0);
        assert_eq!(body.record.cameras[0].status, CameraSampleStatus::NoImage);
    }

    #[tokio::test]
    async fn recommend_without_routing_is_bad_gateway() {
        let state = Arc::new(testing::state());

        let response = build_recommend_response(state, recommend_request(), NOW).await;

        let RecommendResponse::Error { status, body } = response else {
            panic!("expected error response");
        };
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error_code, RecommendErrorCode::RoutingUnavailable);
    }

    #[tokio::test]
    async fn routing_failure_is_request_fatal() {
        let routing: Arc<dyn RoutingProvider> = Arc::new(CannedRouting {
            candidates: Vec::new(),
            legs: HashMap::new(),
            fail: true,
        });
        let state = Arc::new(testing::state_with(
            crate::occupancy::mock::MockCameraFetcher::new(),
            Some(routing),
        ));

        let response = build_recommend_response(state, recommend_request(), NOW).await;

        let RecommendResponse::Error { status, body } = response else {
            panic!("expected error response");
        };
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error_code, RecommendErrorCode::RoutingFailed);
    }

    #[tokio::test]
    async fn recommend_ranks_routed_candidates() {
        let routing: Arc<dyn RoutingProvider> = Arc::new(CannedRouting {
            candidates: vec![candidate("fac-a"), candidate("fac-b")],
            legs: HashMap::from([
                (
                    0,
                    RouteLeg {
                        distance_km: Some(2.0),
                        eta_minutes: Some(10.0),
                    },
                ),
                (
                    1,
                    RouteLeg {
                        distance_km: Some(1.0),
                        eta_minutes: Some(5.0),
                    },
                ),
            ]),
            fail: false,
        });
        let state = Arc::new(testing::state_with(
            crate::occupancy::mock::MockCameraFetcher::new(),
            Some(routing),
        ));

        let response = build_recommend_response(state, recommend_request(), NOW).await;

        let RecommendResponse::Success(body) = response else {
            panic!("expected success response");
        };
        assert_eq!(body.count, 2);
        assert_eq!(body.results[0].rank, 1);
        assert_eq!(body.results[1].rank, 2);
        // Synthetic fallback is enabled, so both carry a wait and total.
        assert!(body.results.iter().all(|r| r.total_time_minutes.is_some()));
    }

    #[tokio::test]
    async fn camera_registry_round_trips() {
        let state = Arc::new(testing::state());
        let request = RegisterCamerasRequest {
            facility_id: "fac-1".to_string(),
            cameras: vec!["http://cam/1".to_string(), "http://cam/2".to_string()],
        };

        let response = build_register_response(Arc::clone(&state), request, NOW).await;
        let CamerasResponse::Registered(body) = response else {
            panic!("expected registered response");
        };
        assert_eq!(body.registered, 2);

        let response = build_cameras_response(Arc::clone(&state), "fac-1", NOW).await;
        let CamerasResponse::Listed(body) = response else {
            panic!("expected listed response");
        };
        assert_eq!(body.cameras.len(), 2);

        let response = build_cameras_response(state, "fac-9", NOW).await;
        let CamerasResponse::Error { status, body } = response else {
            panic!("expected error response");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error_code, CamerasErrorCode::NotRegistered);
    }

    #[tokio::test]
    async fn health_reports_backend_and_readiness() {
        let state = testing::state();

        let body = build_health_response(&state, NOW);

        assert_eq!(body.store_backend, "memory");
        assert_eq!(body.timestamp, "2026-02-01T12:00:00Z");
        assert_eq!(body.vision_ready, matches!(body.status, HealthStatus::Ok));
    }
}
