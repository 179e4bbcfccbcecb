use crate::ranking::RankedResult;
use crate::store::{CameraSample, OccupancyRecord, Provenance};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordResponse {
    pub facility_id: String,
    pub people: u32,
    pub per_person_minutes: u32,
    pub doctors_on_duty: u32,
    pub estimated_wait_minutes: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cameras: Vec<CameraSample>,
    pub provenance: Provenance,
    pub last_updated: String,
}

impl From<OccupancyRecord> for RecordResponse {
    fn from(record: OccupancyRecord) -> Self {
        Self {
            facility_id: record.facility_id,
            people: record.people,
            per_person_minutes: record.per_person_minutes,
            doctors_on_duty: record.doctors_on_duty,
            estimated_wait_minutes: record.estimated_wait_minutes,
            cameras: record.cameras,
            provenance: record.provenance,
            last_updated: record.last_updated,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WaitTimeErrorResponse {
    pub error_code: WaitTimeErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitTimeErrorCode {
    NoData,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FrameSuccessResponse {
    pub record: RecordResponse,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FrameErrorResponse {
    pub error_code: FrameErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameErrorCode {
    InvalidRequest,
    CountFailed,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RecommendSuccessResponse {
    pub results: Vec<RankedResult>,
    pub count: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RecommendErrorResponse {
    pub error_code: RecommendErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendErrorCode {
    RoutingUnavailable,
    RoutingFailed,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RegisterSuccessResponse {
    pub facility_id: String,
    pub registered: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CamerasSuccessResponse {
    pub facility_id: String,
    pub cameras: Vec<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CamerasErrorResponse {
    pub error_code: CamerasErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CamerasErrorCode {
    NotRegistered,
    InvalidRequest,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub vision_ready: bool,
    pub store_backend: &'static str,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CameraSampleStatus;
    use serde_json::json;

    #[test]
    fn record_response_serializes_provenance_and_samples() {
        let response = RecordResponse {
            facility_id: "fac-1".to_string(),
            people: 14,
            per_person_minutes: 10,
            doctors_on_duty: 2,
            estimated_wait_minutes: 70,
            cameras: vec![CameraSample {
                source_id: "cam-1".to_string(),
                people: 14,
                status: CameraSampleStatus::Ok,
            }],
            provenance: Provenance::CameraDerived,
            last_updated: "2026-02-01T12:00:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize record response");
        assert_eq!(
            value,
            json!({
                "facility_id": "fac-1",
                "people": 14,
                "per_person_minutes": 10,
                "doctors_on_duty": 2,
                "estimated_wait_minutes": 70,
                "cameras": [
                    {"source_id": "cam-1", "people": 14, "status": "ok"}
                ],
                "provenance": "camera_derived",
                "last_updated": "2026-02-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn record_response_omits_empty_camera_list() {
        let response = RecordResponse {
            facility_id: "fac-1".to_string(),
            people: 30,
            per_person_minutes: 12,
            doctors_on_duty: 5,
            estimated_wait_minutes: 72,
            cameras: Vec::new(),
            provenance: Provenance::SyntheticFallback,
            last_updated: "2026-02-01T12:00:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize record response");
        assert!(value.get("cameras").is_none());
        assert_eq!(value["provenance"], "synthetic_fallback");
    }

    #[test]
    fn wait_time_error_uses_screaming_snake_case_code() {
        let response = WaitTimeErrorResponse {
            error_code: WaitTimeErrorCode::NoData,
            error_message: "no estimate recorded".to_string(),
            timestamp: "2026-02-01T12:00:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize error response");
        assert_eq!(
            value,
            json!({
                "error_code": "NO_DATA",
                "error_message": "no estimate recorded",
                "timestamp": "2026-02-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn recommend_error_codes_serialize() {
        assert_eq!(
            serde_json::to_value(RecommendErrorCode::RoutingUnavailable).expect("serialize"),
            json!("ROUTING_UNAVAILABLE")
        );
        assert_eq!(
            serde_json::to_value(RecommendErrorCode::RoutingFailed).expect("serialize"),
            json!("ROUTING_FAILED")
        );
    }

    #[test]
    fn health_response_serializes_status() {
        let response = HealthSuccessResponse {
            status: HealthStatus::Degraded,
            vision_ready: false,
            store_backend: "memory",
            timestamp: "2026-02-01T12:00:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize health response");
        assert_eq!(
            value,
            json!({
                "status": "degraded",
                "vision_ready": false,
                "store_backend": "memory",
                "timestamp": "2026-02-01T12:00:00Z"
            })
        );
    }
}
