use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub mod handlers;
pub mod responses;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/camera-frame", post(handlers::post_camera_frame))
        .route("/wait-time/{facility_id}", get(handlers::get_wait_time))
        .route("/recommend", post(handlers::post_recommend))
        .route("/cameras/register", post(handlers::post_register_cameras))
        .route("/cameras/{facility_id}", get(handlers::get_cameras))
        .route("/api/health", get(handlers::get_health))
        .with_state(state)
}
