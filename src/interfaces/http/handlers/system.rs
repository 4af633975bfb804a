//! Liveness and clock endpoints

use axum::http::StatusCode;
use axum::Json;

use crate::interfaces::http::dto::{ApiResponse, ServerTime};
use crate::support::time::epoch_millis;

/// `GET /api/v1/ping`
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

/// `GET /api/v1/time`
pub async fn server_time() -> Json<ApiResponse<ServerTime>> {
    Json(ApiResponse::success(ServerTime {
        server_time: epoch_millis(),
    }))
}
