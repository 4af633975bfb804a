//! Charge point listing and command execution

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{Map, Value};
use tracing::info;

use super::ApiState;
use crate::application::session::SessionSnapshot;
use crate::application::DispatchError;
use crate::domain::OperationCatalog;
use crate::interfaces::http::dto::ApiResponse;

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<T>>)>;

/// HTTP status reported for a failed command
pub fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::UnknownChargePoint(_) | DispatchError::Offline(_) => StatusCode::NOT_FOUND,
        DispatchError::Validation(_) | DispatchError::Rejected(_) => StatusCode::BAD_REQUEST,
        DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::Transport(_) | DispatchError::SessionClosed(_) => StatusCode::BAD_GATEWAY,
        DispatchError::BackendDisabled => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Backend { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// `GET /api/v1/ChargePointList`
pub async fn list_charge_points(State(state): State<ApiState>) -> Json<ApiResponse<Vec<SessionSnapshot>>> {
    Json(ApiResponse::success(state.dispatcher.charge_point_list()))
}

/// `GET /api/v1/ChargePoint/{identity}/{operation}?key=value...`
///
/// Values are typed by the operation's field kinds, so `connectorId=1`
/// is sent as a number while `idTag=123` stays a string.
pub async fn execute_get(
    State(state): State<ApiState>,
    Path((identity, operation)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Value> {
    let payload = OperationCatalog::global().payload_from_text(&operation, params);
    execute(&state, &identity, &operation, payload).await
}

/// JSON request body; an empty body is an empty object.
pub fn json_body(body: &Bytes) -> Result<Value, (StatusCode, Json<ApiResponse<Value>>)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Invalid JSON: {e}"))),
        )
    })
}

/// `POST /api/v1/ChargePoint/{identity}/{operation}` with a JSON body
pub async fn execute_post(
    State(state): State<ApiState>,
    Path((identity, operation)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Value> {
    let payload = json_body(&body)?;
    execute(&state, &identity, &operation, payload).await
}

async fn execute(state: &ApiState, identity: &str, operation: &str, payload: Value) -> ApiResult<Value> {
    info!(identity, operation, "📤 Command requested");
    match state.dispatcher.execute_operation(identity, operation, payload).await {
        Ok(reply) => Ok(Json(ApiResponse::success(reply))),
        Err(e) => Err((status_for(&e), Json(ApiResponse::error(e.to_string())))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CatalogError, ErrorCode, ProtocolFault};

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (DispatchError::UnknownChargePoint("x".into()), StatusCode::NOT_FOUND),
            (DispatchError::Offline("x".into()), StatusCode::NOT_FOUND),
            (
                DispatchError::Validation(CatalogError::UnknownOperation("Foo".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                DispatchError::Rejected(ProtocolFault::new(ErrorCode::NotSupported, "no")),
                StatusCode::BAD_REQUEST,
            ),
            (DispatchError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (DispatchError::Transport("x".into()), StatusCode::BAD_GATEWAY),
            (DispatchError::SessionClosed("x".into()), StatusCode::BAD_GATEWAY),
            (DispatchError::BackendDisabled, StatusCode::SERVICE_UNAVAILABLE),
            (
                DispatchError::Backend { status: 403, message: "no".into() },
                StatusCode::FORBIDDEN,
            ),
            (
                DispatchError::Backend { status: 42, message: "odd".into() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(status_for(&error), status, "{error}");
        }
    }
}
