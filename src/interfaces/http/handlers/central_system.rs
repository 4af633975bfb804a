//! Central System list endpoints backed by the query bridge

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde_json::{Map, Value};
use tracing::info;

use super::charge_points::{json_body, status_for};
use super::ApiState;
use crate::interfaces::http::dto::ApiResponse;

type ApiResult = Result<Json<ApiResponse<Value>>, (StatusCode, Json<ApiResponse<Value>>)>;

/// Token of an `Authorization: Bearer ...` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// `GET /api/v1/CentralSystem/{endpoint}?identity=...&dateFrom=...`
pub async fn central_system_get(
    State(state): State<ApiState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let filter: Map<String, Value> = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    query(&state, &headers, &endpoint, Value::Object(filter)).await
}

/// `POST /api/v1/CentralSystem/{endpoint}` with a JSON filter
pub async fn central_system_post(
    State(state): State<ApiState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let filter = json_body(&body)?;
    query(&state, &headers, &endpoint, filter).await
}

async fn query(state: &ApiState, headers: &HeaderMap, endpoint: &str, filter: Value) -> ApiResult {
    info!(endpoint, "📋 Central System query");
    match state
        .dispatcher
        .query_endpoint(bearer_token(headers), endpoint, filter)
        .await
    {
        Ok(rows) => Ok(Json(ApiResponse::success(rows))),
        Err(e) => Err((status_for(&e), Json(ApiResponse::error(e.to_string())))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_read_from_authorization() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);
    }
}
