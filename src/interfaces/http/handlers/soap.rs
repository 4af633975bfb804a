//! OCPP-S endpoint
//!
//! SOAP charge points POST their requests to any path under `/Ocpp`; the reply
//! envelope (or fault) is the HTTP response body.

use std::net::SocketAddr;

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::ApiState;
use crate::codec::soap;

/// Largest envelope accepted from a charge point
const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

/// `POST /Ocpp/...`
pub async fn soap_endpoint(State(state): State<ApiState>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let body = match to_bytes(request.into_body(), MAX_ENVELOPE_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(peer, error = %e, "SOAP request body rejected");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let body = String::from_utf8_lossy(&body);

    let reply = state.dispatcher.handle_soap(&body, &peer).await;
    ([(header::CONTENT_TYPE, soap::CONTENT_TYPE)], reply).into_response()
}
