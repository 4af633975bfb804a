//! HTTP router: management API, SOAP endpoint and metrics

use axum::routing::{get, post};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::central_system::{central_system_get, central_system_post};
use super::handlers::charge_points::{execute_get, execute_post, list_charge_points};
use super::handlers::metrics::{http_metrics_middleware, prometheus_metrics, MetricsState};
use super::handlers::soap::soap_endpoint;
use super::handlers::system::{ping, server_time};
use super::handlers::ApiState;
use crate::application::SharedDispatcher;

/// Build the HTTP router. `/metrics` is only mounted when a Prometheus
/// recorder is installed.
pub fn create_api_router(dispatcher: SharedDispatcher, prometheus: Option<PrometheusHandle>) -> Router {
    let state = ApiState { dispatcher };

    let api = Router::new()
        .route("/api/v1/ping", get(ping))
        .route("/api/v1/time", get(server_time))
        .route("/api/v1/ChargePointList", get(list_charge_points))
        .route("/api/v1/CentralSystem/ChargePointList", get(list_charge_points))
        .route(
            "/api/v1/CentralSystem/{endpoint}",
            get(central_system_get).post(central_system_post),
        )
        .route(
            "/api/v1/ChargePoint/{identity}/{operation}",
            get(execute_get).post(execute_post),
        )
        .route("/Ocpp", post(soap_endpoint))
        .route("/Ocpp/{*path}", post(soap_endpoint))
        .with_state(state);

    let router = match prometheus {
        Some(handle) => api.merge(
            Router::new()
                .route("/metrics", get(prometheus_metrics))
                .with_state(MetricsState { handle }),
        ),
        None => api,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
