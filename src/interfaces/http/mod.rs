//! HTTP surface
//!
//! - `router`: Route table with CORS, tracing and request metrics
//! - `handlers`: Management API, OCPP-S endpoint, Prometheus scrape
//! - `dto`: Response envelope

pub mod dto;
pub mod handlers;
pub mod router;

pub use router::create_api_router;
