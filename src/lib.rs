//! # OCPP Central System
//!
//! Protocol engine for OCPP 1.5 (SOAP) and 1.6 (JSON) charge points.
//!
//! ## Architecture
//!
//! - **domain**: Canonical messages, faults, operation catalog, typed records
//! - **codec**: OCPP-J frame and OCPP-S envelope encoding
//! - **application**: Sessions, correlation, registry and the dispatcher
//! - **infrastructure**: Backend query bridge, SOAP push and webhook clients
//! - **interfaces**: WebSocket server, management API and SOAP endpoint
//! - **support**: Errors, shutdown and time helpers

pub mod application;
pub mod codec;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod support;

pub use config::{default_config_path, AppConfig};

pub use infrastructure::{init_database, DatabaseConfig};

pub use interfaces::http::create_api_router;
